//! OpenAI-style speech synthesis

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::content::VoiceConfig;
use crate::error::SynthesisError;
use crate::provider::{classify_status, classify_transport, parse_retry_after, SpeechProvider};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_MODEL: &str = "gpt-4o-mini-tts";

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(client: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Override the API base URL (self-hosted gateways, mock servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl SpeechProvider for OpenAiProvider {
    fn id(&self) -> &'static str {
        "openai"
    }

    async fn synthesize(
        &self,
        text: &str,
        voice: &VoiceConfig,
    ) -> Result<Vec<u8>, SynthesisError> {
        let model = voice.model.as_deref().unwrap_or(DEFAULT_MODEL);
        let body = json!({
            "model": model,
            "voice": voice.voice_id,
            "input": text,
            "response_format": "mp3",
        });

        let response = self
            .client
            .post(format!("{}/v1/audio/speech", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(&response);
            let detail = response.text().await.unwrap_or_default();
            return Err(classify_status(status, retry_after, &detail));
        }

        debug!(model, voice = %voice.voice_id, "openai synthesis ok");
        let bytes = response.bytes().await.map_err(classify_transport)?;
        Ok(bytes.to_vec())
    }
}
