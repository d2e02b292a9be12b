//! ElevenLabs-style speech synthesis

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::content::VoiceConfig;
use crate::error::SynthesisError;
use crate::provider::{classify_status, classify_transport, parse_retry_after, SpeechProvider};

const DEFAULT_BASE_URL: &str = "https://api.elevenlabs.io";
const DEFAULT_MODEL: &str = "eleven_multilingual_v2";

pub struct ElevenLabsProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl ElevenLabsProvider {
    pub fn new(client: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl SpeechProvider for ElevenLabsProvider {
    fn id(&self) -> &'static str {
        "elevenlabs"
    }

    async fn synthesize(
        &self,
        text: &str,
        voice: &VoiceConfig,
    ) -> Result<Vec<u8>, SynthesisError> {
        if voice.voice_id.is_empty() {
            return Err(SynthesisError::Permanent(
                "elevenlabs requires a voice_id".to_string(),
            ));
        }
        let model = voice.model.as_deref().unwrap_or(DEFAULT_MODEL);
        let body = json!({
            "text": text,
            "model_id": model,
            "voice_settings": {
                "stability": 0.5,
                "similarity_boost": 0.5,
            },
        });

        let response = self
            .client
            .post(format!(
                "{}/v1/text-to-speech/{}",
                self.base_url, voice.voice_id
            ))
            .header("xi-api-key", &self.api_key)
            .header(reqwest::header::ACCEPT, "audio/mpeg")
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

        debug!(model, voice = %voice.voice_id, "elevenlabs synthesis ok");
        let bytes = response.bytes().await.map_err(classify_transport)?;
        Ok(bytes.to_vec())
    }
}
