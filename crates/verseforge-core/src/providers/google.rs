//! Google-style speech synthesis
//!
//! REST `text:synthesize` endpoint; audio comes back base64-encoded inside
//! a JSON envelope.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::content::VoiceConfig;
use crate::error::SynthesisError;
use crate::provider::{classify_status, classify_transport, parse_retry_after, SpeechProvider};

const DEFAULT_BASE_URL: &str = "https://texttospeech.googleapis.com";
const DEFAULT_LANGUAGE: &str = "en-US";

pub struct GoogleProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeResponse {
    audio_content: Option<String>,
}

impl GoogleProvider {
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
impl SpeechProvider for GoogleProvider {
    fn id(&self) -> &'static str {
        "google"
    }

    async fn synthesize(
        &self,
        text: &str,
        voice: &VoiceConfig,
    ) -> Result<Vec<u8>, SynthesisError> {
        let language_code = voice.language_code.as_deref().unwrap_or(DEFAULT_LANGUAGE);
        let body = json!({
            "input": { "text": text },
            "voice": {
                "languageCode": language_code,
                "name": voice.voice_id,
            },
            "audioConfig": { "audioEncoding": "MP3" },
        });

        let response = self
            .client
            .post(format!("{}/v1/text:synthesize", self.base_url))
            .query(&[("key", self.api_key.as_str())])
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

        let envelope: SynthesizeResponse =
            response.json().await.map_err(classify_transport)?;
        let encoded = envelope.audio_content.ok_or_else(|| {
            SynthesisError::Permanent("google response missing audioContent".to_string())
        })?;
        let bytes = BASE64.decode(encoded.as_bytes()).map_err(|e| {
            SynthesisError::Permanent(format!("google audioContent not valid base64: {}", e))
        })?;

        debug!(language_code, voice = %voice.voice_id, "google synthesis ok");
        Ok(bytes)
    }
}
