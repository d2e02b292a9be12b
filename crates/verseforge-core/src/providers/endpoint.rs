//! Custom-endpoint speech synthesis
//!
//! Targets self-hosted inference endpoints that accept `{"inputs": text}`
//! and answer `{"audio_base64": ..., "sampling_rate": ...}` (the Hugging
//! Face inference endpoint shape).

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::content::VoiceConfig;
use crate::error::SynthesisError;
use crate::provider::{classify_status, classify_transport, parse_retry_after, SpeechProvider};

pub struct EndpointProvider {
    client: reqwest::Client,
    url: String,
    token: String,
}

#[derive(Deserialize)]
struct EndpointResponse {
    audio_base64: Option<String>,
}

impl EndpointProvider {
    pub fn new(
        client: reqwest::Client,
        url: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            token: token.into(),
        }
    }
}

#[async_trait]
impl SpeechProvider for EndpointProvider {
    fn id(&self) -> &'static str {
        "endpoint"
    }

    async fn synthesize(
        &self,
        text: &str,
        _voice: &VoiceConfig,
    ) -> Result<Vec<u8>, SynthesisError> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(&json!({ "inputs": text }))
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(&response);
            let detail = response.text().await.unwrap_or_default();
            return Err(classify_status(status, retry_after, &detail));
        }

        let envelope: EndpointResponse = response.json().await.map_err(classify_transport)?;
        let encoded = envelope.audio_base64.ok_or_else(|| {
            SynthesisError::Permanent("endpoint returned no audio_base64".to_string())
        })?;
        let bytes = BASE64.decode(encoded.as_bytes()).map_err(|e| {
            SynthesisError::Permanent(format!("endpoint audio_base64 invalid: {}", e))
        })?;

        debug!(url = %self.url, "endpoint synthesis ok");
        Ok(bytes)
    }
}
