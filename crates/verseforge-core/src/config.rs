//! Run configuration
//!
//! One JSON document configures a run: provider choice, voice, persistence
//! policy, layout, and rate limits. Credentials come from the environment
//! and are checked before any task starts, so a missing key aborts the run
//! up front instead of failing every item.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::content::VoiceConfig;
use crate::error::ConfigError;
use crate::orchestrator::{RunPolicy, StorageLayout};
use crate::provider::SpeechProvider;
use crate::providers::{
    ElevenLabsProvider, EndpointProvider, GoogleProvider, OpenAiProvider, StubProvider,
};
use crate::rate_limit::RateLimiterConfig;

pub const OPENAI_KEY_VAR: &str = "OPENAI_API_KEY";
pub const ELEVENLABS_KEY_VAR: &str = "ELEVENLABS_API_KEY";
pub const GOOGLE_KEY_VAR: &str = "GOOGLE_TTS_API_KEY";
pub const ENDPOINT_URL_VAR: &str = "VERSEFORGE_TTS_ENDPOINT";
pub const ENDPOINT_TOKEN_VAR: &str = "VERSEFORGE_TTS_TOKEN";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    ElevenLabs,
    Google,
    Endpoint,
    /// In-process stub; no credentials, deterministic output.
    Stub,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub provider: ProviderKind,
    pub voice: VoiceConfig,

    pub project: String,
    pub quest: String,
    #[serde(default = "default_language_code")]
    pub language_code: String,
    #[serde(default = "default_language_name")]
    pub language_name: String,
    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default = "default_bucket")]
    pub bucket: String,
    #[serde(default = "default_content_folder")]
    pub content_folder: String,
    #[serde(default)]
    pub local_dir: Option<PathBuf>,

    #[serde(default)]
    pub save_local: bool,
    #[serde(default = "default_true")]
    pub persist_remote: bool,
    #[serde(default = "default_true")]
    pub reuse_existing: bool,
    #[serde(default)]
    pub force_regenerate: bool,

    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: usize,
}

fn default_language_code() -> String {
    "en".to_string()
}

fn default_language_name() -> String {
    "English".to_string()
}

fn default_bucket() -> String {
    "narration".to_string()
}

fn default_content_folder() -> String {
    "audio".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_concurrent() -> usize {
    RateLimiterConfig::default().max_concurrent_requests
}

fn default_requests_per_minute() -> usize {
    RateLimiterConfig::default().requests_per_minute
}

impl RunConfig {
    pub fn rate_limiter_config(&self) -> RateLimiterConfig {
        RateLimiterConfig {
            max_concurrent_requests: self.max_concurrent_requests,
            requests_per_minute: self.requests_per_minute,
        }
    }

    pub fn run_policy(&self) -> RunPolicy {
        RunPolicy {
            save_local: self.save_local,
            persist_remote: self.persist_remote,
            reuse_existing: self.reuse_existing,
            force_regenerate: self.force_regenerate,
        }
    }

    pub fn storage_layout(&self) -> StorageLayout {
        StorageLayout {
            bucket: self.bucket.clone(),
            content_folder: format!("{}/{}", self.content_folder, self.language_code),
            local_dir: self.local_dir.clone(),
            language_code: self.language_code.clone(),
        }
    }

    /// Validate policy combinations that cannot work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.save_local && self.local_dir.is_none() {
            return Err(ConfigError::Invalid(
                "save_local requires local_dir".to_string(),
            ));
        }
        if self.voice.voice_id.trim().is_empty() {
            return Err(ConfigError::Invalid("voice.voice_id is empty".to_string()));
        }
        Ok(())
    }

    /// Build the configured provider, reading credentials from the
    /// environment. Fails before any item runs when a credential is absent.
    pub fn build_provider(
        &self,
        client: reqwest::Client,
    ) -> Result<Arc<dyn SpeechProvider>, ConfigError> {
        let provider: Arc<dyn SpeechProvider> = match self.provider {
            ProviderKind::OpenAi => {
                Arc::new(OpenAiProvider::new(client, require_env(OPENAI_KEY_VAR)?))
            }
            ProviderKind::ElevenLabs => {
                Arc::new(ElevenLabsProvider::new(client, require_env(ELEVENLABS_KEY_VAR)?))
            }
            ProviderKind::Google => {
                Arc::new(GoogleProvider::new(client, require_env(GOOGLE_KEY_VAR)?))
            }
            ProviderKind::Endpoint => Arc::new(EndpointProvider::new(
                client,
                require_env(ENDPOINT_URL_VAR)?,
                require_env(ENDPOINT_TOKEN_VAR)?,
            )),
            ProviderKind::Stub => Arc::new(StubProvider::new()),
        };
        Ok(provider)
    }
}

fn require_env(var: &str) -> Result<String, ConfigError> {
    std::env::var(var)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingCredential(var.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_json() -> &'static str {
        r#"{
            "provider": "stub",
            "voice": {"voice_id": "onyx"},
            "project": "Genesis",
            "quest": "Creation"
        }"#
    }

    #[test]
    fn test_defaults_fill_in() {
        let config: RunConfig = serde_json::from_str(minimal_json()).unwrap();
        assert_eq!(config.provider, ProviderKind::Stub);
        assert_eq!(config.language_code, "en");
        assert!(config.persist_remote);
        assert!(config.reuse_existing);
        assert!(!config.force_regenerate);
        assert_eq!(config.max_concurrent_requests, 5);
        assert_eq!(config.requests_per_minute, 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_provider_kind_names() {
        for (name, kind) in [
            ("openai", ProviderKind::OpenAi),
            ("elevenlabs", ProviderKind::ElevenLabs),
            ("google", ProviderKind::Google),
            ("endpoint", ProviderKind::Endpoint),
            ("stub", ProviderKind::Stub),
        ] {
            let parsed: ProviderKind =
                serde_json::from_str(&format!("\"{}\"", name)).unwrap();
            assert_eq!(parsed, kind);
        }
        assert!(serde_json::from_str::<ProviderKind>("\"nope\"").is_err());
    }

    #[test]
    fn test_save_local_without_dir_is_invalid() {
        let mut config: RunConfig = serde_json::from_str(minimal_json()).unwrap();
        config.save_local = true;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        config.local_dir = Some(PathBuf::from("/tmp/out"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_layout_nests_language_under_content_folder() {
        let config: RunConfig = serde_json::from_str(minimal_json()).unwrap();
        let layout = config.storage_layout();
        assert_eq!(layout.content_folder, "audio/en");
        assert_eq!(layout.bucket, "narration");
    }

    #[test]
    fn test_stub_provider_needs_no_credentials() {
        let config: RunConfig = serde_json::from_str(minimal_json()).unwrap();
        assert!(config.build_provider(reqwest::Client::new()).is_ok());
    }
}
