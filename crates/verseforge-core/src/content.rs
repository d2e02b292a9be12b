//! Content items, voice configuration, and reuse fingerprints

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A single unit of text to narrate, tagged with its reference
/// (a scripture reference like "Gen 1:1" or a line identifier).
///
/// Supplied by an upstream extraction step and consumed once; the pipeline
/// performs no validation beyond rejecting empty text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    pub reference: String,
    pub text: String,
}

impl ContentItem {
    pub fn new(reference: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            text: text.into(),
        }
    }
}

/// Voice selection for a run. One voice configuration is active per run;
/// it participates in the reuse fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// Provider-specific voice identifier (voice id, voice name, or code).
    pub voice_id: String,
    /// Optional model override (e.g. "eleven_multilingual_v2").
    #[serde(default)]
    pub model: Option<String>,
    /// BCP-47 language code for providers that require one.
    #[serde(default)]
    pub language_code: Option<String>,
}

impl VoiceConfig {
    pub fn new(voice_id: impl Into<String>) -> Self {
        Self {
            voice_id: voice_id.into(),
            model: None,
            language_code: None,
        }
    }
}

/// Deterministic digest identifying a (text, provider, voice) combination.
///
/// SHA-256 over the whitespace-normalized text, the provider id, and the
/// voice id, newline-separated. Used only for reuse lookup; never the
/// identity of a stored artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn compute(text: &str, provider_id: &str, voice_id: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(normalize_text(text).as_bytes());
        hasher.update(b"\n");
        hasher.update(provider_id.as_bytes());
        hasher.update(b"\n");
        hasher.update(voice_id.as_bytes());
        Fingerprint(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars) for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trim and collapse internal whitespace runs to single spaces.
fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_deterministic() {
        let a = Fingerprint::compute("In the beginning", "openai", "onyx");
        let b = Fingerprint::compute("In the beginning", "openai", "onyx");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_fingerprint_normalizes_whitespace() {
        let a = Fingerprint::compute("In the beginning", "openai", "onyx");
        let b = Fingerprint::compute("  In   the\n beginning ", "openai", "onyx");
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_varies_by_provider_and_voice() {
        let base = Fingerprint::compute("In the beginning", "openai", "onyx");
        assert_ne!(
            base,
            Fingerprint::compute("In the beginning", "elevenlabs", "onyx")
        );
        assert_ne!(
            base,
            Fingerprint::compute("In the beginning", "openai", "echo")
        );
    }

    #[test]
    fn test_short_form() {
        let fp = Fingerprint::compute("text", "p", "v");
        assert_eq!(fp.short().len(), 12);
        assert!(fp.as_str().starts_with(fp.short()));
    }
}
