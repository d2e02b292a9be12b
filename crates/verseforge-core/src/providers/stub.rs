//! In-process stub provider for tests and dry runs
//!
//! Counterpart of the in-memory store fakes: deterministic output, scripted
//! failures, and call accounting so tests can assert on retry and
//! concurrency behaviour without a network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::content::VoiceConfig;
use crate::error::SynthesisError;
use crate::provider::SpeechProvider;

/// Minimal MPEG frame header followed by padding; enough for the container
/// sniffer to identify the payload as MP3.
const STUB_FRAME: [u8; 4] = [0xFF, 0xFB, 0x90, 0x00];

pub struct StubProvider {
    total_calls: AtomicU64,
    in_flight: AtomicU64,
    max_in_flight: AtomicU64,
    latency: Option<Duration>,
    // Remaining scripted failures, keyed by input text.
    failures: Mutex<HashMap<String, Vec<SynthesisError>>>,
}

fn replay(err: &SynthesisError) -> SynthesisError {
    match err {
        SynthesisError::RateLimited { retry_after } => SynthesisError::RateLimited {
            retry_after: *retry_after,
        },
        SynthesisError::Transient(msg) => SynthesisError::Transient(msg.clone()),
        SynthesisError::Permanent(msg) => SynthesisError::Permanent(msg.clone()),
    }
}

impl StubProvider {
    pub fn new() -> Self {
        Self {
            total_calls: AtomicU64::new(0),
            in_flight: AtomicU64::new(0),
            max_in_flight: AtomicU64::new(0),
            latency: None,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Simulate synthesis latency, letting concurrency tests observe
    /// overlapping calls.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Script the next `count` calls for `text` to fail with copies of `err`.
    pub fn fail_times(&self, text: &str, err: SynthesisError, count: u32) {
        let mut failures = self.failures.lock().unwrap();
        let queue = failures.entry(text.to_string()).or_default();
        for _ in 0..count {
            queue.push(replay(&err));
        }
    }

    pub fn total_calls(&self) -> u64 {
        self.total_calls.load(Ordering::SeqCst)
    }

    /// Highest number of synthesize calls observed running at once.
    pub fn max_in_flight(&self) -> u64 {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Deterministic output for `text`: an MPEG frame header followed by the
    /// text bytes, so distinct inputs yield distinct audio.
    pub fn audio_for(text: &str) -> Vec<u8> {
        let mut bytes = STUB_FRAME.to_vec();
        bytes.extend_from_slice(text.as_bytes());
        while bytes.len() < 12 {
            bytes.push(0);
        }
        bytes
    }
}

impl Default for StubProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpeechProvider for StubProvider {
    fn id(&self) -> &'static str {
        "stub"
    }

    async fn synthesize(
        &self,
        text: &str,
        _voice: &VoiceConfig,
    ) -> Result<Vec<u8>, SynthesisError> {
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let scripted = {
            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(text) {
                Some(queue) if !queue.is_empty() => Some(queue.remove(0)),
                _ => None,
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        match scripted {
            Some(err) => Err(err),
            None => Ok(Self::audio_for(text)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stub_output_is_sniffable_mp3() {
        let stub = StubProvider::new();
        let bytes = stub
            .synthesize("verse one", &VoiceConfig::new("v"))
            .await
            .unwrap();
        assert!(bytes.len() >= 12);
        assert_eq!(
            crate::audio::sniff_format(&bytes),
            Some(crate::audio::AudioFormat::Mp3)
        );
    }

    #[tokio::test]
    async fn test_stub_scripted_failures_drain() {
        let stub = StubProvider::new();
        stub.fail_times("x", SynthesisError::Transient("boom".into()), 1);
        assert!(stub
            .synthesize("x", &VoiceConfig::new("v"))
            .await
            .is_err());
        assert!(stub
            .synthesize("x", &VoiceConfig::new("v"))
            .await
            .is_ok());
        assert_eq!(stub.total_calls(), 2);
    }
}
