//! Speech provider capability and the retrying dispatcher
//!
//! `SpeechProvider` is the polymorphic synthesis seam: one implementation
//! per provider, selected at configuration time. Each maps its provider's
//! failure codes into the shared `SynthesisError` taxonomy here, so nothing
//! outside the provider modules ever branches on provider identity.
//!
//! `Dispatcher` wraps the chosen provider with the shared rate limiter and
//! the uniform retry policy, and normalizes successful output.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::audio::{normalize, AudioData};
use crate::content::VoiceConfig;
use crate::error::SynthesisError;
use crate::rate_limit::RateLimiter;
use crate::retry::{retry_with_hook, ErrorClass, RetryPolicy};

/// Text-to-speech capability. Implementations return the provider's raw
/// response bytes; container identification happens in the normalize step.
#[async_trait]
pub trait SpeechProvider: Send + Sync {
    /// Stable provider identifier; participates in reuse fingerprints.
    fn id(&self) -> &'static str;

    async fn synthesize(&self, text: &str, voice: &VoiceConfig)
        -> Result<Vec<u8>, SynthesisError>;
}

/// Map an HTTP status (plus optional `retry-after` hint) onto the error
/// taxonomy. Shared by every HTTP-backed provider.
pub(crate) fn classify_status(
    status: StatusCode,
    retry_after: Option<Duration>,
    detail: &str,
) -> SynthesisError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        SynthesisError::RateLimited { retry_after }
    } else if status.is_server_error() {
        SynthesisError::Transient(format!("{}: {}", status, detail))
    } else {
        SynthesisError::Permanent(format!("{}: {}", status, detail))
    }
}

/// Map transport-level reqwest failures. Timeouts and connection problems
/// are transient; request construction problems are not.
pub(crate) fn classify_transport(err: reqwest::Error) -> SynthesisError {
    if err.is_timeout() || err.is_connect() || err.is_request() && err.is_body() {
        SynthesisError::Transient(err.to_string())
    } else if err.is_builder() {
        SynthesisError::Permanent(err.to_string())
    } else {
        SynthesisError::Transient(err.to_string())
    }
}

/// Parse a `retry-after` seconds header value.
pub(crate) fn parse_retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Retrying front-end over the active provider.
pub struct Dispatcher {
    provider: Arc<dyn SpeechProvider>,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
}

impl Dispatcher {
    pub fn new(
        provider: Arc<dyn SpeechProvider>,
        limiter: Arc<RateLimiter>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            limiter,
            policy,
        }
    }

    pub fn provider_id(&self) -> &'static str {
        self.provider.id()
    }

    /// Synthesize one item under the shared rate limit.
    ///
    /// Holds a concurrency slot for the whole attempt sequence; each
    /// rate-limited retry re-consults the per-minute window before the next
    /// attempt. Output is normalized before returning.
    pub async fn synthesize(
        &self,
        text: &str,
        voice: &VoiceConfig,
    ) -> Result<AudioData, SynthesisError> {
        let _slot = self.limiter.acquire().await;

        let provider = &self.provider;
        let limiter = &self.limiter;
        let bytes = retry_with_hook(
            &self.policy,
            SynthesisError::class,
            |attempt| async move {
                debug!(provider = provider.id(), attempt, "dispatching synthesis");
                provider.synthesize(text, voice).await
            },
            |class| async move {
                if matches!(class, ErrorClass::RateLimited { .. }) {
                    warn!(provider = provider.id(), "provider rate limited, re-reserving quota");
                    limiter.reserve_quota().await;
                }
            },
        )
        .await?;

        normalize(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::StubProvider;
    use crate::rate_limit::RateLimiterConfig;

    fn test_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            max_rate_limit_waits: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[test]
    fn test_classify_status_taxonomy() {
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, None, ""),
            SynthesisError::RateLimited { retry_after: None }
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, None, "upstream"),
            SynthesisError::Transient(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::UNPROCESSABLE_ENTITY, None, "bad voice"),
            SynthesisError::Permanent(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, None, "bad key"),
            SynthesisError::Permanent(_)
        ));
    }

    #[tokio::test]
    async fn test_dispatcher_normalizes_stub_output() {
        let stub = Arc::new(StubProvider::new());
        let limiter = Arc::new(RateLimiter::new(RateLimiterConfig::default()));
        let dispatcher = Dispatcher::new(stub, limiter, test_policy());

        let audio = dispatcher
            .synthesize("In the beginning", &VoiceConfig::new("stub-voice"))
            .await
            .unwrap();
        assert_eq!(audio.format, crate::audio::AudioFormat::Mp3);
    }

    #[tokio::test]
    async fn test_dispatcher_retries_transient_then_succeeds() {
        let stub = Arc::new(StubProvider::new());
        stub.fail_times("flaky text", SynthesisError::Transient("503".into()), 2);
        let limiter = Arc::new(RateLimiter::new(RateLimiterConfig::default()));
        let dispatcher = Dispatcher::new(stub.clone(), limiter, test_policy());

        let audio = dispatcher
            .synthesize("flaky text", &VoiceConfig::new("v"))
            .await
            .unwrap();
        assert!(!audio.bytes.is_empty());
        assert_eq!(stub.total_calls(), 3);
    }

    #[tokio::test]
    async fn test_dispatcher_permanent_fails_without_retry() {
        let stub = Arc::new(StubProvider::new());
        stub.fail_times("bad", SynthesisError::Permanent("422".into()), 99);
        let limiter = Arc::new(RateLimiter::new(RateLimiterConfig::default()));
        let dispatcher = Dispatcher::new(stub.clone(), limiter, test_policy());

        let err = dispatcher
            .synthesize("bad", &VoiceConfig::new("v"))
            .await
            .unwrap_err();
        assert!(matches!(err, SynthesisError::Permanent(_)));
        assert_eq!(stub.total_calls(), 1);
    }
}
