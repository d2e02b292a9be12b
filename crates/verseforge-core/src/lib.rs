//! VerseForge Core Library
//!
//! Re-exports the narration pipeline components for programmatic use.

pub mod audio;
pub mod catalog;
pub mod config;
pub mod content;
pub mod error;
pub mod orchestrator;
pub mod provider;
pub mod providers;
pub mod rate_limit;
pub mod retry;
pub mod reuse;
pub mod rollback;
pub mod session;

pub use audio::{normalize, sniff_format, AudioData, AudioFormat};

pub use content::{ContentItem, Fingerprint, VoiceConfig};

pub use error::{ConfigError, ItemError, SynthesisError};

pub use rate_limit::{RateLimiter, RateLimiterConfig, RateSlot};

pub use retry::{retry, retry_with_hook, ErrorClass, RetryPolicy};

pub use provider::{Dispatcher, SpeechProvider};

pub use providers::{
    ElevenLabsProvider, EndpointProvider, GoogleProvider, OpenAiProvider, StubProvider,
};

pub use reuse::ReuseResolver;

pub use session::{
    EntityEntry, FailureEntry, LocalAudioEntry, RemoteAudioEntry, SessionRecord, SessionRecorder,
};

pub use orchestrator::{
    ArtifactOrigin, AudioArtifact, BatchOrchestrator, BatchReport, ItemFailure, ItemSuccess,
    RunPolicy, StorageLayout,
};

pub use catalog::{Catalog, IngestReport, QuestIngest};

pub use rollback::{RollbackConfig, RollbackEngine, RollbackFailure, RollbackReport};

pub use config::{ProviderKind, RunConfig};
