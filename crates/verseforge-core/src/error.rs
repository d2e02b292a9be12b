//! Error taxonomy for the narration pipeline

use std::time::Duration;

use thiserror::Error;
use verseforge_store::StoreError;

use crate::retry::ErrorClass;

/// Classified synthesis failures.
///
/// Every provider maps its own failure codes into exactly these three
/// variants so the retry policy never branches on provider identity.
#[derive(Error, Debug)]
pub enum SynthesisError {
    /// Provider signalled quota exhaustion (HTTP 429 or equivalent).
    #[error("provider rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Network-level or 5xx-class failure; worth retrying.
    #[error("transient synthesis failure: {0}")]
    Transient(String),

    /// Malformed request, bad voice, unusable payload; retrying cannot help.
    #[error("permanent synthesis failure: {0}")]
    Permanent(String),
}

impl SynthesisError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SynthesisError::RateLimited { retry_after } => ErrorClass::RateLimited {
                retry_after: *retry_after,
            },
            SynthesisError::Transient(_) => ErrorClass::Transient,
            SynthesisError::Permanent(_) => ErrorClass::Permanent,
        }
    }
}

/// Terminal failure of a single batch item.
///
/// Never fatal to the batch: the orchestrator reports these per index.
#[derive(Error, Debug)]
pub enum ItemError {
    /// Rejected before any work; empty text is the only input validation.
    #[error("item has empty text")]
    EmptyText,

    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    /// A downstream create/upload failed; earlier records for the item stay
    /// in the session log so rollback can clean them up.
    #[error("persistence failed: {0}")]
    Persistence(#[from] StoreError),

    #[error("local save failed: {0}")]
    LocalSave(String),

    /// The item's task aborted (panic); other items are unaffected.
    #[error("task aborted: {0}")]
    Aborted(String),
}

/// Pre-flight configuration failures. The only errors that abort a run
/// before any task starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unknown speech provider '{0}'")]
    UnknownProvider(String),

    #[error("missing credential: set {0}")]
    MissingCredential(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
