//! Reuse lookup for previously generated narration
//!
//! An `audio` record carries the fingerprint of the (text, provider, voice)
//! combination that produced it. Before synthesizing, the orchestrator asks
//! the resolver whether such a record already exists; a hit skips the
//! provider entirely and references the prior artifact.

use std::sync::Arc;

use tracing::debug;
use verseforge_store::{Filter, RecordStore, StoreResult};

use crate::content::Fingerprint;

pub const AUDIO_TABLE: &str = "audio";

/// Looks up prior artifacts by fingerprint.
pub struct ReuseResolver {
    records: Arc<dyn RecordStore>,
}

impl ReuseResolver {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }

    /// Return the id of an existing `audio` record with this fingerprint.
    ///
    /// Store failures propagate; the caller decides whether a failed lookup
    /// fails the item or falls through to generation.
    pub async fn find(&self, fingerprint: &Fingerprint) -> StoreResult<Option<String>> {
        let filter = Filter::new().eq("fingerprint", fingerprint.as_str());
        let hit = self.records.exists(AUDIO_TABLE, &filter).await?;
        if let Some(id) = &hit {
            debug!(fingerprint = fingerprint.short(), id = %id, "reuse hit");
        }
        Ok(hit)
    }
}
