//! Storage trait definitions for VerseForge
//!
//! Two capabilities back the pipeline:
//! - `RecordStore`: row-oriented persistence (create/exists/delete by table)
//! - `ObjectStore`: blob storage for narration audio (put/delete by path)
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use async_trait::async_trait;
use serde_json::Value;

use crate::StoreResult;

// ---------------------------------------------------------------------------
// Filter — equality predicate for exists() lookups
// ---------------------------------------------------------------------------

/// Conjunction of field equality predicates.
///
/// Kept deliberately small: the pipeline only ever asks "is there a row where
/// these fields equal these values", which is all `exists` needs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    predicates: Vec<(String, Value)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality predicate. Chainable.
    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.predicates.push((field.to_string(), value.into()));
        self
    }

    /// Whether the given record fields satisfy every predicate.
    pub fn matches(&self, fields: &Value) -> bool {
        self.predicates
            .iter()
            .all(|(k, v)| fields.get(k) == Some(v))
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }
}

// ---------------------------------------------------------------------------
// DeleteOutcome
// ---------------------------------------------------------------------------

/// Result of a delete call.
///
/// `NotFound` is an expected outcome, not an error: rollback treats an
/// already-absent target as success so re-running is idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

// ---------------------------------------------------------------------------
// RecordStore — row persistence
// ---------------------------------------------------------------------------

/// Row-oriented record persistence.
///
/// Guarantees:
/// - `create` returns a unique id within the table.
/// - `exists` returns the id of some row matching the filter, or `None`.
/// - `delete` of an absent id reports `NotFound` rather than failing.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a row and return its id.
    async fn create(&self, table: &str, fields: Value) -> StoreResult<String>;

    /// Return the id of a row matching the filter, if any.
    async fn exists(&self, table: &str, filter: &Filter) -> StoreResult<Option<String>>;

    /// Delete a row by id.
    async fn delete(&self, table: &str, id: &str) -> StoreResult<DeleteOutcome>;

    /// Tear down and re-establish the underlying connection.
    ///
    /// Long deletion runs call this periodically to avoid exhausting
    /// transport-level stream limits. Backends without connection state can
    /// rely on the default no-op.
    async fn reset(&self) -> StoreResult<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ObjectStore — blob storage
// ---------------------------------------------------------------------------

/// Bucketed blob storage for audio payloads.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store bytes under `bucket/path` and return a locator for the object.
    async fn put(&self, bucket: &str, path: &str, bytes: Vec<u8>) -> StoreResult<String>;

    /// Delete the object at `bucket/path`.
    async fn delete(&self, bucket: &str, path: &str) -> StoreResult<DeleteOutcome>;
}
