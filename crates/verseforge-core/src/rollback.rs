//! Session rollback
//!
//! Consumes a session record and deletes what the session created, in
//! dependency order so no row is orphaned mid-run: audio objects first,
//! then local files, then rows from the most-dependent tables down to the
//! roots. Within a table entries delete in reverse creation order. Rows the
//! session merely touched (`created_in_session = false`) are never deleted.
//!
//! Rollback is idempotent: an already-absent target counts as success, so
//! re-running a partially failed rollback finishes the job.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use verseforge_store::{DeleteOutcome, ObjectStore, RecordStore, StoreError};

use crate::retry::{retry, ErrorClass, RetryPolicy};
use crate::session::SessionRecord;

// ---------------------------------------------------------------------------
// Config and report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RollbackConfig {
    /// Record deletions between connection resets. Long runs otherwise
    /// exhaust transport-level stream limits.
    pub max_deletes_per_connection: usize,
    pub retry: RetryPolicy,
}

impl Default for RollbackConfig {
    fn default() -> Self {
        Self {
            max_deletes_per_connection: 5000,
            retry: RetryPolicy::default(),
        }
    }
}

/// One deletion that exhausted its retries.
#[derive(Debug, Clone)]
pub struct RollbackFailure {
    pub target: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct RollbackReport {
    pub deleted: usize,
    pub already_absent: usize,
    /// Entries skipped because the session did not create them.
    pub skipped_preexisting: usize,
    pub failures: Vec<RollbackFailure>,
}

impl RollbackReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Table ordering
// ---------------------------------------------------------------------------

/// Dependency rank: lower ranks delete first. Link tables and audio rows
/// reference everything else and go first; unknown tables sit between the
/// links and the known hierarchy; shared roots go last.
fn table_rank(table: &str) -> u8 {
    match table {
        "audio" => 0,
        t if t.ends_with("_link") => 0,
        "asset" => 2,
        "quest" => 3,
        "project" => 4,
        "tag" => 5,
        "language" => 6,
        _ => 1,
    }
}

/// Tables of a record in deletion order.
fn ordered_tables(record: &SessionRecord) -> Vec<&str> {
    // BTreeMap iteration is name-sorted, so equal ranks tie-break
    // deterministically by table name.
    let mut tables: Vec<&str> = record.entities.keys().map(String::as_str).collect();
    tables.sort_by_key(|t| (table_rank(t), t.to_string()));
    tables
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct RollbackEngine {
    records: Arc<dyn RecordStore>,
    objects: Arc<dyn ObjectStore>,
    config: RollbackConfig,
}

fn classify_store(err: &StoreError) -> ErrorClass {
    if err.is_transient() {
        ErrorClass::Transient
    } else {
        ErrorClass::Permanent
    }
}

impl RollbackEngine {
    pub fn new(
        records: Arc<dyn RecordStore>,
        objects: Arc<dyn ObjectStore>,
        config: RollbackConfig,
    ) -> Self {
        Self {
            records,
            objects,
            config,
        }
    }

    /// Roll back everything the session created. Returns the consumed record
    /// stamped with `rolled_back_at`, plus the per-deletion report.
    pub async fn run(&self, record: &SessionRecord) -> (SessionRecord, RollbackReport) {
        if record.is_rolled_back() {
            warn!("session record already marked rolled back, re-running anyway");
        }
        let mut report = RollbackReport::default();

        self.delete_remote_audio(record, &mut report).await;
        self.delete_local_audio(record, &mut report).await;
        self.delete_rows(record, &mut report).await;

        info!(
            deleted = report.deleted,
            already_absent = report.already_absent,
            skipped = report.skipped_preexisting,
            failures = report.failures.len(),
            "rollback done"
        );

        let mut consumed = record.clone();
        consumed.rolled_back_at = Some(Utc::now());
        (consumed, report)
    }

    async fn delete_remote_audio(&self, record: &SessionRecord, report: &mut RollbackReport) {
        for entry in record.remote_audio.iter().rev() {
            let target = format!("{}/{}", entry.bucket, entry.path);
            let outcome = retry(&self.config.retry, classify_store, |_| {
                self.objects.delete(&entry.bucket, &entry.path)
            })
            .await;
            match outcome {
                Ok(DeleteOutcome::Deleted) => {
                    debug!(target = %target, "audio object deleted");
                    report.deleted += 1;
                }
                Ok(DeleteOutcome::NotFound) => report.already_absent += 1,
                Err(err) => report.failures.push(RollbackFailure {
                    target,
                    reason: err.to_string(),
                }),
            }
        }
    }

    async fn delete_local_audio(&self, record: &SessionRecord, report: &mut RollbackReport) {
        for entry in record.local_audio.iter().rev() {
            match tokio::fs::remove_file(&entry.path).await {
                Ok(()) => {
                    debug!(path = %entry.path, "local file deleted");
                    report.deleted += 1;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    report.already_absent += 1;
                }
                Err(e) => report.failures.push(RollbackFailure {
                    target: entry.path.clone(),
                    reason: e.to_string(),
                }),
            }
        }
    }

    async fn delete_rows(&self, record: &SessionRecord, report: &mut RollbackReport) {
        let mut since_reset = 0usize;
        for table in ordered_tables(record) {
            for entry in record.entries(table).iter().rev() {
                if !entry.created_in_session {
                    debug!(table, id = %entry.id, "pre-existing row, skipping");
                    report.skipped_preexisting += 1;
                    continue;
                }

                // Reset only between deletions.
                if since_reset >= self.config.max_deletes_per_connection {
                    if let Err(e) = self.records.reset().await {
                        warn!(error = %e, "connection reset failed, continuing");
                    }
                    since_reset = 0;
                }

                since_reset += 1;
                let outcome = retry(&self.config.retry, classify_store, |_| {
                    self.records.delete(table, &entry.id)
                })
                .await;
                match outcome {
                    Ok(DeleteOutcome::Deleted) => {
                        debug!(table, id = %entry.id, "row deleted");
                        report.deleted += 1;
                    }
                    Ok(DeleteOutcome::NotFound) => report.already_absent += 1,
                    Err(err) => report.failures.push(RollbackFailure {
                        target: format!("{}/{}", table, entry.id),
                        reason: err.to_string(),
                    }),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionRecorder;
    use serde_json::json;
    use std::time::Duration;
    use verseforge_store::fakes::{MemoryObjectStore, MemoryRecordStore};

    fn fast_config() -> RollbackConfig {
        RollbackConfig {
            max_deletes_per_connection: 5000,
            retry: RetryPolicy {
                max_attempts: 3,
                max_rate_limit_waits: 1,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
        }
    }

    #[test]
    fn test_table_rank_ordering() {
        assert!(table_rank("audio") < table_rank("asset"));
        assert!(table_rank("quest_asset_link") < table_rank("asset"));
        assert!(table_rank("asset") < table_rank("quest"));
        assert!(table_rank("quest") < table_rank("project"));
        assert!(table_rank("project") < table_rank("tag"));
        assert!(table_rank("tag") < table_rank("language"));
        // Unknown tables delete after links, before the known hierarchy.
        assert!(table_rank("audio") < table_rank("mystery"));
        assert!(table_rank("mystery") < table_rank("asset"));
    }

    async fn seeded(
        records: &MemoryRecordStore,
        recorder: &SessionRecorder,
        table: &str,
        created: bool,
    ) -> String {
        let id = records.create(table, json!({"seed": true})).await.unwrap();
        recorder.record(table, &id, created);
        id
    }

    #[tokio::test]
    async fn test_deletes_links_before_hierarchy() {
        let records = Arc::new(MemoryRecordStore::new());
        let objects = Arc::new(MemoryObjectStore::new());
        let recorder = SessionRecorder::new();

        seeded(&records, &recorder, "project", true).await;
        seeded(&records, &recorder, "quest", true).await;
        seeded(&records, &recorder, "asset", true).await;
        seeded(&records, &recorder, "quest_asset_link", true).await;
        seeded(&records, &recorder, "audio", true).await;

        let engine = RollbackEngine::new(records.clone(), objects, fast_config());
        let (_, report) = engine.run(&recorder.snapshot()).await;
        assert!(report.is_clean());
        assert_eq!(report.deleted, 5);

        let log = records.deletion_log();
        let position = |table: &str| log.iter().position(|(t, _)| t == table).unwrap();
        assert!(position("audio") < position("asset"));
        assert!(position("quest_asset_link") < position("asset"));
        assert!(position("asset") < position("quest"));
        assert!(position("quest") < position("project"));
    }

    #[tokio::test]
    async fn test_within_table_reverse_creation_order() {
        let records = Arc::new(MemoryRecordStore::new());
        let objects = Arc::new(MemoryObjectStore::new());
        let recorder = SessionRecorder::new();
        let first = seeded(&records, &recorder, "asset", true).await;
        let second = seeded(&records, &recorder, "asset", true).await;

        let engine = RollbackEngine::new(records.clone(), objects, fast_config());
        engine.run(&recorder.snapshot()).await;

        let ids: Vec<_> = records.deletion_log().into_iter().map(|(_, id)| id).collect();
        assert_eq!(ids, vec![second, first]);
    }

    #[tokio::test]
    async fn test_preexisting_rows_are_never_deleted() {
        let records = Arc::new(MemoryRecordStore::new());
        let objects = Arc::new(MemoryObjectStore::new());
        let recorder = SessionRecorder::new();
        let reused = seeded(&records, &recorder, "audio", false).await;
        seeded(&records, &recorder, "audio", true).await;

        let engine = RollbackEngine::new(records.clone(), objects, fast_config());
        let (_, report) = engine.run(&recorder.snapshot()).await;

        assert_eq!(report.deleted, 1);
        assert_eq!(report.skipped_preexisting, 1);
        assert!(records.get("audio", &reused).is_some());
    }

    #[tokio::test]
    async fn test_rollback_twice_is_idempotent() {
        let records = Arc::new(MemoryRecordStore::new());
        let objects = Arc::new(MemoryObjectStore::new());
        let recorder = SessionRecorder::new();
        seeded(&records, &recorder, "quest", true).await;
        objects.put("narration", "a.mp3", vec![1, 2, 3]).await.unwrap();
        recorder.record_remote_audio("narration", "a.mp3");

        let engine = RollbackEngine::new(records, objects, fast_config());
        let snapshot = recorder.snapshot();
        let (_, first) = engine.run(&snapshot).await;
        assert_eq!(first.deleted, 2);
        assert!(first.is_clean());

        let (_, second) = engine.run(&snapshot).await;
        assert_eq!(second.deleted, 0);
        assert_eq!(second.already_absent, 2);
        assert!(second.is_clean());
    }

    #[tokio::test]
    async fn test_transient_delete_error_is_retried() {
        let records = Arc::new(MemoryRecordStore::new());
        let objects = Arc::new(MemoryObjectStore::new());
        let recorder = SessionRecorder::new();
        seeded(&records, &recorder, "asset", true).await;
        records.inject_delete_error(StoreError::Connection("stream reset".into()));

        let engine = RollbackEngine::new(records.clone(), objects, fast_config());
        let (_, report) = engine.run(&recorder.snapshot()).await;
        assert!(report.is_clean());
        assert_eq!(report.deleted, 1);
        assert_eq!(records.row_count("asset"), 0);
    }

    #[tokio::test]
    async fn test_permanent_delete_error_is_accumulated_not_fatal() {
        let records = Arc::new(MemoryRecordStore::new());
        let objects = Arc::new(MemoryObjectStore::new());
        let recorder = SessionRecorder::new();
        seeded(&records, &recorder, "asset", true).await;
        seeded(&records, &recorder, "asset", true).await;
        records.inject_delete_error(StoreError::Query("constraint violation".into()));

        let engine = RollbackEngine::new(records.clone(), objects, fast_config());
        let (_, report) = engine.run(&recorder.snapshot()).await;

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.deleted, 1);
    }

    #[tokio::test]
    async fn test_connection_reset_every_n_deletes() {
        let records = Arc::new(MemoryRecordStore::new());
        let objects = Arc::new(MemoryObjectStore::new());
        let recorder = SessionRecorder::new();
        for _ in 0..7 {
            seeded(&records, &recorder, "asset", true).await;
        }

        let config = RollbackConfig {
            max_deletes_per_connection: 3,
            ..fast_config()
        };
        let engine = RollbackEngine::new(records.clone(), objects, config);
        let (_, report) = engine.run(&recorder.snapshot()).await;
        assert_eq!(report.deleted, 7);
        assert_eq!(records.reset_count(), 2);
    }

    #[tokio::test]
    async fn test_consumed_record_is_stamped() {
        let records = Arc::new(MemoryRecordStore::new());
        let objects = Arc::new(MemoryObjectStore::new());
        let recorder = SessionRecorder::new();
        seeded(&records, &recorder, "quest", true).await;

        let engine = RollbackEngine::new(records, objects, fast_config());
        let (consumed, _) = engine.run(&recorder.snapshot()).await;
        assert!(consumed.is_rolled_back());
    }
}
