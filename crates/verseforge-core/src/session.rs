//! Session recording for rollback
//!
//! Every run appends what it created to a session record: rows per table in
//! creation order, uploaded audio objects, locally saved files, and per-item
//! failures. The record is the sole input to rollback, whether consumed
//! in memory or reloaded from a JSON file.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

// ---------------------------------------------------------------------------
// Record shapes
// ---------------------------------------------------------------------------

/// One row touched during the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityEntry {
    pub id: String,
    /// Rows that existed before the session are recorded for traceability
    /// but are never deleted by rollback.
    pub created_in_session: bool,
}

/// An uploaded audio object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAudioEntry {
    pub bucket: String,
    pub path: String,
}

/// A locally saved audio file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalAudioEntry {
    pub path: String,
    pub reference: String,
}

/// A per-item failure, kept for the run report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureEntry {
    pub reference: String,
    pub reason: String,
}

/// Immutable snapshot of a session. Serializes to the durable JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub timestamp: DateTime<Utc>,
    /// Per-table entries in creation order.
    pub entities: BTreeMap<String, Vec<EntityEntry>>,
    pub remote_audio: Vec<RemoteAudioEntry>,
    pub local_audio: Vec<LocalAudioEntry>,
    #[serde(default)]
    pub failures: Vec<FailureEntry>,
    /// Stamped by rollback once the record has been consumed.
    #[serde(default)]
    pub rolled_back_at: Option<DateTime<Utc>>,
}

impl SessionRecord {
    pub fn entries(&self, table: &str) -> &[EntityEntry] {
        self.entities.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_rolled_back(&self) -> bool {
        self.rolled_back_at.is_some()
    }
}

// ---------------------------------------------------------------------------
// Recorder
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SessionState {
    entities: BTreeMap<String, Vec<EntityEntry>>,
    remote_audio: Vec<RemoteAudioEntry>,
    local_audio: Vec<LocalAudioEntry>,
    failures: Vec<FailureEntry>,
}

/// Append-only session log, shared by parallel orchestrator tasks.
#[derive(Debug)]
pub struct SessionRecorder {
    started_at: DateTime<Utc>,
    state: Mutex<SessionState>,
}

impl SessionRecorder {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            state: Mutex::new(SessionState::default()),
        }
    }

    /// Record a row. Returns false when the id was already recorded for the
    /// table; the first entry wins, so a row created in-session is never
    /// downgraded to pre-existing.
    pub fn record(&self, table: &str, id: &str, created_in_session: bool) -> bool {
        let mut state = self.state.lock().unwrap();
        let entries = state.entities.entry(table.to_string()).or_default();
        if entries.iter().any(|e| e.id == id) {
            return false;
        }
        debug!(table, id, created_in_session, "session entry");
        entries.push(EntityEntry {
            id: id.to_string(),
            created_in_session,
        });
        true
    }

    pub fn record_remote_audio(&self, bucket: &str, path: &str) {
        let mut state = self.state.lock().unwrap();
        state.remote_audio.push(RemoteAudioEntry {
            bucket: bucket.to_string(),
            path: path.to_string(),
        });
    }

    pub fn record_local_audio(&self, path: &str, reference: &str) {
        let mut state = self.state.lock().unwrap();
        state.local_audio.push(LocalAudioEntry {
            path: path.to_string(),
            reference: reference.to_string(),
        });
    }

    pub fn record_failure(&self, reference: &str, reason: &str) {
        let mut state = self.state.lock().unwrap();
        state.failures.push(FailureEntry {
            reference: reference.to_string(),
            reason: reason.to_string(),
        });
    }

    /// Immutable snapshot for reporting, serialization, or rollback.
    pub fn snapshot(&self) -> SessionRecord {
        let state = self.state.lock().unwrap();
        SessionRecord {
            timestamp: self.started_at,
            entities: state.entities.clone(),
            remote_audio: state.remote_audio.clone(),
            local_audio: state.local_audio.clone(),
            failures: state.failures.clone(),
            rolled_back_at: None,
        }
    }
}

impl Default for SessionRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_preserves_creation_order() {
        let recorder = SessionRecorder::new();
        recorder.record("quest", "q1", true);
        recorder.record("asset", "a1", true);
        recorder.record("asset", "a2", true);

        let snapshot = recorder.snapshot();
        let ids: Vec<_> = snapshot.entries("asset").iter().map(|e| &e.id).collect();
        assert_eq!(ids, ["a1", "a2"]);
        assert_eq!(snapshot.entries("quest").len(), 1);
    }

    #[test]
    fn test_duplicate_ids_are_skipped() {
        let recorder = SessionRecorder::new();
        assert!(recorder.record("language", "en", true));
        assert!(!recorder.record("language", "en", false));

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.entries("language").len(), 1);
        assert!(snapshot.entries("language")[0].created_in_session);
    }

    #[test]
    fn test_json_round_trip() {
        let recorder = SessionRecorder::new();
        recorder.record("project", "p1", true);
        recorder.record("audio", "au1", false);
        recorder.record_remote_audio("narration", "en/gen_1_1.mp3");
        recorder.record_local_audio("/tmp/gen_1_1.mp3", "Gen 1:1");
        recorder.record_failure("Gen 1:2", "permanent synthesis failure: 422");

        let snapshot = recorder.snapshot();
        let json = serde_json::to_string_pretty(&snapshot).unwrap();
        let reloaded: SessionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(reloaded, snapshot);
        assert!(reloaded.rolled_back_at.is_none());
    }

    #[test]
    fn test_round_trip_tolerates_missing_optional_fields() {
        // Records written before failures/rolled_back_at existed still load.
        let json = r#"{
            "timestamp": "2026-01-05T12:00:00Z",
            "entities": {"quest": [{"id": "q1", "created_in_session": true}]},
            "remote_audio": [],
            "local_audio": []
        }"#;
        let record: SessionRecord = serde_json::from_str(json).unwrap();
        assert!(record.failures.is_empty());
        assert!(!record.is_rolled_back());
    }
}
