//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryRecordStore` and `MemoryObjectStore` that satisfy the
//! trait contracts without any external dependencies. The record store also
//! supports scripted delete failures so retry paths can be exercised.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StoreError;
use crate::traits::*;
use crate::StoreResult;

// ---------------------------------------------------------------------------
// MemoryRecordStore
// ---------------------------------------------------------------------------

/// In-memory record store backed by `HashMap<table, Vec<(id, fields)>>`.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    tables: Mutex<HashMap<String, Vec<(String, Value)>>>,
    scripted_delete_errors: Mutex<VecDeque<StoreError>>,
    deletion_log: Mutex<Vec<(String, String)>>,
    reset_count: AtomicUsize,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows currently in a table.
    pub fn row_count(&self, table: &str) -> usize {
        let tables = self.tables.lock().unwrap();
        tables.get(table).map(|rows| rows.len()).unwrap_or(0)
    }

    /// Fetch a row's fields by id, if present.
    pub fn get(&self, table: &str, id: &str) -> Option<Value> {
        let tables = self.tables.lock().unwrap();
        tables
            .get(table)?
            .iter()
            .find(|(row_id, _)| row_id == id)
            .map(|(_, fields)| fields.clone())
    }

    /// Queue an error to be returned by the next `delete` call.
    ///
    /// Errors are consumed in FIFO order, one per call, before the delete
    /// itself runs. Lets tests script transient-then-success sequences.
    pub fn inject_delete_error(&self, err: StoreError) {
        self.scripted_delete_errors.lock().unwrap().push_back(err);
    }

    /// How many times `reset` has been called.
    pub fn reset_count(&self) -> usize {
        self.reset_count.load(Ordering::SeqCst)
    }

    /// Every attempted `delete` as `(table, id)`, in call order.
    pub fn deletion_log(&self) -> Vec<(String, String)> {
        self.deletion_log.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn create(&self, table: &str, fields: Value) -> StoreResult<String> {
        if !fields.is_object() {
            return Err(StoreError::Serialization(format!(
                "record fields for '{}' must be a JSON object",
                table
            )));
        }
        let id = uuid::Uuid::new_v4().to_string();
        let mut tables = self.tables.lock().unwrap();
        tables
            .entry(table.to_string())
            .or_default()
            .push((id.clone(), fields));
        Ok(id)
    }

    async fn exists(&self, table: &str, filter: &Filter) -> StoreResult<Option<String>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.get(table).and_then(|rows| {
            rows.iter()
                .find(|(_, fields)| filter.matches(fields))
                .map(|(id, _)| id.clone())
        }))
    }

    async fn delete(&self, table: &str, id: &str) -> StoreResult<DeleteOutcome> {
        self.deletion_log
            .lock()
            .unwrap()
            .push((table.to_string(), id.to_string()));
        if let Some(err) = self.scripted_delete_errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        let mut tables = self.tables.lock().unwrap();
        let rows = match tables.get_mut(table) {
            Some(rows) => rows,
            None => return Ok(DeleteOutcome::NotFound),
        };
        let before = rows.len();
        rows.retain(|(row_id, _)| row_id != id);
        if rows.len() < before {
            Ok(DeleteOutcome::Deleted)
        } else {
            Ok(DeleteOutcome::NotFound)
        }
    }

    async fn reset(&self) -> StoreResult<()> {
        self.reset_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryObjectStore
// ---------------------------------------------------------------------------

/// In-memory object store backed by `HashMap<"bucket/path", bytes>`.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(bucket: &str, path: &str) -> String {
        format!("{}/{}", bucket, path)
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn contains(&self, bucket: &str, path: &str) -> bool {
        self.objects
            .lock()
            .unwrap()
            .contains_key(&Self::key(bucket, path))
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, bucket: &str, path: &str, bytes: Vec<u8>) -> StoreResult<String> {
        let key = Self::key(bucket, path);
        let mut objects = self.objects.lock().unwrap();
        objects.insert(key.clone(), bytes);
        Ok(key)
    }

    async fn delete(&self, bucket: &str, path: &str) -> StoreResult<DeleteOutcome> {
        let mut objects = self.objects.lock().unwrap();
        if objects.remove(&Self::key(bucket, path)).is_some() {
            Ok(DeleteOutcome::Deleted)
        } else {
            Ok(DeleteOutcome::NotFound)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_create_then_exists() {
        let store = MemoryRecordStore::new();
        let id = store
            .create("asset", json!({"name": "Gen 1:1_eng"}))
            .await
            .unwrap();

        let found = store
            .exists("asset", &Filter::new().eq("name", "Gen 1:1_eng"))
            .await
            .unwrap();
        assert_eq!(found, Some(id));
    }

    #[tokio::test]
    async fn test_delete_absent_reports_not_found() {
        let store = MemoryRecordStore::new();
        let outcome = store.delete("asset", "missing").await.unwrap();
        assert_eq!(outcome, DeleteOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_delete_removes_row() {
        let store = MemoryRecordStore::new();
        let id = store.create("quest", json!({"name": "q"})).await.unwrap();
        assert_eq!(
            store.delete("quest", &id).await.unwrap(),
            DeleteOutcome::Deleted
        );
        assert_eq!(
            store.delete("quest", &id).await.unwrap(),
            DeleteOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn test_scripted_delete_error_is_consumed_once() {
        let store = MemoryRecordStore::new();
        let id = store.create("asset", json!({"name": "a"})).await.unwrap();
        store.inject_delete_error(StoreError::Connection("stream reset".into()));

        assert!(store.delete("asset", &id).await.is_err());
        assert_eq!(
            store.delete("asset", &id).await.unwrap(),
            DeleteOutcome::Deleted
        );
    }

    #[tokio::test]
    async fn test_object_store_roundtrip() {
        let store = MemoryObjectStore::new();
        let locator = store
            .put("narration", "content/a.mp3", vec![1, 2, 3])
            .await
            .unwrap();
        assert_eq!(locator, "narration/content/a.mp3");
        assert!(store.contains("narration", "content/a.mp3"));

        assert_eq!(
            store.delete("narration", "content/a.mp3").await.unwrap(),
            DeleteOutcome::Deleted
        );
        assert_eq!(
            store.delete("narration", "content/a.mp3").await.unwrap(),
            DeleteOutcome::NotFound
        );
    }
}
