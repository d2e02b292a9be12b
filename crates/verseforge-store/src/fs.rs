//! Filesystem-backed store implementations
//!
//! `FsRecordStore` keeps one JSON file per table under `<root>/records/`,
//! rewritten atomically (temp file + rename) on every mutation.
//! `FsObjectStore` lays objects out as `<root>/<bucket>/<path>` files.
//!
//! Suitable for local runs and rollback across process boundaries; a real
//! deployment substitutes its own `RecordStore` / `ObjectStore` backends.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::StoreError;
use crate::traits::*;
use crate::StoreResult;

fn atomic_write(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    let dir = path
        .parent()
        .ok_or_else(|| StoreError::Query(format!("path {} has no parent", path.display())))?;
    fs::create_dir_all(dir).map_err(|e| StoreError::Connection(e.to_string()))?;
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| StoreError::Connection(e.to_string()))?;
    tmp.write_all(bytes)
        .map_err(|e| StoreError::Connection(e.to_string()))?;
    tmp.persist(path)
        .map_err(|e| StoreError::Connection(e.error.to_string()))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// FsRecordStore
// ---------------------------------------------------------------------------

/// JSON-file record store. Each table is an array of `{id, fields}` rows.
pub struct FsRecordStore {
    records_dir: PathBuf,
    // Serializes read-modify-write cycles across tables.
    write_lock: Mutex<()>,
}

impl FsRecordStore {
    /// Open (or create) a record store rooted at `root`.
    pub fn new(root: impl AsRef<Path>) -> StoreResult<Self> {
        let records_dir = root.as_ref().join("records");
        fs::create_dir_all(&records_dir).map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self {
            records_dir,
            write_lock: Mutex::new(()),
        })
    }

    fn table_path(&self, table: &str) -> PathBuf {
        self.records_dir.join(format!("{}.json", table))
    }

    fn load_table(&self, table: &str) -> StoreResult<Vec<(String, Value)>> {
        let path = self.table_path(table);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::Connection(e.to_string())),
        };
        let rows: Vec<Value> = serde_json::from_slice(&bytes)?;
        rows.into_iter()
            .map(|row| {
                let id = row
                    .get("id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        StoreError::Serialization(format!("row in '{}' missing id", table))
                    })?
                    .to_string();
                let fields = row.get("fields").cloned().unwrap_or(Value::Null);
                Ok((id, fields))
            })
            .collect()
    }

    fn save_table(&self, table: &str, rows: &[(String, Value)]) -> StoreResult<()> {
        let doc: Vec<Value> = rows
            .iter()
            .map(|(id, fields)| serde_json::json!({"id": id, "fields": fields}))
            .collect();
        let bytes = serde_json::to_vec_pretty(&doc)?;
        atomic_write(&self.table_path(table), &bytes)
    }
}

#[async_trait]
impl RecordStore for FsRecordStore {
    async fn create(&self, table: &str, fields: Value) -> StoreResult<String> {
        if !fields.is_object() {
            return Err(StoreError::Serialization(format!(
                "record fields for '{}' must be a JSON object",
                table
            )));
        }
        let _guard = self.write_lock.lock().unwrap();
        let mut rows = self.load_table(table)?;
        let id = uuid::Uuid::new_v4().to_string();
        rows.push((id.clone(), fields));
        self.save_table(table, &rows)?;
        debug!(table, id = %id, "created record");
        Ok(id)
    }

    async fn exists(&self, table: &str, filter: &Filter) -> StoreResult<Option<String>> {
        let _guard = self.write_lock.lock().unwrap();
        let rows = self.load_table(table)?;
        Ok(rows
            .iter()
            .find(|(_, fields)| filter.matches(fields))
            .map(|(id, _)| id.clone()))
    }

    async fn delete(&self, table: &str, id: &str) -> StoreResult<DeleteOutcome> {
        let _guard = self.write_lock.lock().unwrap();
        let mut rows = self.load_table(table)?;
        let before = rows.len();
        rows.retain(|(row_id, _)| row_id != id);
        if rows.len() == before {
            return Ok(DeleteOutcome::NotFound);
        }
        self.save_table(table, &rows)?;
        debug!(table, id, "deleted record");
        Ok(DeleteOutcome::Deleted)
    }
}

// ---------------------------------------------------------------------------
// FsObjectStore
// ---------------------------------------------------------------------------

/// Filesystem object store: objects live at `<root>/<bucket>/<path>`.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self { root })
    }

    fn object_path(&self, bucket: &str, path: &str) -> PathBuf {
        self.root.join(bucket).join(path)
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, bucket: &str, path: &str, bytes: Vec<u8>) -> StoreResult<String> {
        let target = self.object_path(bucket, path);
        atomic_write(&target, &bytes).map_err(|e| StoreError::Transfer(e.to_string()))?;
        debug!(bucket, path, size = bytes.len(), "stored object");
        Ok(format!("{}/{}", bucket, path))
    }

    async fn delete(&self, bucket: &str, path: &str) -> StoreResult<DeleteOutcome> {
        let target = self.object_path(bucket, path);
        match fs::remove_file(&target) {
            Ok(()) => Ok(DeleteOutcome::Deleted),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DeleteOutcome::NotFound),
            Err(e) => Err(StoreError::Transfer(e.to_string())),
        }
    }
}
