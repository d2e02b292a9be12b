//! VerseForge persistence layer
//!
//! Abstract capability traits for the record database and the audio object
//! store. The pipeline core never talks to a concrete backend; it holds
//! `Arc<dyn RecordStore>` / `Arc<dyn ObjectStore>` and lets the caller plug
//! in whatever implements the contract.
//!
//! ## Key components
//!
//! - `RecordStore`: `create` / `exists` / `delete` over named tables
//! - `ObjectStore`: `put` / `delete` over bucket + path
//! - `fakes`: in-memory implementations satisfying the trait contracts

mod error;
pub mod fakes;
mod fs;
mod traits;

pub use error::StoreError;
pub use fs::{FsObjectStore, FsRecordStore};
pub use traits::{DeleteOutcome, Filter, ObjectStore, RecordStore};

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;
