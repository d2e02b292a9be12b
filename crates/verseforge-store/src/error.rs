//! Error types for verseforge-store

use thiserror::Error;

/// Errors that can occur in the persistence layer
#[derive(Error, Debug)]
pub enum StoreError {
    /// Connection-level failure (stream reset, transport teardown)
    #[error("Store connection failed: {0}")]
    Connection(String),

    /// Query-level failure reported by the backend
    #[error("Store query failed: {0}")]
    Query(String),

    /// Record payload could not be serialized
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Object upload or download failed
    #[error("Object transfer failed: {0}")]
    Transfer(String),
}

impl StoreError {
    /// Whether a retry against a fresh connection may succeed.
    ///
    /// Connection teardown and transfer interruptions are transient; query
    /// and serialization failures are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Connection(_) | StoreError::Transfer(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_errors_are_transient() {
        assert!(StoreError::Connection("stream reset".into()).is_transient());
        assert!(StoreError::Transfer("broken pipe".into()).is_transient());
    }

    #[test]
    fn test_query_errors_are_permanent() {
        assert!(!StoreError::Query("bad filter".into()).is_transient());
        assert!(!StoreError::Serialization("bad json".into()).is_transient());
    }
}
