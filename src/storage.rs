//! Storage backends
//!
//! The pipeline hands each finished record to an [`EntryStorage`] exactly
//! once per stored exchange. The call is synchronous from the pipeline's
//! point of view; a backend that needs buffering or network I/O should queue
//! internally. Errors propagate back to the middleware, which reports them
//! without touching the client response.

use std::sync::Mutex;

use serde_json::Value;

use crate::error::Result;

/// A place finished records go
pub trait EntryStorage: Send + Sync {
    /// Persist one record. Called at most once per exchange.
    fn store(&self, record: Value) -> Result<()>;
}

/// Default backend: emits each record through `tracing` at `INFO` level
/// under the `requestlogs` target
///
/// Pair it with a JSON subscriber (or any shipping layer) to forward records
/// to a log aggregator.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingStorage;

impl EntryStorage for LoggingStorage {
    fn store(&self, record: Value) -> Result<()> {
        tracing::info!(target: "requestlogs", entry = %record, "request log entry");
        Ok(())
    }
}

/// In-memory backend capturing records for inspection
///
/// Intended for tests and local development.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    records: Mutex<Vec<Value>>,
}

impl MemoryStorage {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything stored so far, in order
    pub fn records(&self) -> Vec<Value> {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// True when nothing has been stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EntryStorage for MemoryStorage {
    fn store(&self, record: Value) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_memory_storage_collects_in_order() {
        let storage = MemoryStorage::new();
        assert!(storage.is_empty());
        storage.store(json!({"n": 1})).unwrap();
        storage.store(json!({"n": 2})).unwrap();
        assert_eq!(storage.records(), vec![json!({"n": 1}), json!({"n": 2})]);
    }

    #[test]
    fn test_logging_storage_never_fails() {
        assert!(LoggingStorage.store(json!({"any": "record"})).is_ok());
    }
}
