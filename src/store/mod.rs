//! The seam to the document engine.
//!
//! Everything behind [`DocumentStore`] belongs to the store: matching, sorting, grouping,
//! index maintenance and durability. The façade only ever hands it native documents
//! produced by the builders.

pub mod memory;
#[cfg(feature = "mongodb")]
pub mod mongo;

use crate::aggregate::NativePipeline;
use crate::config::StoreConfig;
use crate::query::NativeQuery;
use async_trait::async_trait;
use bson::Document as BsonDocument;
use std::sync::Arc;
use thiserror::Error;

pub use memory::MemoryStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The session could not be established or was lost.
    Unavailable,
    /// The store received the operation and refused or failed it.
    Rejected,
}

/// A failure reported by the store, with its native detail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct StoreFailure {
    pub kind: FailureKind,
    pub code: Option<i32>,
    pub message: String,
}

impl StoreFailure {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self { kind: FailureKind::Unavailable, code: None, message: message.into() }
    }

    pub fn rejected(code: i32, message: impl Into<String>) -> Self {
        Self { kind: FailureKind::Rejected, code: Some(code), message: message.into() }
    }

    /// Native detail as one line: `[code] message`.
    #[must_use]
    pub fn detail(&self) -> String {
        match self.code {
            Some(c) => format!("[{c}] {}", self.message),
            None => self.message.clone(),
        }
    }
}

/// A declared index as reported by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexInfo {
    pub name: String,
    pub keys: BsonDocument,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub matched: u64,
    pub modified: u64,
}

/// Operations the façade needs from a document store, bound to one database.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Short backend name for logs and `info`.
    fn backend(&self) -> &'static str;

    async fn ping(&self) -> Result<(), StoreFailure>;

    async fn find(&self, collection: &str, query: &NativeQuery) -> Result<Vec<BsonDocument>, StoreFailure>;

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: &NativePipeline,
    ) -> Result<Vec<BsonDocument>, StoreFailure>;

    async fn insert_many(&self, collection: &str, docs: Vec<BsonDocument>) -> Result<u64, StoreFailure>;

    /// Apply `update` to the first document matching `filter`. Atomic per document.
    async fn update_one(
        &self,
        collection: &str,
        filter: &BsonDocument,
        update: &BsonDocument,
    ) -> Result<UpdateOutcome, StoreFailure>;

    /// Delete the first document matching `filter`; returns 0 or 1.
    async fn delete_one(&self, collection: &str, filter: &BsonDocument) -> Result<u64, StoreFailure>;

    async fn list_indexes(&self, collection: &str) -> Result<Vec<IndexInfo>, StoreFailure>;

    /// Create an index. Creating an identical index again must not fail.
    async fn create_index(&self, collection: &str, keys: &BsonDocument, name: &str) -> Result<(), StoreFailure>;

    /// Execution statistics in the store's explain shape (`queryPlanner` + `executionStats`).
    async fn explain(&self, collection: &str, query: &NativeQuery) -> Result<BsonDocument, StoreFailure>;

    async fn close(&self);
}

/// Opens sessions to a store for a given configuration.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, cfg: &StoreConfig) -> Result<Arc<dyn DocumentStore>, StoreFailure>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detail_carries_native_code() {
        let f = StoreFailure::rejected(11000, "E11000 duplicate key error");
        assert_eq!(f.detail(), "[11000] E11000 duplicate key error");
        assert_eq!(StoreFailure::unavailable("no route").detail(), "no route");
    }
}
