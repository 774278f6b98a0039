//! Runs native queries, pipelines and single-document writes against a connection.
//!
//! Every call is bounded by the executor's timeout. A timed-out call reports `Timeout` and the
//! store-side operation is not assumed to have been aborted. Nothing here retries: retrying a
//! write is the caller's decision.

use bson::Document as BsonDocument;
use std::future::Future;
use std::time::{Duration, Instant};

use crate::aggregate::NativePipeline;
use crate::book::BookChanges;
use crate::connection::Connection;
use crate::errors::{Result, ShelfError};
use crate::query::builder::build_filter;
use crate::query::{Filter, NativeQuery};
use crate::store::{FailureKind, StoreFailure, UpdateOutcome};

/// Translate a store failure into the façade's error classes. Native detail is logged on the
/// `bookshelf::store` target and kept on `Store` errors for diagnostics.
pub(crate) fn from_failure(op: &'static str, f: StoreFailure) -> ShelfError {
    log::error!(target: "bookshelf::store", "{op}: {}", f.detail());
    match f.kind {
        FailureKind::Unavailable => ShelfError::Connection(format!("{op}: {}", f.message)),
        FailureKind::Rejected => ShelfError::Store { op, detail: f.detail() },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Executor {
    timeout: Duration,
}

impl Executor {
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// An executor using the connection's configured operation timeout.
    #[must_use]
    pub fn for_connection(conn: &Connection) -> Self {
        Self::new(conn.default_timeout())
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub const fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout }
    }

    pub(crate) async fn run<T, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, StoreFailure>>,
    {
        let started = Instant::now();
        match tokio::time::timeout(self.timeout, fut).await {
            Err(_) => {
                let after_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
                log::warn!("{op} exceeded {after_ms} ms; the store may still apply it");
                Err(ShelfError::Timeout { op, after_ms })
            }
            Ok(Err(f)) => Err(from_failure(op, f)),
            Ok(Ok(v)) => {
                log::debug!("{op} completed in {:?}", started.elapsed());
                Ok(v)
            }
        }
    }

    /// # Errors
    /// `Timeout`, `Connection` or `Store`.
    pub async fn find(&self, conn: &mut Connection, query: &NativeQuery) -> Result<Vec<BsonDocument>> {
        if query.is_empty_page() {
            return Ok(Vec::new());
        }
        let store = conn.store()?;
        log::debug!("find on {}: {}", conn.collection(), query.to_document());
        self.run("find", store.find(conn.collection(), query)).await
    }

    /// # Errors
    /// `Timeout`, `Connection` or `Store`.
    pub async fn aggregate(&self, conn: &mut Connection, pipeline: &NativePipeline) -> Result<Vec<BsonDocument>> {
        let store = conn.store()?;
        log::debug!("aggregate on {}: {:?}", conn.collection(), pipeline.stages());
        self.run("aggregate", store.aggregate(conn.collection(), pipeline)).await
    }

    /// Insert already-validated documents in one call.
    ///
    /// # Errors
    /// `Timeout`, `Connection` or `Store` (for example a duplicate key).
    pub async fn insert_many(&self, conn: &mut Connection, docs: Vec<BsonDocument>) -> Result<u64> {
        if docs.is_empty() {
            return Ok(0);
        }
        let store = conn.store()?;
        self.run("insert_many", store.insert_many(conn.collection(), docs)).await
    }

    /// Apply `changes` to the first book matching `filter`. `modified` is 0 when nothing matched
    /// or the values were already in place.
    ///
    /// # Errors
    /// `InvalidSpec` before contacting the store; `Timeout`, `Connection` or `Store` after.
    pub async fn update_one(&self, conn: &mut Connection, filter: &Filter, changes: &BookChanges) -> Result<UpdateOutcome> {
        let filter = build_filter(filter)?;
        let update = changes.to_update()?;
        let store = conn.store()?;
        let out = self.run("update_one", store.update_one(conn.collection(), &filter, &update)).await?;
        log::debug!("update_one {filter}: matched {} modified {}", out.matched, out.modified);
        Ok(out)
    }

    /// Delete the first book matching `filter`; returns 0 or 1.
    ///
    /// # Errors
    /// `InvalidSpec` before contacting the store; `Timeout`, `Connection` or `Store` after.
    pub async fn delete_one(&self, conn: &mut Connection, filter: &Filter) -> Result<u64> {
        let filter = build_filter(filter)?;
        let store = conn.store()?;
        self.run("delete_one", store.delete_one(conn.collection(), &filter)).await
    }
}
