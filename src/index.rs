//! Index declarations and plan inspection.

use bson::{Bson, Document as BsonDocument};
use std::collections::HashSet;

use crate::book::{AUTHOR, PUBLISHED_YEAR, TITLE};
use crate::connection::Connection;
use crate::errors::{DecodeError, Result, ShelfError};
use crate::executor::Executor;
use crate::query::builder::check_field;
use crate::query::{Direction, NativeQuery};
use crate::store::IndexInfo;

/// Ordered index keys. Two specs are identical when they name the same fields in the same
/// order with the same directions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    keys: Vec<(String, Direction)>,
}

impl IndexSpec {
    /// # Errors
    /// `InvalidSpec` for no keys, a malformed field name, or a field named twice.
    pub fn new<S: Into<String>>(keys: impl IntoIterator<Item = (S, Direction)>) -> Result<Self> {
        let keys: Vec<(String, Direction)> = keys.into_iter().map(|(f, d)| (f.into(), d)).collect();
        if keys.is_empty() {
            return Err(ShelfError::invalid("index must have at least one key"));
        }
        let mut seen = HashSet::new();
        for (f, _) in &keys {
            check_field(f)?;
            if !seen.insert(f.as_str()) {
                return Err(ShelfError::invalid(format!("index names `{f}` twice")));
            }
        }
        Ok(Self { keys })
    }

    /// # Errors
    /// See [`IndexSpec::new`].
    pub fn ascending<S: Into<String>>(fields: impl IntoIterator<Item = S>) -> Result<Self> {
        Self::new(fields.into_iter().map(|f| (f, Direction::Ascending)))
    }

    #[must_use]
    pub fn keys(&self) -> &[(String, Direction)] {
        &self.keys
    }

    /// Conventional store name: `author_1_published_year_1`.
    #[must_use]
    pub fn name(&self) -> String {
        self.keys.iter().map(|(f, d)| format!("{f}_{}", d.as_i32())).collect::<Vec<_>>().join("_")
    }

    #[must_use]
    pub fn to_document(&self) -> BsonDocument {
        let mut d = BsonDocument::new();
        for (f, dir) in &self.keys {
            d.insert(f.as_str(), dir.as_i32());
        }
        d
    }

    fn matches(&self, keys: &BsonDocument) -> bool {
        keys.len() == self.keys.len()
            && self.keys.iter().zip(keys).all(|((f, dir), (k, v))| {
                f == k && number(v).is_some_and(|n| n.signum() == f64::from(dir.as_i32()))
            })
    }
}

/// The catalog's standard indexes: title lookups and author/year listings.
///
/// # Errors
/// Never in practice; the field names are constants.
pub fn catalog_indexes() -> Result<Vec<IndexSpec>> {
    Ok(vec![IndexSpec::ascending([TITLE])?, IndexSpec::ascending([AUTHOR, PUBLISHED_YEAR])?])
}

/// What the store reported for one execution of a query.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ExecutionStats {
    pub used_index: bool,
    pub index_name: Option<String>,
    pub keys_examined: u64,
    pub docs_examined: u64,
    pub returned: u64,
    pub time_ms: u64,
}

impl ExecutionStats {
    /// Read `queryPlanner.winningPlan` and `executionStats` from explain output.
    ///
    /// # Errors
    /// `Decode` when the output lacks execution statistics.
    pub fn from_explain(raw: &BsonDocument) -> std::result::Result<Self, DecodeError> {
        let stats = match raw.get("executionStats") {
            Some(Bson::Document(d)) => d,
            Some(other) => {
                return Err(DecodeError::WrongType {
                    field: "executionStats",
                    expected: "document",
                    found: format!("{:?}", other.element_type()),
                });
            }
            None => return Err(DecodeError::MissingField("executionStats")),
        };
        let count = |field: &'static str| -> std::result::Result<u64, DecodeError> {
            let v = stats.get(field).ok_or(DecodeError::MissingField(field))?;
            let n = number(v).ok_or_else(|| DecodeError::WrongType {
                field,
                expected: "number",
                found: format!("{:?}", v.element_type()),
            })?;
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let n = n.max(0.0) as u64;
            Ok(n)
        };
        let plan = raw.get_document("queryPlanner").ok().and_then(|p| p.get("winningPlan"));
        let index_name = plan.and_then(find_index_scan);
        Ok(Self {
            used_index: index_name.is_some(),
            index_name: index_name.flatten(),
            keys_examined: count("totalKeysExamined")?,
            docs_examined: count("totalDocsExamined")?,
            returned: count("nReturned")?,
            time_ms: count("executionTimeMillis").unwrap_or(0),
        })
    }
}

/// `Some(name)` for the first `IXSCAN` stage anywhere in the plan tree.
fn find_index_scan(plan: &Bson) -> Option<Option<String>> {
    match plan {
        Bson::Document(d) => {
            if d.get_str("stage").is_ok_and(|s| s == "IXSCAN") {
                return Some(d.get_str("indexName").ok().map(str::to_string));
            }
            d.values().find_map(find_index_scan)
        }
        Bson::Array(items) => items.iter().find_map(find_index_scan),
        _ => None,
    }
}

fn number(v: &Bson) -> Option<f64> {
    match v {
        Bson::Int32(i) => Some(f64::from(*i)),
        #[allow(clippy::cast_precision_loss)]
        Bson::Int64(i) => Some(*i as f64),
        Bson::Double(f) => Some(*f),
        _ => None,
    }
}

/// The same query run with the planner's choice and as a forced full collection scan.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ExplainReport {
    pub indexed: ExecutionStats,
    pub full_scan: ExecutionStats,
}

impl ExplainReport {
    /// The planner picked an index and it examined no more documents than a full scan.
    #[must_use]
    pub const fn index_effective(&self) -> bool {
        self.indexed.used_index && self.indexed.docs_examined <= self.full_scan.docs_examined
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IndexManager {
    executor: Executor,
}

impl IndexManager {
    #[must_use]
    pub const fn new(executor: Executor) -> Self {
        Self { executor }
    }

    /// # Errors
    /// `Timeout`, `Connection` or `Store`.
    pub async fn list(&self, conn: &mut Connection) -> Result<Vec<IndexInfo>> {
        let store = conn.store()?;
        self.executor.run("list_indexes", store.list_indexes(conn.collection())).await
    }

    /// Create the index unless one with identical keys already exists. Returns whether it was
    /// created. Concurrent callers may both see it missing; the store's create is idempotent.
    ///
    /// # Errors
    /// `Timeout`, `Connection` or `Store`.
    pub async fn ensure_index(&self, conn: &mut Connection, spec: &IndexSpec) -> Result<bool> {
        let existing = self.list(conn).await?;
        if existing.iter().any(|ix| spec.matches(&ix.keys)) {
            log::debug!("index {} already present", spec.name());
            return Ok(false);
        }
        let name = spec.name();
        let keys = spec.to_document();
        let store = conn.store()?;
        self.executor.run("create_index", store.create_index(conn.collection(), &keys, &name)).await?;
        log::info!("created index {name} on {}", conn.collection());
        Ok(true)
    }

    /// Explain `query` twice: as planned, then forced onto a collection scan.
    ///
    /// # Errors
    /// `Timeout`, `Connection`, `Store`, or `Decode` when the store's explain output is unreadable.
    pub async fn explain(&self, conn: &mut Connection, query: &NativeQuery) -> Result<ExplainReport> {
        let indexed = self.explain_one(conn, query).await?;
        let full_scan = self.explain_one(conn, &query.clone().with_collection_scan()).await?;
        log::debug!(
            "explain: indexed examined {} docs, full scan {}",
            indexed.docs_examined,
            full_scan.docs_examined
        );
        Ok(ExplainReport { indexed, full_scan })
    }

    async fn explain_one(&self, conn: &mut Connection, query: &NativeQuery) -> Result<ExecutionStats> {
        let store = conn.store()?;
        let raw = self.executor.run("explain", store.explain(conn.collection(), query)).await?;
        Ok(ExecutionStats::from_explain(&raw)?)
    }
}
