//! Typed book-catalog operations over one connection.

use bson::Document as BsonDocument;
use std::str::FromStr;

use crate::aggregate::{self, Aggregation, GROUP_KEY, GroupKey, PipelineStage};
use crate::book::{AUTHOR, Book, BookChanges, GENRE, ID, PRICE, PUBLISHED_YEAR, TITLE};
use crate::connection::Connection;
use crate::errors::{Result, ShelfError};
use crate::executor::Executor;
use crate::index::{ExplainReport, IndexManager, IndexSpec};
use crate::mapper::{self, DecodeBatch, GroupRow};
use crate::query::{self, FindSpec, Filter, Page, SortSpec};
use crate::store::UpdateOutcome;

pub const COUNT: &str = "count";
pub const AVERAGE_PRICE: &str = "average_price";
pub const TOTAL_BOOKS: &str = "total_books";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupBy {
    Genre,
    Author,
    Decade,
}

impl FromStr for GroupBy {
    type Err = ShelfError;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "genre" => Ok(Self::Genre),
            "author" => Ok(Self::Author),
            "decade" => Ok(Self::Decade),
            other => Err(ShelfError::invalid(format!("cannot group by `{other}` (expected genre, author or decade)"))),
        }
    }
}

impl GroupBy {
    fn stages(self) -> Vec<PipelineStage> {
        match self {
            Self::Genre => vec![
                PipelineStage::Group {
                    key: GroupKey::field(GENRE),
                    aggregations: vec![Aggregation::count(COUNT), Aggregation::average(AVERAGE_PRICE, PRICE)],
                },
                PipelineStage::Sort(SortSpec::asc(GROUP_KEY)),
            ],
            Self::Author => vec![
                PipelineStage::Group {
                    key: GroupKey::field(AUTHOR),
                    aggregations: vec![Aggregation::count(TOTAL_BOOKS), Aggregation::average(AVERAGE_PRICE, PRICE)],
                },
                PipelineStage::Sort(SortSpec::desc(TOTAL_BOOKS).then_asc(GROUP_KEY)),
            ],
            Self::Decade => vec![
                PipelineStage::Group { key: GroupKey::decade(PUBLISHED_YEAR), aggregations: vec![Aggregation::count(COUNT)] },
                PipelineStage::Sort(SortSpec::asc(GROUP_KEY)),
            ],
        }
    }
}

/// Catalog operations bound to one exclusively borrowed connection.
pub struct Catalog<'c> {
    conn: &'c mut Connection,
    executor: Executor,
}

impl<'c> Catalog<'c> {
    /// Uses the connection's configured operation timeout.
    pub fn new(conn: &'c mut Connection) -> Self {
        let executor = Executor::for_connection(conn);
        Self { conn, executor }
    }

    pub fn with_executor(conn: &'c mut Connection, executor: Executor) -> Self {
        Self { conn, executor }
    }

    #[must_use]
    pub const fn executor(&self) -> Executor {
        self.executor
    }

    /// # Errors
    /// `InvalidSpec`, `Timeout`, `Connection` or `Store`. Undecodable records land in
    /// [`DecodeBatch::failures`].
    pub async fn find(&mut self, spec: &FindSpec) -> Result<DecodeBatch<Book>> {
        let raw = self.find_documents(spec).await?;
        Ok(mapper::decode_all(raw))
    }

    /// Raw documents, for projections that drop required fields.
    ///
    /// # Errors
    /// `InvalidSpec`, `Timeout`, `Connection` or `Store`.
    pub async fn find_documents(&mut self, spec: &FindSpec) -> Result<Vec<BsonDocument>> {
        let q = query::build_spec(spec)?;
        self.executor.find(self.conn, &q).await
    }

    /// First book in insertion order matching `filter`.
    ///
    /// # Errors
    /// As [`Catalog::find`], plus `Decode` when the match cannot be decoded.
    pub async fn find_one(&mut self, filter: &Filter) -> Result<Option<Book>> {
        let spec = FindSpec::new(filter.clone()).sort(SortSpec::asc(ID)).page(Page::first(1));
        let raw = self.find_documents(&spec).await?;
        raw.first().map(mapper::decode).transpose().map_err(ShelfError::from)
    }

    /// Validate every book, then insert all of them in one call.
    ///
    /// # Errors
    /// `InvalidSpec` when any book fails validation (nothing is sent), otherwise as the store reports.
    pub async fn insert_many(&mut self, books: &[Book]) -> Result<u64> {
        for b in books {
            b.validate()?;
        }
        let docs = books.iter().map(Book::to_document).collect();
        self.executor.insert_many(self.conn, docs).await
    }

    /// # Errors
    /// `InvalidSpec`, `Timeout`, `Connection` or `Store`.
    pub async fn update_one(&mut self, filter: &Filter, changes: &BookChanges) -> Result<UpdateOutcome> {
        self.executor.update_one(self.conn, filter, changes).await
    }

    /// # Errors
    /// `InvalidSpec`, `Timeout`, `Connection` or `Store`.
    pub async fn delete_one(&mut self, filter: &Filter) -> Result<u64> {
        self.executor.delete_one(self.conn, filter).await
    }

    /// Counts (and average price, for genre and author) per group, ordered by group key, or by
    /// book count for authors.
    ///
    /// # Errors
    /// `Timeout`, `Connection` or `Store`.
    pub async fn stats(&mut self, by: GroupBy) -> Result<DecodeBatch<GroupRow>> {
        let pipeline = aggregate::build(&by.stages())?;
        let raw = self.executor.aggregate(self.conn, &pipeline).await?;
        Ok(mapper::decode_groups(raw, by == GroupBy::Decade))
    }

    /// The `n` authors with the most books, most prolific first.
    ///
    /// # Errors
    /// `InvalidSpec` for `n == 0`; otherwise as [`Catalog::stats`].
    pub async fn top_authors(&mut self, n: u64) -> Result<DecodeBatch<GroupRow>> {
        let stages = [
            PipelineStage::Group { key: GroupKey::field(AUTHOR), aggregations: vec![Aggregation::count(TOTAL_BOOKS)] },
            PipelineStage::Sort(SortSpec::desc(TOTAL_BOOKS).then_asc(GROUP_KEY)),
            PipelineStage::Limit(n),
        ];
        let pipeline = aggregate::build(&stages)?;
        let raw = self.executor.aggregate(self.conn, &pipeline).await?;
        Ok(mapper::decode_groups(raw, false))
    }

    /// Ensure each index exists; returns `(name, created)` per spec, in order.
    ///
    /// # Errors
    /// Stops at the first failure.
    pub async fn ensure_indexes(&mut self, specs: &[IndexSpec]) -> Result<Vec<(String, bool)>> {
        let indexes = IndexManager::new(self.executor);
        let mut out = Vec::with_capacity(specs.len());
        for spec in specs {
            let created = indexes.ensure_index(self.conn, spec).await?;
            out.push((spec.name(), created));
        }
        Ok(out)
    }

    /// Compare the planned execution of `filter` against a full collection scan.
    ///
    /// # Errors
    /// `InvalidSpec`, `Timeout`, `Connection`, `Store` or `Decode`.
    pub async fn explain(&mut self, filter: &Filter) -> Result<ExplainReport> {
        let q = query::build(filter, None, None, None)?;
        IndexManager::new(self.executor).explain(self.conn, &q).await
    }

    /// Books matching `title`, convenience for title lookups.
    ///
    /// # Errors
    /// As [`Catalog::find_one`].
    pub async fn by_title(&mut self, title: &str) -> Result<Option<Book>> {
        self.find_one(&Filter::all().eq(TITLE, title)).await
    }
}
