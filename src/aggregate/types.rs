use crate::errors::ShelfError;
use crate::query::{Filter, SortSpec, Value};

/// Name of the group key in every grouped row; sort on it to order groups by key.
pub const GROUP_KEY: &str = "_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationKind {
    Count,
    Average,
    Sum,
}

impl std::str::FromStr for AggregationKind {
    type Err = ShelfError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_start_matches('$').to_ascii_lowercase().as_str() {
            "count" => Ok(Self::Count),
            "avg" | "average" | "mean" => Ok(Self::Average),
            "sum" | "total" => Ok(Self::Sum),
            other => Err(ShelfError::invalid(format!("unknown aggregation kind `{other}`"))),
        }
    }
}

/// One named output of a group stage.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    pub output: String,
    pub kind: AggregationKind,
    /// Input field; required for `Average` and `Sum`, ignored for `Count`.
    pub field: Option<String>,
}

impl Aggregation {
    #[must_use]
    pub fn count(output: impl Into<String>) -> Self {
        Self { output: output.into(), kind: AggregationKind::Count, field: None }
    }

    #[must_use]
    pub fn average(output: impl Into<String>, field: impl Into<String>) -> Self {
        Self { output: output.into(), kind: AggregationKind::Average, field: Some(field.into()) }
    }

    #[must_use]
    pub fn sum(output: impl Into<String>, field: impl Into<String>) -> Self {
        Self { output: output.into(), kind: AggregationKind::Sum, field: Some(field.into()) }
    }
}

/// Computed value over one input document.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Field(String),
    Literal(Value),
    Add(Vec<Expression>),
    Multiply(Vec<Expression>),
    Divide(Box<Expression>, Box<Expression>),
    Floor(Box<Expression>),
    ToText(Box<Expression>),
    Concat(Vec<Expression>),
}

impl Expression {
    #[must_use]
    pub fn field(f: impl Into<String>) -> Self {
        Self::Field(f.into())
    }

    #[must_use]
    pub fn literal(v: impl Into<Value>) -> Self {
        Self::Literal(v.into())
    }

    /// `floor(field / 10) * 10`: 1988 becomes 1980.
    #[must_use]
    pub fn decade_of(field: impl Into<String>) -> Self {
        Self::Multiply(vec![
            Self::Floor(Box::new(Self::Divide(Box::new(Self::field(field)), Box::new(Self::literal(10))))),
            Self::literal(10),
        ])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GroupKey {
    Field(String),
    /// Numeric decade derived from a year field.
    Decade(String),
    Expr(Expression),
}

impl GroupKey {
    #[must_use]
    pub fn field(f: impl Into<String>) -> Self {
        Self::Field(f.into())
    }

    #[must_use]
    pub fn decade(f: impl Into<String>) -> Self {
        Self::Decade(f.into())
    }
}

/// One step of a pipeline. Order is significant: a `Sort` after a `Group` sorts groups.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineStage {
    Match(Filter),
    Group { key: GroupKey, aggregations: Vec<Aggregation> },
    Sort(SortSpec),
    Limit(u64),
    Compute { field: String, expr: Expression },
}
