use bson::Bson;
use serde::{Deserialize, Serialize};

// Upper bounds on caller-supplied specs; exceeding them is a caller bug.
pub(crate) const MAX_IN_SET: usize = 1000;
pub(crate) const MAX_SORT_FIELDS: usize = 8;
pub(crate) const MAX_PROJECTION_FIELDS: usize = 64;

/// A scalar operand in a filter or expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    #[must_use]
    pub fn to_bson(&self) -> Bson {
        match self {
            Self::Bool(b) => Bson::Boolean(*b),
            Self::Int(i) => i32::try_from(*i).map_or(Bson::Int64(*i), Bson::Int32),
            Self::Float(f) => Bson::Double(*f),
            Self::Text(s) => Bson::String(s.clone()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}
impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}
impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}
impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}
impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}
impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Eq(Value),
    Ne(Value),
    /// Strictly greater than.
    Gt(Value),
    Gte(Value),
    /// Strictly less than.
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
}

impl Predicate {
    #[must_use]
    pub const fn operator(&self) -> &'static str {
        match self {
            Self::Eq(_) => "$eq",
            Self::Ne(_) => "$ne",
            Self::Gt(_) => "$gt",
            Self::Gte(_) => "$gte",
            Self::Lt(_) => "$lt",
            Self::Lte(_) => "$lte",
            Self::In(_) => "$in",
        }
    }
}

/// Conjunction of per-field predicates. The empty filter matches every document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub clauses: Vec<(String, Predicate)>,
}

impl Filter {
    /// Matches all documents.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    #[must_use]
    pub fn with(mut self, field: impl Into<String>, p: Predicate) -> Self {
        self.clauses.push((field.into(), p));
        self
    }

    #[must_use]
    pub fn eq(self, field: impl Into<String>, v: impl Into<Value>) -> Self {
        self.with(field, Predicate::Eq(v.into()))
    }

    #[must_use]
    pub fn ne(self, field: impl Into<String>, v: impl Into<Value>) -> Self {
        self.with(field, Predicate::Ne(v.into()))
    }

    #[must_use]
    pub fn gt(self, field: impl Into<String>, v: impl Into<Value>) -> Self {
        self.with(field, Predicate::Gt(v.into()))
    }

    #[must_use]
    pub fn gte(self, field: impl Into<String>, v: impl Into<Value>) -> Self {
        self.with(field, Predicate::Gte(v.into()))
    }

    #[must_use]
    pub fn lt(self, field: impl Into<String>, v: impl Into<Value>) -> Self {
        self.with(field, Predicate::Lt(v.into()))
    }

    #[must_use]
    pub fn lte(self, field: impl Into<String>, v: impl Into<Value>) -> Self {
        self.with(field, Predicate::Lte(v.into()))
    }

    #[must_use]
    pub fn one_of<V: Into<Value>>(self, field: impl Into<String>, vs: impl IntoIterator<Item = V>) -> Self {
        self.with(field, Predicate::In(vs.into_iter().map(Into::into).collect()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Ascending,
    Descending,
}

impl Direction {
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        match self {
            Self::Ascending => 1,
            Self::Descending => -1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    pub direction: Direction,
}

/// Lexicographic ordering: ties on the first key are broken by the second, and so on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub keys: Vec<SortKey>,
}

impl SortSpec {
    #[must_use]
    pub fn asc(field: impl Into<String>) -> Self {
        Self::default().then_asc(field)
    }

    #[must_use]
    pub fn desc(field: impl Into<String>) -> Self {
        Self::default().then_desc(field)
    }

    #[must_use]
    pub fn then_asc(mut self, field: impl Into<String>) -> Self {
        self.keys.push(SortKey { field: field.into(), direction: Direction::Ascending });
        self
    }

    #[must_use]
    pub fn then_desc(mut self, field: impl Into<String>) -> Self {
        self.keys.push(SortKey { field: field.into(), direction: Direction::Descending });
        self
    }
}

/// Read-time allow-list of fields. `_id` is returned unless excluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    pub fields: Vec<String>,
    pub include_id: bool,
}

impl Projection {
    #[must_use]
    pub fn fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { fields: fields.into_iter().map(Into::into).collect(), include_id: true }
    }

    #[must_use]
    pub fn without_id(mut self) -> Self {
        self.include_id = false;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    /// At most `n` results. `Bounded(0)` means no results at all.
    Bounded(u64),
    /// Every result from `offset` on. Must be asked for explicitly.
    Unbounded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: Limit,
    pub offset: u64,
}

impl Page {
    #[must_use]
    pub const fn new(limit: u64, offset: u64) -> Self {
        Self { limit: Limit::Bounded(limit), offset }
    }

    #[must_use]
    pub const fn first(limit: u64) -> Self {
        Self::new(limit, 0)
    }

    #[must_use]
    pub const fn unbounded_from(offset: u64) -> Self {
        Self { limit: Limit::Unbounded, offset }
    }

    /// Page number `n` (zero-based) of size `size`.
    #[must_use]
    pub const fn nth(n: u64, size: u64) -> Self {
        Self::new(size, n.saturating_mul(size))
    }
}

/// Everything a `find` needs, in one value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindSpec {
    pub filter: Filter,
    pub projection: Option<Projection>,
    pub sort: Option<SortSpec>,
    pub page: Option<Page>,
}

impl FindSpec {
    #[must_use]
    pub fn new(filter: Filter) -> Self {
        Self { filter, ..Self::default() }
    }

    #[must_use]
    pub fn project(mut self, p: Projection) -> Self {
        self.projection = Some(p);
        self
    }

    #[must_use]
    pub fn sort(mut self, s: SortSpec) -> Self {
        self.sort = Some(s);
        self
    }

    #[must_use]
    pub const fn page(mut self, p: Page) -> Self {
        self.page = Some(p);
        self
    }
}
