//! Typed find specifications and their translation to the store's native query documents.

pub mod builder;
pub mod parse;
pub mod types;

pub use builder::{NativeQuery, build, build_spec};
pub use parse::{parse_filter_json, parse_sort};
pub use types::{Direction, FindSpec, Filter, Limit, Page, Predicate, Projection, SortKey, SortSpec, Value};
