//! Typed query façade over a document store, specialised for a book catalog.
//!
//! Filters, projections, sorts and pages are described with [`query::FindSpec`] and translated
//! to native query documents; grouped statistics go through [`aggregate`]. Everything runs on a
//! scoped [`connection::Connection`] via the [`executor::Executor`], and raw documents come back
//! as [`book::Book`] values through [`mapper`].

pub mod aggregate;
pub mod book;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod connection;
pub mod errors;
pub mod executor;
pub mod index;
pub mod logger;
pub mod mapper;
pub mod query;
pub mod seed;
pub mod store;

/// Build-time facts.
pub mod built {
    include!(concat!(env!("OUT_DIR"), "/compiled_features.rs"));
}

pub use book::{Book, BookChanges};
pub use catalog::{Catalog, GroupBy};
pub use config::{Backend, ConfigOverrides, StoreConfig};
pub use connection::{Connection, ConnectionManager};
pub use errors::{DecodeError, Result, ShelfError};
pub use executor::Executor;
pub use query::{FindSpec, Filter, Page, Projection, SortSpec};
