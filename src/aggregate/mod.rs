//! Declarative aggregation pipelines (group / sort / limit / compute) and their native form.

pub mod builder;
pub mod types;

pub use builder::{NativePipeline, build};
pub use types::{Aggregation, AggregationKind, Expression, GROUP_KEY, GroupKey, PipelineStage};
