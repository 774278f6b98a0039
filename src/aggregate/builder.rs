use crate::errors::{Result, ShelfError};
use crate::query::builder::{build_filter, build_sort, check_field, clamp_i64};
use bson::{Bson, Document as BsonDocument, doc};
use std::collections::HashSet;

use super::types::{Aggregation, AggregationKind, Expression, GROUP_KEY, GroupKey, PipelineStage};

/// Stages in store-native form, in the order they run.
#[derive(Debug, Clone, PartialEq)]
pub struct NativePipeline {
    stages: Vec<BsonDocument>,
}

impl NativePipeline {
    #[must_use]
    pub fn stages(&self) -> &[BsonDocument] {
        &self.stages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// Translate stages 1:1 into native pipeline documents.
///
/// # Errors
/// `InvalidSpec` for an empty pipeline, a zero limit, a malformed field or output name,
/// or an average/sum without an input field.
pub fn build(stages: &[PipelineStage]) -> Result<NativePipeline> {
    if stages.is_empty() {
        return Err(ShelfError::invalid("pipeline must have at least one stage"));
    }
    let stages = stages.iter().map(build_stage).collect::<Result<Vec<_>>>()?;
    log::debug!("built pipeline with {} stages", stages.len());
    Ok(NativePipeline { stages })
}

fn build_stage(stage: &PipelineStage) -> Result<BsonDocument> {
    Ok(match stage {
        PipelineStage::Match(f) => doc! { "$match": build_filter(f)? },
        PipelineStage::Group { key, aggregations } => {
            let mut group = BsonDocument::new();
            group.insert(GROUP_KEY, group_key(key)?);
            let mut seen = HashSet::new();
            for a in aggregations {
                check_output(&a.output)?;
                if !seen.insert(a.output.as_str()) {
                    return Err(ShelfError::invalid(format!("group output `{}` is defined twice", a.output)));
                }
                group.insert(a.output.as_str(), accumulator(a)?);
            }
            doc! { "$group": group }
        }
        PipelineStage::Sort(s) => doc! { "$sort": build_sort(s, false)? },
        PipelineStage::Limit(0) => return Err(ShelfError::invalid("pipeline limit must be positive")),
        PipelineStage::Limit(n) => doc! { "$limit": clamp_i64(*n) },
        PipelineStage::Compute { field, expr } => {
            check_output(field)?;
            let mut fields = BsonDocument::new();
            fields.insert(field.as_str(), expression(expr)?);
            doc! { "$addFields": fields }
        }
    })
}

fn check_output(name: &str) -> Result<()> {
    if name == GROUP_KEY {
        return Err(ShelfError::invalid(format!("`{GROUP_KEY}` is reserved for the group key")));
    }
    if name.contains('.') {
        return Err(ShelfError::invalid(format!("output name `{name}` must not contain `.`")));
    }
    check_field(name)
}

fn group_key(key: &GroupKey) -> Result<Bson> {
    match key {
        GroupKey::Field(f) => expression(&Expression::Field(f.clone())),
        GroupKey::Decade(f) => expression(&Expression::decade_of(f.clone())),
        GroupKey::Expr(e) => expression(e),
    }
}

fn accumulator(a: &Aggregation) -> Result<Bson> {
    let input = |kind: &str| -> Result<Bson> {
        let f = a
            .field
            .as_deref()
            .ok_or_else(|| ShelfError::invalid(format!("{kind} `{}` needs an input field", a.output)))?;
        expression(&Expression::Field(f.to_string()))
    };
    Ok(match a.kind {
        AggregationKind::Count => Bson::Document(doc! { "$sum": 1 }),
        AggregationKind::Average => Bson::Document(doc! { "$avg": input("average")? }),
        AggregationKind::Sum => Bson::Document(doc! { "$sum": input("sum")? }),
    })
}

fn expression(e: &Expression) -> Result<Bson> {
    let many = |op: &str, args: &[Expression]| -> Result<Bson> {
        if args.is_empty() {
            return Err(ShelfError::invalid(format!("{op} needs at least one argument")));
        }
        let args = args.iter().map(expression).collect::<Result<Vec<_>>>()?;
        let mut d = BsonDocument::new();
        d.insert(op, Bson::Array(args));
        Ok(Bson::Document(d))
    };
    Ok(match e {
        Expression::Field(f) => {
            check_field(f)?;
            Bson::String(format!("${f}"))
        }
        Expression::Literal(v) => match v.to_bson() {
            // Strings starting with `$` would be read as field paths.
            Bson::String(s) if s.starts_with('$') => Bson::Document(doc! { "$literal": s }),
            other => other,
        },
        Expression::Add(args) => many("$add", args.as_slice())?,
        Expression::Multiply(args) => many("$multiply", args.as_slice())?,
        Expression::Concat(args) => many("$concat", args.as_slice())?,
        Expression::Divide(a, b) => Bson::Document(doc! { "$divide": Bson::Array(vec![expression(a)?, expression(b)?]) }),
        Expression::Floor(a) => Bson::Document(doc! { "$floor": expression(a)? }),
        Expression::ToText(a) => Bson::Document(doc! { "$toString": expression(a)? }),
    })
}
