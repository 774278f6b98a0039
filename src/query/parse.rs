use crate::errors::{Result, ShelfError};
use serde_json::{Map, Value as Json};

use super::types::{Direction, Filter, MAX_IN_SET, Predicate, SortKey, SortSpec, Value};

/// Parse a JSON filter such as `{"genre": "Fiction", "published_year": {"$gt": 1950}}`.
///
/// Operators may be written with or without the leading `$`. Anything other than
/// `eq/ne/gt/gte/lt/lte/in` is rejected rather than passed through to the store.
///
/// # Errors
/// `InvalidSpec` for malformed JSON, unsupported operators or non-scalar operands.
pub fn parse_filter_json(json: &str) -> Result<Filter> {
    let root: Json =
        serde_json::from_str(json).map_err(|e| ShelfError::invalid(format!("filter is not valid JSON: {e}")))?;
    let Json::Object(map) = root else {
        return Err(ShelfError::invalid("filter must be a JSON object"));
    };
    let mut filter = Filter::all();
    for (field, cond) in map {
        match cond {
            Json::Object(ops) => {
                for p in parse_ops(&field, ops)? {
                    filter = filter.with(field.clone(), p);
                }
            }
            other => filter = filter.with(field.clone(), Predicate::Eq(scalar(&field, &other)?)),
        }
    }
    Ok(filter)
}

fn parse_ops(field: &str, ops: Map<String, Json>) -> Result<Vec<Predicate>> {
    if ops.is_empty() {
        return Err(ShelfError::invalid(format!("`{field}` has an empty operator object")));
    }
    let mut out = Vec::with_capacity(ops.len());
    for (op, operand) in ops {
        let p = match op.trim_start_matches('$') {
            "eq" => Predicate::Eq(scalar(field, &operand)?),
            "ne" => Predicate::Ne(scalar(field, &operand)?),
            "gt" => Predicate::Gt(scalar(field, &operand)?),
            "gte" => Predicate::Gte(scalar(field, &operand)?),
            "lt" => Predicate::Lt(scalar(field, &operand)?),
            "lte" => Predicate::Lte(scalar(field, &operand)?),
            "in" => {
                let Json::Array(items) = operand else {
                    return Err(ShelfError::invalid(format!("`{field}` $in needs an array")));
                };
                if items.len() > MAX_IN_SET {
                    return Err(ShelfError::invalid(format!("`{field}` $in exceeds {MAX_IN_SET} values")));
                }
                Predicate::In(items.iter().map(|v| scalar(field, v)).collect::<Result<_>>()?)
            }
            _ => return Err(ShelfError::invalid(format!("unsupported operator `{op}` on `{field}`"))),
        };
        out.push(p);
    }
    Ok(out)
}

fn scalar(field: &str, v: &Json) -> Result<Value> {
    match v {
        Json::Bool(b) => Ok(Value::Bool(*b)),
        Json::String(s) => Ok(Value::Text(s.clone())),
        Json::Number(n) => n
            .as_i64()
            .map(Value::Int)
            .or_else(|| n.as_f64().map(Value::Float))
            .ok_or_else(|| ShelfError::invalid(format!("`{field}` has an unrepresentable number {n}"))),
        Json::Null | Json::Array(_) | Json::Object(_) => {
            Err(ShelfError::invalid(format!("`{field}` operand must be a string, number or boolean")))
        }
    }
}

/// Parse `price:desc,title` into a sort spec. A bare field sorts ascending.
///
/// # Errors
/// `InvalidSpec` for an empty list or an unknown direction.
pub fn parse_sort(s: &str) -> Result<SortSpec> {
    let mut spec = SortSpec::default();
    for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (field, dir) = match part.split_once(':') {
            Some((f, d)) => (f.trim(), d.trim()),
            None => (part, "asc"),
        };
        let direction = match dir.to_ascii_lowercase().as_str() {
            "asc" | "1" | "ascending" => Direction::Ascending,
            "desc" | "-1" | "descending" => Direction::Descending,
            other => return Err(ShelfError::invalid(format!("unknown sort direction `{other}`"))),
        };
        spec.keys.push(SortKey { field: field.to_string(), direction });
    }
    if spec.keys.is_empty() {
        return Err(ShelfError::invalid("sort must name at least one field"));
    }
    Ok(spec)
}
