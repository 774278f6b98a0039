use bson::{Bson, Document as BsonDocument};
use std::cmp::Ordering;

use crate::store::StoreFailure;

/// Native error code for malformed query operators.
pub(crate) const BAD_VALUE: i32 = 2;
const MAX_PATH_DEPTH: usize = 32;

/// Evaluate a native filter document against `doc`.
pub fn matches(doc: &BsonDocument, filter: &BsonDocument) -> Result<bool, StoreFailure> {
    for (field, cond) in filter {
        if field.starts_with('$') {
            return Err(StoreFailure::rejected(BAD_VALUE, format!("unknown top level operator: {field}")));
        }
        let value = get_path(doc, field);
        let ok = match cond {
            Bson::Document(ops) if ops.keys().next().is_some_and(|k| k.starts_with('$')) => {
                eval_ops(value, ops)?
            }
            literal => equals(value, literal),
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Evaluate the condition on a single field; used to size index scans.
pub fn matches_field(doc: &BsonDocument, field: &str, cond: &Bson) -> Result<bool, StoreFailure> {
    let value = get_path(doc, field);
    match cond {
        Bson::Document(ops) if ops.keys().next().is_some_and(|k| k.starts_with('$')) => eval_ops(value, ops),
        literal => Ok(equals(value, literal)),
    }
}

fn eval_ops(value: Option<&Bson>, ops: &BsonDocument) -> Result<bool, StoreFailure> {
    for (op, operand) in ops {
        let ok = match op.as_str() {
            "$eq" => equals(value, operand),
            "$ne" => !equals(value, operand),
            "$gt" => ordered(value, operand, |o| o == Ordering::Greater),
            "$gte" => ordered(value, operand, |o| o != Ordering::Less),
            "$lt" => ordered(value, operand, |o| o == Ordering::Less),
            "$lte" => ordered(value, operand, |o| o != Ordering::Greater),
            "$in" => {
                let Bson::Array(set) = operand else {
                    return Err(StoreFailure::rejected(BAD_VALUE, "$in needs an array"));
                };
                set.iter().any(|x| equals(value, x))
            }
            other => return Err(StoreFailure::rejected(BAD_VALUE, format!("unknown operator: {other}"))),
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Equality with numeric cross-type comparison. Arrays match when any element does;
/// a `null` operand matches a missing field.
fn equals(value: Option<&Bson>, operand: &Bson) -> bool {
    match value {
        None => matches!(operand, Bson::Null),
        Some(Bson::Array(items)) if !matches!(operand, Bson::Array(_)) => {
            items.iter().any(|v| compare_bson(v, operand) == Ordering::Equal && same_bracket(v, operand))
        }
        Some(v) => same_bracket(v, operand) && compare_bson(v, operand) == Ordering::Equal,
    }
}

/// Range comparisons only hold between values of the same type bracket.
fn ordered(value: Option<&Bson>, operand: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    match value {
        None => false,
        Some(Bson::Array(items)) => {
            items.iter().any(|v| same_bracket(v, operand) && accept(compare_bson(v, operand)))
        }
        Some(v) => same_bracket(v, operand) && accept(compare_bson(v, operand)),
    }
}

fn truthy(v: &Bson) -> bool {
    match v {
        Bson::Boolean(b) => *b,
        Bson::Null => false,
        Bson::Int32(i) => *i != 0,
        Bson::Int64(i) => *i != 0,
        Bson::Double(f) => *f != 0.0,
        _ => true,
    }
}

fn same_bracket(a: &Bson, b: &Bson) -> bool {
    type_rank(a) == type_rank(b)
}

pub fn get_path<'a>(doc: &'a BsonDocument, path: &str) -> Option<&'a Bson> {
    let mut cur = doc;
    let mut parts = path.split('.').peekable();
    let mut depth = 0usize;
    while let Some(part) = parts.next() {
        depth += 1;
        if depth > MAX_PATH_DEPTH {
            return None;
        }
        let v = cur.get(part)?;
        if parts.peek().is_none() {
            return Some(v);
        }
        match v {
            Bson::Document(d) => cur = d,
            _ => return None,
        }
    }
    None
}

/// Multi-key comparison over a native sort document (`{field: 1 | -1}`).
/// Missing fields sort as `null`, before every other value.
pub fn compare_docs(a: &BsonDocument, b: &BsonDocument, sort: &BsonDocument) -> Ordering {
    for (field, dir) in sort {
        let ord = compare_bson(get_path(a, field).unwrap_or(&Bson::Null), get_path(b, field).unwrap_or(&Bson::Null));
        if ord != Ordering::Equal {
            let descending = matches!(dir, Bson::Int32(d) if *d < 0) || matches!(dir, Bson::Int64(d) if *d < 0);
            return if descending { ord.reverse() } else { ord };
        }
    }
    Ordering::Equal
}

pub(crate) fn as_f64(x: &Bson) -> Option<f64> {
    match x {
        Bson::Int32(i) => Some(f64::from(*i)),
        #[allow(clippy::cast_precision_loss)]
        Bson::Int64(i) => Some(*i as f64),
        Bson::Double(f) => Some(*f),
        Bson::Decimal128(d) => d.to_string().parse::<f64>().ok(),
        _ => None,
    }
}

/// Total order across values: numbers compare by magnitude regardless of width,
/// other types by their bracket first.
pub fn compare_bson(a: &Bson, b: &Bson) -> Ordering {
    if let (Some(x), Some(y)) = (as_f64(a), as_f64(b)) {
        return x.total_cmp(&y);
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => x.cmp(y),
        (Bson::Boolean(x), Bson::Boolean(y)) => x.cmp(y),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => x.bytes().cmp(&y.bytes()),
        (Bson::DateTime(x), Bson::DateTime(y)) => x.cmp(y),
        (Bson::Array(x), Bson::Array(y)) => {
            for (l, r) in x.iter().zip(y) {
                let o = compare_bson(l, r);
                if o != Ordering::Equal {
                    return o;
                }
            }
            x.len().cmp(&y.len())
        }
        (Bson::Document(x), Bson::Document(y)) => {
            for ((lk, lv), (rk, rv)) in x.iter().zip(y) {
                let o = lk.cmp(rk).then_with(|| compare_bson(lv, rv));
                if o != Ordering::Equal {
                    return o;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn type_rank(v: &Bson) -> u8 {
    use bson::Bson as T;
    match v {
        T::MinKey => 0,
        T::Null | T::Undefined => 1,
        T::Int32(_) | T::Int64(_) | T::Double(_) | T::Decimal128(_) => 2,
        T::String(_) | T::Symbol(_) => 3,
        T::Document(_) => 4,
        T::Array(_) => 5,
        T::Binary(_) => 6,
        T::ObjectId(_) => 7,
        T::Boolean(_) => 8,
        T::DateTime(_) => 9,
        T::Timestamp(_) => 10,
        T::RegularExpression(_) => 11,
        T::DbPointer(_) | T::JavaScriptCode(_) | T::JavaScriptCodeWithScope(_) => 12,
        T::MaxKey => 255,
    }
}

/// Apply a native projection. All-zero projections exclude; anything else includes,
/// with `_id` kept unless it is explicitly zero.
pub fn project(doc: &BsonDocument, projection: &BsonDocument) -> Result<BsonDocument, StoreFailure> {
    let flag = |v: &Bson| truthy(v);
    let includes: Vec<&str> = projection.iter().filter(|(k, v)| k.as_str() != "_id" && flag(v)).map(|(k, _)| k.as_str()).collect();
    let excludes: Vec<&str> = projection.iter().filter(|(k, v)| k.as_str() != "_id" && !flag(v)).map(|(k, _)| k.as_str()).collect();
    if !includes.is_empty() && !excludes.is_empty() {
        return Err(StoreFailure::rejected(
            31254,
            format!("Cannot do exclusion on field {} in inclusion projection", excludes[0]),
        ));
    }
    let keep_id = projection.get("_id").is_none_or(flag);

    if includes.is_empty() && !(projection.len() == 1 && keep_id && projection.contains_key("_id")) {
        let mut out = doc.clone();
        for f in excludes {
            remove_path(&mut out, f);
        }
        if !keep_id {
            out.remove("_id");
        }
        return Ok(out);
    }

    let mut out = BsonDocument::new();
    if keep_id && let Some(id) = doc.get("_id") {
        out.insert("_id", id.clone());
    }
    for f in includes {
        if let Some(v) = get_path(doc, f) {
            insert_path(&mut out, f, v.clone());
        }
    }
    Ok(out)
}

fn insert_path(out: &mut BsonDocument, path: &str, v: Bson) {
    match path.split_once('.') {
        None => {
            out.insert(path, v);
        }
        Some((head, rest)) => {
            let entry = out.entry(head.to_string()).or_insert_with(|| Bson::Document(BsonDocument::new()));
            if let Bson::Document(d) = entry {
                insert_path(d, rest, v);
            }
        }
    }
}

fn remove_path(out: &mut BsonDocument, path: &str) {
    match path.split_once('.') {
        None => {
            out.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Bson::Document(d)) = out.get_mut(head) {
                remove_path(d, rest);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn book() -> BsonDocument {
        doc! { "_id": 1, "title": "1984", "published_year": 1949, "price": 10.0, "meta": { "pages": 328 } }
    }

    #[test]
    fn numeric_equality_crosses_widths() {
        assert!(matches(&book(), &doc! { "price": 10 }).unwrap());
        assert!(matches(&book(), &doc! { "published_year": 1949.0 }).unwrap());
    }

    #[test]
    fn range_is_strict_and_typed() {
        assert!(!matches(&book(), &doc! { "published_year": { "$gt": 1949 } }).unwrap());
        assert!(matches(&book(), &doc! { "published_year": { "$gte": 1949 } }).unwrap());
        assert!(!matches(&book(), &doc! { "title": { "$gt": 5 } }).unwrap());
    }

    #[test]
    fn missing_field_semantics() {
        assert!(!matches(&book(), &doc! { "genre": "Fiction" }).unwrap());
        assert!(matches(&book(), &doc! { "genre": { "$ne": "Fiction" } }).unwrap());
        assert!(!matches(&book(), &doc! { "genre": { "$lt": "Z" } }).unwrap());
    }

    #[test]
    fn in_set_and_nested_path() {
        assert!(matches(&book(), &doc! { "title": { "$in": ["Dune", "1984"] } }).unwrap());
        assert!(matches(&book(), &doc! { "meta.pages": { "$lt": 400 } }).unwrap());
    }

    #[test]
    fn unknown_operator_is_rejected() {
        let err = matches(&book(), &doc! { "title": { "$regex": "^1" } }).unwrap_err();
        assert_eq!(err.code, Some(BAD_VALUE));
        assert!(matches(&book(), &doc! { "title": { "$nin": ["Dune"] } }).is_err());
        assert!(matches(&book(), &doc! { "genre": { "$exists": false } }).is_err());
    }

    #[test]
    fn missing_sorts_first_then_numbers_then_strings() {
        let a = doc! { "k": "x" };
        let b = doc! { "k": 3 };
        let c = doc! {};
        let sort = doc! { "k": 1 };
        let mut v = vec![a.clone(), b.clone(), c.clone()];
        v.sort_by(|l, r| compare_docs(l, r, &sort));
        assert_eq!(v, vec![c, b, a]);
    }

    #[test]
    fn projection_modes() {
        let inc = project(&book(), &doc! { "title": 1, "meta.pages": 1 }).unwrap();
        assert_eq!(inc, doc! { "_id": 1, "title": "1984", "meta": { "pages": 328 } });
        let no_id = project(&book(), &doc! { "title": 1, "_id": 0 }).unwrap();
        assert_eq!(no_id, doc! { "title": "1984" });
        let exc = project(&book(), &doc! { "meta": 0, "price": 0 }).unwrap();
        assert_eq!(exc, doc! { "_id": 1, "title": "1984", "published_year": 1949 });
        assert!(project(&book(), &doc! { "title": 1, "price": 0 }).is_err());
    }
}
