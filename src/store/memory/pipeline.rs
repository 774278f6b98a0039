use bson::{Bson, Document as BsonDocument};
use std::cmp::Ordering;

use super::eval::{BAD_VALUE, as_f64, compare_bson, compare_docs, get_path, matches};
use crate::store::StoreFailure;

const UNRECOGNIZED_STAGE: i32 = 40324;
const DIVIDE_BY_ZERO: i32 = 2;

/// Run native pipeline stages over `docs` in order.
pub fn run(mut docs: Vec<BsonDocument>, stages: &[BsonDocument]) -> Result<Vec<BsonDocument>, StoreFailure> {
    for stage in stages {
        let Some((name, spec)) = stage.iter().next() else {
            return Err(StoreFailure::rejected(BAD_VALUE, "pipeline stage must not be empty"));
        };
        docs = match (name.as_str(), spec) {
            ("$match", Bson::Document(f)) => {
                let mut kept = Vec::with_capacity(docs.len());
                for d in docs {
                    if matches(&d, f)? {
                        kept.push(d);
                    }
                }
                kept
            }
            ("$group", Bson::Document(g)) => group(&docs, g)?,
            ("$sort", Bson::Document(s)) => {
                docs.sort_by(|a, b| compare_docs(a, b, s));
                docs
            }
            ("$limit", n) => {
                let n = as_f64(n).filter(|n| *n >= 1.0).ok_or_else(|| {
                    StoreFailure::rejected(15958, "the limit must be positive")
                })?;
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let n = n as usize;
                docs.truncate(n);
                docs
            }
            ("$addFields", Bson::Document(fields)) => {
                let mut out = Vec::with_capacity(docs.len());
                for mut d in docs {
                    for (k, e) in fields {
                        let v = evaluate(&d, e)?;
                        d.insert(k.as_str(), v);
                    }
                    out.push(d);
                }
                out
            }
            (other, _) => {
                return Err(StoreFailure::rejected(
                    UNRECOGNIZED_STAGE,
                    format!("Unrecognized pipeline stage name: '{other}'"),
                ));
            }
        };
    }
    Ok(docs)
}

enum Acc {
    Sum { int: i64, float: f64, is_float: bool },
    Avg { total: f64, n: u64 },
}

impl Acc {
    fn add(&mut self, v: &Bson) {
        match self {
            Self::Sum { int, float, is_float } => {
                let n = match v {
                    Bson::Int32(i) => Some(i64::from(*i)),
                    Bson::Int64(i) => Some(*i),
                    _ => None,
                };
                match n {
                    Some(n) => match int.checked_add(n) {
                        Some(total) => *int = total,
                        // Overflow promotes the sum to a double.
                        #[allow(clippy::cast_precision_loss)]
                        None => {
                            *float += *int as f64 + n as f64;
                            *int = 0;
                            *is_float = true;
                        }
                    },
                    None => {
                        if let Some(f) = as_f64(v) {
                            *float += f;
                            *is_float = true;
                        }
                    }
                }
            }
            Self::Avg { total, n } => {
                if let Some(f) = as_f64(v) {
                    *total += f;
                    *n += 1;
                }
            }
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn finish(&self) -> Bson {
        match self {
            Self::Sum { int, float, is_float: true } => Bson::Double(*float + *int as f64),
            Self::Sum { int, .. } => i32::try_from(*int).map_or(Bson::Int64(*int), Bson::Int32),
            Self::Avg { n: 0, .. } => Bson::Null,
            Self::Avg { total, n } => Bson::Double(total / *n as f64),
        }
    }
}

fn group(docs: &[BsonDocument], spec: &BsonDocument) -> Result<Vec<BsonDocument>, StoreFailure> {
    let key_expr = spec
        .get("_id")
        .ok_or_else(|| StoreFailure::rejected(15955, "a group specification must include an _id"))?;
    let mut outputs = Vec::new();
    for (name, acc) in spec.iter().filter(|(k, _)| k.as_str() != "_id") {
        let Bson::Document(acc) = acc else {
            return Err(StoreFailure::rejected(40234, format!("The field '{name}' must be an accumulator object")));
        };
        let Some((op, arg)) = acc.iter().next() else {
            return Err(StoreFailure::rejected(40234, format!("The field '{name}' must specify one accumulator")));
        };
        match op.as_str() {
            "$sum" | "$avg" => outputs.push((name.clone(), op.clone(), arg.clone())),
            other => return Err(StoreFailure::rejected(15952, format!("unknown group operator '{other}'"))),
        }
    }

    // Groups keep first-seen order; callers sort explicitly when order matters.
    let mut groups: Vec<(Bson, Vec<Acc>)> = Vec::new();
    for d in docs {
        let key = evaluate(d, key_expr)?;
        let idx = match groups.iter().position(|(k, _)| same_key(k, &key)) {
            Some(i) => i,
            None => {
                let accs = outputs
                    .iter()
                    .map(|(_, op, _)| match op.as_str() {
                        "$avg" => Acc::Avg { total: 0.0, n: 0 },
                        _ => Acc::Sum { int: 0, float: 0.0, is_float: false },
                    })
                    .collect();
                groups.push((key, accs));
                groups.len() - 1
            }
        };
        for ((_, _, arg), acc) in outputs.iter().zip(groups[idx].1.iter_mut()) {
            acc.add(&evaluate(d, arg)?);
        }
    }

    Ok(groups
        .into_iter()
        .map(|(key, accs)| {
            let mut row = BsonDocument::new();
            row.insert("_id", key);
            for ((name, _, _), acc) in outputs.iter().zip(&accs) {
                row.insert(name.as_str(), acc.finish());
            }
            row
        })
        .collect())
}

fn same_key(a: &Bson, b: &Bson) -> bool {
    match (as_f64(a), as_f64(b)) {
        (Some(_), Some(_)) => compare_bson(a, b) == Ordering::Equal,
        _ => a == b,
    }
}

/// Evaluate an aggregation expression. Missing fields evaluate to `null`.
pub fn evaluate(doc: &BsonDocument, expr: &Bson) -> Result<Bson, StoreFailure> {
    match expr {
        Bson::String(s) if s.starts_with('$') => Ok(get_path(doc, &s[1..]).cloned().unwrap_or(Bson::Null)),
        Bson::Array(items) => Ok(Bson::Array(items.iter().map(|e| evaluate(doc, e)).collect::<Result<_, _>>()?)),
        Bson::Document(d) => match d.iter().next() {
            Some((op, arg)) if op.starts_with('$') => operator(doc, op, arg),
            _ => {
                let mut out = BsonDocument::new();
                for (k, e) in d {
                    out.insert(k.as_str(), evaluate(doc, e)?);
                }
                Ok(Bson::Document(out))
            }
        },
        literal => Ok(literal.clone()),
    }
}

fn args(doc: &BsonDocument, arg: &Bson) -> Result<Vec<Bson>, StoreFailure> {
    match arg {
        Bson::Array(items) => items.iter().map(|e| evaluate(doc, e)).collect(),
        single => Ok(vec![evaluate(doc, single)?]),
    }
}

fn operator(doc: &BsonDocument, op: &str, arg: &Bson) -> Result<Bson, StoreFailure> {
    if op == "$literal" {
        return Ok(arg.clone());
    }
    let vals = args(doc, arg)?;
    if vals.iter().any(|v| matches!(v, Bson::Null | Bson::Undefined)) {
        return Ok(Bson::Null);
    }
    let numbers = || -> Result<Vec<f64>, StoreFailure> {
        vals.iter()
            .map(|v| {
                as_f64(v).ok_or_else(|| StoreFailure::rejected(16554, format!("{op} only supports numeric types")))
            })
            .collect()
    };
    let all_int = vals.iter().all(|v| matches!(v, Bson::Int32(_) | Bson::Int64(_)));
    match op {
        "$add" | "$multiply" => {
            let ns = numbers()?;
            let r = if op == "$add" { ns.iter().sum::<f64>() } else { ns.iter().product::<f64>() };
            Ok(numeric(r, all_int))
        }
        "$divide" => {
            let ns = numbers()?;
            let [a, b] = ns.as_slice() else {
                return Err(StoreFailure::rejected(16020, "$divide takes exactly 2 arguments"));
            };
            if *b == 0.0 {
                return Err(StoreFailure::rejected(DIVIDE_BY_ZERO, "can't $divide by zero"));
            }
            Ok(Bson::Double(a / b))
        }
        "$floor" => {
            let ns = numbers()?;
            let [n] = ns.as_slice() else {
                return Err(StoreFailure::rejected(16020, "$floor takes exactly 1 argument"));
            };
            Ok(numeric(n.floor(), all_int))
        }
        "$toString" => {
            let [v] = vals.as_slice() else {
                return Err(StoreFailure::rejected(16020, "$toString takes exactly 1 argument"));
            };
            Ok(Bson::String(to_text(v)))
        }
        "$concat" => {
            let mut s = String::new();
            for v in &vals {
                match v {
                    Bson::String(part) => s.push_str(part),
                    _ => return Err(StoreFailure::rejected(16702, "$concat only supports strings")),
                }
            }
            Ok(Bson::String(s))
        }
        other => Err(StoreFailure::rejected(31325, format!("Unrecognized expression '{other}'"))),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn numeric(r: f64, all_int: bool) -> Bson {
    if all_int && r.fract() == 0.0 && r.abs() < 9.0e15 {
        let i = r as i64;
        i32::try_from(i).map_or(Bson::Int64(i), Bson::Int32)
    } else {
        Bson::Double(r)
    }
}

fn to_text(v: &Bson) -> String {
    match v {
        Bson::String(s) => s.clone(),
        Bson::Double(f) if f.fract() == 0.0 && f.abs() < 1.0e15 => format!("{f:.0}"),
        Bson::ObjectId(o) => o.to_hex(),
        Bson::Boolean(b) => b.to_string(),
        Bson::Int32(i) => i.to_string(),
        Bson::Int64(i) => i.to_string(),
        other => other.to_string(),
    }
}
