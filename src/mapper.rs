//! Decoding of raw store documents into typed records.
//!
//! The one required field, `title`, must be present and of the right type. Optional fields
//! decode to `None` when absent or `null`; a present value of the wrong type is still an error.
//! Batch decoding never aborts: malformed records are reported next to the valid ones.

use bson::{Bson, Document as BsonDocument};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::aggregate::GROUP_KEY;
use crate::book::{AUTHOR, Book, GENRE, ID, IN_STOCK, PRICE, PUBLISHED_YEAR, TITLE};
use crate::errors::DecodeError;

fn type_name(v: &Bson) -> String {
    format!("{:?}", v.element_type())
}

fn required_text(raw: &BsonDocument, field: &'static str) -> Result<String, DecodeError> {
    match raw.get(field) {
        Some(Bson::String(s)) => Ok(s.clone()),
        None | Some(Bson::Null) => Err(DecodeError::MissingField(field)),
        Some(other) => Err(DecodeError::WrongType { field, expected: "string", found: type_name(other) }),
    }
}

fn optional_text(raw: &BsonDocument, field: &'static str) -> Result<Option<String>, DecodeError> {
    match raw.get(field) {
        None | Some(Bson::Null) => Ok(None),
        Some(Bson::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(DecodeError::WrongType { field, expected: "string", found: type_name(other) }),
    }
}

fn optional_number(raw: &BsonDocument, field: &'static str) -> Result<Option<f64>, DecodeError> {
    match raw.get(field) {
        None | Some(Bson::Null) => Ok(None),
        Some(Bson::Int32(i)) => Ok(Some(f64::from(*i))),
        #[allow(clippy::cast_precision_loss)]
        Some(Bson::Int64(i)) => Ok(Some(*i as f64)),
        Some(Bson::Double(f)) => Ok(Some(*f)),
        Some(Bson::Decimal128(d)) => d
            .to_string()
            .parse::<f64>()
            .map(Some)
            .map_err(|e| DecodeError::InvalidValue { field, reason: e.to_string() }),
        Some(other) => Err(DecodeError::WrongType { field, expected: "number", found: type_name(other) }),
    }
}

fn optional_year(raw: &BsonDocument) -> Result<Option<i32>, DecodeError> {
    let field = PUBLISHED_YEAR;
    let invalid = |reason: String| DecodeError::InvalidValue { field, reason };
    match raw.get(field) {
        None | Some(Bson::Null) => Ok(None),
        Some(Bson::Int32(i)) => Ok(Some(*i)),
        Some(Bson::Int64(i)) => i32::try_from(*i).map(Some).map_err(|_| invalid(format!("{i} is out of range"))),
        #[allow(clippy::cast_possible_truncation)]
        Some(Bson::Double(f)) if f.fract() == 0.0 && f.abs() <= f64::from(i32::MAX) => Ok(Some(*f as i32)),
        Some(Bson::Double(f)) => Err(invalid(format!("{f} is not a whole year"))),
        Some(other) => Err(DecodeError::WrongType { field, expected: "integer", found: type_name(other) }),
    }
}

fn optional_bool(raw: &BsonDocument, field: &'static str) -> Result<Option<bool>, DecodeError> {
    match raw.get(field) {
        None | Some(Bson::Null) => Ok(None),
        Some(Bson::Boolean(b)) => Ok(Some(*b)),
        Some(other) => Err(DecodeError::WrongType { field, expected: "boolean", found: type_name(other) }),
    }
}

fn id_text(v: &Bson) -> String {
    match v {
        Bson::ObjectId(o) => o.to_hex(),
        Bson::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Decode one stored book.
///
/// # Errors
/// `MissingField` for an absent title, `WrongType`/`InvalidValue` for a present value
/// that cannot be read.
pub fn decode(raw: &BsonDocument) -> Result<Book, DecodeError> {
    Ok(Book {
        id: raw.get(ID).map(id_text),
        title: required_text(raw, TITLE)?,
        author: optional_text(raw, AUTHOR)?,
        genre: optional_text(raw, GENRE)?,
        published_year: optional_year(raw)?,
        price: optional_number(raw, PRICE)?,
        in_stock: optional_bool(raw, IN_STOCK)?,
    })
}

/// A record that could not be decoded, with its position in the result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeFailure {
    pub index: usize,
    pub id: Option<String>,
    pub error: DecodeError,
}

impl fmt::Display for DecodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "record #{} ({id}): {}", self.index, self.error),
            None => write!(f, "record #{}: {}", self.index, self.error),
        }
    }
}

/// Valid records in result order plus the ones that failed.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeBatch<T> {
    pub records: Vec<T>,
    pub failures: Vec<DecodeFailure>,
}

impl<T> Default for DecodeBatch<T> {
    fn default() -> Self {
        Self { records: Vec::new(), failures: Vec::new() }
    }
}

impl<T> DecodeBatch<T> {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

fn decode_each<T>(raw: Vec<BsonDocument>, mut f: impl FnMut(&BsonDocument) -> Result<T, DecodeError>) -> DecodeBatch<T> {
    let mut batch = DecodeBatch { records: Vec::with_capacity(raw.len()), failures: Vec::new() };
    for (index, doc) in raw.iter().enumerate() {
        match f(doc) {
            Ok(r) => batch.records.push(r),
            Err(error) => {
                let failure = DecodeFailure { index, id: doc.get(ID).map(id_text), error };
                log::warn!("skipping undecodable {failure}");
                batch.failures.push(failure);
            }
        }
    }
    batch
}

#[must_use]
pub fn decode_all(raw: Vec<BsonDocument>) -> DecodeBatch<Book> {
    decode_each(raw, decode)
}

/// The key of a grouped row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum GroupKeyValue {
    Text(String),
    /// First year of a decade; displays as `1980s`.
    Decade(i32),
    Number(f64),
    /// Rows whose key field was absent.
    Missing,
}

impl fmt::Display for GroupKeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Decade(d) => write!(f, "{d}s"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Missing => f.write_str("(none)"),
        }
    }
}

/// One output row of a grouping pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupRow {
    pub key: GroupKeyValue,
    /// Output values in pipeline order; `None` where the store produced `null`.
    pub metrics: Vec<(String, Option<f64>)>,
}

impl GroupRow {
    #[must_use]
    pub fn label(&self) -> String {
        self.key.to_string()
    }

    #[must_use]
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.iter().find(|(n, _)| n == name).and_then(|(_, v)| *v)
    }
}

/// Decode a grouped row. With `decade`, numeric keys become [`GroupKeyValue::Decade`].
///
/// # Errors
/// `MissingField` without a group key, `WrongType`/`InvalidValue` for unreadable keys or metrics.
pub fn decode_group(raw: &BsonDocument, decade: bool) -> Result<GroupRow, DecodeError> {
    let key = match raw.get(GROUP_KEY) {
        None => return Err(DecodeError::MissingField(GROUP_KEY)),
        Some(Bson::Null) => GroupKeyValue::Missing,
        Some(Bson::String(s)) => GroupKeyValue::Text(s.clone()),
        Some(v) => {
            let n = match v {
                Bson::Int32(i) => f64::from(*i),
                #[allow(clippy::cast_precision_loss)]
                Bson::Int64(i) => *i as f64,
                Bson::Double(f) => *f,
                other => {
                    return Err(DecodeError::WrongType {
                        field: GROUP_KEY,
                        expected: "string or number",
                        found: type_name(other),
                    });
                }
            };
            if decade {
                if n.fract() != 0.0 || n.abs() > f64::from(i32::MAX) {
                    return Err(DecodeError::InvalidValue { field: GROUP_KEY, reason: format!("{n} is not a decade") });
                }
                #[allow(clippy::cast_possible_truncation)]
                let d = n as i32;
                GroupKeyValue::Decade(d)
            } else {
                GroupKeyValue::Number(n)
            }
        }
    };
    let mut metrics = Vec::new();
    for (name, v) in raw.iter().filter(|(k, _)| k.as_str() != GROUP_KEY) {
        let value = match v {
            Bson::Null => None,
            Bson::Int32(i) => Some(f64::from(*i)),
            #[allow(clippy::cast_precision_loss)]
            Bson::Int64(i) => Some(*i as f64),
            Bson::Double(f) => Some(*f),
            other => {
                return Err(DecodeError::WrongType { field: "metric", expected: "number", found: type_name(other) });
            }
        };
        metrics.push((name.clone(), value));
    }
    Ok(GroupRow { key, metrics })
}

#[must_use]
pub fn decode_groups(raw: Vec<BsonDocument>, decade: bool) -> DecodeBatch<GroupRow> {
    decode_each(raw, |d| decode_group(d, decade))
}

/// `label -> metric` for rows carrying `metric`, e.g. `{"1940s": 1, "1980s": 1}`.
#[must_use]
pub fn labelled(rows: &[GroupRow], metric: &str) -> BTreeMap<String, f64> {
    rows.iter().filter_map(|r| r.metric(metric).map(|v| (r.label(), v))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{doc, oid::ObjectId};

    #[test]
    fn absent_optionals_stay_absent() {
        let b = decode(&doc! { "title": "Dune", "author": "Frank Herbert", "price": 0.0 }).unwrap();
        assert_eq!(b.price, Some(0.0));
        assert_eq!(b.genre, None);
        assert_eq!(b.published_year, None);
        let b = decode(&doc! { "title": "Dune", "author": "Frank Herbert", "price": Bson::Null }).unwrap();
        assert_eq!(b.price, None);
    }

    #[test]
    fn numeric_widths_are_accepted() {
        let b = decode(&doc! { "title": "t", "author": "a", "published_year": 1988.0, "price": 12 }).unwrap();
        assert_eq!(b.published_year, Some(1988));
        assert_eq!(b.price, Some(12.0));
    }

    #[test]
    fn missing_author_is_absent_not_an_error() {
        let b = decode(&doc! { "title": "Dune", "genre": "SciFi" }).unwrap();
        assert_eq!(b.author, None);
        assert_eq!(b.genre.as_deref(), Some("SciFi"));
        let err = decode(&doc! { "title": "Dune", "author": 7 }).unwrap_err();
        assert!(matches!(err, DecodeError::WrongType { field: AUTHOR, .. }));
    }

    #[test]
    fn wrong_types_and_missing_required_fail() {
        assert_eq!(decode(&doc! { "author": "a" }), Err(DecodeError::MissingField(TITLE)));
        let err = decode(&doc! { "title": "t", "author": "a", "price": "cheap" }).unwrap_err();
        assert!(matches!(err, DecodeError::WrongType { field: PRICE, .. }));
        let err = decode(&doc! { "title": "t", "author": "a", "published_year": 1988.5 }).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidValue { .. }));
    }

    #[test]
    fn batch_keeps_valid_records_and_reports_bad_ones() {
        let oid = ObjectId::new();
        let batch = decode_all(vec![
            doc! { "title": "1984", "author": "George Orwell" },
            doc! { "_id": oid, "title": 1984 },
            doc! { "title": "Emma", "author": "Jane Austen" },
        ]);
        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.failures.len(), 1);
        assert_eq!(batch.failures[0].index, 1);
        assert_eq!(batch.failures[0].id, Some(oid.to_hex()));
    }

    #[test]
    fn decade_rows_format_at_display_time() {
        let rows = decode_groups(
            vec![doc! { "_id": 1940.0, "count": 1 }, doc! { "_id": 1980.0, "count": 1 }],
            true,
        );
        assert!(rows.is_clean());
        assert_eq!(rows.records[0].key, GroupKeyValue::Decade(1940));
        let map = labelled(&rows.records, "count");
        assert_eq!(map, BTreeMap::from([("1940s".to_string(), 1.0), ("1980s".to_string(), 1.0)]));
    }

    #[test]
    fn null_average_is_absent() {
        let row = decode_group(&doc! { "_id": "Poetry", "average_price": Bson::Null }, false).unwrap();
        assert_eq!(row.metric("average_price"), None);
        assert_eq!(row.label(), "Poetry");
    }
}
