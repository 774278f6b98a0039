use crate::book::ID;
use crate::errors::{Result, ShelfError};
use bson::{Bson, Document as BsonDocument, doc};
use std::collections::HashSet;

use super::types::{
    FindSpec, Filter, Limit, MAX_IN_SET, MAX_PROJECTION_FIELDS, MAX_SORT_FIELDS, Page, Predicate, Projection,
    SortSpec,
};

/// A store-native find: filter, projection, sort and slice documents.
///
/// Only the builders in this crate construct one; store backends read it through the accessors.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeQuery {
    filter: BsonDocument,
    projection: Option<BsonDocument>,
    sort: Option<BsonDocument>,
    skip: u64,
    limit: Option<u64>,
    hint: Option<BsonDocument>,
    empty_page: bool,
}

impl NativeQuery {
    #[must_use]
    pub const fn filter(&self) -> &BsonDocument {
        &self.filter
    }
    #[must_use]
    pub const fn projection(&self) -> Option<&BsonDocument> {
        self.projection.as_ref()
    }
    #[must_use]
    pub const fn sort(&self) -> Option<&BsonDocument> {
        self.sort.as_ref()
    }
    #[must_use]
    pub const fn skip(&self) -> u64 {
        self.skip
    }
    /// `None` means no limit. Never `Some(0)`: a zero-sized page is flagged by [`Self::is_empty_page`].
    #[must_use]
    pub const fn limit(&self) -> Option<u64> {
        self.limit
    }
    #[must_use]
    pub const fn hint(&self) -> Option<&BsonDocument> {
        self.hint.as_ref()
    }
    /// True for `Limit::Bounded(0)`: the result is empty without asking the store.
    #[must_use]
    pub const fn is_empty_page(&self) -> bool {
        self.empty_page
    }

    /// The same query forced onto a full collection scan.
    #[must_use]
    pub fn with_collection_scan(mut self) -> Self {
        self.hint = Some(doc! { "$natural": 1 });
        self
    }

    /// Compact rendering for logs and explain output.
    #[must_use]
    pub fn to_document(&self) -> BsonDocument {
        let mut d = doc! { "filter": self.filter.clone() };
        if let Some(p) = &self.projection {
            d.insert("projection", p.clone());
        }
        if let Some(s) = &self.sort {
            d.insert("sort", s.clone());
        }
        if self.skip > 0 {
            d.insert("skip", clamp_i64(self.skip));
        }
        if let Some(l) = self.limit {
            d.insert("limit", clamp_i64(l));
        }
        if let Some(h) = &self.hint {
            d.insert("hint", h.clone());
        }
        d
    }
}

pub(crate) fn clamp_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

/// Build a native query from its typed parts. Pure; nothing is sent anywhere.
///
/// # Errors
/// `InvalidSpec` for malformed field names, conflicting predicates on one field, an empty
/// sort or projection, oversized specs, or a page without an explicit sort.
pub fn build(
    filter: &Filter,
    projection: Option<&Projection>,
    sort: Option<&SortSpec>,
    page: Option<&Page>,
) -> Result<NativeQuery> {
    let filter_doc = build_filter(filter)?;
    let projection = projection.map(build_projection).transpose()?;
    let sort_doc = sort.map(|s| build_sort(s, true)).transpose()?;
    if page.is_some() && sort_doc.is_none() {
        return Err(ShelfError::invalid("paginated queries need an explicit sort"));
    }
    let (skip, limit, empty_page) = match page {
        None => (0, None, false),
        Some(Page { limit: Limit::Unbounded, offset }) => (*offset, None, false),
        Some(Page { limit: Limit::Bounded(0), offset }) => (*offset, None, true),
        Some(Page { limit: Limit::Bounded(n), offset }) => (*offset, Some(*n), false),
    };
    let q = NativeQuery { filter: filter_doc, projection, sort: sort_doc, skip, limit, hint: None, empty_page };
    log::debug!("built query {}", q.to_document());
    Ok(q)
}

/// # Errors
/// See [`build`].
pub fn build_spec(spec: &FindSpec) -> Result<NativeQuery> {
    build(&spec.filter, spec.projection.as_ref(), spec.sort.as_ref(), spec.page.as_ref())
}

pub(crate) fn check_field(field: &str) -> Result<()> {
    if field.is_empty() {
        return Err(ShelfError::invalid("field name must not be empty"));
    }
    if field.starts_with('$') || field.contains('\0') {
        return Err(ShelfError::invalid(format!("`{field}` is not a valid field name")));
    }
    if field.split('.').any(str::is_empty) {
        return Err(ShelfError::invalid(format!("`{field}` has an empty path segment")));
    }
    Ok(())
}

/// `{field: value}` for a lone equality, `{field: {$op: value, ...}}` otherwise.
pub(crate) fn build_filter(filter: &Filter) -> Result<BsonDocument> {
    let mut fields: Vec<(&str, Vec<&Predicate>)> = Vec::new();
    for (field, pred) in &filter.clauses {
        check_field(field)?;
        match fields.iter_mut().find(|(f, _)| *f == field.as_str()) {
            Some((_, preds)) => preds.push(pred),
            None => fields.push((field.as_str(), vec![pred])),
        }
    }

    let mut out = BsonDocument::new();
    for (field, preds) in fields {
        if let [Predicate::Eq(v)] = preds.as_slice() {
            out.insert(field, v.to_bson());
            continue;
        }
        let mut ops = BsonDocument::new();
        for p in preds {
            let op = p.operator();
            if ops.contains_key(op) {
                return Err(ShelfError::invalid(format!("`{field}` has more than one {op} predicate")));
            }
            let operand = match p {
                Predicate::Eq(v)
                | Predicate::Ne(v)
                | Predicate::Gt(v)
                | Predicate::Gte(v)
                | Predicate::Lt(v)
                | Predicate::Lte(v) => v.to_bson(),
                Predicate::In(vs) => {
                    if vs.len() > MAX_IN_SET {
                        return Err(ShelfError::invalid(format!(
                            "`{field}` $in has {} values, the maximum is {MAX_IN_SET}",
                            vs.len()
                        )));
                    }
                    Bson::Array(vs.iter().map(super::types::Value::to_bson).collect())
                }
            };
            ops.insert(op, operand);
        }
        out.insert(field, ops);
    }
    Ok(out)
}

fn build_projection(p: &Projection) -> Result<BsonDocument> {
    if p.fields.is_empty() {
        return Err(ShelfError::invalid("projection must name at least one field"));
    }
    if p.fields.len() > MAX_PROJECTION_FIELDS {
        return Err(ShelfError::invalid(format!("projection exceeds {MAX_PROJECTION_FIELDS} fields")));
    }
    let mut out = BsonDocument::new();
    for f in &p.fields {
        check_field(f)?;
        if f == ID {
            continue;
        }
        out.insert(f.as_str(), 1);
    }
    if !p.include_id {
        if out.is_empty() {
            return Err(ShelfError::invalid("projection excludes `_id` and names no other field"));
        }
        out.insert(ID, 0);
    } else if out.is_empty() {
        // Only `_id` was asked for.
        out.insert(ID, 1);
    }
    Ok(out)
}

/// Sort document. With `tiebreak`, `_id` ascending is appended so equal keys keep insertion order.
pub(crate) fn build_sort(s: &SortSpec, tiebreak: bool) -> Result<BsonDocument> {
    if s.keys.is_empty() {
        return Err(ShelfError::invalid("sort must name at least one field"));
    }
    if s.keys.len() > MAX_SORT_FIELDS {
        return Err(ShelfError::invalid(format!("sort exceeds {MAX_SORT_FIELDS} fields")));
    }
    let mut seen = HashSet::new();
    let mut out = BsonDocument::new();
    for k in &s.keys {
        check_field(&k.field)?;
        if !seen.insert(k.field.as_str()) {
            return Err(ShelfError::invalid(format!("sort names `{}` twice", k.field)));
        }
        out.insert(k.field.as_str(), k.direction.as_i32());
    }
    if tiebreak && !out.contains_key(ID) {
        out.insert(ID, 1);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::types::{FindSpec, Page};

    #[test]
    fn lone_equality_is_a_plain_value() {
        let q = build(&Filter::all().eq("genre", "Fiction"), None, None, None).unwrap();
        assert_eq!(q.filter(), &doc! { "genre": "Fiction" });
    }

    #[test]
    fn gt_stays_strict() {
        let q = build(&Filter::all().gt("published_year", 1950), None, None, None).unwrap();
        assert_eq!(q.filter(), &doc! { "published_year": { "$gt": 1950 } });
    }

    #[test]
    fn predicates_on_one_field_merge() {
        let f = Filter::all().gt("published_year", 1900).lt("published_year", 2000).eq("in_stock", true);
        let q = build(&f, None, None, None).unwrap();
        assert_eq!(
            q.filter(),
            &doc! { "published_year": { "$gt": 1900, "$lt": 2000 }, "in_stock": true }
        );
    }

    #[test]
    fn duplicate_operator_is_invalid() {
        let f = Filter::all().gt("price", 1).gt("price", 2);
        assert!(matches!(build(&f, None, None, None), Err(ShelfError::InvalidSpec(_))));
    }

    #[test]
    fn operator_as_field_is_invalid() {
        let f = Filter::all().eq("$where", "1");
        assert!(matches!(build(&f, None, None, None), Err(ShelfError::InvalidSpec(_))));
    }

    #[test]
    fn projection_keeps_id_unless_excluded() {
        let p = Projection::fields(["title", "author"]);
        let q = build(&Filter::all(), Some(&p), None, None).unwrap();
        assert_eq!(q.projection().unwrap(), &doc! { "title": 1, "author": 1 });
        let q = build(&Filter::all(), Some(&p.without_id()), None, None).unwrap();
        assert_eq!(q.projection().unwrap(), &doc! { "title": 1, "author": 1, "_id": 0 });
    }

    #[test]
    fn empty_sort_is_invalid() {
        let err = build(&Filter::all(), None, Some(&SortSpec::default()), None).unwrap_err();
        assert!(matches!(err, ShelfError::InvalidSpec(_)));
    }

    #[test]
    fn sort_gets_id_tiebreaker() {
        let s = SortSpec::desc("price").then_asc("title");
        let q = build(&Filter::all(), None, Some(&s), None).unwrap();
        assert_eq!(q.sort().unwrap(), &doc! { "price": -1, "title": 1, "_id": 1 });
    }

    #[test]
    fn page_without_sort_is_invalid() {
        let spec = FindSpec::new(Filter::all()).page(Page::first(5));
        assert!(matches!(build_spec(&spec), Err(ShelfError::InvalidSpec(_))));
    }

    #[test]
    fn zero_limit_means_no_results() {
        let spec = FindSpec::new(Filter::all()).sort(SortSpec::asc("title")).page(Page::first(0));
        let q = build_spec(&spec).unwrap();
        assert!(q.is_empty_page());
        assert_eq!(q.limit(), None);
        let spec = FindSpec::new(Filter::all()).sort(SortSpec::asc("title")).page(Page::unbounded_from(3));
        let q = build_spec(&spec).unwrap();
        assert!(!q.is_empty_page());
        assert_eq!((q.skip(), q.limit()), (3, None));
    }

    #[test]
    fn collection_scan_sets_natural_hint() {
        let q = build(&Filter::all().eq("title", "1984"), None, None, None).unwrap().with_collection_scan();
        assert_eq!(q.hint().unwrap(), &doc! { "$natural": 1 });
    }
}
