use bson::{Bson, Document as BsonDocument};

use crate::book::{AUTHOR, Book, GENRE, IN_STOCK, PUBLISHED_YEAR};
use crate::errors::Result;
use crate::query::{Filter, parse_filter_json};

pub fn parse_fields(s: &str) -> Vec<String> {
    s.split(',').map(str::trim).filter(|f| !f.is_empty()).map(str::to_string).collect()
}

/// Combine the `list` flags and an optional JSON filter into one filter.
pub fn list_filter(
    genre: Option<&str>,
    author: Option<&str>,
    after_year: Option<i32>,
    in_stock: bool,
    where_json: Option<&str>,
) -> Result<Filter> {
    let mut f = match where_json {
        Some(j) => parse_filter_json(j)?,
        None => Filter::all(),
    };
    if let Some(g) = genre {
        f = f.eq(GENRE, g);
    }
    if let Some(a) = author {
        f = f.eq(AUTHOR, a);
    }
    if let Some(y) = after_year {
        f = f.gt(PUBLISHED_YEAR, y);
    }
    if in_stock {
        f = f.eq(IN_STOCK, true);
    }
    Ok(f)
}

fn or_dash<T: ToString>(v: Option<T>) -> String {
    v.map_or_else(|| "-".to_string(), |x| x.to_string())
}

pub fn book_line(b: &Book) -> String {
    let stock = match b.in_stock {
        Some(true) => "in stock",
        Some(false) => "out of stock",
        None => "stock unknown",
    };
    let by = b.author.as_deref().map_or_else(String::new, |a| format!(" by {a}"));
    format!(
        "{}{by} ({}) [{}] {} {stock}",
        b.title,
        or_dash(b.published_year),
        or_dash(b.genre.as_deref()),
        b.price.map_or_else(|| "-".to_string(), |p| format!("${p:.2}")),
    )
}

pub fn document_json(d: &BsonDocument) -> serde_json::Value {
    Bson::Document(d.clone()).into_relaxed_extjson()
}

pub fn metric_text(v: Option<f64>) -> String {
    match v {
        None => "-".to_string(),
        Some(n) if n.fract() == 0.0 => format!("{n:.0}"),
        Some(n) => format!("{n:.2}"),
    }
}
