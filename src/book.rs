use crate::errors::{Result, ShelfError};
use bson::{Bson, Document as BsonDocument, doc};
use serde::{Deserialize, Serialize};

pub const TITLE: &str = "title";
pub const AUTHOR: &str = "author";
pub const GENRE: &str = "genre";
pub const PUBLISHED_YEAR: &str = "published_year";
pub const PRICE: &str = "price";
pub const IN_STOCK: &str = "in_stock";
pub const ID: &str = "_id";

/// Fields a stored book may carry. Only `title` is required.
pub const BOOK_FIELDS: [&str; 6] = [TITLE, AUTHOR, GENRE, PUBLISHED_YEAR, PRICE, IN_STOCK];

/// One catalog record.
///
/// Optional fields are `None` when the store has no value for them (or a projection left them
/// out). `None` is never conflated with a zero or empty value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
    pub author: Option<String>,
    pub genre: Option<String>,
    pub published_year: Option<i32>,
    pub price: Option<f64>,
    pub in_stock: Option<bool>,
}

impl Book {
    #[must_use]
    pub fn new(title: impl Into<String>, author: impl Into<String>) -> Self {
        Self { author: Some(author.into()), ..Self::titled(title) }
    }

    /// A book with only its title set.
    #[must_use]
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            id: None,
            title: title.into(),
            author: None,
            genre: None,
            published_year: None,
            price: None,
            in_stock: None,
        }
    }

    #[must_use]
    pub fn genre(mut self, genre: impl Into<String>) -> Self {
        self.genre = Some(genre.into());
        self
    }

    #[must_use]
    pub const fn published(mut self, year: i32) -> Self {
        self.published_year = Some(year);
        self
    }

    #[must_use]
    pub const fn price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }

    #[must_use]
    pub const fn in_stock(mut self, in_stock: bool) -> Self {
        self.in_stock = Some(in_stock);
        self
    }

    /// Write-side checks; the store enforces no schema.
    ///
    /// # Errors
    /// `InvalidSpec` for an empty title or a present but blank author, a negative or non-finite price, or a year outside 0..=9999.
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(ShelfError::invalid("book title must not be empty"));
        }
        if self.author.as_deref().is_some_and(|a| a.trim().is_empty()) {
            return Err(ShelfError::invalid(format!("book `{}` has an empty author", self.title)));
        }
        if let Some(p) = self.price {
            validate_price(p)?;
        }
        if let Some(y) = self.published_year {
            validate_year(y)?;
        }
        Ok(())
    }

    /// Native document for insertion. Absent optionals are omitted, not written as null.
    #[must_use]
    pub fn to_document(&self) -> BsonDocument {
        let mut d = BsonDocument::new();
        d.insert(TITLE, self.title.as_str());
        if let Some(a) = &self.author {
            d.insert(AUTHOR, a.as_str());
        }
        if let Some(g) = &self.genre {
            d.insert(GENRE, g.as_str());
        }
        if let Some(y) = self.published_year {
            d.insert(PUBLISHED_YEAR, y);
        }
        if let Some(p) = self.price {
            d.insert(PRICE, p);
        }
        if let Some(s) = self.in_stock {
            d.insert(IN_STOCK, s);
        }
        d
    }
}

pub(crate) fn validate_price(p: f64) -> Result<()> {
    if !p.is_finite() || p < 0.0 {
        return Err(ShelfError::invalid(format!("price must be a finite, non-negative number, got {p}")));
    }
    Ok(())
}

pub(crate) fn validate_year(y: i32) -> Result<()> {
    if !(0..=9999).contains(&y) {
        return Err(ShelfError::invalid(format!("published_year {y} is out of range")));
    }
    Ok(())
}

/// Typed `$set` for `update_one`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookChanges {
    pub author: Option<String>,
    pub genre: Option<String>,
    pub published_year: Option<i32>,
    pub price: Option<f64>,
    pub in_stock: Option<bool>,
}

impl BookChanges {
    #[must_use]
    pub fn price(price: f64) -> Self {
        Self { price: Some(price), ..Self::default() }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.author.is_none()
            && self.genre.is_none()
            && self.published_year.is_none()
            && self.price.is_none()
            && self.in_stock.is_none()
    }

    /// # Errors
    /// `InvalidSpec` when there is nothing to change or a value fails write validation.
    pub fn to_update(&self) -> Result<BsonDocument> {
        if self.is_empty() {
            return Err(ShelfError::invalid("update must change at least one field"));
        }
        let mut set = BsonDocument::new();
        if let Some(a) = &self.author {
            if a.trim().is_empty() {
                return Err(ShelfError::invalid("author must not be empty"));
            }
            set.insert(AUTHOR, a.as_str());
        }
        if let Some(g) = &self.genre {
            set.insert(GENRE, g.as_str());
        }
        if let Some(y) = self.published_year {
            validate_year(y)?;
            set.insert(PUBLISHED_YEAR, y);
        }
        if let Some(p) = self.price {
            validate_price(p)?;
            set.insert(PRICE, Bson::Double(p));
        }
        if let Some(s) = self.in_stock {
            set.insert(IN_STOCK, s);
        }
        Ok(doc! { "$set": set })
    }
}
