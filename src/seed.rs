//! Sample data: the classic bookstore catalog and a deterministic synthetic generator.

use fake::Fake;
use fake::faker::lorem::en::Words;
use fake::faker::name::en::Name;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::book::Book;

pub const GENRES: [&str; 8] =
    ["Fiction", "Dystopian", "Fantasy", "Romance", "Adventure", "Political Satire", "Gothic Fiction", "Science Fiction"];

/// The bookstore's starter catalog.
#[must_use]
pub fn sample_catalog() -> Vec<Book> {
    let book = |title: &str, author: &str, genre: &str, year: i32, price: f64, in_stock: bool| {
        Book::new(title, author).genre(genre).published(year).price(price).in_stock(in_stock)
    };
    vec![
        book("To Kill a Mockingbird", "Harper Lee", "Fiction", 1960, 12.99, true),
        book("1984", "George Orwell", "Fiction", 1949, 10.0, true),
        book("The Great Gatsby", "F. Scott Fitzgerald", "Fiction", 1925, 9.99, true),
        book("Brave New World", "Aldous Huxley", "Dystopian", 1932, 11.5, false),
        book("The Hobbit", "J.R.R. Tolkien", "Fantasy", 1937, 14.99, true),
        book("The Catcher in the Rye", "J.D. Salinger", "Fiction", 1951, 8.99, true),
        book("Pride and Prejudice", "Jane Austen", "Romance", 1813, 7.99, true),
        book("The Lord of the Rings", "J.R.R. Tolkien", "Fantasy", 1954, 19.99, true),
        book("Animal Farm", "George Orwell", "Political Satire", 1945, 8.5, false),
        book("The Alchemist", "Paulo Coelho", "Fiction", 1988, 12.0, true),
        book("Moby Dick", "Herman Melville", "Adventure", 1851, 12.5, false),
        book("Wuthering Heights", "Emily Brontë", "Gothic Fiction", 1847, 9.99, true),
        book("Project Hail Mary", "Andy Weir", "Science Fiction", 2021, 18.99, true),
        book("The Midnight Library", "Matt Haig", "Fiction", 2020, 16.5, true),
    ]
}

/// `n` plausible books, identical for the same `seed`.
#[must_use]
pub fn synthetic(n: usize, seed: u64) -> Vec<Book> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|i| {
            let words: Vec<String> = Words(1..4).fake_with_rng(&mut rng);
            let mut title = capitalize(&words.join(" "));
            if title.is_empty() {
                title = format!("Untitled {i}");
            }
            let author: String = Name().fake_with_rng(&mut rng);
            let genre = GENRES[rng.random_range(0..GENRES.len())];
            let year = rng.random_range(1800..=2025);
            let cents: u32 = rng.random_range(299..=4999);
            Book::new(title, author)
                .genre(genre)
                .published(year)
                .price(f64::from(cents) / 100.0)
                .in_stock(rng.random_bool(0.75))
        })
        .collect()
}

fn capitalize(s: &str) -> String {
    s.split(' ')
        .map(|w| {
            let mut c = w.chars();
            c.next().map(|f| f.to_uppercase().chain(c).collect::<String>()).unwrap_or_default()
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_catalog_is_valid() {
        let books = sample_catalog();
        assert!(books.iter().all(|b| b.validate().is_ok()));
        assert!(books.iter().any(|b| b.title == "The Alchemist" && b.published_year == Some(1988)));
    }

    #[test]
    fn synthetic_is_deterministic_and_valid() {
        let a = synthetic(20, 7);
        let b = synthetic(20, 7);
        assert_eq!(a, b);
        assert!(a.iter().all(|b| b.validate().is_ok()));
        assert_ne!(synthetic(20, 8), a);
    }
}
