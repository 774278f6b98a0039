use crate::catalog::GroupBy;

/// One CLI action, independent of argument parsing.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    List {
        genre: Option<String>,
        author: Option<String>,
        after_year: Option<i32>,
        in_stock: bool,
        /// Extra JSON filter merged with the flags above.
        where_json: Option<String>,
        fields: Option<Vec<String>>,
        /// Drop `_id` from a `fields` projection.
        no_id: bool,
        /// `field[:asc|desc],...`
        sort: Option<String>,
        limit: Option<u64>,
        offset: Option<u64>,
    },
    UpdatePrice {
        title: String,
        price: f64,
    },
    Delete {
        title: String,
    },
    Stats {
        by: GroupBy,
    },
    TopAuthors {
        n: u64,
    },
    CreateIndexes,
    Explain {
        title: String,
    },
    Seed {
        /// Generate this many synthetic books instead of the sample catalog.
        synthetic: Option<usize>,
        seed: u64,
    },
    Info,
}

impl Command {
    /// `list` with no filters.
    #[must_use]
    pub const fn list_all() -> Self {
        Self::List {
            genre: None,
            author: None,
            after_year: None,
            in_stock: false,
            where_json: None,
            fields: None,
            no_id: false,
            sort: None,
            limit: None,
            offset: None,
        }
    }
}
