use bookshelf::errors::ShelfError;
use bookshelf::query::{self, FindSpec, Filter, Page, Projection, SortSpec, parse_filter_json, parse_sort};
use bson::doc;

#[test]
fn combined_filter_translates_to_native_operators() {
    let f = Filter::all().eq("genre", "Fiction").gt("published_year", 1950).lte("published_year", 1999).eq("in_stock", true);
    let q = query::build(&f, None, None, None).unwrap();
    assert_eq!(
        q.filter(),
        &doc! { "genre": "Fiction", "published_year": { "$gt": 1950, "$lte": 1999 }, "in_stock": true }
    );
    assert!(q.projection().is_none());
    assert!(q.sort().is_none());
    assert_eq!((q.skip(), q.limit()), (0, None));
}

#[test]
fn sort_gets_id_tiebreak_and_page_maps_to_skip_limit() {
    let spec = FindSpec::new(Filter::all()).sort(SortSpec::desc("price").then_asc("title")).page(Page::nth(2, 5));
    let q = query::build_spec(&spec).unwrap();
    assert_eq!(q.sort(), Some(&doc! { "price": -1, "title": 1, "_id": 1 }));
    assert_eq!(q.skip(), 10);
    assert_eq!(q.limit(), Some(5));
}

#[test]
fn page_without_sort_is_rejected() {
    let spec = FindSpec::new(Filter::all()).page(Page::first(10));
    assert!(matches!(query::build_spec(&spec), Err(ShelfError::InvalidSpec(_))));
}

#[test]
fn zero_limit_is_an_empty_page_not_unbounded() {
    let spec = FindSpec::new(Filter::all()).sort(SortSpec::asc("title")).page(Page::first(0));
    let q = query::build_spec(&spec).unwrap();
    assert!(q.is_empty_page());
    let spec = FindSpec::new(Filter::all()).sort(SortSpec::asc("title")).page(Page::unbounded_from(3));
    let q = query::build_spec(&spec).unwrap();
    assert!(!q.is_empty_page());
    assert_eq!((q.skip(), q.limit()), (3, None));
}

#[test]
fn projection_variants() {
    let q = query::build(&Filter::all(), Some(&Projection::fields(["title", "author"])), None, None).unwrap();
    assert_eq!(q.projection(), Some(&doc! { "title": 1, "author": 1 }));
    let q = query::build(&Filter::all(), Some(&Projection::fields(["title"]).without_id()), None, None).unwrap();
    assert_eq!(q.projection(), Some(&doc! { "title": 1, "_id": 0 }));
    let empty = Projection::fields(Vec::<String>::new());
    assert!(query::build(&Filter::all(), Some(&empty), None, None).is_err());
}

#[test]
fn malformed_field_names_are_rejected() {
    for bad in ["", "$where", "a..b", "trailing."] {
        let f = Filter::all().eq(bad, 1);
        assert!(matches!(query::build(&f, None, None, None), Err(ShelfError::InvalidSpec(_))), "{bad:?}");
    }
}

#[test]
fn duplicate_operator_on_one_field_is_rejected() {
    let f = Filter::all().gt("price", 1).gt("price", 2);
    assert!(query::build(&f, None, None, None).is_err());
}

#[test]
fn building_is_deterministic() {
    let spec = FindSpec::new(Filter::all().one_of("genre", ["Fiction", "Dystopian"]).lt("price", 20.5))
        .sort(SortSpec::asc("title"))
        .page(Page::first(3));
    assert_eq!(query::build_spec(&spec).unwrap(), query::build_spec(&spec).unwrap());
}

#[test]
fn json_filter_accepts_bare_and_dollar_operators() {
    let f = parse_filter_json(r#"{"genre": "Fiction", "price": {"lt": 10}, "published_year": {"$in": [1949, 1988]}}"#)
        .unwrap();
    let q = query::build(&f, None, None, None).unwrap();
    assert_eq!(
        q.filter(),
        &doc! { "genre": "Fiction", "price": { "$lt": 10 }, "published_year": { "$in": [1949, 1988] } }
    );
}

#[test]
fn json_filter_rejects_unsupported_input() {
    for bad in [r#"[1, 2]"#, r#"{"price": {"$where": "1"}}"#, r#"{"genre": null}"#, r#"{"price": {}}"#, "{"] {
        assert!(matches!(parse_filter_json(bad), Err(ShelfError::InvalidSpec(_))), "{bad}");
    }
}

#[test]
fn sort_strings_parse_directions() {
    let s = parse_sort("price:desc, title").unwrap();
    assert_eq!(s, SortSpec::desc("price").then_asc("title"));
    assert!(parse_sort("price:sideways").is_err());
    assert!(parse_sort(" , ").is_err());
}
