use bookshelf::catalog::GroupBy;
use bookshelf::cli::{self, Command, OutputMode};
use bookshelf::config::StoreConfig;
use bookshelf::connection::{Connection, ConnectionManager};
use bookshelf::errors::ShelfError;

async fn seeded() -> (ConnectionManager, Connection) {
    let mgr = ConnectionManager::from_config(StoreConfig::default()).unwrap();
    let conn = mgr.acquire().await.unwrap();
    (mgr, conn)
}

async fn run(conn: &mut Connection, cmd: Command, mode: OutputMode) -> Result<(String, String), ShelfError> {
    let mut out = Vec::new();
    let mut diag = Vec::new();
    cli::run(conn, cmd, mode, &mut out, &mut diag).await?;
    Ok((String::from_utf8(out).unwrap(), String::from_utf8(diag).unwrap()))
}

fn list(author: Option<&str>, sort: Option<&str>, limit: Option<u64>) -> Command {
    match Command::list_all() {
        Command::List { genre, after_year, in_stock, where_json, fields, no_id, offset, .. } => Command::List {
            genre,
            author: author.map(str::to_string),
            after_year,
            in_stock,
            where_json,
            fields,
            no_id,
            sort: sort.map(str::to_string),
            limit,
            offset,
        },
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn list_by_author_prints_one_line_per_book() {
    let (_mgr, mut conn) = seeded().await;
    let (out, diag) = run(&mut conn, list(Some("George Orwell"), Some("published_year"), None), OutputMode::Pretty)
        .await
        .unwrap();
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(
        lines,
        [
            "Animal Farm by George Orwell (1945) [Political Satire] $8.50 out of stock",
            "1984 by George Orwell (1949) [Fiction] $10.00 in stock",
        ]
    );
    assert!(diag.is_empty());
}

#[tokio::test]
async fn list_with_limit_requires_sort() {
    let (_mgr, mut conn) = seeded().await;
    let err = run(&mut conn, list(None, None, Some(3)), OutputMode::Pretty).await.unwrap_err();
    assert!(matches!(err, ShelfError::InvalidSpec(_)));
    assert_eq!(err.exit_code(), 2);
}

#[tokio::test]
async fn ndjson_list_emits_parseable_lines() {
    let (_mgr, mut conn) = seeded().await;
    let (out, _) = run(&mut conn, list(None, Some("price:desc"), Some(2)), OutputMode::Ndjson).await.unwrap();
    let rows: Vec<serde_json::Value> = out.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["title"], "The Lord of the Rings");
    assert_eq!(rows[1]["title"], "Project Hail Mary");
}

#[tokio::test]
async fn projected_list_returns_only_requested_fields() {
    let (_mgr, mut conn) = seeded().await;
    let cmd = Command::List {
        genre: Some("Fantasy".into()),
        author: None,
        after_year: None,
        in_stock: false,
        where_json: None,
        fields: Some(cli::parse_fields("title,price")),
        no_id: false,
        sort: Some("title".into()),
        limit: None,
        offset: None,
    };
    let (out, _) = run(&mut conn, cmd, OutputMode::Ndjson).await.unwrap();
    for line in out.lines() {
        let v: serde_json::Value = serde_json::from_str(line).unwrap();
        let keys: Vec<&str> = v.as_object().unwrap().keys().map(String::as_str).collect();
        assert!(keys.iter().all(|k| ["_id", "title", "price"].contains(k)), "{keys:?}");
    }
    assert_eq!(out.lines().count(), 2);
}

#[tokio::test]
async fn no_id_drops_the_identity_field() {
    let (_mgr, mut conn) = seeded().await;
    let cmd = Command::List {
        genre: None,
        author: Some("George Orwell".into()),
        after_year: None,
        in_stock: false,
        where_json: None,
        fields: Some(cli::parse_fields("title,author,price")),
        no_id: true,
        sort: Some("published_year".into()),
        limit: None,
        offset: None,
    };
    let (out, _) = run(&mut conn, cmd, OutputMode::Ndjson).await.unwrap();
    let rows: Vec<serde_json::Value> = out.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0], serde_json::json!({ "title": "Animal Farm", "author": "George Orwell", "price": 8.5 }));
    assert!(rows.iter().all(|r| r.get("_id").is_none()));
}

#[tokio::test]
async fn update_then_delete_report_outcomes() {
    let (_mgr, mut conn) = seeded().await;
    let (out, _) = run(&mut conn, Command::UpdatePrice { title: "1984".into(), price: 15.99 }, OutputMode::Pretty)
        .await
        .unwrap();
    assert_eq!(out.trim(), "updated \"1984\": price 15.99");
    let (out, _) = run(&mut conn, Command::UpdatePrice { title: "Dune".into(), price: 1.0 }, OutputMode::Pretty)
        .await
        .unwrap();
    assert_eq!(out.trim(), "no book titled \"Dune\"");
    let (out, _) = run(&mut conn, Command::Delete { title: "1984".into() }, OutputMode::Ndjson).await.unwrap();
    let v: serde_json::Value = serde_json::from_str(out.trim()).unwrap();
    assert_eq!(v["deleted"], 1);
}

#[tokio::test]
async fn negative_price_is_rejected() {
    let (_mgr, mut conn) = seeded().await;
    let err = run(&mut conn, Command::UpdatePrice { title: "1984".into(), price: -1.0 }, OutputMode::Pretty)
        .await
        .unwrap_err();
    assert!(matches!(err, ShelfError::InvalidSpec(_)));
}

#[tokio::test]
async fn decade_stats_render_labels() {
    let (_mgr, mut conn) = seeded().await;
    let (out, _) = run(&mut conn, Command::Stats { by: GroupBy::Decade }, OutputMode::Ndjson).await.unwrap();
    let rows: Vec<serde_json::Value> = out.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    let forties = rows.iter().find(|r| r["key"] == "1940s").unwrap();
    assert_eq!(forties["count"], 2.0);
}

#[tokio::test]
async fn create_indexes_then_explain_reports_index_use() {
    let (_mgr, mut conn) = seeded().await;
    let (out, _) = run(&mut conn, Command::CreateIndexes, OutputMode::Pretty).await.unwrap();
    assert_eq!(out.lines().collect::<Vec<_>>(), ["title_1: created", "author_1_published_year_1: created"]);
    let (out, _) = run(&mut conn, Command::CreateIndexes, OutputMode::Pretty).await.unwrap();
    assert!(out.lines().all(|l| l.ends_with("already present")));
    let (out, _) = run(&mut conn, Command::Explain { title: "1984".into() }, OutputMode::Pretty).await.unwrap();
    assert!(out.contains("title_1"));
    assert_eq!(out.lines().last(), Some("index used"));
}

#[tokio::test]
async fn synthetic_seed_inserts_requested_count() {
    let (mgr, mut conn) = seeded().await;
    let (out, _) =
        run(&mut conn, Command::Seed { synthetic: Some(25), seed: 7 }, OutputMode::Pretty).await.unwrap();
    assert_eq!(out.trim(), "inserted 25 books");
    assert_eq!(mgr.memory().unwrap().count("books"), 14 + 25);
}

#[tokio::test]
async fn skipped_records_are_reported_on_diagnostics() {
    let (mgr, mut conn) = seeded().await;
    let mem = mgr.memory().unwrap();
    let broken = mem.for_database("plp_bookstore");
    let raw = vec![bson::doc! { "author": "Nobody", "genre": "Untitled" }];
    bookshelf::store::DocumentStore::insert_many(&broken, "books", raw).await.unwrap();
    let (out, diag) = run(&mut conn, list(None, None, None), OutputMode::Pretty).await.unwrap();
    assert_eq!(out.lines().count(), 14);
    assert!(diag.starts_with("warning: skipped"));
    assert!(diag.contains("title"));
}

#[tokio::test]
async fn info_reports_backend() {
    let (_mgr, mut conn) = seeded().await;
    let (out, _) = run(&mut conn, Command::Info, OutputMode::Ndjson).await.unwrap();
    let v: serde_json::Value = serde_json::from_str(out.trim()).unwrap();
    assert_eq!(v["backend"], "memory");
    assert_eq!(v["collection"], "books");
}
