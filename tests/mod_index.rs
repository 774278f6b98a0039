use bookshelf::book::TITLE;
use bookshelf::catalog::Catalog;
use bookshelf::config::StoreConfig;
use bookshelf::connection::ConnectionManager;
use bookshelf::executor::Executor;
use bookshelf::index::{IndexManager, IndexSpec, catalog_indexes};
use bookshelf::query::{Direction, Filter};

fn seeded() -> ConnectionManager {
    ConnectionManager::from_config(StoreConfig::default()).unwrap()
}

#[test]
fn catalog_declares_title_and_author_year_indexes() {
    let names: Vec<String> = catalog_indexes().unwrap().iter().map(IndexSpec::name).collect();
    assert_eq!(names, ["title_1", "author_1_published_year_1"]);
    assert!(IndexSpec::ascending(["$bad"]).is_err());
    assert!(IndexSpec::new([("a.", Direction::Ascending)]).is_err());
}

#[tokio::test]
async fn ensure_index_is_idempotent() {
    let mgr = seeded();
    let mut conn = mgr.acquire().await.unwrap();
    let mut catalog = Catalog::new(&mut conn);
    let first = catalog.ensure_indexes(&catalog_indexes().unwrap()).await.unwrap();
    assert_eq!(first, vec![("title_1".to_string(), true), ("author_1_published_year_1".to_string(), true)]);
    let second = catalog.ensure_indexes(&catalog_indexes().unwrap()).await.unwrap();
    assert!(second.iter().all(|(_, created)| !created));

    let executor = catalog.executor();
    drop(catalog);
    let listed = IndexManager::new(executor).list(&mut conn).await.unwrap();
    assert!(listed.iter().any(|ix| ix.name == "title_1"));
    assert!(listed.iter().any(|ix| ix.name == "author_1_published_year_1"));
}

#[tokio::test]
async fn title_lookup_uses_the_index_once_created() {
    let mgr = seeded();
    let mut conn = mgr.acquire().await.unwrap();
    let mut catalog = Catalog::new(&mut conn);
    let title = Filter::all().eq(TITLE, "1984");

    let before = catalog.explain(&title).await.unwrap();
    assert!(!before.indexed.used_index);
    assert!(!before.index_effective());
    assert_eq!(before.indexed.docs_examined, before.full_scan.docs_examined);

    catalog.ensure_indexes(&[IndexSpec::ascending([TITLE]).unwrap()]).await.unwrap();
    let after = catalog.explain(&title).await.unwrap();
    assert!(after.index_effective());
    assert_eq!(after.indexed.index_name.as_deref(), Some("title_1"));
    assert_eq!(after.indexed.returned, 1);
    assert_eq!(after.full_scan.returned, 1);
    assert!(!after.full_scan.used_index);
    assert!(after.indexed.docs_examined < after.full_scan.docs_examined);
}

#[tokio::test]
async fn compound_index_serves_author_queries() {
    let mgr = seeded();
    let mut conn = mgr.acquire().await.unwrap();
    let executor = Executor::for_connection(&conn);
    let indexes = IndexManager::new(executor);
    let spec = IndexSpec::ascending(["author", "published_year"]).unwrap();
    assert!(indexes.ensure_index(&mut conn, &spec).await.unwrap());
    let report = Catalog::new(&mut conn).explain(&Filter::all().eq("author", "George Orwell")).await.unwrap();
    assert_eq!(report.indexed.index_name.as_deref(), Some("author_1_published_year_1"));
    assert_eq!(report.indexed.returned, 2);
}
