use bookshelf::config::{Backend, ConfigOverrides, StoreConfig};
use bookshelf::connection::ConnectionManager;
use bookshelf::errors::ShelfError;
use std::io::Write;
use tempfile::NamedTempFile;

fn config_file(body: &str) -> NamedTempFile {
    let mut f = NamedTempFile::new().unwrap();
    f.write_all(body.as_bytes()).unwrap();
    f
}

#[test]
fn explicit_file_is_loaded_and_cli_wins() {
    let f = config_file("database = \"shop\"\ncollection = \"titles\"\nopTimeoutMs = 1500\nseed_memory = false\n");
    let cfg = StoreConfig::load(Some(f.path()), &ConfigOverrides::default()).unwrap();
    assert_eq!(cfg.database, "shop");
    assert_eq!(cfg.collection, "titles");
    assert_eq!(cfg.op_timeout_ms, 1500);
    assert!(!cfg.seed_memory);

    let overrides = ConfigOverrides { collection: Some("books".into()), op_timeout_ms: Some(50), ..ConfigOverrides::default() };
    let cfg = StoreConfig::load(Some(f.path()), &overrides).unwrap();
    assert_eq!(cfg.collection, "books");
    assert_eq!(cfg.op_timeout_ms, 50);
    assert_eq!(cfg.database, "shop");
}

#[test]
fn unreadable_or_malformed_files_are_config_errors() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.toml");
    assert!(matches!(StoreConfig::load(Some(&missing), &ConfigOverrides::default()), Err(ShelfError::Config(_))));

    let f = config_file("port = \"not a port\"\n");
    let err = StoreConfig::load(Some(f.path()), &ConfigOverrides::default()).unwrap_err();
    assert!(matches!(err, ShelfError::Config(_)));
    assert_eq!(err.exit_code(), 7);
}

#[test]
fn invalid_values_fail_validation_after_overrides() {
    let f = config_file("host = \"\"\n");
    assert!(matches!(StoreConfig::load(Some(f.path()), &ConfigOverrides::default()), Err(ShelfError::Config(_))));
    let fixed = ConfigOverrides { host: Some("db.local".into()), ..ConfigOverrides::default() };
    assert_eq!(StoreConfig::load(Some(f.path()), &fixed).unwrap().host, "db.local");
}

#[test]
fn backend_names_parse() {
    assert_eq!("Mongo".parse::<Backend>().unwrap(), Backend::Mongodb);
    assert_eq!("memory".parse::<Backend>().unwrap(), Backend::Memory);
    assert!("redis".parse::<Backend>().is_err());
}

#[test]
fn memory_backend_from_file_gets_a_seeded_store() {
    let f = config_file("backend = \"memory\"\ncollection = \"books\"\n");
    let cfg = StoreConfig::load(Some(f.path()), &ConfigOverrides::default()).unwrap();
    let mgr = ConnectionManager::from_config(cfg).unwrap();
    assert_eq!(mgr.memory().unwrap().count("books"), 14);
}

#[cfg(not(feature = "mongodb"))]
#[test]
fn mongodb_backend_needs_the_feature() {
    let cfg = StoreConfig { backend: Backend::Mongodb, ..StoreConfig::default() };
    let err = ConnectionManager::from_config(cfg).unwrap_err();
    match err {
        ShelfError::Config(msg) => assert!(msg.contains("--features mongodb")),
        other => panic!("unexpected {other:?}"),
    }
}
