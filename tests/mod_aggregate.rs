use bookshelf::aggregate::{self, Aggregation, Expression, GROUP_KEY, GroupKey, PipelineStage};
use bookshelf::catalog::{AVERAGE_PRICE, COUNT, Catalog, GroupBy, TOTAL_BOOKS};
use bookshelf::config::StoreConfig;
use bookshelf::connection::ConnectionManager;
use bookshelf::errors::ShelfError;
use bookshelf::executor::Executor;
use bookshelf::mapper::{GroupKeyValue, decode_groups, labelled};
use bookshelf::query::{Filter, SortSpec};
use bson::doc;

fn seeded() -> ConnectionManager {
    ConnectionManager::from_config(StoreConfig::default()).unwrap()
}

#[test]
fn dollar_literals_are_not_read_as_field_paths() {
    let p = aggregate::build(&[PipelineStage::Compute {
        field: "tag".into(),
        expr: Expression::Concat(vec![Expression::literal("$"), Expression::field("genre")]),
    }])
    .unwrap();
    assert_eq!(p.stages(), &[doc! { "$addFields": { "tag": { "$concat": [ { "$literal": "$" }, "$genre" ] } } }]);
}

#[test]
fn malformed_pipelines_are_rejected() {
    assert!(matches!(aggregate::build(&[]), Err(ShelfError::InvalidSpec(_))));
    assert!(aggregate::build(&[PipelineStage::Limit(0)]).is_err());
    let reserved = PipelineStage::Group { key: GroupKey::field("genre"), aggregations: vec![Aggregation::count(GROUP_KEY)] };
    assert!(aggregate::build(&[reserved]).is_err());
    let twice = PipelineStage::Group {
        key: GroupKey::field("genre"),
        aggregations: vec![Aggregation::count("n"), Aggregation::sum("n", "price")],
    };
    assert!(aggregate::build(&[twice]).is_err());
}

#[tokio::test]
async fn genre_stats_carry_counts_and_average_price() {
    let mgr = seeded();
    let mut conn = mgr.acquire().await.unwrap();
    let batch = Catalog::new(&mut conn).stats(GroupBy::Genre).await.unwrap();
    assert!(batch.is_clean());
    let labels: Vec<String> = batch.records.iter().map(|r| r.label()).collect();
    let mut sorted = labels.clone();
    sorted.sort();
    assert_eq!(labels, sorted);

    let counts = labelled(&batch.records, COUNT);
    assert_eq!(counts["Fiction"], 6.0);
    assert_eq!(counts["Fantasy"], 2.0);
    let avg = labelled(&batch.records, AVERAGE_PRICE);
    assert!((avg["Fantasy"] - (14.99 + 19.99) / 2.0).abs() < 1e-9);
}

#[tokio::test]
async fn author_stats_put_most_prolific_first() {
    let mgr = seeded();
    let mut conn = mgr.acquire().await.unwrap();
    let batch = Catalog::new(&mut conn).stats(GroupBy::Author).await.unwrap();
    let totals: Vec<f64> = batch.records.iter().map(|r| r.metric(TOTAL_BOOKS).unwrap()).collect();
    assert!(totals.windows(2).all(|w| w[0] >= w[1]));
    assert_eq!(totals[0], 2.0);
    let top_two: Vec<String> = batch.records.iter().take(2).map(|r| r.label()).collect();
    assert_eq!(top_two, ["George Orwell", "J.R.R. Tolkien"]);
}

#[tokio::test]
async fn decade_stats_over_sample_catalog() {
    let mgr = seeded();
    let mut conn = mgr.acquire().await.unwrap();
    let batch = Catalog::new(&mut conn).stats(GroupBy::Decade).await.unwrap();
    assert!(batch.records.iter().all(|r| matches!(r.key, GroupKeyValue::Decade(d) if d % 10 == 0)));
    let counts = labelled(&batch.records, COUNT);
    assert_eq!(counts["1940s"], 2.0);
    assert_eq!(counts["1950s"], 2.0);
    assert_eq!(counts["2020s"], 2.0);
    assert_eq!(counts.values().sum::<f64>(), 14.0);
}

#[tokio::test]
async fn match_compute_and_limit_run_in_order() {
    let mgr = seeded();
    let mut conn = mgr.acquire().await.unwrap();
    let stages = [
        PipelineStage::Match(Filter::all().eq("in_stock", true)),
        PipelineStage::Compute {
            field: "price_cents".into(),
            expr: Expression::Multiply(vec![Expression::field("price"), Expression::literal(100)]),
        },
        PipelineStage::Group {
            key: GroupKey::field("genre"),
            aggregations: vec![Aggregation::sum("cents", "price_cents"), Aggregation::count("n")],
        },
        PipelineStage::Sort(SortSpec::desc("n").then_asc(GROUP_KEY)),
        PipelineStage::Limit(1),
    ];
    let pipeline = aggregate::build(&stages).unwrap();
    let raw = Executor::for_connection(&conn).aggregate(&mut conn, &pipeline).await.unwrap();
    let rows = decode_groups(raw, false).records;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].label(), "Fiction");
    assert_eq!(rows[0].metric("n"), Some(6.0));
    let cents = rows[0].metric("cents").unwrap();
    let expected = (12.99 + 10.0 + 9.99 + 8.99 + 12.0 + 16.5) * 100.0;
    assert!((cents - expected).abs() < 1e-6);
}

#[tokio::test]
async fn top_authors_rejects_zero() {
    let mgr = seeded();
    let mut conn = mgr.acquire().await.unwrap();
    assert!(matches!(Catalog::new(&mut conn).top_authors(0).await, Err(ShelfError::InvalidSpec(_))));
    let two = Catalog::new(&mut conn).top_authors(2).await.unwrap();
    assert_eq!(two.records.len(), 2);
}
