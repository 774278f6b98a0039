//! MongoDB server backend.
//!
//! The driver carries its own `bson` major version, so documents cross the boundary as raw
//! BSON bytes.

use async_trait::async_trait;
use bson::Document as BsonDocument;
use futures_util::TryStreamExt;
use mongodb::error::{Error as DriverError, ErrorKind, WriteFailure};
use mongodb::options::{ClientOptions, FindOptions, Hint, IndexOptions};
use mongodb::{Client, Collection, Database, IndexModel};
use std::sync::Arc;

use super::{Connector, DocumentStore, IndexInfo, StoreFailure, UpdateOutcome};
use crate::aggregate::NativePipeline;
use crate::config::StoreConfig;
use crate::query::NativeQuery;
use crate::query::builder::clamp_i64;

type Raw = mongodb::bson::Document;

const NAMESPACE_NOT_FOUND: i32 = 26;
const CODEC: i32 = -1;

fn to_driver(doc: &BsonDocument) -> Result<Raw, StoreFailure> {
    let mut buf = Vec::new();
    doc.to_writer(&mut buf).map_err(|e| StoreFailure::rejected(CODEC, format!("encode: {e}")))?;
    Raw::from_reader(&mut buf.as_slice()).map_err(|e| StoreFailure::rejected(CODEC, format!("encode: {e}")))
}

fn from_driver(doc: &Raw) -> Result<BsonDocument, StoreFailure> {
    let mut buf = Vec::new();
    doc.to_writer(&mut buf).map_err(|e| StoreFailure::rejected(CODEC, format!("decode: {e}")))?;
    BsonDocument::from_reader(&mut buf.as_slice()).map_err(|e| StoreFailure::rejected(CODEC, format!("decode: {e}")))
}

fn from_driver_all(docs: &[Raw]) -> Result<Vec<BsonDocument>, StoreFailure> {
    docs.iter().map(from_driver).collect()
}

fn map_err(e: DriverError) -> StoreFailure {
    match e.kind.as_ref() {
        ErrorKind::ServerSelection { .. } | ErrorKind::Io(_) | ErrorKind::ConnectionPoolCleared { .. } => {
            StoreFailure::unavailable(e.to_string())
        }
        ErrorKind::Command(c) => StoreFailure::rejected(c.code, c.message.clone()),
        ErrorKind::Write(WriteFailure::WriteError(w)) => StoreFailure::rejected(w.code, w.message.clone()),
        _ => StoreFailure { kind: super::FailureKind::Rejected, code: None, message: e.to_string() },
    }
}

/// A session bound to one database on a MongoDB deployment.
#[derive(Debug, Clone)]
pub struct MongoStore {
    client: Client,
    db: Database,
}

impl MongoStore {
    fn coll(&self, name: &str) -> Collection<Raw> {
        self.db.collection::<Raw>(name)
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    fn backend(&self) -> &'static str {
        "mongodb"
    }

    async fn ping(&self) -> Result<(), StoreFailure> {
        self.db.run_command(mongodb::bson::doc! { "ping": 1 }).await.map(|_| ()).map_err(map_err)
    }

    async fn find(&self, collection: &str, query: &NativeQuery) -> Result<Vec<BsonDocument>, StoreFailure> {
        let mut opts = FindOptions::default();
        opts.projection = query.projection().map(to_driver).transpose()?;
        opts.sort = query.sort().map(to_driver).transpose()?;
        opts.skip = (query.skip() > 0).then_some(query.skip());
        opts.limit = query.limit().map(clamp_i64);
        opts.hint = query.hint().map(to_driver).transpose()?.map(Hint::Keys);
        let cursor = self.coll(collection).find(to_driver(query.filter())?).with_options(opts).await.map_err(map_err)?;
        let docs: Vec<Raw> = cursor.try_collect().await.map_err(map_err)?;
        from_driver_all(&docs)
    }

    async fn aggregate(&self, collection: &str, pipeline: &NativePipeline) -> Result<Vec<BsonDocument>, StoreFailure> {
        let stages = pipeline.stages().iter().map(to_driver).collect::<Result<Vec<_>, _>>()?;
        let cursor = self.coll(collection).aggregate(stages).await.map_err(map_err)?;
        let docs: Vec<Raw> = cursor.try_collect().await.map_err(map_err)?;
        from_driver_all(&docs)
    }

    async fn insert_many(&self, collection: &str, docs: Vec<BsonDocument>) -> Result<u64, StoreFailure> {
        let docs = docs.iter().map(to_driver).collect::<Result<Vec<_>, _>>()?;
        let res = self.coll(collection).insert_many(docs).await.map_err(map_err)?;
        Ok(res.inserted_ids.len() as u64)
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &BsonDocument,
        update: &BsonDocument,
    ) -> Result<UpdateOutcome, StoreFailure> {
        let res = self
            .coll(collection)
            .update_one(to_driver(filter)?, to_driver(update)?)
            .await
            .map_err(map_err)?;
        Ok(UpdateOutcome { matched: res.matched_count, modified: res.modified_count })
    }

    async fn delete_one(&self, collection: &str, filter: &BsonDocument) -> Result<u64, StoreFailure> {
        let res = self.coll(collection).delete_one(to_driver(filter)?).await.map_err(map_err)?;
        Ok(res.deleted_count)
    }

    async fn list_indexes(&self, collection: &str) -> Result<Vec<IndexInfo>, StoreFailure> {
        let cursor = match self.coll(collection).list_indexes().await {
            Ok(c) => c,
            Err(e) => {
                let failure = map_err(e);
                // A collection that does not exist yet has no indexes.
                if failure.code == Some(NAMESPACE_NOT_FOUND) {
                    return Ok(Vec::new());
                }
                return Err(failure);
            }
        };
        let models: Vec<IndexModel> = cursor.try_collect().await.map_err(map_err)?;
        models
            .iter()
            .map(|m| -> Result<IndexInfo, StoreFailure> {
                Ok(IndexInfo {
                    name: m.options.as_ref().and_then(|o| o.name.clone()).unwrap_or_default(),
                    keys: from_driver(&m.keys)?,
                })
            })
            .collect()
    }

    async fn create_index(&self, collection: &str, keys: &BsonDocument, name: &str) -> Result<(), StoreFailure> {
        let options = IndexOptions::builder().name(name.to_string()).build();
        let model = IndexModel::builder().keys(to_driver(keys)?).options(options).build();
        self.coll(collection).create_index(model).await.map(|_| ()).map_err(map_err)
    }

    async fn explain(&self, collection: &str, query: &NativeQuery) -> Result<BsonDocument, StoreFailure> {
        let mut find = mongodb::bson::doc! { "find": collection, "filter": to_driver(query.filter())? };
        if let Some(p) = query.projection() {
            find.insert("projection", to_driver(p)?);
        }
        if let Some(s) = query.sort() {
            find.insert("sort", to_driver(s)?);
        }
        if query.skip() > 0 {
            find.insert("skip", clamp_i64(query.skip()));
        }
        if let Some(l) = query.limit() {
            find.insert("limit", clamp_i64(l));
        }
        if let Some(h) = query.hint() {
            find.insert("hint", to_driver(h)?);
        }
        let cmd = mongodb::bson::doc! { "explain": find, "verbosity": "executionStats" };
        let out = self.db.run_command(cmd).await.map_err(map_err)?;
        from_driver(&out)
    }

    async fn close(&self) {
        self.client.clone().shutdown().await;
    }
}

/// Opens [`MongoStore`] sessions from a [`StoreConfig`].
#[derive(Debug, Default, Clone, Copy)]
pub struct MongoConnector;

#[async_trait]
impl Connector for MongoConnector {
    async fn connect(&self, cfg: &StoreConfig) -> Result<Arc<dyn DocumentStore>, StoreFailure> {
        let mut options = ClientOptions::parse(cfg.connection_uri()).await.map_err(map_err)?;
        options.connect_timeout = Some(cfg.connect_timeout());
        options.server_selection_timeout = Some(cfg.connect_timeout());
        options.app_name = Some(env!("CARGO_PKG_NAME").to_string());
        let client = Client::with_options(options).map_err(map_err)?;
        let db = client.database(&cfg.database);
        log::info!("connecting to mongodb at {}:{}", cfg.host, cfg.port);
        Ok(Arc::new(MongoStore { client, db }))
    }
}
