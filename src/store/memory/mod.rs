//! In-process reference store.
//!
//! Keeps collections as insertion-ordered BSON documents behind a shared lock and
//! interprets the same native query and pipeline documents a server would. Every handle
//! cloned from one `MemoryStore` sees the same data, so several connections from one
//! manager observe each other's writes.

pub mod eval;
pub mod pipeline;

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{Bson, Document as BsonDocument, doc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::time::{Duration, Instant};

use super::{Connector, DocumentStore, IndexInfo, StoreFailure, UpdateOutcome};
use crate::aggregate::NativePipeline;
use crate::config::StoreConfig;
use crate::query::NativeQuery;
use crate::query::builder::clamp_i64;
use eval::{BAD_VALUE, compare_docs, matches, matches_field, project};

const DUPLICATE_KEY: i32 = 11000;
const IMMUTABLE_FIELD: i32 = 66;
const FAILED_TO_PARSE: i32 = 9;
const INDEX_OPTIONS_CONFLICT: i32 = 85;
const INDEX_KEY_SPECS_CONFLICT: i32 = 86;
const ID_INDEX: &str = "_id_";

#[derive(Debug)]
struct Collection {
    docs: Vec<BsonDocument>,
    indexes: Vec<IndexInfo>,
}

impl Collection {
    fn new() -> Self {
        Self { docs: Vec::new(), indexes: vec![id_index()] }
    }
}

fn id_index() -> IndexInfo {
    IndexInfo { name: ID_INDEX.to_string(), keys: doc! { "_id": 1 } }
}

#[derive(Debug)]
struct Shared {
    collections: RwLock<HashMap<String, Collection>>,
    latency: Mutex<Duration>,
    available: AtomicBool,
}

/// Handle to the shared in-process store, scoped to one database.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    database: String,
    shared: Arc<Shared>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new("test")
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            shared: Arc::new(Shared {
                collections: RwLock::new(HashMap::new()),
                latency: Mutex::new(Duration::ZERO),
                available: AtomicBool::new(true),
            }),
        }
    }

    /// Another handle on the same shared data, scoped to `database`.
    #[must_use]
    pub fn for_database(&self, database: &str) -> Self {
        Self { database: database.to_string(), shared: Arc::clone(&self.shared) }
    }

    /// Delay applied before every operation.
    pub fn set_latency(&self, latency: Duration) {
        *self.shared.latency.lock() = latency;
    }

    /// While unavailable, every operation and every new session fails as a lost connection.
    pub fn set_available(&self, available: bool) {
        self.shared.available.store(available, AtomicOrdering::SeqCst);
    }

    /// Load documents into an empty collection. Returns how many were added;
    /// a collection that already holds documents is left untouched.
    ///
    /// # Errors
    /// Fails on duplicate `_id` values.
    pub fn preload(&self, collection: &str, docs: Vec<BsonDocument>) -> Result<u64, StoreFailure> {
        let mut all = self.shared.collections.write();
        let coll = all.entry(self.namespace(collection)).or_insert_with(Collection::new);
        if !coll.docs.is_empty() {
            return Ok(0);
        }
        insert_into(coll, docs)
    }

    /// Number of documents currently in `collection`.
    #[must_use]
    pub fn count(&self, collection: &str) -> usize {
        self.shared.collections.read().get(&self.namespace(collection)).map_or(0, |c| c.docs.len())
    }

    fn namespace(&self, collection: &str) -> String {
        format!("{}.{collection}", self.database)
    }

    async fn gate(&self) -> Result<(), StoreFailure> {
        let latency = *self.shared.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.shared.available.load(AtomicOrdering::SeqCst) {
            Ok(())
        } else {
            Err(StoreFailure::unavailable(format!("connection to memory store `{}` lost", self.database)))
        }
    }

    fn run_find(&self, collection: &str, query: &NativeQuery) -> Result<Vec<BsonDocument>, StoreFailure> {
        let all = self.shared.collections.read();
        let Some(coll) = all.get(&self.namespace(collection)) else {
            return Ok(Vec::new());
        };
        check_hint(coll, query.hint())?;
        let mut hits = Vec::new();
        for d in &coll.docs {
            if matches(d, query.filter())? {
                hits.push(d.clone());
            }
        }
        if let Some(sort) = query.sort() {
            hits.sort_by(|a, b| compare_docs(a, b, sort));
        }
        let skip = usize::try_from(query.skip()).unwrap_or(usize::MAX);
        let limit = query.limit().map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX));
        let page: Vec<BsonDocument> = hits.into_iter().skip(skip).take(limit).collect();
        match query.projection() {
            Some(p) => page.iter().map(|d| project(d, p)).collect(),
            None => Ok(page),
        }
    }
}

fn insert_into(coll: &mut Collection, docs: Vec<BsonDocument>) -> Result<u64, StoreFailure> {
    let mut prepared = Vec::with_capacity(docs.len());
    for mut d in docs {
        if !d.contains_key("_id") {
            let mut with_id = doc! { "_id": ObjectId::new() };
            for (k, v) in d {
                with_id.insert(k, v);
            }
            d = with_id;
        }
        let id = d.get("_id").cloned().unwrap_or(Bson::Null);
        let clash = coll.docs.iter().chain(&prepared).any(|e: &BsonDocument| e.get("_id") == Some(&id));
        if clash {
            return Err(StoreFailure::rejected(
                DUPLICATE_KEY,
                format!("E11000 duplicate key error index: _id_ dup key: {{ _id: {id} }}"),
            ));
        }
        prepared.push(d);
    }
    let n = prepared.len() as u64;
    coll.docs.extend(prepared);
    Ok(n)
}

fn check_hint(coll: &Collection, hint: Option<&BsonDocument>) -> Result<(), StoreFailure> {
    match hint {
        None => Ok(()),
        Some(h) if h.contains_key("$natural") => Ok(()),
        Some(h) if coll.indexes.iter().any(|i| &i.keys == h) => Ok(()),
        Some(_) => Err(StoreFailure::rejected(BAD_VALUE, "hint provided does not correspond to an existing index")),
    }
}

fn apply_update(target: &mut BsonDocument, update: &BsonDocument) -> Result<bool, StoreFailure> {
    if update.is_empty() || update.keys().any(|k| !k.starts_with('$')) {
        return Err(StoreFailure::rejected(FAILED_TO_PARSE, "update document requires atomic operators"));
    }
    let before = target.clone();
    for (op, fields) in update {
        let Bson::Document(fields) = fields else {
            return Err(StoreFailure::rejected(FAILED_TO_PARSE, format!("modifier {op} expects a document")));
        };
        for (field, v) in fields {
            if field == "_id" {
                return Err(StoreFailure::rejected(IMMUTABLE_FIELD, "the (immutable) field '_id' was found to have been altered"));
            }
            match op.as_str() {
                "$set" => {
                    target.insert(field.as_str(), v.clone());
                }
                other => return Err(StoreFailure::rejected(FAILED_TO_PARSE, format!("unknown modifier: {other}"))),
            }
        }
    }
    Ok(*target != before)
}

/// The index that would serve `filter`: the longest key prefix present in the filter wins.
fn choose_index<'a>(coll: &'a Collection, filter: &BsonDocument, hint: Option<&BsonDocument>) -> Option<&'a IndexInfo> {
    match hint {
        Some(h) if h.contains_key("$natural") => return None,
        Some(h) => return coll.indexes.iter().find(|i| &i.keys == h),
        None => {}
    }
    let mut best: Option<(&IndexInfo, usize)> = None;
    for ix in &coll.indexes {
        let prefix = ix.keys.keys().take_while(|k| filter.contains_key(k.as_str())).count();
        if prefix > 0 && best.is_none_or(|(_, b)| prefix > b) {
            best = Some((ix, prefix));
        }
    }
    best.map(|(ix, _)| ix)
}

#[allow(clippy::cast_possible_wrap)]
fn explain_plan(
    namespace: &str,
    coll: &Collection,
    query: &NativeQuery,
    returned: usize,
    elapsed: Duration,
) -> Result<BsonDocument, StoreFailure> {
    let filter = query.filter();
    let index = choose_index(coll, filter, query.hint());
    let (mut plan, keys, docs) = match index {
        Some(ix) => {
            let mut keys = 0i64;
            for d in &coll.docs {
                let mut within = true;
                for field in ix.keys.keys().take_while(|k| filter.contains_key(k.as_str())) {
                    if let Some(cond) = filter.get(field)
                        && !matches_field(d, field, cond)?
                    {
                        within = false;
                        break;
                    }
                }
                if within {
                    keys += 1;
                }
            }
            let plan = doc! {
                "stage": "FETCH",
                "inputStage": { "stage": "IXSCAN", "indexName": ix.name.as_str(), "keyPattern": ix.keys.clone() },
            };
            (plan, keys, keys)
        }
        None => {
            let plan = doc! { "stage": "COLLSCAN", "filter": filter.clone(), "direction": "forward" };
            let scanned = coll.docs.len() as i64;
            (plan, 0, scanned)
        }
    };
    if let Some(sort) = query.sort() {
        plan = doc! { "stage": "SORT", "sortPattern": sort.clone(), "inputStage": plan };
    }
    if let Some(limit) = query.limit() {
        let amount = clamp_i64(limit);
        plan = doc! { "stage": "LIMIT", "limitAmount": amount, "inputStage": plan };
    }
    let returned = returned as i64;
    let millis = i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX);
    Ok(doc! {
        "queryPlanner": { "namespace": namespace, "parsedQuery": filter.clone(), "winningPlan": plan },
        "executionStats": {
            "executionSuccess": true,
            "nReturned": returned,
            "executionTimeMillis": millis,
            "totalKeysExamined": keys,
            "totalDocsExamined": docs,
        },
    })
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<(), StoreFailure> {
        self.gate().await
    }

    async fn find(&self, collection: &str, query: &NativeQuery) -> Result<Vec<BsonDocument>, StoreFailure> {
        self.gate().await?;
        self.run_find(collection, query)
    }

    async fn aggregate(&self, collection: &str, pipeline: &NativePipeline) -> Result<Vec<BsonDocument>, StoreFailure> {
        self.gate().await?;
        let docs = self.shared.collections.read().get(&self.namespace(collection)).map(|c| c.docs.clone());
        pipeline::run(docs.unwrap_or_default(), pipeline.stages())
    }

    async fn insert_many(&self, collection: &str, docs: Vec<BsonDocument>) -> Result<u64, StoreFailure> {
        self.gate().await?;
        let mut all = self.shared.collections.write();
        let coll = all.entry(self.namespace(collection)).or_insert_with(Collection::new);
        insert_into(coll, docs)
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &BsonDocument,
        update: &BsonDocument,
    ) -> Result<UpdateOutcome, StoreFailure> {
        self.gate().await?;
        let mut all = self.shared.collections.write();
        let Some(coll) = all.get_mut(&self.namespace(collection)) else {
            return Ok(UpdateOutcome::default());
        };
        for d in &mut coll.docs {
            if matches(d, filter)? {
                let mut updated = d.clone();
                let changed = apply_update(&mut updated, update)?;
                *d = updated;
                return Ok(UpdateOutcome { matched: 1, modified: u64::from(changed) });
            }
        }
        Ok(UpdateOutcome::default())
    }

    async fn delete_one(&self, collection: &str, filter: &BsonDocument) -> Result<u64, StoreFailure> {
        self.gate().await?;
        let mut all = self.shared.collections.write();
        let Some(coll) = all.get_mut(&self.namespace(collection)) else {
            return Ok(0);
        };
        let mut at = None;
        for (i, d) in coll.docs.iter().enumerate() {
            if matches(d, filter)? {
                at = Some(i);
                break;
            }
        }
        Ok(at.map_or(0, |i| {
            coll.docs.remove(i);
            1
        }))
    }

    async fn list_indexes(&self, collection: &str) -> Result<Vec<IndexInfo>, StoreFailure> {
        self.gate().await?;
        let all = self.shared.collections.read();
        Ok(all.get(&self.namespace(collection)).map_or_else(|| vec![id_index()], |c| c.indexes.clone()))
    }

    async fn create_index(&self, collection: &str, keys: &BsonDocument, name: &str) -> Result<(), StoreFailure> {
        self.gate().await?;
        if keys.is_empty() {
            return Err(StoreFailure::rejected(67, "index keys cannot be empty"));
        }
        let mut all = self.shared.collections.write();
        let coll = all.entry(self.namespace(collection)).or_insert_with(Collection::new);
        for existing in &coll.indexes {
            match (existing.name == name, &existing.keys == keys) {
                (true, true) => return Ok(()),
                (true, false) => {
                    return Err(StoreFailure::rejected(
                        INDEX_KEY_SPECS_CONFLICT,
                        format!("An existing index has the same name as the requested index: {name}"),
                    ));
                }
                (false, true) => {
                    return Err(StoreFailure::rejected(
                        INDEX_OPTIONS_CONFLICT,
                        format!("Index already exists with a different name: {}", existing.name),
                    ));
                }
                (false, false) => {}
            }
        }
        coll.indexes.push(IndexInfo { name: name.to_string(), keys: keys.clone() });
        log::debug!("memory store: created index {name} on {}", self.namespace(collection));
        Ok(())
    }

    async fn explain(&self, collection: &str, query: &NativeQuery) -> Result<BsonDocument, StoreFailure> {
        self.gate().await?;
        let started = Instant::now();
        let docs = self.run_find(collection, query)?;
        let elapsed = started.elapsed();
        let all = self.shared.collections.read();
        let ns = self.namespace(collection);
        let empty = Collection::new();
        let coll = all.get(&ns).unwrap_or(&empty);
        explain_plan(&ns, coll, query, docs.len(), elapsed)
    }

    async fn close(&self) {
        log::debug!("memory store: session on `{}` closed", self.database);
    }
}

#[async_trait]
impl Connector for MemoryStore {
    async fn connect(&self, cfg: &StoreConfig) -> Result<Arc<dyn DocumentStore>, StoreFailure> {
        self.gate().await?;
        Ok(Arc::new(self.for_database(&cfg.database)))
    }
}
