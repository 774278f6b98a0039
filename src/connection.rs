//! Scoped sessions to the configured store.
//!
//! A [`Connection`] is exclusively borrowed (`&mut`) by every operation, so one handle never
//! carries two in-flight operations. Dropping it releases the session; [`Connection::release`]
//! does the same explicitly and may be called any number of times.

use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::{Backend, StoreConfig};
use crate::errors::{Result, ShelfError};
use crate::executor::from_failure;
use crate::seed;
use crate::store::{Connector, DocumentStore, MemoryStore, StoreFailure};

/// Boxed future borrowed from a connection, for [`ConnectionManager::with_connection`].
pub type ScopedFuture<'c, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'c>>;

/// Hands out sessions to a fixed store instance.
struct FixedConnector(Arc<dyn DocumentStore>);

#[async_trait]
impl Connector for FixedConnector {
    async fn connect(&self, _cfg: &StoreConfig) -> std::result::Result<Arc<dyn DocumentStore>, StoreFailure> {
        Ok(Arc::clone(&self.0))
    }
}

/// Opens connections for one validated [`StoreConfig`].
pub struct ConnectionManager {
    config: StoreConfig,
    connector: Arc<dyn Connector>,
    memory: Option<MemoryStore>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager").field("config", &self.config).finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Select the backend named by `config`.
    ///
    /// # Errors
    /// `Config` when the configuration is invalid or names a backend this build lacks.
    pub fn from_config(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        match config.backend {
            Backend::Memory => {
                let memory = MemoryStore::new(config.database.as_str());
                if config.seed_memory {
                    let docs = seed::sample_catalog().iter().map(crate::book::Book::to_document).collect();
                    let n = memory.preload(&config.collection, docs).map_err(|f| from_failure("seed", f))?;
                    log::debug!("seeded memory store with {n} books");
                }
                Ok(Self { config, connector: Arc::new(memory.clone()), memory: Some(memory) })
            }
            Backend::Mongodb => Self::mongodb(config),
        }
    }

    #[cfg(feature = "mongodb")]
    fn mongodb(config: StoreConfig) -> Result<Self> {
        Ok(Self { config, connector: Arc::new(crate::store::mongo::MongoConnector), memory: None })
    }

    #[cfg(not(feature = "mongodb"))]
    fn mongodb(_config: StoreConfig) -> Result<Self> {
        Err(ShelfError::Config(format!(
            "backend `mongodb` is not compiled in (compiled features: [{}]); rebuild with `--features mongodb`",
            crate::built::COMPILED_FEATURES.join(", ")
        )))
    }

    /// Manager over a caller-supplied connector.
    #[must_use]
    pub fn with_connector(config: StoreConfig, connector: Arc<dyn Connector>) -> Self {
        Self { config, connector, memory: None }
    }

    /// Manager whose connections all share `store`.
    #[must_use]
    pub fn with_store(config: StoreConfig, store: Arc<dyn DocumentStore>) -> Self {
        Self::with_connector(config, Arc::new(FixedConnector(store)))
    }

    #[must_use]
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// The shared memory engine, when the memory backend is selected.
    #[must_use]
    pub const fn memory(&self) -> Option<&MemoryStore> {
        self.memory.as_ref()
    }

    /// Open a session and verify it answers within the connect timeout.
    ///
    /// # Errors
    /// `Connection` when the store cannot be reached in time or refuses the session.
    pub async fn acquire(&self) -> Result<Connection> {
        let timeout = self.config.connect_timeout();
        let opening = async {
            let store = self.connector.connect(&self.config).await?;
            store.ping().await?;
            Ok::<_, StoreFailure>(store)
        };
        let store = match tokio::time::timeout(timeout, opening).await {
            Ok(Ok(store)) => store,
            Ok(Err(f)) => {
                log::error!(target: "bookshelf::store", "connect: {}", f.detail());
                return Err(ShelfError::Connection(format!(
                    "cannot reach {} store `{}`: {}",
                    self.config.backend, self.config.database, f.message
                )));
            }
            Err(_) => {
                return Err(ShelfError::Connection(format!(
                    "no answer from {} store within {} ms",
                    self.config.backend, self.config.connect_timeout_ms
                )));
            }
        };
        let conn = Connection {
            id: Uuid::new_v4(),
            store: Some(store),
            collection: self.config.collection.clone(),
            op_timeout: self.config.op_timeout(),
        };
        log::info!("acquired connection {} ({})", conn.id, conn.backend().unwrap_or("?"));
        Ok(conn)
    }

    /// Acquire, run `f`, and release on every exit path, including errors from `f`.
    ///
    /// # Errors
    /// Whatever acquisition or `f` returns.
    pub async fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        F: for<'c> FnOnce(&'c mut Connection) -> ScopedFuture<'c, T>,
    {
        let mut conn = self.acquire().await?;
        let out = f(&mut conn).await;
        conn.release().await;
        out
    }
}

/// One acquired session.
pub struct Connection {
    id: Uuid,
    store: Option<Arc<dyn DocumentStore>>,
    collection: String,
    op_timeout: Duration,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("backend", &self.backend())
            .field("collection", &self.collection)
            .field("released", &self.is_released())
            .finish()
    }
}

impl Connection {
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    #[must_use]
    pub const fn default_timeout(&self) -> Duration {
        self.op_timeout
    }

    #[must_use]
    pub const fn is_released(&self) -> bool {
        self.store.is_none()
    }

    #[must_use]
    pub fn backend(&self) -> Option<&'static str> {
        self.store.as_ref().map(|s| s.backend())
    }

    pub(crate) fn store(&self) -> Result<&Arc<dyn DocumentStore>> {
        self.store
            .as_ref()
            .ok_or_else(|| ShelfError::Connection(format!("connection {} was already released", self.id)))
    }

    /// Close the session. Later calls are no-ops.
    pub async fn release(&mut self) {
        if let Some(store) = self.store.take() {
            store.close().await;
            log::info!("released connection {}", self.id);
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let Some(store) = self.store.take() else {
            return;
        };
        log::debug!("connection {} dropped without release; closing", self.id);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move { store.close().await });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_config() -> StoreConfig {
        StoreConfig { seed_memory: false, ..StoreConfig::default() }
    }

    #[tokio::test]
    async fn release_is_idempotent_and_blocks_further_use() {
        let mgr = ConnectionManager::from_config(memory_config()).unwrap();
        let mut conn = mgr.acquire().await.unwrap();
        assert_eq!(conn.backend(), Some("memory"));
        conn.release().await;
        conn.release().await;
        assert!(conn.is_released());
        assert!(matches!(conn.store(), Err(ShelfError::Connection(_))));
    }

    #[tokio::test]
    async fn offline_store_fails_acquisition() {
        let mgr = ConnectionManager::from_config(memory_config()).unwrap();
        mgr.memory().unwrap().set_available(false);
        assert!(matches!(mgr.acquire().await, Err(ShelfError::Connection(_))));
    }

    #[tokio::test]
    async fn slow_store_fails_acquisition_within_connect_timeout() {
        let cfg = StoreConfig { connect_timeout_ms: 20, ..memory_config() };
        let mgr = ConnectionManager::from_config(cfg).unwrap();
        mgr.memory().unwrap().set_latency(Duration::from_millis(500));
        assert!(matches!(mgr.acquire().await, Err(ShelfError::Connection(_))));
    }

    #[tokio::test]
    async fn scoped_connection_is_released_after_error() {
        let mgr = ConnectionManager::from_config(memory_config()).unwrap();
        let out: Result<()> = mgr
            .with_connection(|conn| {
                Box::pin(async move {
                    assert!(!conn.is_released());
                    Err(ShelfError::invalid("boom"))
                })
            })
            .await;
        assert!(matches!(out, Err(ShelfError::InvalidSpec(_))));
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let cfg = StoreConfig { port: 0, ..memory_config() };
        assert!(matches!(ConnectionManager::from_config(cfg), Err(ShelfError::Config(_))));
    }
}
