//! Store lifecycle: one cached store per process and a connectivity probe

use std::sync::Arc;

use ephemeral_core::{ConfigSource, PoolSettings, Result, StoreError};
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::pool::{BackendUrl, ConnectionPool};
use crate::store::SsdbEphemeralStore;

/// Builds and caches the process-wide [`SsdbEphemeralStore`].
///
/// Owned by the composition root and handed to whatever needs the store;
/// creation and shutdown serialize on one lock, so at most one store exists
/// between them.
pub struct SsdbStoreFactory {
    config: Arc<dyn ConfigSource>,
    instance: Mutex<Option<Arc<SsdbEphemeralStore>>>,
}

impl SsdbStoreFactory {
    pub fn new(config: Arc<dyn ConfigSource>) -> Self {
        Self {
            config,
            instance: Mutex::new(None),
        }
    }

    /// Return the cached store, building it on first use.
    ///
    /// A missing or unusable backend configuration yields `None` (with a log
    /// line) instead of an error, so the host can fall back to another store
    /// implementation.
    pub async fn get_store(&self) -> Option<Arc<SsdbEphemeralStore>> {
        let mut instance = self.instance.lock().await;
        if instance.is_none() {
            match self.build_store() {
                Ok(Some(store)) => *instance = Some(Arc::new(store)),
                Ok(None) => info!("no ephemeral backend URL configured"),
                Err(e) => error!("could not create the ephemeral store: {e}"),
            }
        }
        instance.clone()
    }

    fn build_store(&self) -> Result<Option<SsdbEphemeralStore>> {
        let Some(url) = self.config.backend_url()? else {
            return Ok(None);
        };
        let url = BackendUrl::parse(&url)?;
        let pool = ConnectionPool::connect(&url, self.pool_settings())?;
        Ok(Some(SsdbEphemeralStore::new(pool)))
    }

    fn pool_settings(&self) -> PoolSettings {
        match self.config.pool_settings() {
            Ok(settings) => settings,
            Err(e) => {
                // Happens during early bootstrap, before the registry is up.
                info!("pool configuration unavailable ({e}); using an unbounded pool");
                PoolSettings::default()
            }
        }
    }

    /// Probe connectivity of `url` with a throwaway pool: acquire one
    /// connection, ping it, and close the pool on every path. Never touches
    /// the cached store.
    pub async fn test(url: &str) -> Result<()> {
        let parsed = BackendUrl::parse(url)?;
        let pool = ConnectionPool::connect(&parsed, PoolSettings::default())?;
        let outcome = Self::probe(&pool).await;
        pool.close();
        outcome.map_err(|e| {
            StoreError::Connection(format!("could not connect to backend at '{url}': {e}"))
        })
    }

    async fn probe(pool: &ConnectionPool) -> Result<()> {
        let mut conn = pool.acquire().await?;
        conn.run_command(&redis::cmd("PING"))
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(())
    }

    /// Close the pool and drop the cached store. The next
    /// [`get_store`](Self::get_store) rebuilds from configuration.
    pub async fn shutdown(&self) {
        let mut instance = self.instance.lock().await;
        if let Some(store) = instance.take() {
            store.close();
        }
    }
}
