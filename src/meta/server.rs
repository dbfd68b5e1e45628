//! Meta server

use std::sync::Arc;

use crate::common::utils::timestamp_now_millis;
use crate::common::{MetaConfig, Result, StoreBackend};
use crate::meta::cluster_state::ClusterState;
use crate::meta::http::{create_router, MetaState};
use crate::meta::rocks::RocksStore;
use crate::meta::store::{CoordinationStore, MemoryStore};

pub struct MetaServer {
    config: MetaConfig,
    node_id: String,
}

impl MetaServer {
    pub fn new(config: MetaConfig, node_id: String) -> Self {
        Self { config, node_id }
    }

    /// Open the configured coordination store backend.
    pub fn open_store(config: &MetaConfig) -> Result<Arc<dyn CoordinationStore>> {
        let store: Arc<dyn CoordinationStore> = match config.store {
            StoreBackend::Memory => Arc::new(MemoryStore::new()),
            StoreBackend::Rocksdb => Arc::new(RocksStore::open(&config.store_path)?),
            #[cfg(feature = "sled-backend")]
            StoreBackend::Sled => Arc::new(crate::meta::rocks::SledStore::open(&config.store_path)?),
            #[cfg(not(feature = "sled-backend"))]
            StoreBackend::Sled => {
                return Err(crate::Error::InvalidConfig(
                    "sled store requires the sled-backend feature".into(),
                ))
            }
        };
        Ok(store)
    }

    pub async fn serve(self) -> Result<()> {
        tracing::info!("Starting meta server: {}", self.node_id);
        tracing::info!("  HTTP API: {}", self.config.bind_addr);
        tracing::info!("  Cluster root: {}", self.config.cluster_root);
        tracing::info!(
            "  Store: {:?} ({})",
            self.config.store,
            self.config.store_path.display()
        );

        let store = Self::open_store(&self.config)?;
        let cluster = Arc::new(ClusterState::load(store, &self.config).await?);

        let reclaimer = spawn_reclaimer(cluster.clone(), self.config.reclaim_interval());

        let router = create_router(MetaState::new(
            cluster.clone(),
            std::time::Duration::from_secs(self.config.default_drop_grace_secs),
        ));
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;

        tracing::info!("✓ Meta server ready");

        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!("Failed to listen for shutdown signal: {}", e);
                }
                tracing::info!("Shutting down");
            })
            .await;

        reclaimer.abort();
        cluster.wait_all_task().await;

        if let Err(e) = result {
            tracing::error!("HTTP server error: {}", e);
            return Err(e.into());
        }
        Ok(())
    }
}

/// Periodically reclaim dropped apps whose grace period has ended.
pub fn spawn_reclaimer(
    cluster: Arc<ClusterState>,
    interval: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let reclaimed = cluster.reclaim_expired(timestamp_now_millis()).await;
            if !reclaimed.is_empty() {
                tracing::info!("Reclaimed {} dropped apps: {:?}", reclaimed.len(), reclaimed);
            }
        }
    })
}
