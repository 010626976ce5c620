use crate::auth::{AuthManager, HttpOAuthClient, OAuthClient};
use crate::catalog::{ToolCatalog, Toolkit};
use crate::config::ToolgateConfig;
use crate::dispatcher::Dispatcher;
use crate::storage::{ConnectionStore, RedbConnectionStore};
use crate::worker::WorkerPool;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Fully wired catalog, auth manager, worker pool and dispatcher
#[derive(Clone)]
pub struct Runtime {
    pub dispatcher: Arc<Dispatcher>,
}

impl Runtime {
    /// Open the connection store under the config's data directory and
    /// register the given toolkits.
    pub fn build(config: &ToolgateConfig, toolkits: Vec<Toolkit>) -> Result<Self> {
        let store = Arc::new(
            RedbConnectionStore::new(config.connections_path())
                .context("Failed to create connection store")?,
        );
        let client = Arc::new(
            HttpOAuthClient::new(config.auth.http_timeout()).context("Failed to build OAuth client")?,
        );

        Self::from_parts(config, toolkits, store, client)
    }

    pub fn from_parts(
        config: &ToolgateConfig,
        toolkits: Vec<Toolkit>,
        store: Arc<dyn ConnectionStore>,
        client: Arc<dyn OAuthClient>,
    ) -> Result<Self> {
        let mut catalog = ToolCatalog::new();
        for toolkit in toolkits {
            let name = toolkit.name.clone();
            catalog
                .register_toolkit(toolkit)
                .with_context(|| format!("Failed to register toolkit {}", name))?;
        }

        let auth = AuthManager::new(config.providers.clone(), client, store, config.auth.clone())?;
        let workers = WorkerPool::new(config.workers.clone());

        tracing::info!(
            "Runtime ready with {} tools and {} auth providers",
            catalog.len(),
            config.providers.len()
        );

        let dispatcher = Dispatcher::new(
            Arc::new(catalog),
            Arc::new(auth),
            Arc::new(workers),
            &config.dispatcher,
        );

        Ok(Self {
            dispatcher: Arc::new(dispatcher),
        })
    }

    pub fn catalog(&self) -> &Arc<ToolCatalog> {
        self.dispatcher.catalog()
    }

    pub fn auth(&self) -> &Arc<AuthManager> {
        self.dispatcher.auth()
    }

    /// Periodically drop expired pending authorizations and cached results
    pub fn spawn_maintenance(&self, every: Duration) -> JoinHandle<()> {
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let pending = dispatcher.auth().prune_expired_pending();
                let cached = dispatcher.cache().purge_expired();
                if pending + cached > 0 {
                    tracing::debug!(
                        "Maintenance removed {} pending authorizations and {} cached results",
                        pending,
                        cached
                    );
                }
            }
        })
    }
}
