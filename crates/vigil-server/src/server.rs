//! Daemon wiring.

use crate::api::{self, AppState};
use crate::config::Config;
use crate::feed::ChangeFeed;
use crate::metrics::MetricsRegistry;
use crate::monitors::Monitors;
use crate::scheduler::Scheduler;
use crate::store::{MemoryStore, MonitorStore};
use common::{Error, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use vigil::Registry;
use vigil::icmp::IcmpEngine;
use vigil::plugins::{PluginContext, builtin};

/// The vigil daemon
pub struct VigilServer {
    config: Config,
}

impl VigilServer {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Build the plugin registry. Fails if the ICMP engine cannot start.
    pub fn registry(&self) -> Result<Registry> {
        let icmp = if self.config.icmp.enabled {
            let engine = IcmpEngine::open().map_err(Error::icmp)?;
            info!("ICMP engine started");
            Some(engine)
        } else {
            info!("ICMP disabled, icmp4 agent unavailable");
            None
        };

        let context = PluginContext {
            icmp,
            ssh: self.config.ssh_options(),
        };

        let registry = Registry::from_registrations(builtin(context)).map_err(Error::plugin)?;
        info!(plugins = registry.len(), "Plugin registry ready");
        Ok(registry)
    }

    async fn store(&self) -> Result<Arc<dyn MonitorStore>> {
        let store = match &self.config.store.path {
            Some(path) => MemoryStore::open(path).await.map_err(Error::store)?,
            None => {
                info!("No store path configured, monitors are kept in memory only");
                MemoryStore::new()
            }
        };
        Ok(Arc::new(store))
    }

    /// Run until a task stops or ctrl-c is received
    pub async fn run(self) -> Result<()> {
        info!("Starting vigil server");

        let metrics = if self.config.metrics.enabled {
            Some(Arc::new(MetricsRegistry::new()))
        } else {
            info!("Metrics disabled");
            None
        };

        let registry = Arc::new(self.registry()?);
        let store = self.store().await?;
        let feed = Arc::new(ChangeFeed::new(self.config.feed.subscriber_buffer).with_metrics(metrics.clone()));
        let monitors = Arc::new(Monitors::new(store, registry, feed));

        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&monitors),
            self.config.schedule_policy(),
            metrics.clone(),
        ));

        let listener = TcpListener::bind(&self.config.server.listen_addr).await?;
        let state = Arc::new(AppState::new(monitors, metrics));

        let scheduler_handle = tokio::spawn(scheduler.run());
        let api_handle = tokio::spawn(api::serve(listener, state));

        info!("All tasks spawned, server running");

        tokio::select! {
            _ = scheduler_handle => {
                warn!("Scheduler task completed");
            }
            result = api_handle => {
                match result {
                    Ok(Err(e)) => return Err(e.into()),
                    Err(e) => return Err(Error::other(e)),
                    Ok(Ok(())) => warn!("API server completed"),
                }
            }
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Shutdown requested");
            }
        }

        info!("Vigil server stopped");
        Ok(())
    }
}
