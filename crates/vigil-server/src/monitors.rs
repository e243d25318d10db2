//! Monitor service: validated CRUD over the store, publishing every change.

use crate::feed::{ChangeEvent, ChangeFeed};
use crate::store::{MonitorStore, StoreError};
use crate::types::{InvalidId, MAX_INTERVAL, MonitorDocument, MonitorId, MonitorSpec, TimingUpdate};
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, info};
use vigil::{CheckResult, Job, JobError, Registry, RegistryError};

/// Errors surfaced to API callers
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    InvalidId(#[from] InvalidId),

    #[error("monitor {0} not found")]
    NotFound(MonitorId),

    #[error("invalid job: {0}")]
    InvalidJob(#[from] JobError),

    #[error("invalid host: {0}")]
    InvalidHost(RegistryError),

    #[error("interval must be greater than zero and at most 30 days")]
    InvalidInterval,

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => ServiceError::NotFound(id),
            e => ServiceError::Store(e),
        }
    }
}

/// Validated access to monitors
pub struct Monitors {
    store: Arc<dyn MonitorStore>,
    registry: Arc<Registry>,
    feed: Arc<ChangeFeed>,
}

impl Monitors {
    pub fn new(store: Arc<dyn MonitorStore>, registry: Arc<Registry>, feed: Arc<ChangeFeed>) -> Self {
        Self { store, registry, feed }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn feed(&self) -> &Arc<ChangeFeed> {
        &self.feed
    }

    /// Reject specs whose job or host cannot be built
    fn validate(&self, spec: &MonitorSpec) -> Result<(), ServiceError> {
        if spec.interval.is_zero() || spec.interval > MAX_INTERVAL {
            return Err(ServiceError::InvalidInterval);
        }

        Job::from_document(&self.registry, &spec.agent)?;

        if let Some(host) = &spec.host {
            self.registry
                .build_transport(&host.transport_id, host.transport_arguments())
                .map_err(ServiceError::InvalidHost)?;
        }

        Ok(())
    }

    pub async fn add(&self, spec: MonitorSpec) -> Result<MonitorDocument, ServiceError> {
        self.validate(&spec)?;

        let monitor = MonitorDocument::new(MonitorId::generate(), spec);
        self.store.insert(monitor.clone()).await?;

        info!(id = %monitor.id, agent = ?monitor.agent.agent_id, "Added monitor");
        self.feed.publish(ChangeEvent::Added(monitor.clone()));
        Ok(monitor)
    }

    pub async fn get(&self, id: &str) -> Result<MonitorDocument, ServiceError> {
        let id: MonitorId = id.parse()?;
        Ok(self.store.find_by_id(&id).await?)
    }

    pub async fn list(&self) -> Result<Vec<MonitorDocument>, ServiceError> {
        Ok(self.store.find_all().await?)
    }

    /// Replace the editable part of a monitor, keeping its timing state
    pub async fn update(&self, id: &str, spec: MonitorSpec) -> Result<MonitorDocument, ServiceError> {
        let id: MonitorId = id.parse()?;
        self.validate(&spec)?;

        let mut monitor = self.store.find_by_id(&id).await?;
        monitor.apply(spec);
        self.save(monitor.clone()).await?;

        info!(id = %id, "Updated monitor");
        Ok(monitor)
    }

    pub async fn delete(&self, id: &str) -> Result<(), ServiceError> {
        let id: MonitorId = id.parse()?;
        self.store.remove_by_id(&id).await?;

        info!(id = %id, "Deleted monitor");
        self.feed.publish(ChangeEvent::Deleted(id));
        Ok(())
    }

    /// Store a monitor as-is and announce it
    pub async fn save(&self, monitor: MonitorDocument) -> Result<(), ServiceError> {
        self.store.update_by_id(&monitor.id, monitor.clone()).await?;
        self.feed.publish(ChangeEvent::Updated(monitor));
        Ok(())
    }

    /// Move a stale monitor's due time to `at`.
    ///
    /// Only the timing state changes, so a concurrent edit is kept.
    pub async fn reschedule(&self, id: MonitorId, at: SystemTime) -> Result<(), ServiceError> {
        self.update_timing(id, TimingUpdate::Reschedule(at)).await
    }

    /// Store the outcome of a run started at `tick`.
    ///
    /// A monitor deleted while its check was running is left deleted.
    pub async fn record_run(&self, id: MonitorId, result: CheckResult, tick: SystemTime) -> Result<(), ServiceError> {
        self.update_timing(id, TimingUpdate::Completed { tick, result }).await
    }

    async fn update_timing(&self, id: MonitorId, update: TimingUpdate) -> Result<(), ServiceError> {
        match self.store.update_timing(&id, update).await {
            Ok(monitor) => {
                self.feed.publish(ChangeEvent::Updated(monitor));
                Ok(())
            }
            Err(StoreError::NotFound(_)) => {
                debug!(id = %id, "Monitor removed meanwhile, discarding timing update");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
