//! vigil server
//!
//! The monitoring daemon built on the `vigil` check library. It keeps a set
//! of monitors, runs each one on its interval and serves them over HTTP.
//!
//! # Components
//!
//! - **Monitors**: validated CRUD over the monitor store
//! - **Scheduler**: ticks over the monitor set and dispatches due checks,
//!   never running one monitor twice at once
//! - **Change feed**: pushes monitor changes to WebSocket clients
//! - **API**: REST endpoints, WebSocket and Prometheus metrics

pub mod api;
pub mod config;
pub mod feed;
pub mod metrics;
pub mod monitors;
pub mod scheduler;
pub mod server;
pub mod store;
pub mod types;

pub use config::{Config, ConfigError};
pub use feed::{ChangeEvent, ChangeFeed, Subscription};
pub use metrics::MetricsRegistry;
pub use monitors::{Monitors, ServiceError};
pub use scheduler::{Decision, SchedulePolicy, Scheduler};
pub use server::VigilServer;
pub use store::{MemoryStore, MonitorStore, StoreError};
pub use types::{MonitorDocument, MonitorId, MonitorSpec};
