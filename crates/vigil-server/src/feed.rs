//! Change feed: fan-out of monitor add/update/delete events.
//!
//! Every subscriber owns a bounded buffer. Publishing never waits: an event
//! that does not fit in a subscriber's buffer is dropped for that subscriber
//! and counted, so one stalled consumer cannot hold up the others.

use crate::metrics::MetricsRegistry;
use crate::types::{MonitorDocument, MonitorId};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Default per-subscriber buffer
pub const DEFAULT_BUFFER: usize = 64;

/// A change to the monitor set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ChangeEvent {
    #[serde(rename = "monadd")]
    Added(MonitorDocument),

    #[serde(rename = "monchange")]
    Updated(MonitorDocument),

    #[serde(rename = "mondelete")]
    Deleted(MonitorId),
}

impl ChangeEvent {
    pub fn monitor_id(&self) -> MonitorId {
        match self {
            ChangeEvent::Added(monitor) | ChangeEvent::Updated(monitor) => monitor.id,
            ChangeEvent::Deleted(id) => *id,
        }
    }
}

/// Receiving end handed to a subscriber
#[derive(Debug)]
pub struct Subscription {
    pub id: u64,
    pub receiver: mpsc::Receiver<ChangeEvent>,
}

#[derive(Debug)]
struct Subscriber {
    id: u64,
    tx: mpsc::Sender<ChangeEvent>,
}

/// Multicast registry of change subscribers
#[derive(Debug)]
pub struct ChangeFeed {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
    buffer: usize,
    dropped: AtomicU64,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}

impl ChangeFeed {
    /// Create a feed with `buffer` events of room per subscriber
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
            dropped: AtomicU64::new(0),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Option<Arc<MetricsRegistry>>) -> Self {
        self.metrics = metrics;
        self
    }

    fn subscribers(&self) -> std::sync::MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, receiver) = mpsc::channel(self.buffer);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.subscribers().push(Subscriber { id, tx });
        debug!(subscriber = id, "Subscribed to change feed");

        Subscription { id, receiver }
    }

    /// Remove a subscriber. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: u64) {
        let mut subscribers = self.subscribers();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);

        if subscribers.len() != before {
            debug!(subscriber = id, "Unsubscribed from change feed");
        }
    }

    /// Deliver `event` to every subscriber with room for it.
    ///
    /// Returns how many subscribers received it.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        let mut delivered = 0;
        let mut subscribers = self.subscribers();

        subscribers.retain(|subscriber| match subscriber.tx.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                if let Some(metrics) = &self.metrics {
                    metrics.record_feed_dropped();
                }
                warn!(
                    subscriber = subscriber.id,
                    monitor = %event.monitor_id(),
                    "Subscriber buffer full, dropping change event"
                );
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!(subscriber = subscriber.id, "Pruning closed subscriber");
                false
            }
        });

        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers().len()
    }

    /// Events dropped on full buffers since startup
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
