//! Typed publish/subscribe event dispatch
//!
//! Synchronous handlers run inline on the publisher's call path, in
//! subscription order. Asynchronous handlers fan out as spawned tasks and are
//! joined at a barrier; no handler's failure cancels a sibling or reaches the
//! publisher. A bounded buffer keeps the most recent events for audit.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

use chrono::NaiveDate;
use futures::future::BoxFuture;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{Event, EventType};
use crate::error::Result;

pub type SyncHandler = Arc<dyn Fn(&Event) -> Result<()> + Send + Sync>;
pub type AsyncHandler = Arc<dyn Fn(Event) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Handle returned by subscribe; pass back to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

struct SyncSubscription {
    id: SubscriptionId,
    handler: SyncHandler,
}

struct AsyncSubscription {
    id: SubscriptionId,
    handler: AsyncHandler,
}

/// Dispatch statistics
#[derive(Debug, Default, Clone)]
pub struct BusStats {
    pub events_published: u64,
    pub handler_failures: u64,
    pub events_by_type: HashMap<EventType, u64>,
}

/// Generic typed event bus with bounded history
pub struct EventBus {
    sync_handlers: RwLock<HashMap<EventType, Vec<SyncSubscription>>>,
    async_handlers: RwLock<HashMap<EventType, Vec<AsyncSubscription>>>,
    history: RwLock<VecDeque<Event>>,
    capacity: usize,
    stats: RwLock<BusStats>,
}

pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl EventBus {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            sync_handlers: RwLock::new(HashMap::new()),
            async_handlers: RwLock::new(HashMap::new()),
            history: RwLock::new(VecDeque::with_capacity(history_capacity)),
            capacity: history_capacity,
            stats: RwLock::new(BusStats::default()),
        }
    }

    /// Register a synchronous handler for one event type.
    pub fn subscribe(&self, event_type: EventType, handler: SyncHandler) -> SubscriptionId {
        let id = SubscriptionId(Uuid::new_v4());
        self.sync_handlers
            .write()
            .expect("bus lock poisoned")
            .entry(event_type)
            .or_default()
            .push(SyncSubscription { id, handler });
        debug!("Subscribed sync handler to {}", event_type);
        id
    }

    /// Register an asynchronous handler for one event type.
    pub fn subscribe_async(&self, event_type: EventType, handler: AsyncHandler) -> SubscriptionId {
        let id = SubscriptionId(Uuid::new_v4());
        self.async_handlers
            .write()
            .expect("bus lock poisoned")
            .entry(event_type)
            .or_default()
            .push(AsyncSubscription { id, handler });
        debug!("Subscribed async handler to {}", event_type);
        id
    }

    /// Remove a handler registered by either subscribe variant.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        for subs in self
            .sync_handlers
            .write()
            .expect("bus lock poisoned")
            .values_mut()
        {
            subs.retain(|s| s.id != id);
        }
        for subs in self
            .async_handlers
            .write()
            .expect("bus lock poisoned")
            .values_mut()
        {
            subs.retain(|s| s.id != id);
        }
    }

    /// Publish an event, running all synchronous handlers inline.
    ///
    /// A failing handler is logged and does not prevent the remaining
    /// handlers from running; nothing propagates to the publisher.
    pub fn publish(&self, event: Event) {
        self.record(&event);
        self.run_sync_handlers(&event);
    }

    /// Publish an event, running synchronous handlers first, then fanning out
    /// asynchronous handlers concurrently and waiting for every one to finish
    /// or fail independently.
    pub async fn publish_async(&self, event: Event) {
        self.record(&event);
        self.run_sync_handlers(&event);

        // Clone handlers out so no lock is held across an await point.
        let handlers: Vec<AsyncHandler> = {
            let map = self.async_handlers.read().expect("bus lock poisoned");
            map.get(&event.event_type)
                .map(|subs| subs.iter().map(|s| s.handler.clone()).collect())
                .unwrap_or_default()
        };

        if handlers.is_empty() {
            return;
        }

        let tasks: Vec<_> = handlers
            .into_iter()
            .map(|handler| {
                let event = event.clone();
                tokio::spawn(async move { handler(event).await })
            })
            .collect();

        let event_type = event.event_type;
        for outcome in futures::future::join_all(tasks).await {
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.count_failure();
                    warn!("Async handler for {} failed: {}", event_type, e);
                }
                Err(e) => {
                    self.count_failure();
                    warn!("Async handler for {} panicked: {}", event_type, e);
                }
            }
        }
    }

    fn run_sync_handlers(&self, event: &Event) {
        let handlers: Vec<SyncHandler> = {
            let map = self.sync_handlers.read().expect("bus lock poisoned");
            map.get(&event.event_type)
                .map(|subs| subs.iter().map(|s| s.handler.clone()).collect())
                .unwrap_or_default()
        };

        for handler in handlers {
            if let Err(e) = handler(event) {
                self.count_failure();
                warn!("Handler for {} failed: {}", event.event_type, e);
            }
        }
    }

    fn record(&self, event: &Event) {
        {
            let mut history = self.history.write().expect("bus lock poisoned");
            if history.len() >= self.capacity {
                history.pop_front();
            }
            history.push_back(event.clone());
        }
        let mut stats = self.stats.write().expect("bus lock poisoned");
        stats.events_published += 1;
        *stats.events_by_type.entry(event.event_type).or_insert(0) += 1;
    }

    fn count_failure(&self) {
        self.stats.write().expect("bus lock poisoned").handler_failures += 1;
    }

    // ==================== History queries ====================

    /// Most recent events, newest last.
    pub fn recent(&self, limit: usize) -> Vec<Event> {
        let history = self.history.read().expect("bus lock poisoned");
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    /// Most recent events of one type, newest last.
    pub fn events_of_type(&self, event_type: EventType, limit: usize) -> Vec<Event> {
        let history = self.history.read().expect("bus lock poisoned");
        let mut matched: Vec<Event> = history
            .iter()
            .rev()
            .filter(|e| e.event_type == event_type)
            .take(limit)
            .cloned()
            .collect();
        matched.reverse();
        matched
    }

    /// Reconstruct the retained events for one calendar day, in publish order.
    pub fn events_for_day(&self, day: NaiveDate) -> Vec<Event> {
        let history = self.history.read().expect("bus lock poisoned");
        history
            .iter()
            .filter(|e| e.timestamp.date_naive() == day)
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> BusStats {
        self.stats.read().expect("bus lock poisoned").clone()
    }
}
