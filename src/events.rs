//! # Event bus
//!
//! In-process publish/subscribe for pipeline lifecycle events. The bus has no
//! network notion; transports (webhooks, websockets) wrap it as subscribers.
//!
//! Delivery rules:
//! - Handlers are called synchronously, one after another, in the publisher's
//!   task. A handler that returns an error or panics is logged and skipped;
//!   the remaining subscribers still receive the event.
//! - Channel subscribers get a bounded `mpsc` receiver. Publishing never
//!   waits on them: a full channel drops the event for that subscriber only.
//! - A given subscriber sees events in the order one publisher emitted them.
//!   Nothing is promised about order across subscribers.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::model::{ModerationVerdict, PostRecord, SchedulerRun, TrendCandidate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TrendsUpdated,
    PostGenerated,
    ModerationDecision,
    CycleCompleted,
    LiveInteraction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendsUpdated {
    pub count: usize,
    pub top: Vec<TrendSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendSummary {
    pub id: String,
    pub topic: String,
    pub trend_score: f32,
}

impl From<&TrendCandidate> for TrendSummary {
    fn from(t: &TrendCandidate) -> Self {
        Self {
            id: t.id.clone(),
            topic: t.topic.clone(),
            trend_score: t.trend_score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModerationDecision {
    pub post_id: String,
    pub trend_id: String,
    pub verdict: ModerationVerdict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionKind {
    View,
    Like,
    Comment,
    Share,
}

/// Engagement reported by a live consumer (feed, chat widget).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub post_id: String,
    pub kind: InteractionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
}

/// Closed set of events; every variant carries a typed payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Event {
    TrendsUpdated(TrendsUpdated),
    PostGenerated(PostRecord),
    ModerationDecision(ModerationDecision),
    CycleCompleted(SchedulerRun),
    LiveInteraction(Interaction),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::TrendsUpdated(_) => EventKind::TrendsUpdated,
            Self::PostGenerated(_) => EventKind::PostGenerated,
            Self::ModerationDecision(_) => EventKind::ModerationDecision,
            Self::CycleCompleted(_) => EventKind::CycleCompleted,
            Self::LiveInteraction(_) => EventKind::LiveInteraction,
        }
    }
}

/// An event as seen by subscribers. Transient; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: Event,
}

impl BusEvent {
    pub fn kind(&self) -> EventKind {
        self.event.kind()
    }
}

pub type Handler = Arc<dyn Fn(&BusEvent) -> anyhow::Result<()> + Send + Sync>;

#[derive(Clone)]
enum Sink {
    Handler(Handler),
    Channel(mpsc::Sender<BusEvent>),
}

#[derive(Clone)]
struct Subscriber {
    filter: Option<EventKind>,
    sink: Sink,
}

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    subscribers: RwLock<BTreeMap<u64, Subscriber>>,
}

impl BusInner {
    fn remove(&self, id: u64) -> bool {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }
}

/// Per-publish delivery tally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
    pub dropped: usize,
}

#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `handler` for every event of `kind`.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&BusEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.add(Some(kind), Sink::Handler(Arc::new(handler)))
    }

    /// Call `handler` for every event.
    pub fn subscribe_all<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&BusEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.add(None, Sink::Handler(Arc::new(handler)))
    }

    /// Receive events (all, or one kind) through a bounded channel.
    pub fn subscribe_channel(
        &self,
        kind: Option<EventKind>,
        capacity: usize,
    ) -> (Subscription, mpsc::Receiver<BusEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (self.add(kind, Sink::Channel(tx)), rx)
    }

    fn add(&self, filter: Option<EventKind>, sink: Sink) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Subscriber { filter, sink });
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
            attached: true,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Deliver `event` to every matching subscriber.
    pub fn publish(&self, event: Event) -> DeliveryReport {
        let kind = event.kind();
        let ev = BusEvent {
            timestamp: Utc::now(),
            event,
        };

        // Snapshot so handlers can (un)subscribe without deadlocking.
        let targets: Vec<(u64, Sink)> = {
            let subs = self
                .inner
                .subscribers
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            subs.iter()
                .filter(|(_, s)| s.filter.map_or(true, |k| k == kind))
                .map(|(id, s)| (*id, s.sink.clone()))
                .collect()
        };

        let mut report = DeliveryReport::default();
        for (id, sink) in targets {
            match sink {
                Sink::Handler(h) => match catch_unwind(AssertUnwindSafe(|| h(&ev))) {
                    Ok(Ok(())) => report.delivered += 1,
                    Ok(Err(e)) => {
                        report.failed += 1;
                        counter!("bus_handler_errors_total").increment(1);
                        tracing::warn!(target: "bus", subscriber = id, ?kind, error = %e, "subscriber handler failed");
                    }
                    Err(_) => {
                        report.failed += 1;
                        counter!("bus_handler_errors_total").increment(1);
                        tracing::error!(target: "bus", subscriber = id, ?kind, "subscriber handler panicked");
                    }
                },
                Sink::Channel(tx) => match tx.try_send(ev.clone()) {
                    Ok(()) => report.delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        report.dropped += 1;
                        counter!("bus_events_dropped_total").increment(1);
                        tracing::debug!(target: "bus", subscriber = id, ?kind, "channel full, event dropped");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        // Receiver is gone; forget the subscriber.
                        self.inner.remove(id);
                    }
                },
            }
        }

        counter!("bus_events_published_total").increment(1);
        report
    }
}

/// Handle returned by `subscribe*`. Dropping it unsubscribes; call
/// [`Subscription::detach`] to keep the subscriber for the bus lifetime.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
    attached: bool,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn unsubscribe(self) {
        drop(self)
    }

    pub fn detach(mut self) {
        self.attached = false;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.attached {
            return;
        }
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
    }
}
