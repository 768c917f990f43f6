//! Bus subscriber that pushes rendered events to a webhook.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::cooldown::Cooldown;
use super::discord::DiscordNotifier;
use super::slack::SlackNotifier;
use super::{render, Notification, Notifier, NotifySettings, WebhookFormat};
use crate::events::{BusEvent, EventBus, EventKind, Subscription};
use crate::history::lock_or_recover;

/// Failed deliveries in a row before the webhook is reported down.
const DOWN_AFTER: u32 = 3;
const MAX_RETRIES: u8 = 10;
const BASE_BACKOFF_MS: u64 = 500;
const MAX_BACKOFF_MS: u64 = 30_000;

/// Delay after failed attempt `attempt` (1-based): doubles from 500ms, capped at 30s.
fn backoff_delay(attempt: u8) -> Duration {
    let shift = u32::from(attempt.saturating_sub(1));
    let ms = BASE_BACKOFF_MS
        .checked_shl(shift)
        .filter(|ms| ms >> shift == BASE_BACKOFF_MS)
        .unwrap_or(u64::MAX)
        .min(MAX_BACKOFF_MS);
    Duration::from_millis(ms)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionHealth {
    /// Nothing sent yet.
    #[default]
    Idle,
    Healthy,
    Degraded,
    Down,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnectionStatus {
    pub notifier: &'static str,
    /// HTTP attempts, retries included.
    pub attempts: u64,
    pub delivered: u64,
    pub suppressed: u64,
    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub health: ConnectionHealth,
}

pub struct WebhookRelay {
    notifier: Arc<dyn Notifier>,
    events: Vec<EventKind>,
    max_retries: u8,
    queue_capacity: usize,
    cooldown: Cooldown,
    status: Arc<Mutex<ConnectionStatus>>,
}

impl WebhookRelay {
    pub fn new(notifier: Arc<dyn Notifier>, settings: &NotifySettings) -> Self {
        let status = ConnectionStatus {
            notifier: notifier.name(),
            ..ConnectionStatus::default()
        };
        Self {
            notifier,
            events: settings.events.clone(),
            max_retries: settings.max_retries.clamp(1, MAX_RETRIES),
            queue_capacity: settings.queue_capacity,
            cooldown: Cooldown::new(settings.cooldown_secs),
            status: Arc::new(Mutex::new(status)),
        }
    }

    /// Relay for the configured webhook, if any.
    pub fn from_settings(settings: &NotifySettings) -> Option<Self> {
        let url = settings.webhook_url.as_deref().map(str::trim).filter(|u| !u.is_empty())?;
        let notifier: Arc<dyn Notifier> = match settings.format {
            WebhookFormat::Discord => {
                Arc::new(DiscordNotifier::new(url.to_string()).with_timeout(settings.timeout_secs))
            }
            WebhookFormat::Slack => {
                Arc::new(SlackNotifier::new(url.to_string()).with_timeout(settings.timeout_secs))
            }
        };
        Some(Self::new(notifier, settings))
    }

    /// Subscribe to `bus` and forward events on a background task.
    pub fn spawn(self, bus: &EventBus) -> RelayHandle {
        let (subscription, rx) = bus.subscribe_channel(None, self.queue_capacity);
        let status = Arc::clone(&self.status);
        tracing::info!(target: "notify", notifier = self.notifier.name(), events = ?self.events, "webhook relay started");
        let task = tokio::spawn(self.run(rx));
        RelayHandle {
            status,
            task,
            subscription,
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<BusEvent>) {
        while let Some(ev) = rx.recv().await {
            if !self.events.contains(&ev.kind()) {
                continue;
            }
            let Some(n) = render(&ev) else { continue };
            let now = Utc::now();
            if !self.cooldown.allows(n.kind, now) {
                lock_or_recover(&self.status).suppressed += 1;
                continue;
            }
            if self.deliver(&n).await {
                self.cooldown.record(n.kind, now);
            }
        }
        tracing::info!(target: "notify", notifier = self.notifier.name(), "webhook relay stopped");
    }

    /// Send with retries and exponential backoff. Returns true on success.
    async fn deliver(&self, n: &Notification) -> bool {
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            lock_or_recover(&self.status).attempts += 1;
            match self.notifier.send(n).await {
                Ok(()) => {
                    let mut st = lock_or_recover(&self.status);
                    st.delivered += 1;
                    st.consecutive_failures = 0;
                    st.last_success = Some(Utc::now());
                    st.health = ConnectionHealth::Healthy;
                    counter!("notify_sent_total", "notifier" => self.notifier.name()).increment(1);
                    return true;
                }
                Err(e) if attempt < self.max_retries => {
                    tracing::debug!(target: "notify", attempt, error = %e, "webhook send failed, retrying");
                    tokio::time::sleep(backoff_delay(attempt)).await;
                }
                Err(e) => {
                    let mut st = lock_or_recover(&self.status);
                    st.consecutive_failures += 1;
                    st.last_error = Some(format!("{e:#}"));
                    st.health = if st.consecutive_failures >= DOWN_AFTER {
                        ConnectionHealth::Down
                    } else {
                        ConnectionHealth::Degraded
                    };
                    counter!("notify_failed_total", "notifier" => self.notifier.name()).increment(1);
                    tracing::warn!(target: "notify", kind = ?n.kind, attempts = attempt, error = %e, "webhook delivery failed");
                    return false;
                }
            }
        }
    }
}

/// Running relay. Dropping it detaches the task; [`RelayHandle::shutdown`]
/// drains queued events first.
pub struct RelayHandle {
    status: Arc<Mutex<ConnectionStatus>>,
    task: JoinHandle<()>,
    subscription: Subscription,
}

impl RelayHandle {
    pub fn connection_status(&self) -> ConnectionStatus {
        lock_or_recover(&self.status).clone()
    }

    /// Unsubscribe, deliver what is already queued, and return the final status.
    pub async fn shutdown(self) -> ConnectionStatus {
        self.subscription.unsubscribe();
        if let Err(e) = self.task.await {
            tracing::error!(target: "notify", error = %e, "relay task ended abnormally");
        }
        lock_or_recover(&self.status).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Event, Interaction, InteractionKind};
    use parking_lot::Mutex as PlMutex;

    /// Fails the first `fail_first` sends, then succeeds.
    struct Flaky {
        fail_first: usize,
        sent: PlMutex<Vec<String>>,
        calls: PlMutex<usize>,
    }

    impl Flaky {
        fn new(fail_first: usize) -> Arc<Self> {
            Arc::new(Self {
                fail_first,
                sent: PlMutex::new(Vec::new()),
                calls: PlMutex::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl Notifier for Flaky {
        async fn send(&self, n: &Notification) -> anyhow::Result<()> {
            let call = {
                let mut calls = self.calls.lock();
                *calls += 1;
                *calls
            };
            if call <= self.fail_first {
                anyhow::bail!("HTTP 502");
            }
            self.sent.lock().push(n.title.clone());
            Ok(())
        }
        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    #[test]
    fn backoff_doubles_then_caps() {
        assert_eq!(backoff_delay(1), Duration::from_millis(500));
        assert_eq!(backoff_delay(2), Duration::from_millis(1_000));
        assert_eq!(backoff_delay(4), Duration::from_millis(4_000));
        assert_eq!(backoff_delay(7), Duration::from_millis(MAX_BACKOFF_MS));
        assert_eq!(backoff_delay(200), Duration::from_millis(MAX_BACKOFF_MS));
        assert_eq!(backoff_delay(u8::MAX), Duration::from_millis(MAX_BACKOFF_MS));
    }

    #[test]
    fn retry_count_is_capped() {
        let relay = WebhookRelay::new(
            Flaky::new(0),
            &NotifySettings {
                max_retries: u8::MAX,
                ..NotifySettings::default()
            },
        );
        assert_eq!(relay.max_retries, MAX_RETRIES);
    }

    fn settings(cooldown_secs: i64) -> NotifySettings {
        NotifySettings {
            events: vec![EventKind::LiveInteraction],
            cooldown_secs,
            ..NotifySettings::default()
        }
    }

    fn like(post: &str) -> Event {
        Event::LiveInteraction(Interaction {
            post_id: post.into(),
            kind: InteractionKind::Like,
            actor: None,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let bus = EventBus::new();
        let flaky = Flaky::new(2);
        let handle = WebhookRelay::new(flaky.clone(), &settings(0)).spawn(&bus);

        bus.publish(like("p1"));
        let st = handle.shutdown().await;

        assert_eq!(st.attempts, 3);
        assert_eq!(st.delivered, 1);
        assert_eq!(st.consecutive_failures, 0);
        assert_eq!(st.health, ConnectionHealth::Healthy);
        assert_eq!(*flaky.sent.lock(), vec!["Like on p1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_degrade_then_down() {
        let bus = EventBus::new();
        let handle = WebhookRelay::new(Flaky::new(usize::MAX), &settings(0)).spawn(&bus);
        assert_eq!(handle.connection_status().health, ConnectionHealth::Idle);

        for p in ["a", "b", "c"] {
            bus.publish(like(p));
        }
        let st = handle.shutdown().await;

        assert_eq!(st.attempts, 9);
        assert_eq!(st.delivered, 0);
        assert_eq!(st.consecutive_failures, 3);
        assert_eq!(st.health, ConnectionHealth::Down);
        assert!(st.last_error.unwrap().contains("502"));
    }

    #[tokio::test]
    async fn cooldown_and_kind_filter() {
        let bus = EventBus::new();
        let flaky = Flaky::new(0);
        let handle = WebhookRelay::new(flaky.clone(), &settings(600)).spawn(&bus);

        bus.publish(like("p1"));
        bus.publish(like("p2"));
        bus.publish(Event::TrendsUpdated(crate::events::TrendsUpdated {
            count: 0,
            top: vec![],
        }));
        let st = handle.shutdown().await;

        assert_eq!(st.delivered, 1);
        assert_eq!(st.suppressed, 1);
        assert_eq!(flaky.sent.lock().len(), 1);
    }
}
