//! # Webhook relay
//!
//! Forwards selected bus events to a chat webhook (Discord or Slack). The
//! relay is an ordinary channel subscriber: it never slows the publisher,
//! and a dead webhook only shows up in [`ConnectionStatus`].

pub mod cooldown;
pub mod discord;
pub mod relay;
pub mod slack;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::events::{BusEvent, Event, EventKind};
use crate::model::ModerationAction;

pub use self::relay::{ConnectionHealth, ConnectionStatus, RelayHandle, WebhookRelay};

/// Rendered notification, transport-neutral.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub kind: EventKind,
    pub title: String,
    pub body: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// One outbound delivery attempt. Retries are the relay's job.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, n: &Notification) -> Result<()>;
    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookFormat {
    Discord,
    Slack,
}

fn default_events() -> Vec<EventKind> {
    vec![EventKind::PostGenerated, EventKind::ModerationDecision]
}

/// `[notify]` section. No URL, no relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifySettings {
    pub webhook_url: Option<String>,
    pub format: WebhookFormat,
    pub events: Vec<EventKind>,
    pub max_retries: u8,
    pub timeout_secs: u64,
    /// Minimum gap between two notifications of the same kind.
    pub cooldown_secs: i64,
    pub queue_capacity: usize,
}

impl Default for NotifySettings {
    fn default() -> Self {
        Self {
            webhook_url: None,
            format: WebhookFormat::Discord,
            events: default_events(),
            max_retries: 3,
            timeout_secs: 5,
            cooldown_secs: 0,
            queue_capacity: 64,
        }
    }
}

/// Render a bus event for humans. `None` for events not worth a message.
pub fn render(ev: &BusEvent) -> Option<Notification> {
    let (title, body) = match &ev.event {
        Event::PostGenerated(rec) => (
            format!("New post: {}", rec.post.trend_topic),
            format!(
                "{}\n{}\nstyle: {} | quality: {:.2}",
                rec.post.content,
                rec.post.hashtags.join(" "),
                rec.post.style.as_str(),
                rec.post.quality_score
            ),
        ),
        Event::ModerationDecision(d) if d.verdict.action != ModerationAction::Approve => (
            format!("Moderation: {:?} ({:?})", d.verdict.action, d.verdict.severity),
            if d.verdict.reasons.is_empty() {
                format!("post {}", d.post_id)
            } else {
                format!("post {}: {}", d.post_id, d.verdict.reasons.join("; "))
            },
        ),
        Event::ModerationDecision(_) => return None,
        Event::TrendsUpdated(t) => (
            format!("Trends refreshed: {} ranked", t.count),
            t.top
                .iter()
                .map(|s| format!("{:.0}  {}", s.trend_score, s.topic))
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        Event::CycleCompleted(run) => (
            format!("Cycle {} finished", run.cycle_id),
            match &run.error {
                Some(e) => format!("{:?}: {e}", run.outcome),
                None => format!("{:?}", run.outcome),
            },
        ),
        Event::LiveInteraction(i) => (
            format!("{:?} on {}", i.kind, i.post_id),
            i.actor.clone().unwrap_or_default(),
        ),
    };
    Some(Notification {
        kind: ev.kind(),
        title,
        body,
        timestamp: ev.timestamp,
    })
}
