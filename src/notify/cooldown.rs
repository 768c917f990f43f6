// src/notify/cooldown.rs
use std::collections::HashMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::events::EventKind;

/// Per-kind cooldown so a burst of events does not flood the channel.
/// - The first notification of a kind always passes.
/// - Inside the cooldown, further notifications of that kind are suppressed.
/// - State changes only through `record`, after a successful send.
#[derive(Debug, Clone, Default)]
pub struct Cooldown {
    window: ChronoDuration,
    last_sent: HashMap<EventKind, DateTime<Utc>>,
}

impl Cooldown {
    /// `secs` < 0 is treated as 0 (no cooldown).
    pub fn new(secs: i64) -> Self {
        Self {
            window: ChronoDuration::seconds(secs.max(0)),
            last_sent: HashMap::new(),
        }
    }

    pub fn allows(&self, kind: EventKind, now: DateTime<Utc>) -> bool {
        match self.last_sent.get(&kind) {
            None => true,
            Some(ts) => now.signed_duration_since(*ts) >= self.window,
        }
    }

    pub fn record(&mut self, kind: EventKind, now: DateTime<Utc>) {
        self.last_sent.insert(kind, now);
    }
}
