//! history.rs — bounded in-memory logs (posts, runs, scheduler messages).
//!
//! Oldest entries are evicted first. Readers always get copies.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lock a std mutex, recovering the data if a previous holder panicked.
/// Every structure guarded this way is valid after any single mutation.
pub(crate) fn lock_or_recover<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
pub struct BoundedLog<T> {
    inner: Mutex<VecDeque<T>>,
    cap: Mutex<usize>,
}

impl<T: Clone> BoundedLog<T> {
    /// A capacity of zero is treated as one.
    pub fn with_capacity(cap: usize) -> Self {
        let cap = cap.clamp(1, 10_000);
        Self {
            inner: Mutex::new(VecDeque::with_capacity(cap)),
            cap: Mutex::new(cap),
        }
    }

    pub fn capacity(&self) -> usize {
        *lock_or_recover(&self.cap)
    }

    /// Change capacity at runtime, evicting the oldest entries if needed.
    pub fn set_capacity(&self, cap: usize) {
        let cap = cap.clamp(1, 10_000);
        *lock_or_recover(&self.cap) = cap;
        let mut v = lock_or_recover(&self.inner);
        while v.len() > cap {
            v.pop_front();
        }
    }

    pub fn push(&self, item: T) {
        let cap = self.capacity();
        let mut v = lock_or_recover(&self.inner);
        v.push_back(item);
        while v.len() > cap {
            v.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        lock_or_recover(&self.inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Last `n` entries, oldest first.
    pub fn snapshot_last_n(&self, n: usize) -> Vec<T> {
        let v = lock_or_recover(&self.inner);
        let start = v.len().saturating_sub(n);
        v.iter().skip(start).cloned().collect()
    }

    /// Last `n` entries, newest first.
    pub fn newest_first(&self, n: usize) -> Vec<T> {
        let v = lock_or_recover(&self.inner);
        v.iter().rev().take(n).cloned().collect()
    }

    /// Keep only entries matching `keep`; returns how many were dropped.
    pub fn retain<F: FnMut(&T) -> bool>(&self, keep: F) -> usize {
        let mut v = lock_or_recover(&self.inner);
        let before = v.len();
        v.retain(keep);
        before - v.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// Operator-facing line in the scheduler's recent log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub level: LogLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle_id: Option<u64>,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, cycle_id: Option<u64>, message: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            level,
            cycle_id,
            message: message.into(),
        }
    }
}
