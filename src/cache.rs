//! # TTL cache with single-flight computation
//!
//! Shared by the ranking engine, the generator and the moderation gate to keep
//! upstream calls down.
//!
//! - `get` never returns an entry whose TTL has elapsed; expired entries are
//!   dropped on lookup or by `sweep`.
//! - `get_or_compute` runs at most one computation per key at a time. Late
//!   callers join the in-flight computation and receive the same result or
//!   the same error. Failures are never stored.
//! - The computation runs on its own task, so a caller that gives up
//!   (timeout, cancellation) never leaves an orphaned in-flight slot behind.
//!
//! Time comes from `tokio::time::Instant`, which lets tests drive TTLs with a
//! paused clock.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use metrics::counter;
use sha2::{Digest, Sha256};
use tokio::time::Instant;

use crate::error::PipelineError;
use crate::history::lock_or_recover;

type Flight<V> = Shared<BoxFuture<'static, Result<V, PipelineError>>>;

/// Cheap to clone; clones share the same storage.
pub struct TtlCache<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for TtlCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<V> {
    name: &'static str,
    entries: Mutex<HashMap<String, Entry<V>>>,
    inflight: Mutex<HashMap<String, Flight<V>>>,
}

struct Entry<V> {
    value: V,
    stored_at: Instant,
    ttl: Duration,
}

impl<V> Entry<V> {
    fn is_valid(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) < self.ttl
    }
}

impl<V> Inner<V> {
    fn store(&self, key: String, value: V, ttl: Duration) {
        let entry = Entry {
            value,
            stored_at: Instant::now(),
            ttl,
        };
        lock_or_recover(&self.entries).insert(key, entry);
    }
}

/// Clears the in-flight slot when the computation task ends, including by
/// panic or runtime shutdown.
struct FlightGuard<V> {
    inner: Arc<Inner<V>>,
    key: String,
}

impl<V> Drop for FlightGuard<V> {
    fn drop(&mut self) {
        lock_or_recover(&self.inner.inflight).remove(&self.key);
    }
}

impl<V> TtlCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// `name` labels this cache in metrics and logs.
    pub fn new(name: &'static str) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                entries: Mutex::new(HashMap::new()),
                inflight: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut entries = lock_or_recover(&self.inner.entries);
        match entries.get(key) {
            Some(e) if e.is_valid(now) => Some(e.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        self.inner.store(key.into(), value, ttl);
    }

    /// Drop every entry, or only those whose key starts with `prefix`.
    /// Returns how many were removed.
    pub fn invalidate_all(&self, prefix: Option<&str>) -> usize {
        let mut entries = lock_or_recover(&self.inner.entries);
        let before = entries.len();
        match prefix {
            Some(p) => entries.retain(|k, _| !k.starts_with(p)),
            None => entries.clear(),
        }
        before - entries.len()
    }

    /// Evict expired entries. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = lock_or_recover(&self.inner.entries);
        let before = entries.len();
        entries.retain(|_, e| e.is_valid(now));
        let removed = before - entries.len();
        if removed > 0 {
            tracing::debug!(target: "cache", cache = self.inner.name, removed, "swept expired entries");
        }
        removed
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        lock_or_recover(&self.inner.entries)
            .values()
            .filter(|e| e.is_valid(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Computations currently running.
    pub fn in_flight(&self) -> usize {
        lock_or_recover(&self.inner.inflight).len()
    }

    /// Return the cached value for `key`, or run `compute` once and cache its
    /// success for `ttl`. Concurrent callers for the same key share one run.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> Result<V, PipelineError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, PipelineError>> + Send + 'static,
    {
        let name = self.inner.name;
        if let Some(v) = self.get(key) {
            counter!("cache_hits_total", "cache" => name).increment(1);
            return Ok(v);
        }

        let flight = {
            let mut inflight = lock_or_recover(&self.inner.inflight);
            // A flight stores its value before releasing its slot, so a second
            // look under the slot lock cannot miss a just-finished result.
            if let Some(v) = self.get(key) {
                counter!("cache_hits_total", "cache" => name).increment(1);
                return Ok(v);
            }
            match inflight.get(key) {
                Some(existing) => {
                    counter!("cache_singleflight_joins_total", "cache" => name).increment(1);
                    existing.clone()
                }
                None => {
                    counter!("cache_misses_total", "cache" => name).increment(1);
                    let flight = self.launch(key.to_string(), ttl, compute());
                    inflight.insert(key.to_string(), flight.clone());
                    flight
                }
            }
        };

        flight.await
    }

    fn launch<Fut>(&self, key: String, ttl: Duration, fut: Fut) -> Flight<V>
    where
        Fut: Future<Output = Result<V, PipelineError>> + Send + 'static,
    {
        let guard = FlightGuard {
            inner: Arc::clone(&self.inner),
            key: key.clone(),
        };
        let task = tokio::spawn(async move {
            let out = fut.await;
            if let Ok(v) = &out {
                guard.inner.store(guard.key.clone(), v.clone(), ttl);
            }
            drop(guard);
            out
        });

        async move {
            match task.await {
                Ok(out) => out,
                Err(join) => Err(PipelineError::CacheComputeFailed {
                    key,
                    reason: join.to_string(),
                }),
            }
        }
        .boxed()
        .shared()
    }
}

/// Deterministic cache key: `namespace:` + 16 hex chars of SHA-256 over the parts.
pub fn fingerprint(namespace: &str, parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for p in parts {
        hasher.update(p.as_bytes());
        hasher.update([0x1f]);
    }
    let digest = hasher.finalize();
    let mut out = String::with_capacity(namespace.len() + 17);
    out.push_str(namespace);
    out.push(':');
    for b in digest.iter().take(8) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}
