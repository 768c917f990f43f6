// src/ingest/mod.rs
pub mod config;
pub mod providers;
pub mod types;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use once_cell::sync::OnceCell;

use crate::error::{timeboxed, PipelineError};
use crate::ingest::types::{RawCandidate, TrendSource};

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "ingest_candidates_total",
            "Raw trend candidates returned by sources."
        );
        describe_counter!(
            "ingest_source_errors_total",
            "Source fetch failures (errors and timeouts)."
        );
        describe_histogram!("ingest_fetch_ms", "Per-source fetch time in milliseconds.");
        describe_gauge!(
            "ingest_last_fetch_ts",
            "Unix ts when sources were last fanned out."
        );
    });
}

/// Normalize text: decode entities, strip tags, collapse whitespace, trim
/// trailing sentence punctuation.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
    out = re_tags.replace_all(&out, "").to_string();

    // 3) Normalize typographic quotes to ASCII
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").expect("ws regex"));
    out = re_ws.replace_all(&out, " ").trim().to_string();

    // 5) Strip trailing sentence punctuation (keep quotes)
    while let Some(last) = out.chars().last() {
        if matches!(last, '!' | '?' | '.' | ',' | ':' | ';') {
            out.pop();
        } else {
            break;
        }
    }

    // 6) Length cap: 500 chars
    if out.chars().count() > 500 {
        out = out.chars().take(500).collect();
    }

    out
}

/// Everything one source returned, stamped with when it arrived.
#[derive(Debug, Clone)]
pub struct SourceBatch {
    pub source: String,
    pub discovered_at: DateTime<Utc>,
    pub items: Vec<RawCandidate>,
}

#[derive(Debug, Clone)]
pub struct SourceFailure {
    pub source: String,
    pub error: PipelineError,
}

#[derive(Debug, Clone, Default)]
pub struct FetchReport {
    pub batches: Vec<SourceBatch>,
    pub failures: Vec<SourceFailure>,
}

impl FetchReport {
    pub fn candidate_count(&self) -> usize {
        self.batches.iter().map(|b| b.items.len()).sum()
    }

    /// True when at least one source was asked and none answered.
    pub fn all_failed(&self) -> bool {
        self.batches.is_empty() && !self.failures.is_empty()
    }
}

/// Fetch from every source concurrently, at most `max_concurrency` at a time.
/// Each source is timeboxed on its own; a failing source contributes nothing.
pub async fn fetch_all(sources: &[Arc<dyn TrendSource>], max_concurrency: usize) -> FetchReport {
    ensure_metrics_described();

    let fetches: Vec<_> = sources
        .iter()
        .cloned()
        .map(|src| async move {
            let name = src.name().to_string();
            let t0 = std::time::Instant::now();
            let out = timeboxed(&name, src.timeout(), src.fetch_candidates()).await;
            histogram!("ingest_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
            match out {
                Ok(mut items) => {
                    for it in items.iter_mut() {
                        it.title = normalize_text(&it.title);
                        it.description = normalize_text(&it.description);
                    }
                    items.retain(|it| !it.title.is_empty());
                    counter!("ingest_candidates_total").increment(items.len() as u64);
                    Ok(SourceBatch {
                        source: name,
                        discovered_at: Utc::now(),
                        items,
                    })
                }
                Err(error) => {
                    tracing::warn!(target: "ingest", source = %name, error = %error, "trend source failed");
                    counter!("ingest_source_errors_total").increment(1);
                    Err(SourceFailure {
                        source: name,
                        error,
                    })
                }
            }
        })
        .collect();
    let results: Vec<Result<SourceBatch, SourceFailure>> = stream::iter(fetches)
        .buffer_unordered(max_concurrency.max(1))
        .collect()
        .await;

    gauge!("ingest_last_fetch_ts").set(Utc::now().timestamp() as f64);

    let mut report = FetchReport::default();
    for r in results {
        match r {
            Ok(b) => report.batches.push(b),
            Err(f) => report.failures.push(f),
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::Popularity;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Fixed(&'static str, usize);

    #[async_trait::async_trait]
    impl TrendSource for Fixed {
        async fn fetch_candidates(&self) -> anyhow::Result<Vec<RawCandidate>> {
            Ok((0..self.1)
                .map(|i| RawCandidate::new(self.0, format!("Topic {i}"), Popularity::Upvotes(10)))
                .collect())
        }
        fn name(&self) -> &str {
            self.0
        }
    }

    struct Hangs;

    #[async_trait::async_trait]
    impl TrendSource for Hangs {
        async fn fetch_candidates(&self) -> anyhow::Result<Vec<RawCandidate>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(vec![])
        }
        fn name(&self) -> &str {
            "hangs"
        }
        fn timeout(&self) -> Duration {
            Duration::from_millis(20)
        }
    }

    /// Records the highest number of fetches running at once.
    struct Gauge {
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl TrendSource for Gauge {
        async fn fetch_candidates(&self) -> anyhow::Result<Vec<RawCandidate>> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(vec![])
        }
        fn name(&self) -> &str {
            "gauge"
        }
    }

    #[test]
    fn normalize_text_collapses_ws_and_punct() {
        let s = "  AI&nbsp;&nbsp; <b>breakthrough</b>!!!  ";
        assert_eq!(normalize_text(s), "AI breakthrough");
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_source_is_isolated() {
        let sources: Vec<Arc<dyn TrendSource>> = vec![Arc::new(Fixed("a", 2)), Arc::new(Hangs)];
        let report = fetch_all(&sources, 4).await;
        assert_eq!(report.candidate_count(), 2);
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(
            report.failures[0].error,
            PipelineError::AdapterTimeout { .. }
        ));
        assert!(!report.all_failed());
    }

    #[tokio::test]
    async fn fan_out_is_bounded() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let sources: Vec<Arc<dyn TrendSource>> = (0..8)
            .map(|_| {
                Arc::new(Gauge {
                    running: running.clone(),
                    peak: peak.clone(),
                }) as Arc<dyn TrendSource>
            })
            .collect();
        fetch_all(&sources, 2).await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
