//! Engine metrics

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters for moderation activity.
#[derive(Clone, Default)]
pub struct EngineMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Default)]
struct MetricsInner {
    requests: AtomicU64,
    cache_hits: AtomicU64,
    classifier_calls: AtomicU64,
    rejects: AtomicU64,
    reviews: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.inner.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.inner.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_classifier_call(&self) {
        self.inner.classifier_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reject(&self) {
        self.inner.rejects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_review(&self) {
        self.inner.reviews.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.inner.requests.load(Ordering::Relaxed),
            cache_hits: self.inner.cache_hits.load(Ordering::Relaxed),
            classifier_calls: self.inner.classifier_calls.load(Ordering::Relaxed),
            rejects: self.inner.rejects.load(Ordering::Relaxed),
            reviews: self.inner.reviews.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of current metrics
#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub cache_hits: u64,
    pub classifier_calls: u64,
    pub rejects: u64,
    pub reviews: u64,
}

impl MetricsSnapshot {
    /// Fraction of requests served by a cache level.
    pub fn cache_hit_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.cache_hits as f64 / self.requests as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collection() {
        let metrics = EngineMetrics::new();
        metrics.record_request();
        metrics.record_request();
        metrics.record_cache_hit();
        metrics.record_reject();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests, 2);
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.rejects, 1);
        assert_eq!(snapshot.cache_hit_rate(), 0.5);
    }
}
