use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

const MAX_WAIT_SAMPLES: usize = 1000;

#[derive(Clone, Default)]
pub struct Metrics {
    pub fetches: Arc<AtomicU64>,
    pub deferred_fetches: Arc<AtomicU64>,
    pub cancelled_fetches: Arc<AtomicU64>,
    pub deliveries: Arc<AtomicU64>,
    pub stale_deliveries: Arc<AtomicU64>,
    pub sessions_created: Arc<AtomicU64>,
    pub sessions_expired: Arc<AtomicU64>,
    pub error_count: Arc<AtomicU64>,
    /// Seconds each fetch spent waiting for its update.
    pub fetch_waits: Arc<RwLock<Vec<f64>>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_fetches(&self) {
        self.fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_deferred(&self) {
        self.deferred_fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_cancelled(&self) {
        self.cancelled_fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_deliveries(&self) {
        self.deliveries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_stale_deliveries(&self) {
        self.stale_deliveries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_sessions_created(&self) {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_sessions_expired(&self, count: u64) {
        self.sessions_expired.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_errors(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn record_fetch_wait(&self, seconds: f64) {
        let mut waits = self.fetch_waits.write().await;
        waits.push(seconds);
        if waits.len() > MAX_WAIT_SAMPLES {
            waits.drain(0..MAX_WAIT_SAMPLES / 2);
        }
    }

    pub async fn avg_fetch_wait_ms(&self) -> Option<f64> {
        let waits = self.fetch_waits.read().await;
        if waits.is_empty() {
            return None;
        }
        Some(waits.iter().sum::<f64>() / waits.len() as f64 * 1000.0)
    }

    /// Every counter plus the average fetch wait, keyed by metric name.
    pub async fn get_stats(&self) -> BTreeMap<String, String> {
        let counters = [
            ("fetches", &self.fetches),
            ("deferred_fetches", &self.deferred_fetches),
            ("cancelled_fetches", &self.cancelled_fetches),
            ("deliveries", &self.deliveries),
            ("stale_deliveries", &self.stale_deliveries),
            ("sessions_created", &self.sessions_created),
            ("sessions_expired", &self.sessions_expired),
            ("error_count", &self.error_count),
        ];

        let mut stats: BTreeMap<String, String> = counters
            .iter()
            .map(|(key, counter)| (key.to_string(), counter.load(Ordering::Relaxed).to_string()))
            .collect();

        if let Some(avg) = self.avg_fetch_wait_ms().await {
            stats.insert("avg_fetch_wait_ms".to_string(), avg.to_string());
        }

        stats
    }
}
