//! Counters for catalog cache activity.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Catalog cache metrics (thread-safe counters).
#[derive(Debug, Clone, Default)]
pub struct CacheMetrics {
    /// Lookups served from a registered catalog
    pub hits: Arc<AtomicU64>,
    /// Lookups that found neither a catalog nor a matching scan
    pub misses: Arc<AtomicU64>,
    /// Static catalogs rebuilt because their file changed
    pub refreshes: Arc<AtomicU64>,
    /// Rebuilds that failed and left the catalog purged
    pub refresh_failures: Arc<AtomicU64>,
    /// Dynamic catalog load passes that succeeded
    pub dynamic_loads: Arc<AtomicU64>,
    /// Dynamic catalog load passes that failed
    pub dynamic_load_failures: Arc<AtomicU64>,
    /// Catalogs removed from the registry
    pub purges: Arc<AtomicU64>,
}

impl CacheMetrics {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refresh(&self) {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refresh_failure(&self) {
        self.refresh_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dynamic_load(&self) {
        self.dynamic_loads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dynamic_load_failure(&self) {
        self.dynamic_load_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_purge(&self) {
        self.purges.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            refreshes: self.refreshes.load(Ordering::Relaxed),
            refresh_failures: self.refresh_failures.load(Ordering::Relaxed),
            dynamic_loads: self.dynamic_loads.load(Ordering::Relaxed),
            dynamic_load_failures: self.dynamic_load_failures.load(Ordering::Relaxed),
            purges: self.purges.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters.
    pub fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.refreshes,
            &self.refresh_failures,
            &self.dynamic_loads,
            &self.dynamic_load_failures,
            &self.purges,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Snapshot of metrics (for reporting).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub refreshes: u64,
    pub refresh_failures: u64,
    pub dynamic_loads: u64,
    pub dynamic_load_failures: u64,
    pub purges: u64,
}

impl MetricsSnapshot {
    /// Fraction of lookups answered from the cache.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses + self.dynamic_loads;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Format a human-readable report.
    pub fn format_report(&self) -> String {
        let mut report = String::new();
        report.push_str("Catalog Cache Statistics:\n");
        report.push_str(&format!("  Hits:                   {}\n", self.hits));
        report.push_str(&format!("  Misses:                 {}\n", self.misses));
        report.push_str(&format!("  Hit rate:               {:.1}%\n", self.hit_rate() * 100.0));
        report.push_str(&format!("  Static refreshes:       {}\n", self.refreshes));
        report.push_str(&format!("  Refresh failures:       {}\n", self.refresh_failures));
        report.push_str(&format!("  Dynamic loads:          {}\n", self.dynamic_loads));
        report.push_str(&format!("  Dynamic load failures:  {}\n", self.dynamic_load_failures));
        report.push_str(&format!("  Purged catalogs:        {}\n", self.purges));
        report
    }
}
