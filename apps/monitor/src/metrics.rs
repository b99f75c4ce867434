use log::info;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct Metrics {
    pub ticks: AtomicU64,
    pub watches_polled: AtomicU64,
    pub watch_errors: AtomicU64,
    pub cold_starts: AtomicU64,
    pub tx_fetched: AtomicU64,
    pub transfers_detected: AtomicU64,
    pub suppressed: AtomicU64,
    pub notified: AtomicU64,
    pub delivery_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub ticks: u64,
    pub watches_polled: u64,
    pub watch_errors: u64,
    pub cold_starts: u64,
    pub tx_fetched: u64,
    pub transfers_detected: u64,
    pub suppressed: u64,
    pub notified: u64,
    pub delivery_failures: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            watches_polled: self.watches_polled.load(Ordering::Relaxed),
            watch_errors: self.watch_errors.load(Ordering::Relaxed),
            cold_starts: self.cold_starts.load(Ordering::Relaxed),
            tx_fetched: self.tx_fetched.load(Ordering::Relaxed),
            transfers_detected: self.transfers_detected.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            notified: self.notified.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self, cursors: usize) {
        info!("{}", self.stats_line(cursors));
    }

    pub fn stats_line(&self, cursors: usize) -> String {
        let s = self.snapshot();
        format!(
            "stats: ticks={} watches_polled={} watch_errors={} cold_starts={} tx_fetched={} transfers={} suppressed={} notified={} delivery_failures={} cursors={}",
            s.ticks,
            s.watches_polled,
            s.watch_errors,
            s.cold_starts,
            s.tx_fetched,
            s.transfers_detected,
            s.suppressed,
            s.notified,
            s.delivery_failures,
            cursors
        )
    }
}
