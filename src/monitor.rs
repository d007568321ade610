use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::Local;

use crate::transport::Verdict;

/// Running counters shared by the dispatch thread and the workers.
#[derive(Debug, Default)]
pub struct ServiceStats {
    received: AtomicU64,
    accepted: AtomicU64,
    modified: AtomicU64,
    dropped: AtomicU64,
    defaulted: AtomicU64,
    handler_errors: AtomicU64,
    transport_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub received: u64,
    /// Accepted unchanged.
    pub accepted: u64,
    /// Accepted with replacement bytes.
    pub modified: u64,
    pub dropped: u64,
    /// Verdicts the service applied because the handler gave none.
    pub defaulted: u64,
    pub handler_errors: u64,
    pub transport_errors: u64,
}

impl ServiceStats {
    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a verdict once the transport has taken it.
    pub fn record_verdict(&self, verdict: Verdict, modified: bool) {
        let counter = match (verdict, modified) {
            (Verdict::Accept, false) => &self.accepted,
            (Verdict::Accept, true) => &self.modified,
            (Verdict::Drop, _) => &self.dropped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_default(&self) {
        self.defaulted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handler_error(&self) {
        self.handler_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transport_error(&self) {
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            modified: self.modified.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            defaulted: self.defaulted.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
        }
    }
}

impl StatsSnapshot {
    /// Counts accumulated since `earlier`.
    pub fn since(&self, earlier: &StatsSnapshot) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.saturating_sub(earlier.received),
            accepted: self.accepted.saturating_sub(earlier.accepted),
            modified: self.modified.saturating_sub(earlier.modified),
            dropped: self.dropped.saturating_sub(earlier.dropped),
            defaulted: self.defaulted.saturating_sub(earlier.defaulted),
            handler_errors: self.handler_errors.saturating_sub(earlier.handler_errors),
            transport_errors: self.transport_errors.saturating_sub(earlier.transport_errors),
        }
    }

    /// Packets received but not yet given a verdict.
    pub fn outstanding(&self) -> u64 {
        self.received
            .saturating_sub(self.accepted + self.modified + self.dropped)
    }
}

/// Periodic rate report for a queue.
pub struct Monitor {
    name: String,
    interval: Duration,
    last_report: Instant,
    last: StatsSnapshot,
}

impl Monitor {
    pub fn new(name: &str, interval: Duration) -> Self {
        Self {
            name: name.to_string(),
            interval,
            last_report: Instant::now(),
            last: StatsSnapshot::default(),
        }
    }

    pub fn check_and_report(&mut self, stats: &ServiceStats) {
        let elapsed = self.last_report.elapsed();
        if elapsed < self.interval {
            return;
        }

        let now = stats.snapshot();
        let delta = now.since(&self.last);
        let secs = elapsed.as_secs_f64();
        let rate = |n: u64| n as f64 / secs;

        log::info!(
            "[{}] {}: in {:.1}/s | accept {:.1}/s | rewrite {:.1}/s | drop {:.1}/s | default {:.1}/s | errors {}+{} | outstanding {}",
            Local::now().format("%H:%M:%S"),
            self.name,
            rate(delta.received),
            rate(delta.accepted),
            rate(delta.modified),
            rate(delta.dropped),
            rate(delta.defaulted),
            delta.handler_errors,
            delta.transport_errors,
            now.outstanding(),
        );

        self.last = now;
        self.last_report = Instant::now();
    }
}
