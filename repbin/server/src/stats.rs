// Copyright (c) 2024 Botho Foundation

//! A tiny in-process counter actor (§9): admission/fetch/expire code increments counters as
//! it goes, the 60s timer tick (or `--stat`) drains and logs a snapshot. Plain atomics, no
//! channel — every increment site already has a cheap `Arc<Stats>` handle.

use std::sync::atomic::{AtomicU64, Ordering};

/// Cumulative, monotonically-increasing counters. Draining only reads and logs; it never
/// resets, so a `--stat` snapshot is a lifetime total, not a delta since the last tick.
#[derive(Default)]
pub struct Stats {
    admitted: AtomicU64,
    rejected: AtomicU64,
    fetched: AtomicU64,
    peer_fetched: AtomicU64,
    expired: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_admitted(&self) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetched(&self) {
        self.fetched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_peer_fetched(&self, count: u64) {
        self.peer_fetched.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_expired(&self, count: u64) {
        self.expired.fetch_add(count, Ordering::Relaxed);
    }

    /// A point-in-time snapshot, formatted for a single log line.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            admitted: self.admitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            fetched: self.fetched.load(Ordering::Relaxed),
            peer_fetched: self.peer_fetched.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
        }
    }

    /// Log the current snapshot at info level; called from the 60s tick and `--stat`.
    pub fn log(&self) {
        let s = self.snapshot();
        tracing::info!(
            admitted = s.admitted,
            rejected = s.rejected,
            fetched = s.fetched,
            peer_fetched = s.peer_fetched,
            expired = s.expired,
            "stats"
        );
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub admitted: u64,
    pub rejected: u64,
    pub fetched: u64,
    pub peer_fetched: u64,
    pub expired: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = Stats::new();
        stats.record_admitted();
        stats.record_admitted();
        stats.record_rejected();
        stats.record_peer_fetched(3);

        let snap = stats.snapshot();
        assert_eq!(snap.admitted, 2);
        assert_eq!(snap.rejected, 1);
        assert_eq!(snap.peer_fetched, 3);
    }
}
