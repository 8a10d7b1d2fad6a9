//! Connection counters owned by the event loop.
//!
//! The loop thread is the only writer. Counters are atomics only so that
//! another thread can take a snapshot through a shared `Arc<Stats>`.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Lifetime counters and the open-connection gauge.
#[derive(Debug)]
pub struct Stats {
    open: AtomicUsize,
    accepted: AtomicU64,
    closed: AtomicU64,
    rejected: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    started_at: DateTime<Utc>,
}

/// Point-in-time copy of [`Stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub open: usize,
    pub accepted: u64,
    pub closed: u64,
    pub rejected: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            open: AtomicUsize::new(0),
            accepted: AtomicU64::new(0),
            closed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
            started_at: Utc::now(),
        }
    }

    pub(crate) fn connection_opened(&self) {
        self.open.fetch_add(1, Ordering::Relaxed);
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_closed(&self) {
        let previous = self.open.fetch_sub(1, Ordering::Relaxed);
        debug_assert!(previous > 0, "open connection gauge underflow");
        self.closed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_read(&self, bytes: usize) {
        self.bytes_in.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_written(&self, bytes: usize) {
        self.bytes_out.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Number of currently open connections.
    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::Relaxed)
    }

    /// Time elapsed since the loop was created.
    pub fn uptime(&self) -> chrono::Duration {
        Utc::now() - self.started_at
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            open: self.open.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            closed: self.closed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_gauge_tracks_lifecycle() {
        let stats = Stats::new();

        stats.connection_opened();
        stats.connection_opened();
        assert_eq!(stats.open_connections(), 2);

        stats.connection_closed();
        let snap = stats.snapshot();
        assert_eq!(snap.open, 1);
        assert_eq!(snap.accepted, 2);
        assert_eq!(snap.closed, 1);
    }

    #[test]
    fn test_rejections_do_not_touch_gauge() {
        let stats = Stats::new();
        stats.connection_rejected();
        let snap = stats.snapshot();
        assert_eq!(snap.open, 0);
        assert_eq!(snap.accepted, 0);
        assert_eq!(snap.rejected, 1);
    }

    #[test]
    fn test_byte_counters() {
        let stats = Stats::new();
        stats.record_read(5);
        stats.record_written(3);
        stats.record_written(2);
        let snap = stats.snapshot();
        assert_eq!(snap.bytes_in, 5);
        assert_eq!(snap.bytes_out, 5);
        assert!(stats.uptime() >= chrono::Duration::zero());
    }
}
