//! Router statistics.

use crate::protocol::event::EVENT_TYPE_COUNT;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one router instance.
///
/// All counters are atomics so introspection never has to take the
/// instance lock.
#[derive(Debug)]
pub struct RouterStats {
    /// Binlog events received from the master
    pub n_binlogs: AtomicU64,
    /// Fake (synthetic) events received
    pub n_fakeevents: AtomicU64,
    /// Binlog file rotations observed
    pub n_rotates: AtomicU64,
    /// Error packets and undecodable events
    pub n_binlog_errors: AtomicU64,
    /// Per-event-type histogram (MySQL 5.6 table)
    events: [AtomicU64; EVENT_TYPE_COUNT],
}

impl Default for RouterStats {
    fn default() -> Self {
        Self {
            n_binlogs: AtomicU64::new(0),
            n_fakeevents: AtomicU64::new(0),
            n_rotates: AtomicU64::new(0),
            n_binlog_errors: AtomicU64::new(0),
            events: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }
}

impl RouterStats {
    /// Create zeroed stats.
    pub fn new() -> Self {
        Self::default()
    }

    /// Account one event of `event_type` in the histogram.
    ///
    /// Types beyond the table are processed by the pipeline but not
    /// accounted here.
    #[inline]
    pub fn record_event_type(&self, event_type: u8) {
        if let Some(slot) = self.events.get(usize::from(event_type)) {
            slot.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Histogram count for `event_type`.
    pub fn event_count(&self, event_type: u8) -> u64 {
        self.events
            .get(usize::from(event_type))
            .map(|slot| slot.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        let mut events = [0u64; EVENT_TYPE_COUNT];
        for (dst, src) in events.iter_mut().zip(self.events.iter()) {
            *dst = src.load(Ordering::Relaxed);
        }
        StatsSnapshot {
            n_binlogs: self.n_binlogs.load(Ordering::Relaxed),
            n_fakeevents: self.n_fakeevents.load(Ordering::Relaxed),
            n_rotates: self.n_rotates.load(Ordering::Relaxed),
            n_binlog_errors: self.n_binlog_errors.load(Ordering::Relaxed),
            events,
        }
    }
}

/// Plain-data copy of [`RouterStats`] for introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Binlog events received from the master
    pub n_binlogs: u64,
    /// Fake (synthetic) events received
    pub n_fakeevents: u64,
    /// Binlog file rotations observed
    pub n_rotates: u64,
    /// Error packets and undecodable events
    pub n_binlog_errors: u64,
    /// Per-event-type histogram
    pub events: [u64; EVENT_TYPE_COUNT],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram_accounting() {
        let stats = RouterStats::new();
        stats.record_event_type(0x02);
        stats.record_event_type(0x02);
        stats.record_event_type(0x04);

        assert_eq!(stats.event_count(0x02), 2);
        assert_eq!(stats.event_count(0x04), 1);
        assert_eq!(stats.event_count(0x05), 0);
    }

    #[test]
    fn test_out_of_table_types_are_skipped() {
        let stats = RouterStats::new();
        stats.record_event_type(EVENT_TYPE_COUNT as u8);
        stats.record_event_type(0xff);

        let snapshot = stats.snapshot();
        assert!(snapshot.events.iter().all(|&n| n == 0));
    }

    #[test]
    fn test_snapshot_copies_counters() {
        let stats = RouterStats::new();
        stats.n_binlogs.fetch_add(3, Ordering::Relaxed);
        stats.n_rotates.fetch_add(1, Ordering::Relaxed);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.n_binlogs, 3);
        assert_eq!(snapshot.n_rotates, 1);
        assert_eq!(snapshot.n_fakeevents, 0);
    }
}
