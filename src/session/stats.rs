//! Session counters
//!
//! Counters are written by exactly one task and read from anywhere through
//! snapshots, so readers never contend with the receive or transmit loop.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::audio::buffer::RESYNC_DISTANCE;
use crate::codec::packet::sequence_delta;
use crate::config::AudioFormat;

/// Gap-based loss accounting against the highest sequence seen
#[derive(Debug, Default)]
pub struct LossTracker {
    highest: Option<u32>,
    lost: u64,
}

impl LossTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one received sequence, returning how many were newly lost
    pub fn observe(&mut self, sequence: u32) -> u64 {
        let Some(highest) = self.highest else {
            self.highest = Some(sequence);
            return 0;
        };

        let delta = sequence_delta(sequence, highest);
        if delta > 0 {
            let gap = (delta - 1) as u64;
            self.lost += gap;
            self.highest = Some(sequence);
            gap
        } else {
            if delta < -RESYNC_DISTANCE {
                // Sender restarted its counter
                self.highest = Some(sequence);
            }
            0
        }
    }

    pub fn lost(&self) -> u64 {
        self.lost
    }

    pub fn highest(&self) -> Option<u32> {
        self.highest
    }
}

/// Live receive counters
#[derive(Debug, Default)]
pub struct ReceiveStats {
    received: AtomicU64,
    lost: AtomicU64,
    invalid: AtomicU64,
    bytes: AtomicU64,
}

impl ReceiveStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_packet(&self, bytes: usize, newly_lost: u64) {
        self.received.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        if newly_lost > 0 {
            self.lost.fetch_add(newly_lost, Ordering::Relaxed);
        }
    }

    pub fn record_invalid(&self) {
        self.invalid.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, queue_depth: usize) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            lost: self.lost.load(Ordering::Relaxed),
            invalid: self.invalid.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            queue_depth,
        }
    }
}

/// Point-in-time view of a receive session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub received: u64,
    pub lost: u64,
    pub invalid: u64,
    pub bytes: u64,
    pub queue_depth: usize,
}

impl StatsSnapshot {
    /// Buffered audio in milliseconds, for display only
    pub fn latency_ms(&self, format: &AudioFormat) -> u32 {
        (self.queue_depth as f64 * format.chunk_duration_ms()).round() as u32
    }
}

/// Live send counters
#[derive(Debug, Default)]
pub struct SenderStats {
    captured: AtomicU64,
    dropped: AtomicU64,
    sent: AtomicU64,
    send_failures: AtomicU64,
    bytes_sent: AtomicU64,
}

impl SenderStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_captured(&self) {
        self.captured.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the total sent so far
    pub fn record_sent(&self, bytes: usize) -> u64 {
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        self.sent.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Returns the total failures so far
    pub fn record_failure(&self) -> u64 {
        self.send_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn snapshot(&self) -> SenderStatsSnapshot {
        SenderStatsSnapshot {
            captured: self.captured.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderStatsSnapshot {
    pub captured: u64,
    pub dropped: u64,
    pub sent: u64,
    pub send_failures: u64,
    pub bytes_sent: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(sequences: &[u32]) -> (u64, u64) {
        let stats = ReceiveStats::new();
        let mut tracker = LossTracker::new();
        for &seq in sequences {
            let lost = tracker.observe(seq);
            stats.record_packet(12, lost);
        }
        let snapshot = stats.snapshot(0);
        (snapshot.received, snapshot.lost)
    }

    #[test]
    fn test_single_gap_counts_one_lost() {
        assert_eq!(run(&[1, 2, 4, 5]), (4, 1));
    }

    #[test]
    fn test_reordering_is_not_double_counted() {
        let (received, lost) = run(&[1, 3, 2, 4]);
        assert_eq!(received, 4);
        assert!(lost <= 1);
    }

    #[test]
    fn test_duplicates_not_lost() {
        assert_eq!(run(&[7, 7, 8, 8]), (4, 0));
    }

    #[test]
    fn test_gap_across_wrap() {
        assert_eq!(run(&[u32::MAX - 1, 1]), (2, 2));
    }

    #[test]
    fn test_sender_restart_resyncs() {
        let mut tracker = LossTracker::new();
        tracker.observe(50_000);
        tracker.observe(0);
        assert_eq!(tracker.highest(), Some(0));
        assert_eq!(tracker.observe(1), 0);
        assert_eq!(tracker.lost(), 0);
    }

    #[test]
    fn test_latency_from_chunk_duration() {
        let format = AudioFormat::default();
        let snapshot = StatsSnapshot {
            queue_depth: 3,
            ..Default::default()
        };
        // 3 * 1024 / 48000 s = 64 ms
        assert_eq!(snapshot.latency_ms(&format), 64);
    }

    #[test]
    fn test_sender_counters() {
        let stats = SenderStats::new();
        stats.record_captured();
        stats.record_captured();
        stats.record_dropped();
        assert_eq!(stats.record_sent(100), 1);
        assert_eq!(stats.record_failure(), 1);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.captured, 2);
        assert_eq!(snapshot.dropped, 1);
        assert_eq!(snapshot.bytes_sent, 100);
    }
}
