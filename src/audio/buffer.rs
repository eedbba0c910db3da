//! Receive-side playout buffer
//!
//! Holds decoded PCM chunks in sequence order between the network receive
//! task and the playback callback. Depth trades latency for jitter
//! tolerance:
//!
//! - packets are ordered by sequence number (wrap-aware), not arrival time
//! - packets older than the last chunk handed to playback are dropped as late
//! - duplicates are dropped
//! - when full, the oldest chunk is evicted so latency stays bounded
//! - after an underrun playback waits for `prefill` chunks before resuming

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::codec::packet::sequence_delta;

/// A backward jump larger than this means the sender restarted its counter
pub const RESYNC_DISTANCE: i32 = 1024;

struct Slot {
    sequence: u32,
    payload: Bytes,
}

/// Result of offering a packet to the buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Queued,
    /// Older than what playback already consumed
    Late,
    Duplicate,
}

/// Sequence-ordered playout queue
pub struct PlayoutBuffer {
    slots: VecDeque<Slot>,
    capacity: usize,
    /// Chunks required before playback (re)starts
    prefill: usize,
    buffering: bool,
    last_played: Option<u32>,
    late: u64,
    duplicates: u64,
    evicted: u64,
    underruns: u64,
}

impl PlayoutBuffer {
    /// Create a buffer holding at most `capacity` chunks
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: VecDeque::with_capacity(capacity + 1),
            capacity,
            prefill: (capacity + 1) / 2,
            buffering: true,
            last_played: None,
            late: 0,
            duplicates: 0,
            evicted: 0,
            underruns: 0,
        }
    }

    /// Insert a chunk in sequence order
    pub fn insert(&mut self, sequence: u32, payload: Bytes) -> InsertOutcome {
        if let Some(last) = self.last_played {
            let delta = sequence_delta(sequence, last);
            if delta <= 0 {
                if delta < -RESYNC_DISTANCE {
                    tracing::debug!(sequence, last, "Sequence restarted, resyncing playout");
                    self.reset();
                } else {
                    self.late += 1;
                    return InsertOutcome::Late;
                }
            }
        }

        if let Some(newest) = self.slots.back() {
            if sequence_delta(sequence, newest.sequence) < -RESYNC_DISTANCE {
                tracing::debug!(sequence, "Sequence restarted, discarding buffered audio");
                self.reset();
            }
        }

        // Arrivals are almost always in order, so scan from the back
        let mut index = self.slots.len();
        while index > 0 {
            let delta = sequence_delta(sequence, self.slots[index - 1].sequence);
            if delta == 0 {
                self.duplicates += 1;
                return InsertOutcome::Duplicate;
            }
            if delta > 0 {
                break;
            }
            index -= 1;
        }

        self.slots.insert(index, Slot { sequence, payload });

        if self.slots.len() > self.capacity {
            // Catch up: drop the oldest audio rather than grow latency
            if let Some(dropped) = self.slots.pop_front() {
                self.last_played = Some(dropped.sequence);
            }
            self.evicted += 1;
        }

        InsertOutcome::Queued
    }

    /// Take the next chunk for playback.
    ///
    /// Returns `None` on underrun or while refilling to `prefill`.
    pub fn pop(&mut self) -> Option<Bytes> {
        if self.buffering {
            if self.slots.len() < self.prefill {
                return None;
            }
            self.buffering = false;
        }

        match self.slots.pop_front() {
            Some(slot) => {
                self.last_played = Some(slot.sequence);
                Some(slot.payload)
            }
            None => {
                self.underruns += 1;
                self.buffering = true;
                None
            }
        }
    }

    /// Forget all buffered audio and the playback position
    pub fn reset(&mut self) {
        self.slots.clear();
        self.last_played = None;
        self.buffering = true;
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn prefill(&self) -> usize {
        self.prefill
    }

    pub fn stats(&self) -> PlayoutStats {
        PlayoutStats {
            depth: self.slots.len(),
            capacity: self.capacity,
            late: self.late,
            duplicates: self.duplicates,
            evicted: self.evicted,
            underruns: self.underruns,
        }
    }
}

/// Playout buffer statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayoutStats {
    pub depth: usize,
    pub capacity: usize,
    pub late: u64,
    pub duplicates: u64,
    pub evicted: u64,
    pub underruns: u64,
}

/// Playout buffer shared by the receive task and the playback callback.
///
/// The current depth is mirrored in an atomic so stats readers never take
/// the lock.
pub struct SharedPlayout {
    inner: Mutex<PlayoutBuffer>,
    depth: AtomicUsize,
}

impl SharedPlayout {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(PlayoutBuffer::new(capacity)),
            depth: AtomicUsize::new(0),
        })
    }

    pub fn insert(&self, sequence: u32, payload: Bytes) -> InsertOutcome {
        let mut buffer = self.inner.lock();
        let outcome = buffer.insert(sequence, payload);
        self.depth.store(buffer.len(), Ordering::Relaxed);
        outcome
    }

    pub fn pop(&self) -> Option<Bytes> {
        let mut buffer = self.inner.lock();
        let chunk = buffer.pop();
        self.depth.store(buffer.len(), Ordering::Relaxed);
        chunk
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> PlayoutStats {
        self.inner.lock().stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(tag: u8) -> Bytes {
        Bytes::from(vec![tag; 4])
    }

    fn drain(buffer: &mut PlayoutBuffer) -> Vec<u8> {
        std::iter::from_fn(|| buffer.pop()).map(|c| c[0]).collect()
    }

    #[test]
    fn test_reorders_by_sequence() {
        let mut buffer = PlayoutBuffer::new(8);
        for seq in [2u32, 0, 1, 3] {
            assert_eq!(buffer.insert(seq, chunk(seq as u8)), InsertOutcome::Queued);
        }

        assert_eq!(drain(&mut buffer), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_late_and_duplicate_dropped() {
        let mut buffer = PlayoutBuffer::new(2);
        buffer.insert(10, chunk(10));
        assert_eq!(buffer.insert(10, chunk(10)), InsertOutcome::Duplicate);
        assert_eq!(buffer.pop().unwrap()[0], 10);

        // Already played past 10
        assert_eq!(buffer.insert(9, chunk(9)), InsertOutcome::Late);
        assert_eq!(buffer.insert(10, chunk(10)), InsertOutcome::Late);

        let stats = buffer.stats();
        assert_eq!(stats.late, 2);
        assert_eq!(stats.duplicates, 1);
    }

    #[test]
    fn test_overflow_evicts_oldest() {
        let mut buffer = PlayoutBuffer::new(3);
        for seq in 0..5u32 {
            buffer.insert(seq, chunk(seq as u8));
        }

        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.stats().evicted, 2);
        assert_eq!(drain(&mut buffer), vec![2, 3, 4]);

        // Evicted sequences now count as already played
        assert_eq!(buffer.insert(1, chunk(1)), InsertOutcome::Late);
    }

    #[test]
    fn test_prefill_after_underrun() {
        let mut buffer = PlayoutBuffer::new(4);
        assert_eq!(buffer.prefill(), 2);

        buffer.insert(0, chunk(0));
        assert!(buffer.pop().is_none(), "still prefilling");

        buffer.insert(1, chunk(1));
        assert_eq!(buffer.pop().unwrap()[0], 0);
        assert_eq!(buffer.pop().unwrap()[0], 1);
        assert!(buffer.pop().is_none());
        assert_eq!(buffer.stats().underruns, 1);

        buffer.insert(2, chunk(2));
        assert!(buffer.pop().is_none(), "refilling after underrun");
        buffer.insert(3, chunk(3));
        assert_eq!(buffer.pop().unwrap()[0], 2);
    }

    #[test]
    fn test_sequence_wraparound() {
        let mut buffer = PlayoutBuffer::new(4);
        buffer.insert(0, chunk(3));
        buffer.insert(u32::MAX, chunk(2));
        buffer.insert(u32::MAX - 1, chunk(1));

        assert_eq!(drain(&mut buffer), vec![1, 2, 3]);
    }

    #[test]
    fn test_sender_restart_resyncs() {
        let mut buffer = PlayoutBuffer::new(1);
        buffer.insert(50_000, chunk(1));
        assert!(buffer.pop().is_some());

        assert_eq!(buffer.insert(0, chunk(2)), InsertOutcome::Queued);
        assert_eq!(buffer.pop().unwrap()[0], 2);
    }

    #[test]
    fn test_shared_depth_tracks_buffer() {
        let shared = SharedPlayout::new(4);
        shared.insert(0, chunk(0));
        shared.insert(1, chunk(1));
        assert_eq!(shared.depth(), 2);

        shared.pop();
        assert_eq!(shared.depth(), 1);
        assert_eq!(shared.stats().depth, 1);
    }
}
