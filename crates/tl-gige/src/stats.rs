//! GVSP streaming statistics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Atomics-based counters for one GVSP receiver, safe to read from any
/// thread while the ingestion thread keeps incrementing them.
#[derive(Debug)]
pub struct StreamStats {
    packets: AtomicU64,
    frames_delivered: AtomicU64,
    frames_lost: AtomicU64,
    start: Instant,
}

impl StreamStats {
    pub fn new() -> Self {
        Self {
            packets: AtomicU64::new(0),
            frames_delivered: AtomicU64::new(0),
            frames_lost: AtomicU64::new(0),
            start: Instant::now(),
        }
    }

    /// Record one received GVSP packet (leader, data, or trailer).
    pub fn record_packet(&self) {
        self.packets.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a frame delivered to the callback.
    pub fn record_delivered(&self) {
        self.frames_delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a frame discarded due to missing data packets or a
    /// superseding leader.
    pub fn record_lost(&self) {
        self.frames_lost.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            packets: self.packets.load(Ordering::Relaxed),
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            frames_lost: self.frames_lost.load(Ordering::Relaxed),
            elapsed: self.start.elapsed().as_secs_f32(),
        }
    }
}

impl Default for StreamStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable view of collected GVSP statistics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot {
    pub packets: u64,
    pub frames_delivered: u64,
    pub frames_lost: u64,
    pub elapsed: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let stats = StreamStats::new();
        let snap = stats.snapshot();
        assert_eq!(snap.packets, 0);
        assert_eq!(snap.frames_delivered, 0);
        assert_eq!(snap.frames_lost, 0);
    }

    #[test]
    fn records_accumulate() {
        let stats = StreamStats::new();
        stats.record_packet();
        stats.record_packet();
        stats.record_delivered();
        stats.record_lost();
        let snap = stats.snapshot();
        assert_eq!(snap.packets, 2);
        assert_eq!(snap.frames_delivered, 1);
        assert_eq!(snap.frames_lost, 1);
    }
}
