// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ironwave.io

//! Streaming statistics.
//!
//! Counters are updated with relaxed atomics from the worker threads;
//! consumers only need monotonic snapshots. Status reads report each
//! counter's movement since the previous status read (delta semantics).

use std::sync::atomic::{AtomicU64, Ordering};

/// Counter that reports the difference since its last checkpoint.
#[derive(Debug, Default)]
pub struct DeltaCounter {
    value: AtomicU64,
    checkpoint: AtomicU64,
}

impl DeltaCounter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment from the worker thread.
    #[inline]
    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    /// Lifetime total.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Movement since the last checkpoint, advancing the checkpoint.
    pub fn delta_and_checkpoint(&self) -> u64 {
        let value = self.value.load(Ordering::Relaxed);
        let previous = self.checkpoint.swap(value, Ordering::Relaxed);
        value - previous
    }

    /// Reset both the value and the checkpoint.
    pub fn reset(&self) {
        self.value.store(0, Ordering::Relaxed);
        self.checkpoint.store(0, Ordering::Relaxed);
    }
}

/// Per-direction counters owned by a worker, shared with status readers.
#[derive(Debug, Default)]
pub struct DirectionStats {
    /// Tx ran out of samples before its scheduled timestamp.
    pub underrun: DeltaCounter,
    /// Rx dropped a frame because no FIFO space was free.
    pub overrun: DeltaCounter,
    /// Samples missing between consecutive frame timestamps.
    pub loss: DeltaCounter,
    /// Bytes moved over the bulk pipe.
    pub bytes: AtomicU64,
    /// Link data rate, bytes per second, maintained by the worker.
    pub data_rate_bps: AtomicU64,
}

impl DirectionStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&self) {
        self.underrun.reset();
        self.overrun.reset();
        self.loss.reset();
        self.bytes.store(0, Ordering::Relaxed);
        self.data_rate_bps.store(0, Ordering::Relaxed);
    }
}

/// Snapshot returned by stream status queries.
///
/// `underrun`, `overrun` and `dropped` are deltas since the previous query;
/// each field reports its own counter.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamStatus {
    pub active: bool,
    /// Samples queued in the caller-facing FIFO.
    pub fifo_filled: usize,
    /// FIFO capacity in samples.
    pub fifo_size: usize,
    pub underrun: u64,
    pub overrun: u64,
    /// Samples lost to frame gaps on the link.
    pub dropped: u64,
    /// Link data rate in bytes per second.
    pub link_rate_bps: u64,
    /// Current hardware timestamp.
    pub timestamp: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_counter_checkpoints() {
        let c = DeltaCounter::new();
        c.add(5);
        c.add(2);
        assert_eq!(c.total(), 7);
        assert_eq!(c.delta_and_checkpoint(), 7);
        assert_eq!(c.delta_and_checkpoint(), 0);
        c.add(3);
        assert_eq!(c.delta_and_checkpoint(), 3);
        assert_eq!(c.total(), 10);
    }
}
