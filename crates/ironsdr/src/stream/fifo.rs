// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ironwave.io

//! Bounded per-channel sample FIFO between a worker thread and the caller.
//!
//! Single producer (the Rx worker), single consumer (the caller's thread).
//! The producer side never blocks: a push that does not fit is refused so
//! the worker can drop the frame and count an overrun. The consumer blocks
//! with a caller-supplied timeout and may return fewer samples on expiry.
//!
//! All channels of one direction advance in lockstep; the timestamp of the
//! next sample to be popped is tracked alongside the data.

use crate::stream::SampleI16;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

struct FifoState {
    channels: Vec<VecDeque<SampleI16>>,
    /// Sample-clock tick of the front sample.
    head_timestamp: u64,
    shutdown: bool,
}

/// Bounded blocking FIFO of interleaved-channel samples.
pub struct SampleFifo {
    state: Mutex<FifoState>,
    readable: Condvar,
    capacity: usize,
}

impl SampleFifo {
    /// `capacity` is per channel, in samples.
    #[must_use]
    pub fn new(channels: usize, capacity: usize) -> Self {
        Self {
            state: Mutex::new(FifoState {
                channels: (0..channels).map(|_| VecDeque::with_capacity(capacity)).collect(),
                head_timestamp: 0,
                shutdown: false,
            }),
            readable: Condvar::new(),
            capacity,
        }
    }

    /// Append one frame's worth of samples to every channel.
    ///
    /// `src` must hold one slice per channel, all the same length.
    /// `timestamp` is the tick of `src`'s first sample; it seeds the head
    /// timestamp when the FIFO is empty.
    ///
    /// Returns `false` without storing anything when the samples do not fit;
    /// the caller accounts the drop.
    pub fn push(&self, src: &[&[SampleI16]], timestamp: u64) -> bool {
        let mut state = self.state.lock();
        debug_assert_eq!(src.len(), state.channels.len());
        let count = src.first().map_or(0, |s| s.len());
        if state.channels[0].len() + count > self.capacity {
            return false;
        }
        if state.channels[0].is_empty() {
            state.head_timestamp = timestamp;
        }
        for (ch, samples) in state.channels.iter_mut().zip(src) {
            ch.extend(samples.iter().copied());
        }
        drop(state);
        self.readable.notify_one();
        true
    }

    /// Pop up to `count` samples per channel into `dst`, blocking until
    /// `count` are available or `timeout` expires.
    ///
    /// Returns `(samples, timestamp_of_first)`. A zero timeout makes the
    /// call non-blocking. Fewer than `count` samples may be returned.
    pub fn pop(
        &self,
        dst: &mut [&mut [SampleI16]],
        count: usize,
        timeout: Duration,
    ) -> (usize, u64) {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        debug_assert_eq!(dst.len(), state.channels.len());
        loop {
            if state.channels[0].len() >= count || state.shutdown {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            self.readable.wait_for(&mut state, deadline - now);
        }

        let available = state.channels[0].len().min(count);
        let timestamp = state.head_timestamp;
        for (ch, out) in state.channels.iter_mut().zip(dst.iter_mut()) {
            for slot in out.iter_mut().take(available) {
                *slot = ch.pop_front().expect("lockstep channels hold equal counts");
            }
        }
        state.head_timestamp += available as u64;
        (available, timestamp)
    }

    /// Samples currently queued per channel.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().channels[0].len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Per-channel capacity in samples.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop all queued samples.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        for ch in &mut state.channels {
            ch.clear();
        }
    }

    /// Wake blocked consumers; subsequent pops return what is queued and
    /// never block again.
    pub fn shutdown(&self) {
        self.state.lock().shutdown = true;
        self.readable.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn samples(range: std::ops::Range<i16>) -> Vec<SampleI16> {
        range.map(|v| SampleI16::new(v, -v)).collect()
    }

    #[test]
    fn test_push_pop_preserves_order_and_timestamp() {
        let fifo = SampleFifo::new(2, 1024);
        let a = samples(0..100);
        let b = samples(100..200);
        assert!(fifo.push(&[&a, &b], 5000));

        let mut out0 = vec![SampleI16::default(); 60];
        let mut out1 = vec![SampleI16::default(); 60];
        let (n, ts) = fifo.pop(&mut [&mut out0, &mut out1], 60, Duration::ZERO);
        assert_eq!(n, 60);
        assert_eq!(ts, 5000);
        assert_eq!(out0[..60], a[..60]);
        assert_eq!(out1[..60], b[..60]);

        // Remaining samples carry the advanced timestamp.
        let (n, ts) = fifo.pop(&mut [&mut out0, &mut out1], 40, Duration::ZERO);
        assert_eq!(n, 40);
        assert_eq!(ts, 5060);
        assert_eq!(out0[..40], a[60..]);
    }

    #[test]
    fn test_refuses_push_beyond_capacity() {
        let fifo = SampleFifo::new(1, 100);
        let chunk = samples(0..80);
        assert!(fifo.push(&[&chunk], 0));
        assert!(!fifo.push(&[&chunk], 80));
        assert_eq!(fifo.len(), 80);
    }

    #[test]
    fn test_pop_times_out_with_partial_data() {
        let fifo = SampleFifo::new(1, 100);
        let chunk = samples(0..10);
        assert!(fifo.push(&[&chunk], 0));

        let mut out = vec![SampleI16::default(); 50];
        let start = Instant::now();
        let (n, _) = fifo.pop(&mut [&mut out], 50, Duration::from_millis(20));
        assert_eq!(n, 10);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_blocked_pop_wakes_on_push() {
        let fifo = Arc::new(SampleFifo::new(1, 1024));
        let producer = Arc::clone(&fifo);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            let chunk = samples(0..256);
            assert!(producer.push(&[&chunk], 42));
        });

        let mut out = vec![SampleI16::default(); 256];
        let (n, ts) = fifo.pop(&mut [&mut out], 256, Duration::from_secs(2));
        assert_eq!(n, 256);
        assert_eq!(ts, 42);
        handle.join().expect("producer thread should finish");
    }

    #[test]
    fn test_shutdown_unblocks_consumer() {
        let fifo = Arc::new(SampleFifo::new(1, 16));
        let stopper = Arc::clone(&fifo);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            stopper.shutdown();
        });

        let mut out = vec![SampleI16::default(); 8];
        let (n, _) = fifo.pop(&mut [&mut out], 8, Duration::from_secs(5));
        assert_eq!(n, 0);
        handle.join().expect("stopper thread should finish");
    }
}
