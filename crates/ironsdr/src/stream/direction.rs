// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ironwave.io

//! Per-direction streaming worker.
//!
//! Each active direction owns one bulk endpoint and one worker thread that
//! keeps [`IN_FLIGHT_FRAMES`] transfers queued against it:
//!
//! - Rx: completed frames are unpacked into the sample FIFO; a frame that
//!   does not fit is dropped and counted as an overrun. Gaps between frame
//!   timestamps are counted as loss. The shared hardware timestamp advances
//!   with every frame header.
//! - Tx: the caller packs frames on its own thread and queues them; the
//!   worker feeds them to the endpoint and recycles completed buffers.
//!
//! The worker re-checks its stop flag between bounded waits, so `stop()`
//! completes within one poll interval.

use crate::comms::BulkPipe;
use crate::config::{FRAME_SIZE, IN_FLIGHT_FRAMES, TX_FRAME_QUEUE_DEPTH, WORKER_POLL};
use crate::error::{Error, Result};
use crate::memory::{MemoryPool, PoolBuffer};
use crate::stream::codec::PacketCodec;
use crate::stream::fifo::SampleFifo;
use crate::stream::frame::FrameFlags;
use crate::stream::stats::DirectionStats;
use crate::stream::{Direction, SampleI16, StreamMeta};
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Lifecycle of one direction, driven by the parent streamer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Armed,
    Running,
    Stopped,
}

/// Tx samples accumulated until a full frame (or a flush) is available.
struct TxStaging {
    channels: Vec<Vec<SampleI16>>,
    /// Tick of the first staged sample.
    timestamp: u64,
    use_timestamp: bool,
}

impl TxStaging {
    fn len(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }
}

/// One direction (Rx or Tx) of a streamer.
pub struct StreamerDirection {
    dir: Direction,
    pipe: Arc<dyn BulkPipe>,
    pool: Arc<MemoryPool>,
    codec: PacketCodec,
    stats: Arc<DirectionStats>,
    hw_timestamp: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    state: Mutex<StreamState>,
    worker: Mutex<Option<JoinHandle<()>>>,
    sticky_error: Arc<Mutex<Option<String>>>,
    /// Rx only: caller-facing sample FIFO.
    fifo: Option<Arc<SampleFifo>>,
    /// Tx only: packed-frame queue towards the worker. The receiver stays
    /// here (the worker runs on a clone) so `stop` can drain leftovers.
    tx_queue: Option<Sender<PoolBuffer>>,
    tx_receiver: Option<Receiver<PoolBuffer>>,
    tx_staging: Mutex<TxStaging>,
}

impl StreamerDirection {
    /// Build the receive side: frames flow from the pipe into `fifo`.
    pub fn new_rx(
        pipe: Arc<dyn BulkPipe>,
        pool: Arc<MemoryPool>,
        codec: PacketCodec,
        fifo_capacity: usize,
        hw_timestamp: Arc<AtomicU64>,
    ) -> Self {
        let channels = codec.channels();
        Self {
            dir: Direction::Rx,
            pipe,
            pool,
            codec,
            stats: Arc::new(DirectionStats::new()),
            hw_timestamp,
            stop: Arc::new(AtomicBool::new(false)),
            state: Mutex::new(StreamState::Armed),
            worker: Mutex::new(None),
            sticky_error: Arc::new(Mutex::new(None)),
            fifo: Some(Arc::new(SampleFifo::new(channels, fifo_capacity))),
            tx_queue: None,
            tx_receiver: None,
            tx_staging: Mutex::new(TxStaging {
                channels: Vec::new(),
                timestamp: 0,
                use_timestamp: false,
            }),
        }
    }

    /// Build the transmit side: packed frames flow from `write` to the pipe.
    pub fn new_tx(
        pipe: Arc<dyn BulkPipe>,
        pool: Arc<MemoryPool>,
        codec: PacketCodec,
        hw_timestamp: Arc<AtomicU64>,
    ) -> Self {
        let channels = codec.channels();
        let (tx, rx) = bounded(TX_FRAME_QUEUE_DEPTH);
        Self {
            dir: Direction::Tx,
            pipe,
            pool,
            codec,
            stats: Arc::new(DirectionStats::new()),
            hw_timestamp,
            stop: Arc::new(AtomicBool::new(false)),
            state: Mutex::new(StreamState::Armed),
            worker: Mutex::new(None),
            sticky_error: Arc::new(Mutex::new(None)),
            fifo: None,
            tx_queue: Some(tx),
            tx_receiver: Some(rx),
            tx_staging: Mutex::new(TxStaging {
                channels: (0..channels).map(|_| Vec::new()).collect(),
                timestamp: 0,
                use_timestamp: false,
            }),
        }
    }

    #[must_use]
    pub fn state(&self) -> StreamState {
        *self.state.lock()
    }

    #[must_use]
    pub fn stats(&self) -> &Arc<DirectionStats> {
        &self.stats
    }

    /// Caller-facing FIFO fill level, in samples.
    #[must_use]
    pub fn fifo_filled(&self) -> usize {
        match self.dir {
            Direction::Rx => self.fifo.as_ref().map_or(0, |f| f.len()),
            Direction::Tx => {
                let queued = self.tx_queue.as_ref().map_or(0, Sender::len);
                queued * self.codec.samples_per_frame() + self.tx_staging.lock().len()
            }
        }
    }

    /// Caller-facing FIFO capacity, in samples.
    #[must_use]
    pub fn fifo_size(&self) -> usize {
        match self.dir {
            Direction::Rx => self.fifo.as_ref().map_or(0, |f| f.capacity()),
            Direction::Tx => TX_FRAME_QUEUE_DEPTH * self.codec.samples_per_frame(),
        }
    }

    /// Spawn the worker thread. Driven by the parent streamer.
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        if *state == StreamState::Running {
            return Ok(());
        }
        self.stop.store(false, Ordering::Release);
        self.sticky_error.lock().take();

        let name = format!("ironsdr-{}", self.dir.to_string().to_lowercase());
        let handle = match self.dir {
            Direction::Rx => {
                let ctx = RxWorker {
                    pipe: Arc::clone(&self.pipe),
                    pool: Arc::clone(&self.pool),
                    codec: self.codec,
                    fifo: Arc::clone(self.fifo.as_ref().expect("Rx direction owns a FIFO")),
                    stats: Arc::clone(&self.stats),
                    hw_timestamp: Arc::clone(&self.hw_timestamp),
                    stop: Arc::clone(&self.stop),
                    sticky: Arc::clone(&self.sticky_error),
                };
                std::thread::Builder::new()
                    .name(name)
                    .spawn(move || ctx.run())?
            }
            Direction::Tx => {
                let receiver = self
                    .tx_receiver
                    .as_ref()
                    .expect("Tx direction owns a frame queue")
                    .clone();
                let ctx = TxWorker {
                    pipe: Arc::clone(&self.pipe),
                    pool: Arc::clone(&self.pool),
                    frames: receiver,
                    stats: Arc::clone(&self.stats),
                    stop: Arc::clone(&self.stop),
                    sticky: Arc::clone(&self.sticky_error),
                };
                std::thread::Builder::new()
                    .name(name)
                    .spawn(move || ctx.run())?
            }
        };
        *self.worker.lock() = Some(handle);
        *state = StreamState::Running;
        log::debug!("[STREAM] {} worker started", self.dir);
        Ok(())
    }

    /// Stop the worker, cancel outstanding transfers and return every buffer
    /// to the pool.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if *state != StreamState::Running {
            return;
        }
        self.stop.store(true, Ordering::Release);
        self.pipe.abort();
        if let Some(fifo) = &self.fifo {
            fifo.shutdown();
        }
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                log::error!("[STREAM] {} worker panicked", self.dir);
            }
        }

        // Reap whatever the abort left in flight.
        while self.pipe.in_flight() > 0 {
            match self.pipe.wait(Duration::ZERO) {
                Ok(c) => {
                    let _ = self.pool.free(c.buffer);
                }
                Err(_) => break,
            }
        }

        // Tx: recycle queued frames and staged samples.
        if self.dir == Direction::Tx {
            if let Some(rx) = &self.tx_receiver {
                while let Ok(frame) = rx.try_recv() {
                    let _ = self.pool.free(frame);
                }
            }
            let mut staging = self.tx_staging.lock();
            for ch in &mut staging.channels {
                ch.clear();
            }
        }
        if let Some(fifo) = &self.fifo {
            fifo.clear();
        }
        *state = StreamState::Stopped;
        log::debug!("[STREAM] {} worker stopped", self.dir);
    }

    fn surface_sticky(&self) -> Result<()> {
        if let Some(msg) = self.sticky_error.lock().clone() {
            return Err(Error::Transport(msg));
        }
        Ok(())
    }

    /// Blocking read of up to `count` samples per channel (Rx only).
    ///
    /// Returns `(samples, timestamp_of_first)`; fewer samples than requested
    /// is legal on timeout, and `timeout == 0` never blocks.
    pub fn read(
        &self,
        dst: &mut [&mut [SampleI16]],
        count: usize,
        timeout: Duration,
    ) -> Result<(usize, u64)> {
        self.surface_sticky()?;
        let fifo = self
            .fifo
            .as_ref()
            .ok_or_else(|| Error::InvalidArgument("read on a Tx direction".into()))?;
        Ok(fifo.pop(dst, count, timeout))
    }

    /// Pack and enqueue `count` samples per channel (Tx only).
    ///
    /// Returns the number of samples accepted, or a negative value when a
    /// timestamped submission already missed its slot (how many samples
    /// late), which is counted as an underrun.
    pub fn write(
        &self,
        src: &[&[SampleI16]],
        count: usize,
        meta: &StreamMeta,
        timeout: Duration,
    ) -> Result<i64> {
        self.surface_sticky()?;
        let queue = self
            .tx_queue
            .as_ref()
            .ok_or_else(|| Error::InvalidArgument("write on an Rx direction".into()))?;

        if meta.use_timestamp {
            let hw = self.hw_timestamp.load(Ordering::Acquire);
            if meta.timestamp <= hw {
                self.stats.underrun.add(1);
                return Ok(meta.timestamp as i64 - hw as i64);
            }
        }

        let deadline = Instant::now() + timeout;
        let mut staging = self.tx_staging.lock();
        if staging.len() == 0 {
            staging.timestamp = meta.timestamp;
            staging.use_timestamp = meta.use_timestamp;
        }
        for (ch, samples) in staging.channels.iter_mut().zip(src) {
            ch.extend_from_slice(&samples[..count]);
        }

        let spf = self.codec.samples_per_frame();
        while staging.len() >= spf || (meta.flush && staging.len() > 0) {
            let n = staging.len().min(spf);
            let mut buffer = self.allocate_until(deadline)?;
            let flags = FrameFlags {
                tx_immediate: !staging.use_timestamp,
                flush: meta.flush && staging.len() <= spf,
            };
            {
                let slices: Vec<&[SampleI16]> =
                    staging.channels.iter().map(Vec::as_slice).collect();
                self.codec.pack_frame(
                    buffer.as_mut_slice(),
                    staging.timestamp,
                    flags,
                    &slices,
                    0,
                    n,
                );
            }
            for ch in &mut staging.channels {
                ch.drain(..n);
            }
            staging.timestamp = staging.timestamp.wrapping_add(n as u64);

            let remaining = deadline.saturating_duration_since(Instant::now());
            if let Err(e) = queue.send_timeout(buffer, remaining) {
                // Queue full or worker gone; recycle the frame we built.
                let frame = e.into_inner();
                let _ = self.pool.free(frame);
                return Err(Error::TimedOut);
            }
        }
        Ok(count as i64)
    }

    /// Allocate a frame buffer, waiting for the worker to recycle one when
    /// the pool is at its cap.
    fn allocate_until(&self, deadline: Instant) -> Result<PoolBuffer> {
        loop {
            match self.pool.allocate() {
                Ok(buf) => return Ok(buf),
                Err(Error::Exhausted) => {
                    if Instant::now() >= deadline {
                        return Err(Error::Exhausted);
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// ============================================================================
// Rx worker
// ============================================================================

struct RxWorker {
    pipe: Arc<dyn BulkPipe>,
    pool: Arc<MemoryPool>,
    codec: PacketCodec,
    fifo: Arc<SampleFifo>,
    stats: Arc<DirectionStats>,
    hw_timestamp: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    sticky: Arc<Mutex<Option<String>>>,
}

impl RxWorker {
    fn run(self) {
        let spf = self.codec.samples_per_frame() as u64;
        let channels = self.codec.channels();
        let mut scratch: Vec<Vec<SampleI16>> = (0..channels).map(|_| Vec::new()).collect();
        let mut last_end: Option<u64> = None;
        let mut window_start = Instant::now();
        let mut window_bytes = 0u64;

        self.prime();
        while !self.stop.load(Ordering::Acquire) {
            let completion = match self.pipe.wait(WORKER_POLL) {
                Ok(c) => c,
                Err(Error::TimedOut) => continue,
                Err(e) => {
                    *self.sticky.lock() = Some(e.to_string());
                    log::error!("[STREAM] Rx transport failed: {}", e);
                    break;
                }
            };
            if completion.cancelled {
                let _ = self.pool.free(completion.buffer);
                continue;
            }

            for ch in &mut scratch {
                ch.clear();
            }
            let buffer = completion.buffer;
            match self.codec.unpack_frame(buffer.as_slice(), &mut scratch) {
                Ok((header, n)) => {
                    let end = header.timestamp + n as u64;
                    self.hw_timestamp.store(end, Ordering::Release);
                    if let Some(prev_end) = last_end {
                        if header.timestamp > prev_end {
                            self.stats.loss.add(header.timestamp - prev_end);
                            log::debug!(
                                "[STREAM] Rx gap: {} samples lost",
                                header.timestamp - prev_end
                            );
                        }
                    }
                    last_end = Some(end);
                    debug_assert!(n as u64 <= spf);

                    let slices: Vec<&[SampleI16]> =
                        scratch.iter().map(Vec::as_slice).collect();
                    if !self.fifo.push(&slices, header.timestamp) {
                        self.stats.overrun.add(1);
                    }
                }
                Err(e) => {
                    log::warn!("[STREAM] Rx frame rejected: {}", e);
                }
            }

            self.stats
                .bytes
                .fetch_add(FRAME_SIZE as u64, Ordering::Relaxed);
            window_bytes += FRAME_SIZE as u64;
            let elapsed = window_start.elapsed();
            if elapsed >= Duration::from_secs(1) {
                let rate = (window_bytes as f64 / elapsed.as_secs_f64()) as u64;
                self.stats.data_rate_bps.store(rate, Ordering::Relaxed);
                window_start = Instant::now();
                window_bytes = 0;
            }

            // Immediately put the buffer back in flight.
            if let Err(e) = self.pipe.submit(buffer) {
                *self.sticky.lock() = Some(e.to_string());
                break;
            }
        }
    }

    /// Fill the endpoint's in-flight queue with empty frames.
    fn prime(&self) {
        while self.pipe.in_flight() < IN_FLIGHT_FRAMES {
            let buffer = match self.pool.allocate() {
                Ok(b) => b,
                Err(_) => break,
            };
            if let Err(e) = self.pipe.submit(buffer) {
                *self.sticky.lock() = Some(e.to_string());
                break;
            }
        }
    }
}

// ============================================================================
// Tx worker
// ============================================================================

struct TxWorker {
    pipe: Arc<dyn BulkPipe>,
    pool: Arc<MemoryPool>,
    frames: Receiver<PoolBuffer>,
    stats: Arc<DirectionStats>,
    stop: Arc<AtomicBool>,
    sticky: Arc<Mutex<Option<String>>>,
}

impl TxWorker {
    fn run(self) {
        let mut window_start = Instant::now();
        let mut window_bytes = 0u64;

        while !self.stop.load(Ordering::Acquire) {
            // Recycle whatever has completed.
            loop {
                match self.pipe.wait(Duration::ZERO) {
                    Ok(c) => {
                        if !c.cancelled {
                            self.stats.bytes.fetch_add(c.bytes as u64, Ordering::Relaxed);
                            window_bytes += c.bytes as u64;
                        }
                        let _ = self.pool.free(c.buffer);
                    }
                    Err(_) => break,
                }
            }
            let elapsed = window_start.elapsed();
            if elapsed >= Duration::from_secs(1) {
                let rate = (window_bytes as f64 / elapsed.as_secs_f64()) as u64;
                self.stats.data_rate_bps.store(rate, Ordering::Relaxed);
                window_start = Instant::now();
                window_bytes = 0;
            }

            // Endpoint saturated: block on a completion instead of the queue.
            if self.pipe.in_flight() >= IN_FLIGHT_FRAMES {
                match self.pipe.wait(WORKER_POLL) {
                    Ok(c) => {
                        if !c.cancelled {
                            self.stats.bytes.fetch_add(c.bytes as u64, Ordering::Relaxed);
                            window_bytes += c.bytes as u64;
                        }
                        let _ = self.pool.free(c.buffer);
                    }
                    Err(Error::TimedOut) => {}
                    Err(e) => {
                        *self.sticky.lock() = Some(e.to_string());
                        break;
                    }
                }
                continue;
            }

            match self.frames.recv_timeout(WORKER_POLL) {
                Ok(frame) => {
                    if let Err(e) = self.pipe.submit(frame) {
                        *self.sticky.lock() = Some(e.to_string());
                        log::error!("[STREAM] Tx transport failed: {}", e);
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }
}
