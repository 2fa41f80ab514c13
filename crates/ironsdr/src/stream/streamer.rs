// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ironwave.io

//! Rx/Tx streamer pair for one module.
//!
//! Owns the frame pool and up to two [`StreamerDirection`] workers, and
//! coordinates the FPGA stream-control registers around them. When
//! `align_phase` is requested, the hardware sample counters of both
//! directions are zeroed before the workers start, so the first Rx and Tx
//! frames share timestamp 0.

use crate::comms::BulkPipe;
use crate::config::{
    DEFAULT_FIFO_SAMPLES, FRAME_SIZE, IN_FLIGHT_FRAMES, POOL_FRAMES_PER_DIRECTION,
};
use crate::error::{Error, Result};
use crate::memory::MemoryPool;
use crate::soc::fpga::Fpga;
use crate::stream::codec::PacketCodec;
use crate::stream::direction::StreamerDirection;
use crate::stream::stats::StreamStatus;
use crate::stream::{Direction, SampleI16, StreamConfig, StreamMeta};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Paired sample streamer. Created by `StreamSetup`, destroyed on
/// `StreamStop` or device close.
pub struct Streamer {
    config: StreamConfig,
    pool: Arc<MemoryPool>,
    fpga: Arc<Fpga>,
    rx: Option<StreamerDirection>,
    tx: Option<StreamerDirection>,
    hw_timestamp: Arc<AtomicU64>,
    running: AtomicBool,
}

impl Streamer {
    /// Allocate resources for a stream and program the FPGA's format and
    /// channel registers. The stream stays armed until [`Streamer::start`].
    pub fn setup(
        config: StreamConfig,
        rx_pipe: Arc<dyn BulkPipe>,
        tx_pipe: Arc<dyn BulkPipe>,
        fpga: Arc<Fpga>,
    ) -> Result<Self> {
        config.validate()?;

        let directions = usize::from(!config.rx_channels.is_empty())
            + usize::from(!config.tx_channels.is_empty());
        let pool = Arc::new(MemoryPool::new(
            IN_FLIGHT_FRAMES * directions,
            POOL_FRAMES_PER_DIRECTION * directions,
            FRAME_SIZE,
            "stream-frames",
        ));
        let hw_timestamp = Arc::new(AtomicU64::new(0));
        let fifo_capacity = if config.buffer_size == 0 {
            // Latency-leaning streams get half the default depth,
            // throughput-leaning ones twice it.
            let hint = config.throughput_vs_latency.clamp(0.0, 1.0);
            (DEFAULT_FIFO_SAMPLES as f64 * f64::from(2f32.powf(2.0 * hint - 1.0))) as usize
        } else {
            config.buffer_size
        };

        let rx = if config.rx_channels.is_empty() {
            None
        } else {
            Some(StreamerDirection::new_rx(
                rx_pipe,
                Arc::clone(&pool),
                PacketCodec::new(config.link_format, config.rx_channels.len()),
                fifo_capacity,
                Arc::clone(&hw_timestamp),
            ))
        };
        let tx = if config.tx_channels.is_empty() {
            None
        } else {
            Some(StreamerDirection::new_tx(
                tx_pipe,
                Arc::clone(&pool),
                PacketCodec::new(config.link_format, config.tx_channels.len()),
                Arc::clone(&hw_timestamp),
            ))
        };

        let mut channel_mask = 0u16;
        for ch in config.rx_channels.iter().chain(config.tx_channels.iter()) {
            channel_mask |= 1 << ch;
        }
        fpga.configure_stream(config.link_format, channel_mask)?;

        log::debug!(
            "[STREAM] setup: {} rx / {} tx channels, link {:?}, fifo {} samples",
            config.rx_channels.len(),
            config.tx_channels.len(),
            config.link_format,
            fifo_capacity
        );
        Ok(Self {
            config,
            pool,
            fpga,
            rx,
            tx,
            hw_timestamp,
            running: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Start both workers. With `align_phase`, the FPGA sample counters are
    /// zeroed first so both directions count from 0.
    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if self.config.align_phase {
            self.fpga.reset_timestamp()?;
            self.hw_timestamp.store(0, Ordering::Release);
        }
        self.fpga
            .start_streaming(self.rx.is_some(), self.tx.is_some())?;
        if let Some(rx) = &self.rx {
            rx.start()?;
        }
        if let Some(tx) = &self.tx {
            tx.start()?;
        }
        Ok(())
    }

    /// Stop both workers, cancel pending transfers and return every frame
    /// buffer to the pool.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(tx) = &self.tx {
            tx.stop();
        }
        if let Some(rx) = &self.rx {
            rx.stop();
        }
        if let Err(e) = self.fpga.stop_streaming() {
            log::warn!("[STREAM] stop: FPGA disable failed: {}", e);
        }
    }

    /// Blocking Rx read in the link sample domain.
    pub fn rx_read(
        &self,
        dst: &mut [&mut [SampleI16]],
        count: usize,
        timeout: Duration,
    ) -> Result<(usize, u64)> {
        let rx = self
            .rx
            .as_ref()
            .ok_or_else(|| Error::InvalidArgument("stream has no Rx channels".into()))?;
        rx.read(dst, count, timeout)
    }

    /// Blocking Tx write in the link sample domain. Negative return means
    /// the scheduled timestamp was already missed by that many samples.
    pub fn tx_write(
        &self,
        src: &[&[SampleI16]],
        count: usize,
        meta: &StreamMeta,
        timeout: Duration,
    ) -> Result<i64> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| Error::InvalidArgument("stream has no Tx channels".into()))?;
        tx.write(src, count, meta, timeout)
    }

    /// Status snapshot for one direction; counters report deltas since the
    /// previous query of that direction.
    pub fn status(&self, dir: Direction) -> StreamStatus {
        let direction = match dir {
            Direction::Rx => self.rx.as_ref(),
            Direction::Tx => self.tx.as_ref(),
        };
        let Some(d) = direction else {
            return StreamStatus::default();
        };
        let stats = d.stats();
        StreamStatus {
            active: self.is_running(),
            fifo_filled: d.fifo_filled(),
            fifo_size: d.fifo_size(),
            underrun: stats.underrun.delta_and_checkpoint(),
            overrun: stats.overrun.delta_and_checkpoint(),
            dropped: stats.loss.delta_and_checkpoint(),
            link_rate_bps: stats.data_rate_bps.load(Ordering::Relaxed),
            timestamp: self.hw_timestamp.load(Ordering::Acquire),
        }
    }

    /// Frame buffers currently checked out of the pool.
    #[must_use]
    pub fn pool_used(&self) -> usize {
        self.pool.used()
    }
}

impl Drop for Streamer {
    fn drop(&mut self) {
        self.stop();
    }
}
