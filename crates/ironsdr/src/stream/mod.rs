// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ironwave.io

//! Sample streaming engine.
//!
//! Moves framed IQ sample packets between host memory and the FPGA over a
//! [`crate::comms::BulkPipe`], with sample-accurate timestamps:
//!
//! ```text
//! Rx:  FPGA -> BulkPipe -> worker -> codec unpack -> SampleFifo -> read()
//! Tx:  write() -> codec pack -> frame queue -> worker -> BulkPipe -> FPGA
//! ```
//!
//! [`Streamer`] pairs one Rx and one Tx [`StreamerDirection`], shares the
//! hardware timestamp between them and owns the frame [`MemoryPool`].
//!
//! [`MemoryPool`]: crate::memory::MemoryPool

pub mod codec;
pub mod direction;
pub mod fifo;
pub mod frame;
pub mod stats;
pub mod streamer;

pub use codec::PacketCodec;
pub use direction::StreamerDirection;
pub use frame::{FrameFlags, FrameHeader};
pub use stats::{DeltaCounter, StreamStatus};
pub use streamer::Streamer;

use crate::config::MAX_CHANNEL_COUNT;
use bytemuck::{Pod, Zeroable};

/// Stream direction relative to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Rx,
    Tx,
}

impl Direction {
    /// Index for two-element per-direction arrays (`[rx, tx]`).
    #[must_use]
    pub fn idx(self) -> usize {
        match self {
            Direction::Rx => 0,
            Direction::Tx => 1,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Rx => write!(f, "Rx"),
            Direction::Tx => write!(f, "Tx"),
        }
    }
}

/// Host-side sample format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataFormat {
    /// 32-bit float I/Q, full scale +-1.0.
    #[default]
    F32,
    /// 16-bit integer I/Q.
    I16,
    /// 12-bit integer I/Q carried in 16-bit containers.
    I12,
}

/// On-the-wire sample format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkFormat {
    #[default]
    I16,
    /// Compressed 12-bit: two values per three bytes.
    I12,
}

impl LinkFormat {
    /// Bytes occupied by one complex sample of one channel.
    #[must_use]
    pub fn bytes_per_sample(self) -> usize {
        match self {
            LinkFormat::I16 => 4,
            LinkFormat::I12 => 3,
        }
    }
}

/// One complex sample in 16-bit integer form.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SampleI16 {
    /// In-phase component.
    pub i: i16,
    /// Quadrature component.
    pub q: i16,
}

impl SampleI16 {
    #[must_use]
    pub fn new(i: i16, q: i16) -> Self {
        Self { i, q }
    }
}

/// One complex sample in 32-bit float form, full scale +-1.0.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct SampleF32 {
    pub i: f32,
    pub q: f32,
}

impl SampleF32 {
    #[must_use]
    pub fn new(i: f32, q: f32) -> Self {
        Self { i, q }
    }
}

/// Declarative stream setup.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Rx channel indices to stream, in interleave order.
    pub rx_channels: Vec<u8>,
    /// Tx channel indices to stream, in interleave order.
    pub tx_channels: Vec<u8>,
    /// Host-side sample format.
    pub format: DataFormat,
    /// On-the-wire sample format.
    pub link_format: LinkFormat,
    /// Caller-facing FIFO capacity in samples per channel; 0 picks the
    /// driver default.
    pub buffer_size: usize,
    /// Zero both directions' hardware sample counters on start so the first
    /// Rx and Tx frames share timestamp 0.
    pub align_phase: bool,
    /// Flow-control hint in [0, 1]: 0 favors latency (shallow queues),
    /// 1 favors throughput (deep queues). Only consulted when
    /// `buffer_size` is 0.
    pub throughput_vs_latency: f32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            rx_channels: Vec::new(),
            tx_channels: Vec::new(),
            format: DataFormat::default(),
            link_format: LinkFormat::default(),
            buffer_size: 0,
            align_phase: false,
            throughput_vs_latency: 0.5,
        }
    }
}

impl StreamConfig {
    /// Active channel count for one direction.
    #[must_use]
    pub fn channel_count(&self, dir: Direction) -> usize {
        match dir {
            Direction::Rx => self.rx_channels.len(),
            Direction::Tx => self.tx_channels.len(),
        }
    }

    /// Reject channel indices beyond the chip's channel count and empty setups.
    pub fn validate(&self) -> crate::Result<()> {
        if self.rx_channels.is_empty() && self.tx_channels.is_empty() {
            return Err(crate::Error::InvalidArgument(
                "stream setup selects no channels".into(),
            ));
        }
        for ch in self.rx_channels.iter().chain(self.tx_channels.iter()) {
            if usize::from(*ch) >= MAX_CHANNEL_COUNT {
                return Err(crate::Error::InvalidArgument(format!(
                    "channel index {} out of range",
                    ch
                )));
            }
        }
        Ok(())
    }
}

/// Per-call streaming metadata.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamMeta {
    /// Sample-clock tick of the first sample in the call.
    pub timestamp: u64,
    /// Tx: schedule against `timestamp` instead of sending immediately.
    /// Rx: `timestamp` is valid on return.
    pub use_timestamp: bool,
    /// Tx: transmit the trailing partial frame instead of holding it for
    /// more samples.
    pub flush: bool,
}
