// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ironwave.io

//! Transport capability traits.
//!
//! The core never talks to libusb or a DMA driver directly; boards are
//! constructed with two capabilities:
//!
//! - [`ControlPipe`] - synchronous request/reply exchange of fixed-size
//!   control packets (register access, commands).
//! - [`BulkPipe`] - one direction of the sample transport: fixed-size frame
//!   buffers are submitted, kept in flight by the hardware, and reaped
//!   through [`BulkPipe::wait`].
//!
//! This split keeps the streaming and configuration engines testable against
//! the virtual board in [`mock`].

pub mod mock;
pub mod protocol;

use crate::error::Result;
use crate::memory::PoolBuffer;
use std::time::Duration;

/// Request/reply control channel to the board.
///
/// Implementations serialize access internally; the facade additionally
/// holds a per-device mutex so SPI, GPIO and custom-parameter traffic never
/// interleaves.
pub trait ControlPipe: Send + Sync {
    /// Send `request` and return the board's reply.
    ///
    /// Both directions are one fixed-size control packet. The exchange is
    /// synchronous with the given deadline.
    fn write_read(&self, request: &[u8], timeout: Duration) -> Result<Vec<u8>>;
}

/// A completed bulk transfer.
#[derive(Debug)]
pub struct BulkCompletion {
    /// The buffer that was in flight, returned to the caller's ownership.
    pub buffer: PoolBuffer,
    /// Bytes actually transferred.
    pub bytes: usize,
    /// True when the transfer was cut short by [`BulkPipe::abort`].
    pub cancelled: bool,
}

/// One direction of the fixed-size sample frame transport.
///
/// Inbound endpoints fill submitted buffers with frames from the FPGA;
/// outbound endpoints drain them towards it. Completions are reaped in
/// submission order.
pub trait BulkPipe: Send + Sync {
    /// Queue a buffer for transfer. Ownership moves to the pipe until the
    /// matching [`BulkPipe::wait`] returns it.
    fn submit(&self, buffer: PoolBuffer) -> Result<()>;

    /// Wait for the oldest in-flight transfer to complete.
    ///
    /// # Errors
    /// [`crate::Error::TimedOut`] when nothing completes within `timeout`.
    fn wait(&self, timeout: Duration) -> Result<BulkCompletion>;

    /// Cancel all in-flight transfers. Cancelled buffers are reaped through
    /// [`BulkPipe::wait`] with `cancelled == true`.
    fn abort(&self);

    /// Number of buffers currently queued or in flight.
    fn in_flight(&self) -> usize;
}
