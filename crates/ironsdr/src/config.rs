// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ironwave.io

//! Driver-wide constants - single source of truth.
//!
//! Frame geometry, queue depths, timeouts and clock limits all live here.
//! **Never hardcode these elsewhere.**

use std::time::Duration;

// =======================================================================
// Sample frame geometry (bulk transport)
// =======================================================================

/// Total size of one sample frame on the bulk transport.
///
/// Matches the gateware's USB bulk packet size; DMA transports carry an
/// integer number of these per page.
pub const FRAME_SIZE: usize = 4096;

/// Frame header size: 8-byte timestamp, 2-byte payload length, 1-byte flags,
/// 5 reserved bytes.
pub const FRAME_HEADER_SIZE: usize = 16;

/// Payload bytes available for interleaved IQ samples in one frame.
///
/// 4080 is divisible by every sample-group size the codec produces
/// (3, 4, 6 and 8 bytes), so a sample group never straddles two frames.
pub const FRAME_PAYLOAD_SIZE: usize = FRAME_SIZE - FRAME_HEADER_SIZE;

/// Number of frames kept in flight against each bulk endpoint.
pub const IN_FLIGHT_FRAMES: usize = 16;

/// Hard cap on pool buffers per stream direction: in-flight frames plus a
/// staging margin for the packing/unpacking side.
pub const POOL_FRAMES_PER_DIRECTION: usize = IN_FLIGHT_FRAMES * 4;

/// Depth of the Tx frame queue between the caller and the worker thread.
pub const TX_FRAME_QUEUE_DEPTH: usize = IN_FLIGHT_FRAMES * 2;

/// Default caller-facing sample FIFO capacity, in samples per channel.
pub const DEFAULT_FIFO_SAMPLES: usize = 64 * 1024;

// =======================================================================
// Control transport
// =======================================================================

/// Fixed size of one control packet (request and reply).
pub const CONTROL_PACKET_SIZE: usize = 64;

/// Control packet payload bytes (after the 8-byte header).
pub const CONTROL_PAYLOAD_SIZE: usize = 56;

/// Request/reply deadline for control transfers.
pub const CONTROL_TIMEOUT: Duration = Duration::from_millis(100);

/// Retry count for failed control transfers before the failure surfaces.
pub const CONTROL_RETRIES: usize = 3;

// =======================================================================
// Worker scheduling
// =======================================================================

/// Bulk completion wait per worker loop iteration; the stop flag is
/// re-checked between waits.
pub const WORKER_POLL: Duration = Duration::from_millis(100);

// =======================================================================
// Clock limits (AX7201)
// =======================================================================

/// Maximum frequency of the chip's CGEN PLL, in Hz.
pub const CGEN_MAX_HZ: f64 = 640e6;

/// Default reference clock when the board does not override it, in Hz.
pub const DEFAULT_REFERENCE_CLOCK_HZ: f64 = 30.72e6;

/// Channels per RF chip.
pub const MAX_CHANNEL_COUNT: usize = 2;
