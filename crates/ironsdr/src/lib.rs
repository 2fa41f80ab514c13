// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ironwave.io

//! # ironsdr - IronSDR host-side driver
//!
//! User-space driver for the IronSDR board family: an AX7201 two-channel RF
//! transceiver behind an FPGA, reached over a bulk sample transport and a
//! control channel. The crate configures the RF chain declaratively and
//! streams baseband IQ samples in both directions with sample-accurate
//! timestamps.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ironsdr::{registry, Direction};
//!
//! fn main() -> ironsdr::Result<()> {
//!     let handles = registry::get_device_list();
//!     let device = registry::open(&handles[0])?;
//!
//!     device.enable_channel(Direction::Rx, 0, true)?;
//!     device.set_lo_frequency(Direction::Rx, 0, 868e6)?;
//!     device.set_sample_rate(10e6, 4)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                        SdrDevice facade                      |
//! |   last-applied config | stream handles | CGEN event pump     |
//! +--------------------------------------------------------------+
//! |      ChipConfigurator         |        Streamer              |
//! |  validate -> delta -> ordered |  Rx/Tx workers, frame pool,  |
//! |  register sequence            |  codec, sample FIFOs         |
//! +--------------------------------------------------------------+
//! |   Ax7201 chip driver | FPGA driver | clock tree              |
//! +--------------------------------------------------------------+
//! |   ControlPipe (64-byte packets) | BulkPipe (4 KiB frames)    |
//! +--------------------------------------------------------------+
//! ```
//!
//! Transports are injected as [`comms::ControlPipe`] and
//! [`comms::BulkPipe`] capabilities; [`comms::mock`] provides a virtual
//! board for tests.

/// Static per-board descriptor tables.
pub mod boards;
/// Transport capability traits, control protocol and the mock board.
pub mod comms;
/// Driver-wide constants.
pub mod config;
/// Device facade and enumeration registry.
pub mod device;
/// Crate error type.
pub mod error;
/// Frame buffer pooling.
pub mod memory;
/// Error reporting and log-handler plumbing.
pub mod reporting;
/// RF SoC model: configuration, descriptors, chip/FPGA drivers.
pub mod soc;
/// Sample streaming engine.
pub mod stream;

pub use device::registry;
pub use device::{SdrDevice, StreamRequest};
pub use error::{Error, Result};
pub use reporting::{last_error_message, register_log_handler};
pub use soc::{ChannelConfig, GainKind, SdrConfig, TestSignal, TrxConfig};
pub use stream::{
    DataFormat, Direction, LinkFormat, SampleF32, SampleI16, StreamConfig, StreamMeta,
    StreamStatus,
};

/// Library version string.
#[must_use]
pub fn library_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
