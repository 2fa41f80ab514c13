// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ironwave.io

//! RF SoC model: declarative configuration, descriptors and the AX7201
//! transceiver/FPGA drivers.

pub mod chip;
pub mod clocktree;
pub mod configurator;
pub mod descriptor;
pub mod fpga;
pub mod registers;

pub use chip::{Ax7201, ClockId};
pub use clocktree::ClockPlan;
pub use configurator::{ApplyOutcome, ChipConfigurator};
pub use descriptor::{CustomParameter, DeviceDescriptor, Range, RfSocDescriptor};
pub use fpga::Fpga;

use crate::config::MAX_CHANNEL_COUNT;
use crate::stream::Direction;
use std::collections::BTreeMap;

/// Gain stage addressed by a gain setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum GainKind {
    /// Distribute across the chain; the usual choice.
    Generic,
    /// Rx low-noise amplifier stage.
    Lna,
    /// Rx programmable gain amplifier stage.
    Pga,
    /// Tx power amplifier driver stage.
    Pad,
}

/// Built-in test signal source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TestSignal {
    /// Generator off; samples come from the RF chain.
    #[default]
    None,
    /// NCO at one eighth of the TSP clock, half scale.
    NcoDiv8,
    /// NCO at one quarter of the TSP clock, half scale.
    NcoDiv4,
    /// NCO at one eighth of the TSP clock, full scale.
    NcoDiv8Full,
    /// NCO at one quarter of the TSP clock, full scale.
    NcoDiv4Full,
    /// Fixed DC level loaded from the I/Q words.
    Dc(i16, i16),
}

/// Desired state of one channel in one direction.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrxConfig {
    pub enabled: bool,
    pub center_frequency_hz: f64,
    pub sample_rate_hz: f64,
    /// 0 requests the highest oversampling the clock tree can afford.
    pub oversample: u8,
    /// Index into the per-direction path name list of the descriptor.
    pub path_index: usize,
    /// Analog low-pass bandwidth; 0 leaves the filter untouched.
    pub lpf_bandwidth_hz: f64,
    /// Requested gains per stage, in dB.
    pub gain_db: BTreeMap<GainKind, f64>,
    /// One-shot: run calibration for this channel during the next apply.
    /// Cleared in the stored copy after a successful configure.
    pub calibrate: bool,
    pub test_signal: TestSignal,
}

/// Desired state of one channel, both directions.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChannelConfig {
    pub rx: TrxConfig,
    pub tx: TrxConfig,
}

impl ChannelConfig {
    #[must_use]
    pub fn dir(&self, dir: Direction) -> &TrxConfig {
        match dir {
            Direction::Rx => &self.rx,
            Direction::Tx => &self.tx,
        }
    }

    pub fn dir_mut(&mut self, dir: Direction) -> &mut TrxConfig {
        match dir {
            Direction::Rx => &mut self.rx,
            Direction::Tx => &mut self.tx,
        }
    }
}

/// Declarative desired state of one RF chip.
///
/// Mutated through the facade; each successful configure stores the applied
/// copy as the base for incremental edits.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SdrConfig {
    /// 0 keeps the current reference clock.
    pub reference_clock_hz: f64,
    /// Skip the chip reset and register-default bootstrap.
    pub skip_defaults: bool,
    pub channels: [ChannelConfig; MAX_CHANNEL_COUNT],
}

impl SdrConfig {
    /// True when any channel of `dir` is enabled.
    #[must_use]
    pub fn direction_used(&self, dir: Direction) -> bool {
        self.channels.iter().any(|ch| ch.dir(dir).enabled)
    }

    /// Both channels of `dir` enabled (MIMO).
    #[must_use]
    pub fn is_mimo(&self, dir: Direction) -> bool {
        self.channels.iter().all(|ch| ch.dir(dir).enabled)
    }
}
