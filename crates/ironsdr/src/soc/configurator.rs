// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ironwave.io

//! Declarative configuration apply.
//!
//! Turns the delta between the last-applied [`SdrConfig`] and a requested
//! one into an ordered register sequence:
//!
//! 1. validate (all errors collected before aborting)
//! 2. defaults/init when not skipped
//! 3. reference clock
//! 4. LO per direction (MIMO deferral honored)
//! 5. per-channel enable, path, LPF, gains, test signal, calibration
//! 6. sample rate: chip chains + CGEN + FPGA interface
//! 7. clear one-shot calibrate flags in the stored copy
//!
//! Any SPI failure short-circuits the sequence and the caller keeps its old
//! last-applied copy, so the next configure retries the same delta. An
//! unchanged request issues no bus traffic at all.

use crate::soc::chip::Ax7201;
use crate::soc::clocktree::{self, ClockPlan};
use crate::soc::fpga::Fpga;
use crate::soc::{RfSocDescriptor, SdrConfig, TrxConfig};
use crate::stream::Direction;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Result of a configure call.
#[derive(Debug)]
pub enum ApplyOutcome {
    /// The configuration was written; the boxed copy is the new
    /// last-applied state (calibrate flags cleared, oversample resolved).
    Applied(Box<SdrConfig>),
    /// MIMO LO constraint not yet satisfiable; nothing was written and the
    /// request is remembered by the caller.
    Deferred,
}

/// Applies configuration deltas to the chip and FPGA.
pub struct ChipConfigurator {
    chip: Arc<Ax7201>,
    fpga: Arc<Fpga>,
    soc: RfSocDescriptor,
    /// Suppresses FPGA interface updates from CGEN events mid-configure.
    config_in_progress: AtomicBool,
    /// Last derived clock plan, for event-driven FPGA retunes.
    last_plan: Mutex<Option<ClockPlan>>,
}

impl ChipConfigurator {
    #[must_use]
    pub fn new(chip: Arc<Ax7201>, fpga: Arc<Fpga>, soc: RfSocDescriptor) -> Self {
        Self {
            chip,
            fpga,
            soc,
            config_in_progress: AtomicBool::new(false),
            last_plan: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn soc(&self) -> &RfSocDescriptor {
        &self.soc
    }

    /// True while a configure sequence is running.
    #[must_use]
    pub fn in_progress(&self) -> bool {
        self.config_in_progress.load(Ordering::Acquire)
    }

    /// CGEN frequency of the plan the last configure applied, if any.
    #[must_use]
    pub fn last_plan_cgen(&self) -> Option<f64> {
        self.last_plan.lock().map(|p| p.cgen_hz)
    }

    /// Chain settings to accompany an out-of-configure CGEN retune.
    #[must_use]
    pub fn current_chains(&self) -> (u8, u8) {
        self.last_plan
            .lock()
            .map_or((clocktree::CHAIN_BYPASS, clocktree::CHAIN_BYPASS), |p| {
                (p.decimation, p.interpolation)
            })
    }

    /// Validate and apply `requested` against `last`.
    pub fn configure(&self, last: &SdrConfig, requested: &SdrConfig) -> Result<ApplyOutcome> {
        let errors = self.validate(requested);
        if !errors.is_empty() {
            return Err(Error::InvalidConfiguration(errors));
        }

        // MIMO LO constraint: with both channels of one direction enabled,
        // their carriers must agree before anything is written. A violating
        // request is remembered by the caller and applied once they match.
        for dir in [Direction::Rx, Direction::Tx] {
            if requested.is_mimo(dir) {
                let f0 = requested.channels[0].dir(dir).center_frequency_hz;
                let f1 = requested.channels[1].dir(dir).center_frequency_hz;
                if f0 != f1 {
                    log::debug!(
                        "[CFG] {} MIMO carriers differ ({} vs {}), deferring",
                        dir,
                        f0,
                        f1
                    );
                    return Ok(ApplyOutcome::Deferred);
                }
            }
        }

        // Empty delta: nothing to write. The comparison is against the
        // normalized request (defaults already bootstrapped, automatic
        // oversampling resolved), so repeating the same call is free.
        let normalized = normalize(requested);
        if normalized == *last {
            log::debug!("[CFG] configuration unchanged, nothing to apply");
            return Ok(ApplyOutcome::Applied(Box::new(normalized)));
        }

        self.config_in_progress.store(true, Ordering::Release);
        let result = self.apply_delta(last, requested);
        self.config_in_progress.store(false, Ordering::Release);

        let (stored, plan) = result?;
        // The FPGA interface retune was suppressed while the sequence ran;
        // do it once, after the chip side is consistent.
        if let Some(plan) = plan {
            self.fpga
                .set_interface_frequency(plan.cgen_hz, plan.decimation, plan.interpolation)?;
            *self.last_plan.lock() = Some(plan);
        }
        Ok(ApplyOutcome::Applied(Box::new(stored)))
    }

    // ====================================================================
    // Validation (invariant I2)
    // ====================================================================

    fn validate(&self, cfg: &SdrConfig) -> Vec<String> {
        let mut errors = Vec::new();
        for (index, channel) in cfg.channels.iter().enumerate() {
            for dir in [Direction::Rx, Direction::Tx] {
                let trx = channel.dir(dir);
                if !trx.enabled {
                    continue;
                }
                self.validate_trx(dir, index, trx, &mut errors);
            }
        }
        errors
    }

    fn validate_trx(&self, dir: Direction, index: usize, trx: &TrxConfig, errors: &mut Vec<String>) {
        if trx.sample_rate_hz > 0.0 && !self.soc.sampling_rate_range.contains(trx.sample_rate_hz) {
            errors.push(format!(
                "{} ch{}: sample rate {:.3} MHz outside [{:.3}, {:.3}] MHz",
                dir,
                index,
                trx.sample_rate_hz / 1e6,
                self.soc.sampling_rate_range.min / 1e6,
                self.soc.sampling_rate_range.max / 1e6
            ));
        }
        if trx.lpf_bandwidth_hz > 0.0 && !self.soc.lpf_range(dir).contains(trx.lpf_bandwidth_hz) {
            errors.push(format!(
                "{} ch{}: LPF bandwidth {:.3} MHz outside [{:.3}, {:.3}] MHz",
                dir,
                index,
                trx.lpf_bandwidth_hz / 1e6,
                self.soc.lpf_range(dir).min / 1e6,
                self.soc.lpf_range(dir).max / 1e6
            ));
        }

        let paths = self.soc.path_names(dir);
        if trx.path_index >= paths.len() {
            errors.push(format!(
                "{} ch{}: path index {} out of range",
                dir, index, trx.path_index
            ));
            return;
        }
        if trx.center_frequency_hz > 0.0 {
            if !self.soc.frequency_range.contains(trx.center_frequency_hz) {
                errors.push(format!(
                    "{} ch{}: carrier {:.3} MHz outside chip range",
                    dir,
                    index,
                    trx.center_frequency_hz / 1e6
                ));
            } else if let Some(range) = self.soc.antenna_range(dir, paths[trx.path_index]) {
                if !range.contains(trx.center_frequency_hz) {
                    errors.push(format!(
                        "{} ch{}: carrier {:.3} MHz outside path '{}' range [{:.0}, {:.0}] MHz",
                        dir,
                        index,
                        trx.center_frequency_hz / 1e6,
                        paths[trx.path_index],
                        range.min / 1e6,
                        range.max / 1e6
                    ));
                }
            }
        }
    }

    // ====================================================================
    // Ordered apply
    // ====================================================================

    fn apply_delta(
        &self,
        last: &SdrConfig,
        requested: &SdrConfig,
    ) -> Result<(SdrConfig, Option<ClockPlan>)> {
        let mut stored = requested.clone();

        if !requested.skip_defaults {
            self.chip.init()?;
        }

        if requested.reference_clock_hz > 0.0
            && requested.reference_clock_hz != self.chip.reference_clock()
        {
            self.chip.set_reference_clock(requested.reference_clock_hz)?;
        }

        // LO per direction. The synthesizer is shared by both channels of a
        // direction; the target carrier comes from whichever is enabled.
        for dir in [Direction::Rx, Direction::Tx] {
            let target = lo_target(requested, dir);
            let previous = lo_target(last, dir);
            let force = !requested.skip_defaults;
            if let Some(freq) = target {
                if force || target != previous {
                    self.chip.set_lo_frequency(dir, freq)?;
                }
            }
        }

        // Per-channel settings, in channel order.
        let mut any_enable_change = false;
        for (index, channel) in requested.channels.iter().enumerate() {
            for dir in [Direction::Rx, Direction::Tx] {
                let trx = channel.dir(dir);
                let prev = last.channels[index].dir(dir);
                let force = !requested.skip_defaults;

                if force || trx.enabled != prev.enabled {
                    self.chip.enable_channel(dir, index, trx.enabled)?;
                    any_enable_change = true;
                }
                if !trx.enabled {
                    continue;
                }
                if force || trx.path_index != prev.path_index {
                    self.chip.set_analog_path(dir, index, trx.path_index)?;
                }
                if trx.lpf_bandwidth_hz > 0.0
                    && (force || trx.lpf_bandwidth_hz != prev.lpf_bandwidth_hz)
                {
                    self.chip.set_lpf_bandwidth(dir, index, trx.lpf_bandwidth_hz)?;
                }
                if force || trx.gain_db != prev.gain_db {
                    for (kind, value) in &trx.gain_db {
                        self.chip.set_gain(dir, index, *kind, *value)?;
                    }
                }
                if force || trx.test_signal != prev.test_signal {
                    self.chip.set_test_signal(dir, index, trx.test_signal)?;
                }
                if trx.calibrate {
                    self.chip.request_calibration(dir, index)?;
                    stored.channels[index].dir_mut(dir).calibrate = false;
                }
            }
        }

        // The FPGA needs live converters; make sure the AFE is up whenever
        // the enable set changed.
        if any_enable_change && (requested.direction_used(Direction::Rx)
            || requested.direction_used(Direction::Tx))
        {
            self.chip.modify_field(crate::soc::registers::PD_RX_AFE, 0)?;
            self.chip.modify_field(crate::soc::registers::PD_TX_AFE, 0)?;
            self.chip.set_active_channel(0)?;
        }

        // Sample rate: one clock tree serves both directions.
        let rate_request = sample_rate_target(requested);
        let mut plan = None;
        if let Some((rate, oversample)) = rate_request {
            if !requested.skip_defaults || rate_request != sample_rate_target(last) {
                let derived = clocktree::derive(rate, oversample)?;
                self.chip
                    .set_rate_chains(derived.decimation, derived.interpolation)?;
                self.chip.set_cgen_frequency(derived.cgen_hz)?;
                plan = Some(derived);
            }
        }

        // Store the normalized shape: defaults ran, automatic oversampling
        // pinned. Later edits against this copy are incremental, and rate
        // queries report a meaningful RF rate even for automatic requests.
        Ok((normalize(&stored), plan))
    }
}

/// The stored shape of a request: defaults bootstrapped, automatic
/// oversampling pinned to what the clock tree would pick.
fn normalize(cfg: &SdrConfig) -> SdrConfig {
    let mut out = cfg.clone();
    out.skip_defaults = true;
    for channel in &mut out.channels {
        for dir in [Direction::Rx, Direction::Tx] {
            let trx = channel.dir_mut(dir);
            if trx.sample_rate_hz > 0.0 {
                if let Ok(plan) = clocktree::derive(trx.sample_rate_hz, trx.oversample) {
                    trx.oversample = plan.oversample;
                }
            }
        }
    }
    out
}

fn lo_target(cfg: &SdrConfig, dir: Direction) -> Option<f64> {
    cfg.channels
        .iter()
        .map(|ch| ch.dir(dir))
        .find(|trx| trx.enabled && trx.center_frequency_hz > 0.0)
        .map(|trx| trx.center_frequency_hz)
}

fn sample_rate_target(cfg: &SdrConfig) -> Option<(f64, u8)> {
    let rx = &cfg.channels[0].rx;
    let tx = &cfg.channels[0].tx;
    if cfg.direction_used(Direction::Rx) && rx.sample_rate_hz > 0.0 {
        Some((rx.sample_rate_hz, rx.oversample))
    } else if cfg.direction_used(Direction::Tx) && tx.sample_rate_hz > 0.0 {
        Some((tx.sample_rate_hz, tx.oversample))
    } else {
        None
    }
}
