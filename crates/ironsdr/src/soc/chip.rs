// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ironwave.io

//! AX7201 transceiver driver.
//!
//! Field-level register access over the control pipe with a shadow cache,
//! plus the programming sequences the configurator composes: synthesizers,
//! sample-rate chains, gain, filters, test signals and calibration
//! requests. CGEN retunes are announced on an event channel the device
//! facade consumes; the chip never calls back into upper layers.

use crate::comms::protocol::{spi_read, spi_write, SpiBus};
use crate::comms::ControlPipe;
use crate::config::DEFAULT_REFERENCE_CLOCK_HZ;
use crate::error::{Error, Result};
use crate::soc::registers as reg;
use crate::soc::registers::RegField;
use crate::soc::{GainKind, TestSignal};
use crate::stream::Direction;
use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Chip revision word that identifies silicon without a temperature sensor.
pub const REV_NO_TEMP_SENSOR: u16 = 0x3840;

/// Fractional-N resolution of the SX synthesizers (20 bits).
const SX_FRAC_SCALE: f64 = (1 << 20) as f64;
/// Fractional-N resolution of the CGEN PLL (16 bits).
const CGEN_FRAC_SCALE: f64 = 65536.0;

/// Clock outputs addressable through the clock API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockId {
    Reference = 0,
    RxLo = 1,
    TxLo = 2,
    Cgen = 3,
    RxTsp = 4,
    TxTsp = 5,
}

impl ClockId {
    pub fn from_index(index: usize) -> Result<Self> {
        match index {
            0 => Ok(ClockId::Reference),
            1 => Ok(ClockId::RxLo),
            2 => Ok(ClockId::TxLo),
            3 => Ok(ClockId::Cgen),
            4 => Ok(ClockId::RxTsp),
            5 => Ok(ClockId::TxTsp),
            _ => Err(Error::InvalidArgument(format!("clock id {}", index))),
        }
    }
}

/// AX7201 driver state.
pub struct Ax7201 {
    pipe: Arc<dyn ControlPipe>,
    /// Shadow of every register written or read through this driver.
    shadow: Mutex<BTreeMap<u16, u16>>,
    /// Serve reads from the shadow instead of the bus.
    cache_enabled: AtomicBool,
    reference_clock_hz: Mutex<f64>,
    /// Board-specific register defaults applied on init.
    defaults: Vec<(u16, u16)>,
    cgen_events: Sender<f64>,
}

impl Ax7201 {
    /// Create the driver. The returned receiver delivers `CgenChanged`
    /// frequencies for the facade's event pump.
    pub fn new(pipe: Arc<dyn ControlPipe>, defaults: Vec<(u16, u16)>) -> (Arc<Self>, Receiver<f64>) {
        let (tx, rx) = unbounded();
        (
            Arc::new(Self {
                pipe,
                shadow: Mutex::new(BTreeMap::new()),
                cache_enabled: AtomicBool::new(false),
                reference_clock_hz: Mutex::new(DEFAULT_REFERENCE_CLOCK_HZ),
                defaults,
                cgen_events: tx,
            }),
            rx,
        )
    }

    // ====================================================================
    // Register access
    // ====================================================================

    pub fn write_reg(&self, addr: u16, value: u16) -> Result<()> {
        spi_write(self.pipe.as_ref(), SpiBus::Chip, &[(addr, value)])?;
        self.shadow.lock().insert(addr, value);
        Ok(())
    }

    pub fn read_reg(&self, addr: u16) -> Result<u16> {
        if self.cache_enabled.load(Ordering::Relaxed) {
            if let Some(value) = self.shadow.lock().get(&addr) {
                return Ok(*value);
            }
        }
        let value = spi_read(self.pipe.as_ref(), SpiBus::Chip, &[addr])?[0];
        self.shadow.lock().insert(addr, value);
        Ok(value)
    }

    /// Read-modify-write one field.
    pub fn modify_field(&self, field: RegField, value: u16) -> Result<()> {
        let current = self.read_reg(field.addr)?;
        let updated = field.insert(current, value);
        if updated != current || self.shadow.lock().get(&field.addr) != Some(&updated) {
            self.write_reg(field.addr, updated)?;
        }
        Ok(())
    }

    pub fn get_field(&self, field: RegField) -> Result<u16> {
        Ok(field.extract(self.read_reg(field.addr)?))
    }

    /// Select the active channel (1 = A, 2 = B) for MAC-mapped blocks.
    pub fn set_active_channel(&self, channel: usize) -> Result<()> {
        self.modify_field(reg::MAC, channel as u16 + 1)
    }

    // ====================================================================
    // Cache control
    // ====================================================================

    /// Toggle read-through caching of chip registers.
    pub fn enable_cache(&self, enabled: bool) {
        self.cache_enabled.store(enabled, Ordering::Relaxed);
        log::debug!("[CHIP] register cache {}", if enabled { "on" } else { "off" });
    }

    /// `to_chip` flushes the shadow to hardware; otherwise the shadow is
    /// refreshed from hardware.
    pub fn synchronize(&self, to_chip: bool) -> Result<()> {
        let addrs: Vec<u16> = self.shadow.lock().keys().copied().collect();
        if to_chip {
            let pairs: Vec<(u16, u16)> = {
                let shadow = self.shadow.lock();
                addrs.iter().map(|a| (*a, shadow[a])).collect()
            };
            spi_write(self.pipe.as_ref(), SpiBus::Chip, &pairs)
        } else {
            let values = spi_read(self.pipe.as_ref(), SpiBus::Chip, &addrs)?;
            let mut shadow = self.shadow.lock();
            for (addr, value) in addrs.iter().zip(values) {
                shadow.insert(*addr, value);
            }
            Ok(())
        }
    }

    // ====================================================================
    // Bootstrap
    // ====================================================================

    /// Pulse the soft reset and forget the shadow.
    pub fn reset(&self) -> Result<()> {
        spi_write(
            self.pipe.as_ref(),
            SpiBus::Chip,
            &[(reg::SRST.addr, reg::SRST.mask()), (reg::SRST.addr, 0)],
        )?;
        self.shadow.lock().clear();
        Ok(())
    }

    /// Chip reset plus board-specific bootstrap: register-default overrides
    /// and all channels disabled.
    pub fn init(&self) -> Result<()> {
        self.reset()?;
        if !self.defaults.is_empty() {
            spi_write(self.pipe.as_ref(), SpiBus::Chip, &self.defaults)?;
            let mut shadow = self.shadow.lock();
            for (addr, value) in &self.defaults {
                shadow.insert(*addr, *value);
            }
        }
        for ch in 0..2 {
            self.enable_channel(Direction::Rx, ch, false)?;
            self.enable_channel(Direction::Tx, ch, false)?;
        }
        self.set_active_channel(0)?;
        log::debug!("[CHIP] init complete ({} default overrides)", self.defaults.len());
        Ok(())
    }

    // ====================================================================
    // Channel control
    // ====================================================================

    pub fn enable_channel(&self, dir: Direction, channel: usize, enabled: bool) -> Result<()> {
        self.set_active_channel(channel)?;
        let pd = match dir {
            Direction::Rx => reg::PD_RX_CH,
            Direction::Tx => reg::PD_TX_CH,
        };
        self.modify_field(pd, u16::from(!enabled))?;
        // DAC A stays powered; rates below 2.5 MHz misbehave without it.
        if dir == Direction::Tx {
            self.modify_field(reg::PD_TX_AFE, 0)?;
        }
        Ok(())
    }

    pub fn set_analog_path(&self, dir: Direction, channel: usize, path_index: usize) -> Result<()> {
        self.set_active_channel(channel)?;
        match dir {
            Direction::Rx => self.modify_field(reg::RX_PATH_SEL, path_index as u16),
            Direction::Tx => self.modify_field(reg::TX_BAND_SEL, path_index as u16),
        }
    }

    pub fn set_lpf_bandwidth(&self, dir: Direction, channel: usize, bandwidth_hz: f64) -> Result<()> {
        self.set_active_channel(channel)?;
        let code = (bandwidth_hz / 1e6).round().clamp(1.0, 255.0) as u16;
        match dir {
            Direction::Rx => self.modify_field(reg::RX_LPF_BW, code),
            Direction::Tx => self.modify_field(reg::TX_LPF_BW, code),
        }
    }

    pub fn set_gain(&self, dir: Direction, channel: usize, kind: GainKind, gain_db: f64) -> Result<()> {
        self.set_active_channel(channel)?;
        // Gain words count quarter-dB steps from the -12 dB floor.
        let code = ((gain_db + 12.0) * 4.0).round().max(0.0) as u16;
        let field = match (dir, kind) {
            (Direction::Rx, GainKind::Lna) => reg::RX_LNA_GAIN,
            (Direction::Rx, GainKind::Pga) => reg::RX_PGA_GAIN,
            (Direction::Rx, _) => reg::RX_GAIN,
            (Direction::Tx, GainKind::Pad) => reg::TX_PAD_GAIN,
            (Direction::Tx, _) => reg::TX_GAIN,
        };
        self.modify_field(field, code.min(field.mask() >> field.lsb))
    }

    /// Assert the per-channel calibration request strobe; the chip's
    /// embedded controller services it.
    pub fn request_calibration(&self, dir: Direction, channel: usize) -> Result<()> {
        self.set_active_channel(channel)?;
        let strobe = match dir {
            Direction::Rx => reg::CAL_RX_REQ,
            Direction::Tx => reg::CAL_TX_REQ,
        };
        self.modify_field(strobe, 1)?;
        self.modify_field(strobe, 0)?;
        log::info!("[CHIP] calibration requested: {} ch{}", dir, channel);
        Ok(())
    }

    // ====================================================================
    // Test signals
    // ====================================================================

    pub fn set_test_signal(&self, dir: Direction, channel: usize, signal: TestSignal) -> Result<()> {
        self.set_active_channel(channel)?;
        let (insel, tsgmode, tsgfcw, tsgfc) = match dir {
            Direction::Rx => (reg::INSEL_RX, reg::TSGMODE_RX, reg::TSGFCW_RX, reg::TSGFC_RX),
            Direction::Tx => (reg::INSEL_TX, reg::TSGMODE_TX, reg::TSGFCW_TX, reg::TSGFC_TX),
        };
        self.modify_field(insel, u16::from(signal != TestSignal::None))?;
        match signal {
            TestSignal::NcoDiv8 | TestSignal::NcoDiv8Full => self.modify_field(tsgfcw, 1)?,
            TestSignal::NcoDiv4 | TestSignal::NcoDiv4Full => self.modify_field(tsgfcw, 2)?,
            _ => {}
        }
        match signal {
            TestSignal::NcoDiv8 | TestSignal::NcoDiv4 => self.modify_field(tsgfc, 0)?,
            TestSignal::NcoDiv8Full | TestSignal::NcoDiv4Full => self.modify_field(tsgfc, 1)?,
            _ => {}
        }
        self.modify_field(tsgmode, u16::from(matches!(signal, TestSignal::Dc(_, _))))?;
        if let TestSignal::Dc(i, q) = signal {
            let (dc_i, dc_q) = match dir {
                Direction::Rx => (reg::RX_DC_I, reg::RX_DC_Q),
                Direction::Tx => (reg::TX_DC_I, reg::TX_DC_Q),
            };
            self.write_reg(dc_i.addr, i as u16)?;
            self.write_reg(dc_q.addr, q as u16)?;
        }
        Ok(())
    }

    /// Decode the generator selection from the TSP registers.
    pub fn get_test_signal(&self, dir: Direction, channel: usize) -> Result<TestSignal> {
        self.set_active_channel(channel)?;
        let (insel, tsgmode, tsgfcw, tsgfc, dc_i, dc_q) = match dir {
            Direction::Rx => (
                reg::INSEL_RX,
                reg::TSGMODE_RX,
                reg::TSGFCW_RX,
                reg::TSGFC_RX,
                reg::RX_DC_I,
                reg::RX_DC_Q,
            ),
            Direction::Tx => (
                reg::INSEL_TX,
                reg::TSGMODE_TX,
                reg::TSGFCW_TX,
                reg::TSGFC_TX,
                reg::TX_DC_I,
                reg::TX_DC_Q,
            ),
        };
        if self.get_field(insel)? == 0 {
            return Ok(TestSignal::None);
        }
        if self.get_field(tsgmode)? != 0 {
            let i = self.read_reg(dc_i.addr)? as i16;
            let q = self.read_reg(dc_q.addr)? as i16;
            return Ok(TestSignal::Dc(i, q));
        }
        let full = self.get_field(tsgfc)? != 0;
        match (self.get_field(tsgfcw)?, full) {
            (1, false) => Ok(TestSignal::NcoDiv8),
            (1, true) => Ok(TestSignal::NcoDiv8Full),
            (2, false) => Ok(TestSignal::NcoDiv4),
            (2, true) => Ok(TestSignal::NcoDiv4Full),
            _ => Ok(TestSignal::None),
        }
    }

    // ====================================================================
    // Synthesizers and clocks
    // ====================================================================

    /// Program the Rx or Tx LO to `frequency_hz`.
    pub fn set_lo_frequency(&self, dir: Direction, frequency_hz: f64) -> Result<()> {
        let reference = *self.reference_clock_hz.lock();
        let ratio = frequency_hz / reference;
        let int = ratio.floor();
        let frac = ((ratio - int) * SX_FRAC_SCALE).round() as u32;

        self.select_synth(dir)?;
        self.modify_field(reg::SX_INT, int as u16)?;
        self.modify_field(reg::SX_FRAC_HI, (frac >> 4) as u16)?;
        self.modify_field(reg::SX_FRAC_LO, (frac & 0xF) as u16)?;
        self.modify_field(reg::SX_EN, 1)?;
        log::debug!(
            "[CHIP] {} LO = {:.6} MHz (int {}, frac {})",
            dir,
            frequency_hz / 1e6,
            int,
            frac
        );
        Ok(())
    }

    pub fn get_lo_frequency(&self, dir: Direction) -> Result<f64> {
        let reference = *self.reference_clock_hz.lock();
        self.select_synth(dir)?;
        let int = f64::from(self.get_field(reg::SX_INT)?);
        let frac = (u32::from(self.get_field(reg::SX_FRAC_HI)?) << 4)
            | u32::from(self.get_field(reg::SX_FRAC_LO)?);
        Ok((int + f64::from(frac) / SX_FRAC_SCALE) * reference)
    }

    fn select_synth(&self, dir: Direction) -> Result<()> {
        let mac = match dir {
            Direction::Rx => 1,
            Direction::Tx => 2,
        };
        self.modify_field(reg::MAC, mac)
    }

    /// Program the decimation/interpolation chains on both channels.
    pub fn set_rate_chains(&self, decimation: u8, interpolation: u8) -> Result<()> {
        self.modify_field(reg::EN_ADCCLK, 0)?;
        self.modify_field(reg::CLKH_OV_CLKL, 2)?;
        for channel in [1u16, 2u16] {
            self.modify_field(reg::MAC, channel)?;
            self.modify_field(reg::HBD_OVR, u16::from(decimation))?;
            self.modify_field(reg::HBI_OVR, u16::from(interpolation))?;
        }
        self.modify_field(reg::MAC, 1)
    }

    /// Retune the CGEN PLL and announce the change on the event channel.
    pub fn set_cgen_frequency(&self, frequency_hz: f64) -> Result<()> {
        let reference = *self.reference_clock_hz.lock();
        let ratio = frequency_hz / reference;
        let int = ratio.floor();
        let frac = ((ratio - int) * CGEN_FRAC_SCALE).round().min(CGEN_FRAC_SCALE - 1.0) as u16;
        self.modify_field(reg::CGEN_INT, int as u16)?;
        self.modify_field(reg::CGEN_FRAC, frac)?;
        let _ = self.cgen_events.send(frequency_hz);
        log::debug!("[CHIP] CGEN = {:.3} MHz", frequency_hz / 1e6);
        Ok(())
    }

    pub fn get_cgen_frequency(&self) -> Result<f64> {
        let reference = *self.reference_clock_hz.lock();
        let int = f64::from(self.get_field(reg::CGEN_INT)?);
        let frac = f64::from(self.get_field(reg::CGEN_FRAC)?);
        Ok((int + frac / CGEN_FRAC_SCALE) * reference)
    }

    pub fn set_reference_clock(&self, frequency_hz: f64) -> Result<()> {
        if frequency_hz <= 0.0 {
            return Err(Error::InvalidArgument("reference clock must be positive".into()));
        }
        *self.reference_clock_hz.lock() = frequency_hz;
        Ok(())
    }

    #[must_use]
    pub fn reference_clock(&self) -> f64 {
        *self.reference_clock_hz.lock()
    }

    pub fn get_clock_freq(&self, clock: ClockId) -> Result<f64> {
        match clock {
            ClockId::Reference => Ok(self.reference_clock()),
            ClockId::RxLo => self.get_lo_frequency(Direction::Rx),
            ClockId::TxLo => self.get_lo_frequency(Direction::Tx),
            ClockId::Cgen => self.get_cgen_frequency(),
            ClockId::RxTsp | ClockId::TxTsp => Ok(self.get_cgen_frequency()? / 4.0),
        }
    }

    pub fn set_clock_freq(&self, clock: ClockId, frequency_hz: f64) -> Result<()> {
        match clock {
            ClockId::Reference => self.set_reference_clock(frequency_hz),
            ClockId::RxLo => self.set_lo_frequency(Direction::Rx, frequency_hz),
            ClockId::TxLo => self.set_lo_frequency(Direction::Tx, frequency_hz),
            ClockId::Cgen => self.set_cgen_frequency(frequency_hz),
            ClockId::RxTsp | ClockId::TxTsp => Err(Error::InvalidArgument(
                "TSP clocks are derived from CGEN".into(),
            )),
        }
    }

    // ====================================================================
    // Temperature
    // ====================================================================

    /// Chip revision word, for feature gating.
    pub fn revision(&self) -> Result<u16> {
        self.read_reg(reg::CHIP_REV.addr)
    }

    /// Die temperature in degrees Celsius.
    pub fn temperature(&self) -> Result<f64> {
        let raw = self.read_reg(reg::TEMP_RAW.addr)?;
        // Sensor slope: 1/8 degree per code, 32 degree offset.
        Ok(f64::from(raw) * 0.125 - 32.0)
    }

    // ====================================================================
    // Register dumps
    // ====================================================================

    /// Write the shadowed registers as plain `addr=value` text.
    pub fn save_config(&self, path: &str) -> Result<()> {
        let mut file = std::fs::File::create(path)?;
        let shadow = self.shadow.lock();
        for (addr, value) in shadow.iter() {
            writeln!(file, "0x{:04X}=0x{:04X}", addr, value)?;
        }
        log::info!("[CHIP] saved {} registers to {}", shadow.len(), path);
        Ok(())
    }

    /// Load a register dump and write every entry to the chip.
    pub fn load_config(&self, path: &str) -> Result<()> {
        let file = std::fs::File::open(path)?;
        let mut pairs = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let (addr, value) = trimmed.split_once('=').ok_or_else(|| {
                Error::InvalidArgument(format!("malformed register dump line: {}", trimmed))
            })?;
            let addr = parse_hex(addr.trim())?;
            let value = parse_hex(value.trim())?;
            pairs.push((addr, value));
        }
        spi_write(self.pipe.as_ref(), SpiBus::Chip, &pairs)?;
        let mut shadow = self.shadow.lock();
        for (addr, value) in &pairs {
            shadow.insert(*addr, *value);
        }
        log::info!("[CHIP] loaded {} registers from {}", pairs.len(), path);
        Ok(())
    }
}

fn parse_hex(text: &str) -> Result<u16> {
    let digits = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")).unwrap_or(text);
    u16::from_str_radix(digits, 16)
        .map_err(|_| Error::InvalidArgument(format!("bad register value: {}", text)))
}
