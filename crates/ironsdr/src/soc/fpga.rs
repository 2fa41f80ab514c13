// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ironwave.io

//! FPGA register file driver.
//!
//! The gateware exposes identification, stream control and interface-clock
//! registers over the board's second SPI bus. Addresses:
//!
//! ```text
//! 0x0000  board id            0x0007  stream control (bit0 rx, bit1 tx)
//! 0x0001  gateware version    0x0008  link format (0 = I12, 2 = I16)
//! 0x0002  gateware revision   0x0009  channel enable bitmap
//! 0x0003  hardware revision   0x000A  timestamp sync pulse (bit0)
//! 0x0020  interface clock, kHz, low word
//! 0x0021  interface clock, kHz, high word
//! 0x0022  interface control: decimation [2:0], interpolation [6:4]
//! ```

use crate::comms::protocol::{spi_read, spi_write, SpiBus};
use crate::comms::ControlPipe;
use crate::error::Result;
use crate::stream::LinkFormat;
use std::sync::Arc;

pub const REG_BOARD_ID: u16 = 0x0000;
pub const REG_GW_VERSION: u16 = 0x0001;
pub const REG_GW_REVISION: u16 = 0x0002;
pub const REG_HW_VERSION: u16 = 0x0003;
pub const REG_STREAM_CTRL: u16 = 0x0007;
pub const REG_STREAM_FORMAT: u16 = 0x0008;
pub const REG_CHANNEL_EN: u16 = 0x0009;
pub const REG_TS_SYNC: u16 = 0x000A;
pub const REG_IFACE_FREQ_LO: u16 = 0x0020;
pub const REG_IFACE_FREQ_HI: u16 = 0x0021;
pub const REG_IFACE_CTRL: u16 = 0x0022;

/// Gateware identification words.
#[derive(Debug, Clone, Copy, Default)]
pub struct GatewareInfo {
    pub board_id: u16,
    pub version: u16,
    pub revision: u16,
    pub hardware_version: u16,
}

/// Driver for the FPGA register file behind the control pipe.
pub struct Fpga {
    pipe: Arc<dyn ControlPipe>,
}

impl Fpga {
    #[must_use]
    pub fn new(pipe: Arc<dyn ControlPipe>) -> Self {
        Self { pipe }
    }

    pub fn write_reg(&self, addr: u16, value: u16) -> Result<()> {
        spi_write(self.pipe.as_ref(), SpiBus::Fpga, &[(addr, value)])
    }

    pub fn read_reg(&self, addr: u16) -> Result<u16> {
        Ok(spi_read(self.pipe.as_ref(), SpiBus::Fpga, &[addr])?[0])
    }

    pub fn gateware_info(&self) -> Result<GatewareInfo> {
        let values = spi_read(
            self.pipe.as_ref(),
            SpiBus::Fpga,
            &[REG_BOARD_ID, REG_GW_VERSION, REG_GW_REVISION, REG_HW_VERSION],
        )?;
        Ok(GatewareInfo {
            board_id: values[0],
            version: values[1],
            revision: values[2],
            hardware_version: values[3] & 0x7F,
        })
    }

    /// Program the link format and the enabled-channel bitmap before a
    /// stream starts.
    pub fn configure_stream(&self, link: LinkFormat, channel_mask: u16) -> Result<()> {
        let format = match link {
            LinkFormat::I12 => 0,
            LinkFormat::I16 => 2,
        };
        spi_write(
            self.pipe.as_ref(),
            SpiBus::Fpga,
            &[(REG_STREAM_FORMAT, format), (REG_CHANNEL_EN, channel_mask)],
        )
    }

    /// Zero the hardware sample counters of both directions.
    ///
    /// The sync bit self-clears in gateware; it is pulsed explicitly so the
    /// register file reads back consistent on older revisions.
    pub fn reset_timestamp(&self) -> Result<()> {
        spi_write(
            self.pipe.as_ref(),
            SpiBus::Fpga,
            &[(REG_TS_SYNC, 1), (REG_TS_SYNC, 0)],
        )
    }

    pub fn start_streaming(&self, rx: bool, tx: bool) -> Result<()> {
        let mut ctrl = 0u16;
        if rx {
            ctrl |= 1;
        }
        if tx {
            ctrl |= 2;
        }
        self.write_reg(REG_STREAM_CTRL, ctrl)
    }

    pub fn stop_streaming(&self) -> Result<()> {
        self.write_reg(REG_STREAM_CTRL, 0)
    }

    /// Retune the interface PLL to follow a CGEN change.
    pub fn set_interface_frequency(&self, cgen_hz: f64, decimation: u8, interpolation: u8) -> Result<()> {
        let khz = (cgen_hz / 1e3).round() as u32;
        let ctrl = u16::from(decimation & 0x7) | (u16::from(interpolation & 0x7) << 4);
        log::debug!(
            "[FPGA] interface clock {} kHz, decim {}, interp {}",
            khz,
            decimation,
            interpolation
        );
        spi_write(
            self.pipe.as_ref(),
            SpiBus::Fpga,
            &[
                (REG_IFACE_FREQ_LO, khz as u16),
                (REG_IFACE_FREQ_HI, (khz >> 16) as u16),
                (REG_IFACE_CTRL, ctrl),
            ],
        )
    }
}
