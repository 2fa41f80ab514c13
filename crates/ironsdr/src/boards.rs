// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ironwave.io

//! Static board descriptor tables.
//!
//! Everything the core reads about a board lives here as data: capability
//! ranges, analog path names, custom parameters, memory regions and the
//! chip register defaults applied during init.

use crate::comms::protocol::FirmwareInfo;
use crate::soc::descriptor::{CustomParameter, DeviceDescriptor, MemoryRegion, Range, RfSocDescriptor};
use crate::soc::fpga::GatewareInfo;

/// Custom parameter id of the volatile VCTCXO trim DAC.
pub const PARAM_VCTCXO_DAC: u8 = 0;
/// Custom parameter id of the board temperature sensor.
pub const PARAM_TEMPERATURE: u8 = 1;

/// EEPROM region holding the persistent VCTCXO trim word.
pub const VCTCXO_DAC_REGION: MemoryRegion = MemoryRegion { address: 16, size: 2 };

static RX_PATHS: &[&str] = &["None", "LNAH", "LNAL", "LNAW", "LB1", "LB2"];
static TX_PATHS: &[&str] = &["None", "Band1", "Band2"];

static RX_ANTENNA: &[(&str, Range)] = &[
    ("LNAH", Range::new(2e9, 2.6e9)),
    ("LNAL", Range::new(700e6, 900e6)),
    ("LNAW", Range::new(700e6, 2.6e9)),
    ("LB1", Range::new(700e6, 900e6)),
    ("LB2", Range::new(700e6, 2.6e9)),
];
static TX_ANTENNA: &[(&str, Range)] = &[
    ("Band1", Range::new(30e6, 1.9e9)),
    ("Band2", Range::new(2e9, 2.6e9)),
];

/// AX7201 register defaults the IronSDR-USB gateware expects, written
/// during init before anything else touches the chip.
pub static AX7201_DEFAULT_OVERRIDES: &[(u16, u16)] = &[
    (0x0022, 0x0FFF),
    (0x0023, 0x5550),
    (0x002B, 0x0038),
    (0x002D, 0x0641),
    (0x0082, 0x8001),
    (0x0086, 0x4101),
    (0x0089, 0x1078),
    (0x008B, 0x218C),
    (0x0101, 0x7800),
    (0x0103, 0x0A12),
    (0x0105, 0x0011),
    (0x0108, 0x218C),
    (0x010D, 0x011A),
    (0x0115, 0x0009),
    (0x0119, 0x529B),
    (0x011C, 0x8941),
    (0x0200, 0x0081),
    (0x0208, 0x017B),
    (0x0400, 0x0081),
    (0x040B, 0x1020),
    (0x040C, 0x00FB),
];

/// RF capabilities of the AX7201 as wired on the IronSDR-USB.
#[must_use]
pub fn ironsdr_usb_soc() -> RfSocDescriptor {
    RfSocDescriptor {
        name: "AX7201",
        channel_count: 2,
        path_names: [RX_PATHS, TX_PATHS],
        sampling_rate_range: Range::new(100e3, 61.44e6),
        frequency_range: Range::new(100e3, 3.8e9),
        lpf_range: [Range::new(1.4001e6, 130e6), Range::new(5e6, 130e6)],
        antenna_range: [RX_ANTENNA, TX_ANTENNA],
        gain_range: [Range::new(-12.0, 61.0), Range::new(-12.0, 64.0)],
    }
}

/// Board name per the device id reported by `GET_INFO`.
#[must_use]
pub fn device_name(device_id: u8) -> &'static str {
    match device_id {
        1 => "IronSDR-USB",
        2 => "IronSDR-Mini",
        3 => "IronSDR-PCIe",
        _ => "Unknown",
    }
}

/// Assemble the read-only descriptor from the firmware and gateware info.
#[must_use]
pub fn build_descriptor(info: &FirmwareInfo, gateware: &GatewareInfo) -> DeviceDescriptor {
    DeviceDescriptor {
        name: device_name(info.device_id).to_string(),
        expansion_name: "None".to_string(),
        firmware_version: info.firmware.to_string(),
        hardware_version: gateware.hardware_version.to_string(),
        protocol_version: info.protocol.to_string(),
        gateware_version: gateware.version.to_string(),
        gateware_revision: gateware.revision.to_string(),
        gateware_target_board: device_name(gateware.board_id as u8).to_string(),
        serial_number: info.serial_number,
        rf_socs: vec![ironsdr_usb_soc()],
        custom_parameters: vec![
            CustomParameter {
                name: "VCTCXO DAC (volatile)",
                id: PARAM_VCTCXO_DAC,
                min: 0.0,
                max: 65535.0,
                read_only: false,
            },
            CustomParameter {
                name: "Board Temperature",
                id: PARAM_TEMPERATURE,
                min: 0.0,
                max: 65535.0,
                read_only: true,
            },
        ],
        vctcxo_dac_region: Some(VCTCXO_DAC_REGION),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::Direction;

    #[test]
    fn test_soc_tables_consistent() {
        let soc = ironsdr_usb_soc();
        assert_eq!(soc.channel_count, 2);
        assert_eq!(soc.path_names(Direction::Rx).len(), 6);
        assert_eq!(soc.path_names(Direction::Tx).len(), 3);
        // Every antenna entry names a real path.
        for dir in [Direction::Rx, Direction::Tx] {
            for (name, range) in soc.antenna_range[dir.idx()] {
                assert!(soc.path_names(dir).contains(name), "orphan antenna {}", name);
                assert!(range.min < range.max);
            }
        }
        assert_eq!(soc.gain_range(Direction::Rx).max, 61.0);
        assert_eq!(soc.gain_range(Direction::Tx).max, 64.0);
    }
}
