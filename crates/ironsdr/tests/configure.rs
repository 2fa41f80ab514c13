// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ironwave.io

//! Configuration-path integration tests against the virtual board.

use ironsdr::comms::mock::{MockControlPipe, MockRxPipe, MockTxPipe};
use ironsdr::comms::{BulkPipe, ControlPipe};
use ironsdr::device::registry::{self, ConnectionFactory, DeviceHandle};
use ironsdr::device::SdrDevice;
use ironsdr::{last_error_message, Direction, Error, LinkFormat};
use std::io::Write;
use std::sync::Arc;

/// Chip SPI register addresses the tests assert on.
const REG_SX_INT: u16 = 0x011C;
const REG_CHIP_REV: u16 = 0x002F;

fn open_device() -> (Arc<MockControlPipe>, SdrDevice) {
    let control = Arc::new(MockControlPipe::new());
    let rx = Arc::new(MockRxPipe::new(LinkFormat::I16, 1, 0));
    let tx = Arc::new(MockTxPipe::new());
    let device = SdrDevice::new(
        Arc::clone(&control) as Arc<dyn ControlPipe>,
        rx as Arc<dyn BulkPipe>,
        tx as Arc<dyn BulkPipe>,
    )
    .expect("device open should succeed");
    (control, device)
}

#[test]
fn test_descriptor_from_virtual_board() {
    let (_control, device) = open_device();
    let descriptor = device.descriptor();
    assert_eq!(descriptor.name, "IronSDR-USB");
    assert_eq!(descriptor.serial_number, 0x0009);
    assert_eq!(device.get_num_channels(), 2);
    assert_eq!(device.get_antenna_list(Direction::Rx).len(), 6);
}

#[test]
fn test_mimo_configure_two_ghz_twenty_msps() {
    let (_control, device) = open_device();

    device
        .enable_channel(Direction::Rx, 0, true)
        .expect("enable rx0 should succeed");
    device
        .enable_channel(Direction::Rx, 1, true)
        .expect("enable rx1 should succeed");
    device
        .set_lo_frequency(Direction::Rx, 0, 2.0e9)
        .expect("LO rx0 should succeed");
    device
        .set_lo_frequency(Direction::Rx, 1, 2.0e9)
        .expect("LO rx1 should succeed");
    device
        .set_antenna(Direction::Rx, 0, 1)
        .expect("antenna rx0 should succeed");
    device
        .set_antenna(Direction::Rx, 1, 1)
        .expect("antenna rx1 should succeed");
    device
        .set_sample_rate(20e6, 2)
        .expect("sample rate should succeed");

    let (host, rf) = device
        .get_sample_rate(Direction::Rx, 0)
        .expect("rate query should succeed");
    assert_eq!(host, 20e6);
    assert_eq!(rf, 40e6);
    assert_eq!(
        device
            .get_lo_frequency(Direction::Rx, 0)
            .expect("LO query should succeed"),
        2.0e9
    );
}

#[test]
fn test_configure_rejects_out_of_range_fields() {
    let (_control, device) = open_device();
    device
        .enable_channel(Direction::Rx, 0, true)
        .expect("enable should succeed");

    // Carrier beyond the chip range and an undersized LPF in one request:
    // both must be reported.
    let err = device
        .set_lo_frequency(Direction::Rx, 0, 9e9)
        .expect_err("out-of-range carrier must be rejected");
    match err {
        Error::InvalidConfiguration(messages) => {
            assert!(!messages.is_empty());
        }
        other => panic!("expected InvalidConfiguration, got {:?}", other),
    }
    // The stored state keeps the previous (valid) carrier.
    assert_eq!(
        device
            .get_lo_frequency(Direction::Rx, 0)
            .expect("LO query should succeed"),
        1e8
    );

    let err = device
        .set_lpf_bw(Direction::Rx, 0, 100e3)
        .expect_err("undersized LPF must be rejected");
    assert!(matches!(err, Error::InvalidConfiguration(_)));
}

#[test]
fn test_repeat_configure_issues_no_spi_writes() {
    let (control, device) = open_device();
    device
        .enable_channel(Direction::Rx, 0, true)
        .expect("enable should succeed");
    device
        .set_lo_frequency(Direction::Rx, 0, 868e6)
        .expect("LO should succeed");
    device
        .set_sample_rate(10e6, 4)
        .expect("sample rate should succeed");

    control.reset_counters();
    device
        .set_lo_frequency(Direction::Rx, 0, 868e6)
        .expect("repeat LO should succeed");
    device
        .set_sample_rate(10e6, 4)
        .expect("repeat sample rate should succeed");
    assert_eq!(
        control.write_packets(),
        0,
        "an unchanged configuration must not touch the bus"
    );
}

#[test]
fn test_mimo_lo_deferral_then_single_batch() {
    let (control, device) = open_device();
    device
        .enable_channel(Direction::Rx, 0, true)
        .expect("enable rx0 should succeed");
    device
        .enable_channel(Direction::Rx, 1, true)
        .expect("enable rx1 should succeed");

    control.reset_counters();
    // Carriers now differ across an enabled MIMO pair: no writes at all.
    device
        .set_lo_frequency(Direction::Rx, 0, 1.2e9)
        .expect("deferred set must report success");
    assert_eq!(control.write_packets(), 0, "deferred configure must be silent");

    // Matching the carriers releases exactly one batched apply.
    device
        .set_lo_frequency(Direction::Rx, 1, 1.2e9)
        .expect("matching set should succeed");
    assert_eq!(
        control.writes_to(REG_SX_INT),
        1,
        "one LO programming burst expected"
    );
}

#[test]
fn test_gain_round_trips() {
    let (_control, device) = open_device();
    device
        .enable_channel(Direction::Rx, 0, true)
        .expect("enable rx should succeed");
    device
        .enable_channel(Direction::Tx, 0, true)
        .expect("enable tx should succeed");

    // Normalized scale: Rx span [-12, 61].
    for g in [0.0, 0.25, 0.5, 1.0] {
        device
            .set_normalized_gain(Direction::Rx, 0, g)
            .expect("gain set should succeed");
        let back = device
            .get_normalized_gain(Direction::Rx, 0)
            .expect("gain get should succeed");
        assert!((back - g).abs() <= 1.0 / 73.0, "g={} back={}", g, back);
    }

    // dB scale: Tx span [-12, 64], stored as dB above the floor.
    device
        .set_gain_db(Direction::Tx, 0, 40)
        .expect("dB gain set should succeed");
    assert_eq!(
        device
            .get_gain_db(Direction::Tx, 0)
            .expect("dB gain get should succeed"),
        40
    );
    let norm = device
        .get_normalized_gain(Direction::Tx, 0)
        .expect("normalized get should succeed");
    assert!((norm - (40.0 - 12.0 + 12.0) / 76.0).abs() < 1e-9);

    // Out-of-range normalized input clamps.
    device
        .set_normalized_gain(Direction::Rx, 0, 1.7)
        .expect("clamped gain set should succeed");
    assert!(
        (device
            .get_normalized_gain(Direction::Rx, 0)
            .expect("gain get should succeed")
            - 1.0)
            .abs()
            < 1e-9
    );
}

#[test]
fn test_lpf_disable_restores_on_enable() {
    let (_control, device) = open_device();
    device
        .enable_channel(Direction::Rx, 0, true)
        .expect("enable should succeed");
    device
        .set_lpf_bw(Direction::Rx, 0, 8e6)
        .expect("LPF set should succeed");

    device
        .set_lpf_enabled(Direction::Rx, 0, false)
        .expect("LPF disable should succeed");
    assert_eq!(
        device
            .get_lpf_bw(Direction::Rx, 0)
            .expect("LPF get should succeed"),
        130e6
    );

    device
        .set_lpf_enabled(Direction::Rx, 0, true)
        .expect("LPF enable should succeed");
    assert_eq!(
        device
            .get_lpf_bw(Direction::Rx, 0)
            .expect("LPF get should succeed"),
        8e6
    );
}

#[test]
fn test_calibrate_flag_is_one_shot() {
    let (control, device) = open_device();
    device
        .enable_channel(Direction::Rx, 0, true)
        .expect("enable should succeed");

    control.reset_counters();
    device
        .calibrate(Direction::Rx, 0, 0.0)
        .expect("calibrate should succeed");
    let first = control.writes_to(0x0121);
    assert!(first >= 2, "calibration strobe must pulse");

    // The flag was cleared in the stored copy: nothing re-fires.
    control.reset_counters();
    device
        .set_lo_frequency(Direction::Rx, 0, 9e8)
        .expect("follow-up configure should succeed");
    assert_eq!(control.writes_to(0x0121), 0);
}

#[test]
fn test_temperature_refused_on_old_revision() {
    let (control, device) = open_device();

    let temp = device
        .get_chip_temperature()
        .expect("temperature should read on current silicon");
    assert!((temp - 27.0).abs() < 0.5, "temp={}", temp);

    control.set_chip_reg(REG_CHIP_REV, 0x3840);
    let err = device
        .get_chip_temperature()
        .expect_err("old revision must refuse");
    assert!(matches!(err, Error::NotSupported(_)));
    assert_eq!(
        last_error_message(),
        "Feature is not available on this chip revision."
    );
}

#[test]
fn test_test_signal_readback_from_registers() {
    let (_control, device) = open_device();
    device
        .enable_channel(Direction::Rx, 0, true)
        .expect("enable should succeed");

    device
        .set_test_signal(Direction::Rx, 0, ironsdr::TestSignal::NcoDiv8)
        .expect("test signal set should succeed");
    assert_eq!(
        device
            .get_test_signal(Direction::Rx, 0)
            .expect("readback should succeed"),
        ironsdr::TestSignal::NcoDiv8
    );

    device
        .set_test_signal(Direction::Rx, 0, ironsdr::TestSignal::Dc(100, -100))
        .expect("DC test signal set should succeed");
    assert_eq!(
        device
            .get_test_signal(Direction::Rx, 0)
            .expect("readback should succeed"),
        ironsdr::TestSignal::Dc(100, -100)
    );

    device
        .set_test_signal(Direction::Rx, 0, ironsdr::TestSignal::None)
        .expect("test signal clear should succeed");
    assert_eq!(
        device
            .get_test_signal(Direction::Rx, 0)
            .expect("readback should succeed"),
        ironsdr::TestSignal::None
    );
}

#[test]
fn test_gpio_and_custom_params() {
    let (_control, device) = open_device();

    device
        .gpio_dir_write(&[0xFF, 0x0F])
        .expect("gpio dir write should succeed");
    device
        .gpio_write(&[0xA5, 0x03])
        .expect("gpio write should succeed");
    let mut dir = [0u8; 2];
    let mut pins = [0u8; 2];
    device.gpio_dir_read(&mut dir).expect("gpio dir read should succeed");
    device.gpio_read(&mut pins).expect("gpio read should succeed");
    assert_eq!(dir, [0xFF, 0x0F]);
    assert_eq!(pins, [0xA5, 0x03]);

    // VCTCXO trim DAC: volatile knob plus persistent EEPROM word.
    device
        .write_custom_board_param(0, 33000.0, "")
        .expect("DAC write should succeed");
    let (value, _units) = device
        .read_custom_board_param(0)
        .expect("DAC read should succeed");
    assert_eq!(value, 33000.0);

    let err = device
        .write_custom_board_param(1, 1.0, "C")
        .expect_err("temperature knob is read only");
    assert!(matches!(err, Error::InvalidArgument(_)));

    device.write_vctcxo_trim(0xBEEF).expect("trim write should succeed");
    assert_eq!(
        device.read_vctcxo_trim().expect("trim read should succeed"),
        0xBEEF
    );
}

#[test]
fn test_save_and_load_register_dump() {
    let (control, device) = open_device();
    device
        .enable_channel(Direction::Rx, 0, true)
        .expect("enable should succeed");

    let dir = tempfile::tempdir().expect("tempdir should create");
    let path = dir.path().join("ax7201.ini");
    let path = path.to_str().expect("utf-8 path");

    device.save_config(path).expect("save should succeed");
    let text = std::fs::read_to_string(path).expect("dump should be readable");
    assert!(text.lines().any(|l| l.starts_with("0x")));

    // Hand-edit one register and load it back.
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(path)
        .expect("dump should append");
    writeln!(file, "0x0115=0x00AA").expect("append should succeed");
    drop(file);

    device.load_config(path).expect("load should succeed");
    assert_eq!(control.chip_reg(0x0115), 0x00AA);
}

#[test]
fn test_upload_memory_reports_progress() {
    let (_control, device) = open_device();
    let image = vec![0x42u8; 100];
    let mut reports = Vec::new();
    let mut cb = |sent: usize, total: usize| reports.push((sent, total));
    device
        .upload_memory(
            ironsdr::comms::protocol::MemoryTarget::FpgaFlash,
            &image,
            Some(&mut cb),
        )
        .expect("upload should succeed");
    assert_eq!(reports.last(), Some(&(100, 100)));
}

#[test]
fn test_synchronize_flushes_shadow() {
    let (control, device) = open_device();
    device
        .enable_channel(Direction::Rx, 0, true)
        .expect("enable should succeed");

    control.reset_counters();
    device.synchronize(true).expect("sync to chip should succeed");
    assert!(control.write_packets() > 0);

    control.reset_counters();
    device.synchronize(false).expect("sync from chip should succeed");
    assert_eq!(control.write_packets(), 0);
}

// ============================================================================
// Enumeration
// ============================================================================

struct MockFactory;

impl ConnectionFactory for MockFactory {
    fn media(&self) -> &'static str {
        "mock"
    }

    fn enumerate(&self) -> Vec<DeviceHandle> {
        vec![DeviceHandle {
            media: "mock".to_string(),
            name: "IronSDR-USB".to_string(),
            serial: "0000000000000009".to_string(),
            addr: "0.0".to_string(),
        }]
    }

    fn open(&self, _handle: &DeviceHandle) -> ironsdr::Result<SdrDevice> {
        let control = Arc::new(MockControlPipe::new());
        let rx = Arc::new(MockRxPipe::new(LinkFormat::I16, 1, 0));
        let tx = Arc::new(MockTxPipe::new());
        SdrDevice::new(
            control as Arc<dyn ControlPipe>,
            rx as Arc<dyn BulkPipe>,
            tx as Arc<dyn BulkPipe>,
        )
    }
}

#[test]
fn test_enumerate_and_open() {
    registry::register_factory(Box::new(MockFactory));
    let handles = registry::get_device_list();
    let handle = handles
        .iter()
        .find(|h| h.contains("media=mock"))
        .expect("mock factory should enumerate");
    assert!(handle.starts_with("ironsdr:"));

    let device = registry::open(handle).expect("open should succeed");
    assert_eq!(device.descriptor().name, "IronSDR-USB");
    assert!(registry::open("ironsdr:media=missing,name=X,serial=0,addr=0").is_err());
}
