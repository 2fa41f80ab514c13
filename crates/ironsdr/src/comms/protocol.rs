// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ironwave.io

//! Control packet protocol.
//!
//! Every control exchange is one 64-byte packet each way:
//!
//! ```text
//! +-----+--------+------------+----------+-------------+------------------+
//! | cmd | status | blockCount | periphID | reserved[4] | payload[56]      |
//! +-----+--------+------------+----------+-------------+------------------+
//! ```
//!
//! Register writes carry `(addr16 BE, value16 BE)` pairs in the payload;
//! register reads send only addresses and get back `(addr16, value16)`
//! pairs. Multi-operation bursts are batched 14 blocks per packet, split on
//! direction changes, exactly as the gateware expects.

use crate::comms::ControlPipe;
use crate::config::{CONTROL_PACKET_SIZE, CONTROL_PAYLOAD_SIZE, CONTROL_RETRIES, CONTROL_TIMEOUT};
use crate::error::{Error, Result};

// =======================================================================
// Commands and status codes
// =======================================================================

/// Command bytes understood by the board MCU.
pub mod cmd {
    pub const GET_INFO: u8 = 0x00;
    pub const DEVICE_RESET: u8 = 0x20;
    pub const CHIP_SPI_WR: u8 = 0x21;
    pub const CHIP_SPI_RD: u8 = 0x22;
    pub const STREAM_FIFO_RST: u8 = 0x40;
    pub const FPGA_SPI_WR: u8 = 0x55;
    pub const FPGA_SPI_RD: u8 = 0x56;
    pub const GPIO_DIR_RD: u8 = 0x0B;
    pub const GPIO_DIR_WR: u8 = 0x0C;
    pub const GPIO_RD: u8 = 0x0D;
    pub const GPIO_WR: u8 = 0x0E;
    pub const ANALOG_VAL_RD: u8 = 0x18;
    pub const ANALOG_VAL_WR: u8 = 0x19;
    pub const MEMORY_WR: u8 = 0x8C;
    pub const MEMORY_RD: u8 = 0x8D;
}

/// Reply status bytes.
pub mod status {
    pub const UNDEFINED: u8 = 0x00;
    pub const COMPLETED: u8 = 0x01;
    pub const UNKNOWN_CMD: u8 = 0x02;
    pub const BUSY: u8 = 0x03;
    pub const TOO_MANY_BLOCKS: u8 = 0x04;
    pub const NOT_SUPPORTED: u8 = 0x05;
}

/// Register/value blocks per SPI packet: 4 payload bytes per block.
pub const MAX_SPI_BLOCKS: usize = CONTROL_PAYLOAD_SIZE / 4; // = 14

/// Data bytes per memory access packet; data sits at payload offset 24.
pub const MEMORY_CHUNK: usize = 32;
const MEMORY_DATA_OFFSET: usize = 24;

/// SPI destination behind the control MCU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpiBus {
    /// The AX7201 transceiver.
    Chip,
    /// The FPGA register file.
    Fpga,
}

impl SpiBus {
    fn write_cmd(self) -> u8 {
        match self {
            SpiBus::Chip => cmd::CHIP_SPI_WR,
            SpiBus::Fpga => cmd::FPGA_SPI_WR,
        }
    }

    fn read_cmd(self) -> u8 {
        match self {
            SpiBus::Chip => cmd::CHIP_SPI_RD,
            SpiBus::Fpga => cmd::FPGA_SPI_RD,
        }
    }
}

/// Memory device targeted by `MEMORY_WR`/`MEMORY_RD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryTarget {
    FpgaRam = 1,
    FpgaFlash = 2,
    Eeprom = 3,
}

// =======================================================================
// Packet codec
// =======================================================================

/// One 64-byte control packet.
#[derive(Debug, Clone)]
pub struct ControlPacket {
    pub cmd: u8,
    pub status: u8,
    pub block_count: u8,
    pub periph_id: u8,
    pub payload: [u8; CONTROL_PAYLOAD_SIZE],
}

impl ControlPacket {
    #[must_use]
    pub fn new(cmd: u8) -> Self {
        Self {
            cmd,
            status: status::UNDEFINED,
            block_count: 0,
            periph_id: 0,
            payload: [0; CONTROL_PAYLOAD_SIZE],
        }
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; CONTROL_PACKET_SIZE] {
        let mut out = [0u8; CONTROL_PACKET_SIZE];
        out[0] = self.cmd;
        out[1] = self.status;
        out[2] = self.block_count;
        out[3] = self.periph_id;
        out[8..].copy_from_slice(&self.payload);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != CONTROL_PACKET_SIZE {
            return Err(Error::Transport(format!(
                "short control packet: {} bytes",
                bytes.len()
            )));
        }
        let mut payload = [0u8; CONTROL_PAYLOAD_SIZE];
        payload.copy_from_slice(&bytes[8..]);
        Ok(Self {
            cmd: bytes[0],
            status: bytes[1],
            block_count: bytes[2],
            periph_id: bytes[3],
            payload,
        })
    }
}

/// Run one request/reply exchange, retrying transient transport failures.
fn transact(pipe: &dyn ControlPipe, pkt: &ControlPacket) -> Result<ControlPacket> {
    let request = pkt.to_bytes();
    let mut last_err = Error::Transport("control transfer never attempted".into());
    for attempt in 0..CONTROL_RETRIES {
        match pipe.write_read(&request, CONTROL_TIMEOUT) {
            Ok(reply_bytes) => {
                let reply = ControlPacket::from_bytes(&reply_bytes)?;
                if reply.status != status::COMPLETED {
                    return Err(Error::Transport(format!(
                        "command 0x{:02X} rejected with status 0x{:02X}",
                        pkt.cmd, reply.status
                    )));
                }
                return Ok(reply);
            }
            Err(e) => {
                log::debug!(
                    "[CTRL] cmd 0x{:02X} attempt {} failed: {}",
                    pkt.cmd,
                    attempt + 1,
                    e
                );
                last_err = e;
            }
        }
    }
    Err(last_err)
}

// =======================================================================
// SPI register access
// =======================================================================

/// Write `(addr, value)` pairs to a SPI bus, batched 14 blocks per packet.
pub fn spi_write(pipe: &dyn ControlPipe, bus: SpiBus, pairs: &[(u16, u16)]) -> Result<()> {
    for chunk in pairs.chunks(MAX_SPI_BLOCKS) {
        let mut pkt = ControlPacket::new(bus.write_cmd());
        pkt.block_count = chunk.len() as u8;
        for (i, (addr, value)) in chunk.iter().enumerate() {
            let off = i * 4;
            // Write flag lives in the address MSB on the wire.
            pkt.payload[off] = (addr >> 8) as u8 | 0x80;
            pkt.payload[off + 1] = *addr as u8;
            pkt.payload[off + 2] = (value >> 8) as u8;
            pkt.payload[off + 3] = *value as u8;
        }
        transact(pipe, &pkt)?;
    }
    Ok(())
}

/// Read registers from a SPI bus. Returns one value per requested address.
pub fn spi_read(pipe: &dyn ControlPipe, bus: SpiBus, addrs: &[u16]) -> Result<Vec<u16>> {
    let mut values = Vec::with_capacity(addrs.len());
    for chunk in addrs.chunks(MAX_SPI_BLOCKS) {
        let mut pkt = ControlPacket::new(bus.read_cmd());
        pkt.block_count = chunk.len() as u8;
        for (i, addr) in chunk.iter().enumerate() {
            let off = i * 2;
            pkt.payload[off] = (addr >> 8) as u8;
            pkt.payload[off + 1] = *addr as u8;
        }
        let reply = transact(pipe, &pkt)?;
        if usize::from(reply.block_count) < chunk.len() {
            return Err(Error::Transport("SPI read reply truncated".into()));
        }
        for i in 0..chunk.len() {
            let off = i * 4;
            values.push(u16::from_be_bytes([
                reply.payload[off + 2],
                reply.payload[off + 3],
            ]));
        }
    }
    Ok(values)
}

// =======================================================================
// GPIO (byte-addressed bitmap)
// =======================================================================

pub fn gpio_read(pipe: &dyn ControlPipe, buf: &mut [u8]) -> Result<()> {
    gpio_fetch(pipe, cmd::GPIO_RD, buf)
}

pub fn gpio_dir_read(pipe: &dyn ControlPipe, buf: &mut [u8]) -> Result<()> {
    gpio_fetch(pipe, cmd::GPIO_DIR_RD, buf)
}

pub fn gpio_write(pipe: &dyn ControlPipe, buf: &[u8]) -> Result<()> {
    gpio_store(pipe, cmd::GPIO_WR, buf)
}

pub fn gpio_dir_write(pipe: &dyn ControlPipe, buf: &[u8]) -> Result<()> {
    gpio_store(pipe, cmd::GPIO_DIR_WR, buf)
}

fn gpio_fetch(pipe: &dyn ControlPipe, command: u8, buf: &mut [u8]) -> Result<()> {
    if buf.is_empty() || buf.len() > CONTROL_PAYLOAD_SIZE {
        return Err(Error::InvalidArgument("GPIO buffer length".into()));
    }
    let mut pkt = ControlPacket::new(command);
    pkt.block_count = buf.len() as u8;
    let reply = transact(pipe, &pkt)?;
    buf.copy_from_slice(&reply.payload[..buf.len()]);
    Ok(())
}

fn gpio_store(pipe: &dyn ControlPipe, command: u8, buf: &[u8]) -> Result<()> {
    if buf.is_empty() || buf.len() > CONTROL_PAYLOAD_SIZE {
        return Err(Error::InvalidArgument("GPIO buffer length".into()));
    }
    let mut pkt = ControlPacket::new(command);
    pkt.block_count = buf.len() as u8;
    pkt.payload[..buf.len()].copy_from_slice(buf);
    transact(pipe, &pkt).map(|_| ())
}

// =======================================================================
// Custom board parameters
// =======================================================================

/// One named analog knob on the board (DAC value, temperature, ...).
///
/// Wire block, 8 bytes: `{id, unitCode, powerOfTen, reserved, raw i32 BE}`
/// with `value = raw * 10^powerOfTen`.
#[derive(Debug, Clone)]
pub struct CustomParameterIo {
    pub id: u8,
    pub value: f64,
    pub units: String,
}

const PARAM_BLOCK: usize = 8;

pub fn custom_param_write(pipe: &dyn ControlPipe, params: &[CustomParameterIo]) -> Result<()> {
    for chunk in params.chunks(CONTROL_PAYLOAD_SIZE / PARAM_BLOCK) {
        let mut pkt = ControlPacket::new(cmd::ANALOG_VAL_WR);
        pkt.block_count = chunk.len() as u8;
        for (i, p) in chunk.iter().enumerate() {
            let off = i * PARAM_BLOCK;
            let raw = p.value.round() as i32;
            pkt.payload[off] = p.id;
            pkt.payload[off + 4..off + 8].copy_from_slice(&raw.to_be_bytes());
        }
        transact(pipe, &pkt)?;
    }
    Ok(())
}

/// Read parameters in place: `id` selects, `value`/`units` are filled in.
pub fn custom_param_read(pipe: &dyn ControlPipe, params: &mut [CustomParameterIo]) -> Result<()> {
    for chunk in params.chunks_mut(CONTROL_PAYLOAD_SIZE / PARAM_BLOCK) {
        let mut pkt = ControlPacket::new(cmd::ANALOG_VAL_RD);
        pkt.block_count = chunk.len() as u8;
        for (i, p) in chunk.iter().enumerate() {
            pkt.payload[i * PARAM_BLOCK] = p.id;
        }
        let reply = transact(pipe, &pkt)?;
        for (i, p) in chunk.iter_mut().enumerate() {
            let off = i * PARAM_BLOCK;
            let power = reply.payload[off + 2] as i8;
            let raw = i32::from_be_bytes([
                reply.payload[off + 4],
                reply.payload[off + 5],
                reply.payload[off + 6],
                reply.payload[off + 7],
            ]);
            p.value = f64::from(raw) * 10f64.powi(i32::from(power));
            p.units = unit_name(reply.payload[off + 1]).to_string();
        }
    }
    Ok(())
}

fn unit_name(code: u8) -> &'static str {
    match code {
        1 => "V",
        2 => "A",
        3 => "dB",
        4 => "C",
        _ => "",
    }
}

// =======================================================================
// Memory access (EEPROM, FPGA flash/RAM)
// =======================================================================

fn memory_packet(command: u8, target: MemoryTarget, address: u32, len: usize) -> ControlPacket {
    let mut pkt = ControlPacket::new(command);
    pkt.block_count = len as u8;
    pkt.payload[0] = target as u8;
    pkt.payload[1..5].copy_from_slice(&address.to_be_bytes());
    pkt.payload[5..7].copy_from_slice(&(len as u16).to_be_bytes());
    pkt
}

/// Write a region of a memory device, chunked.
pub fn memory_write(
    pipe: &dyn ControlPipe,
    target: MemoryTarget,
    address: u32,
    data: &[u8],
) -> Result<()> {
    let mut written = 0usize;
    for chunk in data.chunks(MEMORY_CHUNK) {
        let mut pkt = memory_packet(cmd::MEMORY_WR, target, address + written as u32, chunk.len());
        pkt.payload[MEMORY_DATA_OFFSET..MEMORY_DATA_OFFSET + chunk.len()].copy_from_slice(chunk);
        transact(pipe, &pkt)?;
        written += chunk.len();
    }
    Ok(())
}

/// Read a region of a memory device, chunked.
pub fn memory_read(
    pipe: &dyn ControlPipe,
    target: MemoryTarget,
    address: u32,
    data: &mut [u8],
) -> Result<()> {
    let mut read = 0usize;
    let total = data.len();
    while read < total {
        let len = (total - read).min(MEMORY_CHUNK);
        let pkt = memory_packet(cmd::MEMORY_RD, target, address + read as u32, len);
        let reply = transact(pipe, &pkt)?;
        data[read..read + len]
            .copy_from_slice(&reply.payload[MEMORY_DATA_OFFSET..MEMORY_DATA_OFFSET + len]);
        read += len;
    }
    Ok(())
}

/// Progress callback for long uploads: `(bytes_sent, bytes_total)`.
pub type UploadCallback<'a> = &'a mut dyn FnMut(usize, usize);

/// Stream a program image into FPGA RAM or flash, reporting progress.
pub fn program_write(
    pipe: &dyn ControlPipe,
    target: MemoryTarget,
    data: &[u8],
    mut callback: Option<UploadCallback<'_>>,
) -> Result<()> {
    let total = data.len();
    let mut sent = 0usize;
    for chunk in data.chunks(MEMORY_CHUNK) {
        let mut pkt = memory_packet(cmd::MEMORY_WR, target, sent as u32, chunk.len());
        pkt.payload[MEMORY_DATA_OFFSET..MEMORY_DATA_OFFSET + chunk.len()].copy_from_slice(chunk);
        transact(pipe, &pkt)?;
        sent += chunk.len();
        if let Some(cb) = callback.as_mut() {
            cb(sent, total);
        }
    }
    Ok(())
}

// =======================================================================
// Board commands
// =======================================================================

/// Firmware identification returned by `GET_INFO`.
#[derive(Debug, Clone, Default)]
pub struct FirmwareInfo {
    pub firmware: u8,
    pub device_id: u8,
    pub protocol: u8,
    pub hardware: u8,
    pub expansion_id: u8,
    pub serial_number: u64,
}

pub fn device_info(pipe: &dyn ControlPipe) -> Result<FirmwareInfo> {
    let reply = transact(pipe, &ControlPacket::new(cmd::GET_INFO))?;
    let mut serial = [0u8; 8];
    serial.copy_from_slice(&reply.payload[5..13]);
    Ok(FirmwareInfo {
        firmware: reply.payload[0],
        device_id: reply.payload[1],
        protocol: reply.payload[2],
        hardware: reply.payload[3],
        expansion_id: reply.payload[4],
        serial_number: u64::from_be_bytes(serial),
    })
}

pub fn device_reset(pipe: &dyn ControlPipe) -> Result<()> {
    transact(pipe, &ControlPacket::new(cmd::DEVICE_RESET)).map(|_| ())
}

/// Flush residual sample data buffered in the transport before streaming.
pub fn stream_fifo_reset(pipe: &dyn ControlPipe) -> Result<()> {
    let mut pkt = ControlPacket::new(cmd::STREAM_FIFO_RST);
    pkt.block_count = 1;
    transact(pipe, &pkt).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Echo pipe: records requests, answers COMPLETED with a canned payload.
    struct EchoPipe {
        requests: Mutex<Vec<ControlPacket>>,
    }

    impl EchoPipe {
        fn new() -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    impl ControlPipe for EchoPipe {
        fn write_read(&self, request: &[u8], _timeout: Duration) -> crate::Result<Vec<u8>> {
            let pkt = ControlPacket::from_bytes(request).expect("well-formed request");
            let mut reply = pkt.clone();
            self.requests.lock().push(pkt);
            reply.status = status::COMPLETED;
            Ok(reply.to_bytes().to_vec())
        }
    }

    #[test]
    fn test_packet_roundtrip() {
        let mut pkt = ControlPacket::new(cmd::CHIP_SPI_WR);
        pkt.block_count = 3;
        pkt.periph_id = 1;
        pkt.payload[0] = 0xAB;
        pkt.payload[55] = 0xCD;

        let parsed =
            ControlPacket::from_bytes(&pkt.to_bytes()).expect("parse should succeed");
        assert_eq!(parsed.cmd, cmd::CHIP_SPI_WR);
        assert_eq!(parsed.block_count, 3);
        assert_eq!(parsed.periph_id, 1);
        assert_eq!(parsed.payload[0], 0xAB);
        assert_eq!(parsed.payload[55], 0xCD);
    }

    #[test]
    fn test_spi_write_batches_fourteen_blocks() {
        let pipe = EchoPipe::new();
        let pairs: Vec<(u16, u16)> = (0..20).map(|i| (0x0100 + i, i)).collect();
        spi_write(&pipe, SpiBus::Chip, &pairs).expect("spi write should succeed");

        let requests = pipe.requests.lock();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].block_count, 14);
        assert_eq!(requests[1].block_count, 6);
        // Write flag set in the address MSB of the first block.
        assert_eq!(requests[0].payload[0], 0x81);
    }

    #[test]
    fn test_memory_write_chunks() {
        let pipe = EchoPipe::new();
        let image = vec![0x5Au8; 100];
        memory_write(&pipe, MemoryTarget::Eeprom, 16, &image)
            .expect("memory write should succeed");

        let requests = pipe.requests.lock();
        assert_eq!(requests.len(), 4); // 32 + 32 + 32 + 4
        assert_eq!(requests[3].block_count, 4);
        assert_eq!(requests[1].payload[0], MemoryTarget::Eeprom as u8);
        // Second chunk addressed at 16 + 32.
        assert_eq!(
            u32::from_be_bytes(requests[1].payload[1..5].try_into().unwrap()),
            48
        );
    }

    #[test]
    fn test_program_write_reports_progress() {
        let pipe = EchoPipe::new();
        let image = vec![0u8; 70];
        let mut reports = Vec::new();
        let mut cb = |sent: usize, total: usize| reports.push((sent, total));
        program_write(&pipe, MemoryTarget::FpgaFlash, &image, Some(&mut cb))
            .expect("program write should succeed");
        assert_eq!(reports, vec![(32, 70), (64, 70), (70, 70)]);
    }
}
