// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ironwave.io

//! Virtual board for tests.
//!
//! [`MockControlPipe`] emulates the board MCU: chip and FPGA register
//! files, EEPROM, GPIO and custom parameters, with write counters so tests
//! can assert on the exact SPI traffic a configuration produces.
//! [`MockRxPipe`] synthesizes timestamped sample frames; [`MockTxPipe`]
//! captures outbound frames for inspection.

use crate::comms::protocol::{cmd, status, ControlPacket};
use crate::comms::{BulkCompletion, BulkPipe, ControlPipe};
use crate::config::{CONTROL_PAYLOAD_SIZE, FRAME_SIZE};
use crate::error::{Error, Result};
use crate::memory::PoolBuffer;
use crate::stream::codec::PacketCodec;
use crate::stream::frame::FrameFlags;
use crate::stream::{LinkFormat, SampleI16};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Chip revision reported by default (temperature sensor present).
pub const MOCK_CHIP_REV: u16 = 0x3A01;
/// Raw temperature code: 0x1D8 * 0.125 - 32 = 27 degrees.
const MOCK_TEMP_RAW: u16 = 0x1D8;

#[derive(Default)]
struct BoardState {
    chip_regs: HashMap<u16, u16>,
    fpga_regs: HashMap<u16, u16>,
    eeprom: Vec<u8>,
    flash: Vec<u8>,
    gpio: [u8; 16],
    gpio_dir: [u8; 16],
    params: HashMap<u8, f64>,
}

/// Emulated control endpoint with per-register write accounting.
pub struct MockControlPipe {
    state: Mutex<BoardState>,
    chip_write_packets: AtomicUsize,
    chip_reg_writes: Mutex<HashMap<u16, usize>>,
    fpga_write_packets: AtomicUsize,
    fifo_resets: AtomicUsize,
    resets: AtomicUsize,
}

impl Default for MockControlPipe {
    fn default() -> Self {
        Self::new()
    }
}

impl MockControlPipe {
    #[must_use]
    pub fn new() -> Self {
        let mut state = BoardState {
            eeprom: vec![0u8; 256],
            flash: vec![0u8; 64 * 1024],
            ..BoardState::default()
        };
        state.chip_regs.insert(0x002F, MOCK_CHIP_REV);
        state.chip_regs.insert(0x002E, MOCK_TEMP_RAW);
        state.params.insert(1, 26.5);
        Self {
            state: Mutex::new(state),
            chip_write_packets: AtomicUsize::new(0),
            chip_reg_writes: Mutex::new(HashMap::new()),
            fpga_write_packets: AtomicUsize::new(0),
            fifo_resets: AtomicUsize::new(0),
            resets: AtomicUsize::new(0),
        }
    }

    /// Current value of a chip register.
    #[must_use]
    pub fn chip_reg(&self, addr: u16) -> u16 {
        *self.state.lock().chip_regs.get(&addr).unwrap_or(&0)
    }

    pub fn set_chip_reg(&self, addr: u16, value: u16) {
        self.state.lock().chip_regs.insert(addr, value);
    }

    #[must_use]
    pub fn fpga_reg(&self, addr: u16) -> u16 {
        *self.state.lock().fpga_regs.get(&addr).unwrap_or(&0)
    }

    #[must_use]
    pub fn eeprom(&self, addr: usize, len: usize) -> Vec<u8> {
        self.state.lock().eeprom[addr..addr + len].to_vec()
    }

    /// SPI write packets addressed to the chip since the last counter reset.
    #[must_use]
    pub fn chip_write_packets(&self) -> usize {
        self.chip_write_packets.load(Ordering::Relaxed)
    }

    /// Individual writes to one chip register since the last counter reset.
    #[must_use]
    pub fn writes_to(&self, addr: u16) -> usize {
        *self.chip_reg_writes.lock().get(&addr).unwrap_or(&0)
    }

    #[must_use]
    pub fn fifo_resets(&self) -> usize {
        self.fifo_resets.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn device_resets(&self) -> usize {
        self.resets.load(Ordering::Relaxed)
    }

    pub fn reset_counters(&self) {
        self.chip_write_packets.store(0, Ordering::Relaxed);
        self.fpga_write_packets.store(0, Ordering::Relaxed);
        self.chip_reg_writes.lock().clear();
    }

    /// Total write traffic (chip + FPGA packets) since the last reset.
    #[must_use]
    pub fn write_packets(&self) -> usize {
        self.chip_write_packets.load(Ordering::Relaxed)
            + self.fpga_write_packets.load(Ordering::Relaxed)
    }

    fn handle(&self, pkt: &ControlPacket) -> ControlPacket {
        let mut reply = pkt.clone();
        reply.status = status::COMPLETED;
        let mut state = self.state.lock();
        match pkt.cmd {
            cmd::CHIP_SPI_WR | cmd::FPGA_SPI_WR => {
                let regs = if pkt.cmd == cmd::CHIP_SPI_WR {
                    self.chip_write_packets.fetch_add(1, Ordering::Relaxed);
                    &mut state.chip_regs
                } else {
                    self.fpga_write_packets.fetch_add(1, Ordering::Relaxed);
                    &mut state.fpga_regs
                };
                for i in 0..usize::from(pkt.block_count) {
                    let off = i * 4;
                    let addr = (u16::from(pkt.payload[off] & 0x7F) << 8)
                        | u16::from(pkt.payload[off + 1]);
                    let value =
                        (u16::from(pkt.payload[off + 2]) << 8) | u16::from(pkt.payload[off + 3]);
                    regs.insert(addr, value);
                    if pkt.cmd == cmd::CHIP_SPI_WR {
                        *self.chip_reg_writes.lock().entry(addr).or_insert(0) += 1;
                    }
                }
            }
            cmd::CHIP_SPI_RD | cmd::FPGA_SPI_RD => {
                let regs = if pkt.cmd == cmd::CHIP_SPI_RD {
                    &state.chip_regs
                } else {
                    &state.fpga_regs
                };
                let mut values = Vec::new();
                for i in 0..usize::from(pkt.block_count) {
                    let off = i * 2;
                    let addr =
                        (u16::from(pkt.payload[off]) << 8) | u16::from(pkt.payload[off + 1]);
                    values.push((addr, *regs.get(&addr).unwrap_or(&0)));
                }
                reply.payload = [0; CONTROL_PAYLOAD_SIZE];
                for (i, (addr, value)) in values.iter().enumerate() {
                    let off = i * 4;
                    reply.payload[off..off + 2].copy_from_slice(&addr.to_be_bytes());
                    reply.payload[off + 2..off + 4].copy_from_slice(&value.to_be_bytes());
                }
            }
            cmd::GPIO_RD => {
                reply.payload[..16].copy_from_slice(&state.gpio);
            }
            cmd::GPIO_DIR_RD => {
                reply.payload[..16].copy_from_slice(&state.gpio_dir);
            }
            cmd::GPIO_WR => {
                let n = usize::from(pkt.block_count).min(16);
                state.gpio[..n].copy_from_slice(&pkt.payload[..n]);
            }
            cmd::GPIO_DIR_WR => {
                let n = usize::from(pkt.block_count).min(16);
                state.gpio_dir[..n].copy_from_slice(&pkt.payload[..n]);
            }
            cmd::ANALOG_VAL_WR => {
                for i in 0..usize::from(pkt.block_count) {
                    let off = i * 8;
                    let id = pkt.payload[off];
                    let raw = i32::from_be_bytes([
                        pkt.payload[off + 4],
                        pkt.payload[off + 5],
                        pkt.payload[off + 6],
                        pkt.payload[off + 7],
                    ]);
                    state.params.insert(id, f64::from(raw));
                }
            }
            cmd::ANALOG_VAL_RD => {
                let ids: Vec<u8> = (0..usize::from(pkt.block_count))
                    .map(|i| pkt.payload[i * 8])
                    .collect();
                reply.payload = [0; CONTROL_PAYLOAD_SIZE];
                for (i, id) in ids.iter().enumerate() {
                    let off = i * 8;
                    let value = *state.params.get(id).unwrap_or(&0.0);
                    // Temperature (id 1) reports in degrees C, others unitless.
                    let unit = if *id == 1 { 4 } else { 0 };
                    reply.payload[off] = *id;
                    reply.payload[off + 1] = unit;
                    reply.payload[off + 2] = 0;
                    reply.payload[off + 4..off + 8]
                        .copy_from_slice(&(value.round() as i32).to_be_bytes());
                }
            }
            cmd::MEMORY_WR | cmd::MEMORY_RD => {
                let target = pkt.payload[0];
                let addr = u32::from_be_bytes(pkt.payload[1..5].try_into().expect("4 bytes"))
                    as usize;
                let len = usize::from(pkt.block_count);
                let memory = if target == 3 { &mut state.eeprom } else { &mut state.flash };
                if addr + len > memory.len() {
                    reply.status = status::NOT_SUPPORTED;
                } else if pkt.cmd == cmd::MEMORY_WR {
                    memory[addr..addr + len].copy_from_slice(&pkt.payload[24..24 + len]);
                } else {
                    reply.payload = [0; CONTROL_PAYLOAD_SIZE];
                    reply.payload[24..24 + len].copy_from_slice(&memory[addr..addr + len]);
                }
            }
            cmd::GET_INFO => {
                reply.payload[0] = 4; // firmware
                reply.payload[1] = 1; // device id: IronSDR-USB
                reply.payload[2] = 1; // protocol
                reply.payload[3] = 2; // hardware
                reply.payload[4] = 0; // no expansion board
                reply.payload[5..13].copy_from_slice(&0x0009u64.to_be_bytes());
            }
            cmd::DEVICE_RESET => {
                self.resets.fetch_add(1, Ordering::Relaxed);
            }
            cmd::STREAM_FIFO_RST => {
                self.fifo_resets.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                reply.status = status::UNKNOWN_CMD;
            }
        }
        reply
    }
}

impl ControlPipe for MockControlPipe {
    fn write_read(&self, request: &[u8], _timeout: Duration) -> Result<Vec<u8>> {
        let pkt = ControlPacket::from_bytes(request)?;
        Ok(self.handle(&pkt).to_bytes().to_vec())
    }
}

// ============================================================================
// Bulk pipes
// ============================================================================

struct BulkState {
    completed: VecDeque<BulkCompletion>,
    in_flight: usize,
}

/// Inbound endpoint that fills submitted buffers with synthesized frames.
///
/// Samples are a deterministic ramp (`i = timestamp + n`, `q = -i`), so
/// tests can check continuity. Delivery stops when the frame budget is
/// exhausted; [`MockRxPipe::skip_samples`] injects a timestamp gap.
pub struct MockRxPipe {
    state: Mutex<BulkState>,
    ready: Condvar,
    codec: PacketCodec,
    next_timestamp: AtomicU64,
    frame_budget: AtomicUsize,
    /// Buffers held "at the hardware" once the budget is spent; released as
    /// cancelled completions on abort.
    starved: Mutex<Vec<PoolBuffer>>,
}

impl MockRxPipe {
    #[must_use]
    pub fn new(link: LinkFormat, channels: usize, frame_budget: usize) -> Self {
        Self {
            state: Mutex::new(BulkState {
                completed: VecDeque::new(),
                in_flight: 0,
            }),
            ready: Condvar::new(),
            codec: PacketCodec::new(link, channels),
            next_timestamp: AtomicU64::new(0),
            frame_budget: AtomicUsize::new(frame_budget),
            starved: Mutex::new(Vec::new()),
        }
    }

    /// Allow `n` more frames to be delivered. Buffers already starved at
    /// the virtual hardware are filled and completed immediately.
    pub fn add_budget(&self, n: usize) {
        self.frame_budget.fetch_add(n, Ordering::Relaxed);
        loop {
            let took = self
                .frame_budget
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |b| b.checked_sub(1));
            if took.is_err() {
                break;
            }
            let Some(mut buffer) = self.starved.lock().pop() else {
                // Nothing waiting; hand the budget back for future submits.
                self.frame_budget.fetch_add(1, Ordering::Relaxed);
                break;
            };
            self.fill(&mut buffer);
            let mut state = self.state.lock();
            state.in_flight -= 1;
            state.completed.push_back(BulkCompletion {
                buffer,
                bytes: FRAME_SIZE,
                cancelled: false,
            });
            drop(state);
            self.ready.notify_all();
        }
    }

    /// Advance the frame clock without delivering the samples (lost frames).
    pub fn skip_samples(&self, samples: u64) {
        self.next_timestamp.fetch_add(samples, Ordering::Relaxed);
    }

    #[must_use]
    pub fn samples_per_frame(&self) -> usize {
        self.codec.samples_per_frame()
    }

    fn fill(&self, buffer: &mut PoolBuffer) {
        let spf = self.codec.samples_per_frame();
        let timestamp = self
            .next_timestamp
            .fetch_add(spf as u64, Ordering::Relaxed);
        let channels = self.codec.channels();
        let data: Vec<Vec<SampleI16>> = (0..channels)
            .map(|ch| {
                (0..spf)
                    .map(|n| {
                        let v = (timestamp.wrapping_add(n as u64) & 0x07FF) as i16;
                        if ch == 0 {
                            SampleI16::new(v, -v)
                        } else {
                            SampleI16::new(-v, v)
                        }
                    })
                    .collect()
            })
            .collect();
        let slices: Vec<&[SampleI16]> = data.iter().map(Vec::as_slice).collect();
        self.codec.pack_frame(
            buffer.as_mut_slice(),
            timestamp,
            FrameFlags::default(),
            &slices,
            0,
            spf,
        );
    }
}

impl BulkPipe for MockRxPipe {
    fn submit(&self, mut buffer: PoolBuffer) -> Result<()> {
        let deliver = self
            .frame_budget
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |b| b.checked_sub(1))
            .is_ok();
        if deliver {
            self.fill(&mut buffer);
            self.state.lock().completed.push_back(BulkCompletion {
                buffer,
                bytes: FRAME_SIZE,
                cancelled: false,
            });
            self.ready.notify_all();
        } else {
            // Budget spent: hold the buffer "at the hardware" until abort.
            self.state.lock().in_flight += 1;
            self.starved.lock().push(buffer);
        }
        Ok(())
    }

    fn wait(&self, timeout: Duration) -> Result<BulkCompletion> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(c) = state.completed.pop_front() {
                return Ok(c);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::TimedOut);
            }
            self.ready.wait_for(&mut state, deadline - now);
        }
    }

    fn abort(&self) {
        let mut state = self.state.lock();
        let mut starved = self.starved.lock();
        while let Some(buffer) = starved.pop() {
            state.in_flight -= 1;
            state.completed.push_back(BulkCompletion {
                buffer,
                bytes: 0,
                cancelled: true,
            });
        }
        drop(state);
        self.ready.notify_all();
    }

    fn in_flight(&self) -> usize {
        let state = self.state.lock();
        state.in_flight + state.completed.len()
    }
}

/// Outbound endpoint that captures every submitted frame.
pub struct MockTxPipe {
    state: Mutex<BulkState>,
    ready: Condvar,
    captured: Mutex<Vec<Vec<u8>>>,
}

impl Default for MockTxPipe {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTxPipe {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BulkState {
                completed: VecDeque::new(),
                in_flight: 0,
            }),
            ready: Condvar::new(),
            captured: Mutex::new(Vec::new()),
        }
    }

    /// Frames sent so far, oldest first.
    #[must_use]
    pub fn captured_frames(&self) -> Vec<Vec<u8>> {
        self.captured.lock().clone()
    }
}

impl BulkPipe for MockTxPipe {
    fn submit(&self, buffer: PoolBuffer) -> Result<()> {
        self.captured.lock().push(buffer.as_slice().to_vec());
        self.state.lock().completed.push_back(BulkCompletion {
            buffer,
            bytes: FRAME_SIZE,
            cancelled: false,
        });
        self.ready.notify_all();
        Ok(())
    }

    fn wait(&self, timeout: Duration) -> Result<BulkCompletion> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(c) = state.completed.pop_front() {
                return Ok(c);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::TimedOut);
            }
            self.ready.wait_for(&mut state, deadline - now);
        }
    }

    fn abort(&self) {
        self.ready.notify_all();
    }

    fn in_flight(&self) -> usize {
        self.state.lock().completed.len()
    }
}
