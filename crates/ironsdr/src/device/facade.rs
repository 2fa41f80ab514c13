// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ironwave.io

//! Public device surface.
//!
//! [`SdrDevice`] aggregates the chip driver, the FPGA, the configurator and
//! the streamer slots behind the operations of the public API. It owns the
//! last-applied configuration (the base for every incremental edit), the
//! per-device stream-handle registry, and the CGEN event pump.
//!
//! All control-path operations are serialized by a per-device mutex;
//! streaming reads/writes run lock-free against their streamer.

use crate::boards;
use crate::comms::protocol::{self, CustomParameterIo, MemoryTarget, UploadCallback};
use crate::comms::{BulkPipe, ControlPipe};
use crate::config::MAX_CHANNEL_COUNT;
use crate::error::{Error, Result};
use crate::reporting::report_error;
use crate::soc::chip::{Ax7201, ClockId, REV_NO_TEMP_SENSOR};
use crate::soc::configurator::{ApplyOutcome, ChipConfigurator};
use crate::soc::descriptor::{DeviceDescriptor, Range};
use crate::soc::fpga::Fpga;
use crate::soc::{GainKind, SdrConfig, TestSignal};
use crate::stream::codec::{self, SampleBuffer, SampleBufferMut};
use crate::stream::{
    DataFormat, Direction, LinkFormat, SampleI16, StreamConfig, StreamMeta, Streamer, StreamStatus,
};
use crossbeam::channel::Receiver;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Stream open request: one direction+channel pairing, as handed to
/// `SetupStream`.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub direction: Direction,
    pub channel: u8,
    pub format: DataFormat,
    /// Defaults from `format`: F32 maps to a 16-bit link, I12 to 12-bit.
    pub link_format: Option<LinkFormat>,
    /// Caller FIFO size in samples; 0 picks the driver default.
    pub fifo_size: usize,
    /// Zero both hardware sample counters when the stream starts.
    pub align_phase: bool,
}

struct StreamHandleState {
    direction: Direction,
    channel: u8,
    format: DataFormat,
    started: bool,
}

/// Samples fetched for a channel the caller has not read yet (MIMO streams
/// read one channel at a time). Freed on stream stop.
struct ChannelCache {
    direction: Direction,
    channel: u8,
    samples: Vec<SampleI16>,
    timestamp: u64,
}

struct DeviceState {
    /// Last requested configuration: the base for incremental edits. In the
    /// MIMO-deferral case this holds the remembered-but-unapplied request.
    last_config: SdrConfig,
    /// Last configuration actually written to hardware: the delta base.
    last_applied: SdrConfig,
    last_stream: StreamConfig,
    /// Remembered LPF bandwidth per channel and direction, so disabling the
    /// filter can restore it on re-enable.
    last_lpf: [[f64; 2]; MAX_CHANNEL_COUNT],
    caches: Vec<ChannelCache>,
}

/// One opened IronSDR board.
pub struct SdrDevice {
    descriptor: DeviceDescriptor,
    control: Arc<dyn ControlPipe>,
    /// Serializes SPI, GPIO and custom-parameter traffic.
    control_lock: Mutex<()>,
    chip: Arc<Ax7201>,
    fpga: Arc<Fpga>,
    configurator: ChipConfigurator,
    cgen_events: Receiver<f64>,
    rx_pipe: Arc<dyn BulkPipe>,
    tx_pipe: Arc<dyn BulkPipe>,
    state: Mutex<DeviceState>,
    /// Streamer slot per module; this board carries one RF chip.
    streamers: Mutex<Vec<Option<Arc<Streamer>>>>,
    handles: Mutex<Vec<Option<StreamHandleState>>>,
}

impl SdrDevice {
    /// Open a board over its transport capabilities and query its identity.
    pub fn new(
        control: Arc<dyn ControlPipe>,
        rx_pipe: Arc<dyn BulkPipe>,
        tx_pipe: Arc<dyn BulkPipe>,
    ) -> Result<Self> {
        let info = protocol::device_info(control.as_ref())?;
        let fpga = Arc::new(Fpga::new(Arc::clone(&control)));
        let gateware = fpga.gateware_info()?;
        let descriptor = boards::build_descriptor(&info, &gateware);
        log::info!(
            "[DEV] {} serial {:08X}, fw {}, gw {}.{}",
            descriptor.name,
            descriptor.serial_number,
            descriptor.firmware_version,
            descriptor.gateware_version,
            descriptor.gateware_revision
        );

        let (chip, cgen_events) =
            Ax7201::new(Arc::clone(&control), boards::AX7201_DEFAULT_OVERRIDES.to_vec());
        let configurator =
            ChipConfigurator::new(Arc::clone(&chip), Arc::clone(&fpga), boards::ironsdr_usb_soc());

        Ok(Self {
            descriptor,
            control,
            control_lock: Mutex::new(()),
            chip,
            fpga,
            configurator,
            cgen_events,
            rx_pipe,
            tx_pipe,
            state: Mutex::new(DeviceState {
                last_config: SdrConfig::default(),
                last_applied: SdrConfig::default(),
                last_stream: StreamConfig::default(),
                last_lpf: [[0.0; 2]; MAX_CHANNEL_COUNT],
                caches: Vec::new(),
            }),
            streamers: Mutex::new(vec![None]),
            handles: Mutex::new(Vec::new()),
        })
    }

    #[must_use]
    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    // ====================================================================
    // Configuration
    // ====================================================================

    fn check_not_streaming(&self) -> Result<()> {
        let streaming = self
            .streamers
            .lock()
            .iter()
            .flatten()
            .any(|s| s.is_running());
        if streaming {
            return Err(report_error(Error::Busy));
        }
        Ok(())
    }

    /// Apply a declarative configuration. Becomes the new last-applied
    /// state on success; an I1-deferred request is remembered but produces
    /// no writes.
    pub fn configure(&self, config: &SdrConfig) -> Result<()> {
        self.check_not_streaming()?;
        {
            let _ctrl = self.control_lock.lock();
            let mut state = self.state.lock();
            match self.configurator.configure(&state.last_applied, config) {
                Ok(ApplyOutcome::Applied(stored)) => {
                    state.last_config = (*stored).clone();
                    state.last_applied = *stored;
                }
                Ok(ApplyOutcome::Deferred) => {
                    // Remembered; applied once the MIMO carriers agree.
                    state.last_config = config.clone();
                }
                Err(e) => return Err(report_error(e)),
            }
        }
        self.pump_cgen_events()
    }

    /// Re-issue the last-applied configuration through the delta engine
    /// after a convenience-setter mutation.
    fn reconfigure<F>(&self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut SdrConfig),
    {
        let request = {
            let state = self.state.lock();
            let mut request = state.last_config.clone();
            mutate(&mut request);
            request
        };
        self.configure(&request)
    }

    /// Chip reset plus board bootstrap.
    pub fn init(&self) -> Result<()> {
        self.check_not_streaming()?;
        let _ctrl = self.control_lock.lock();
        self.chip.init()
    }

    /// Board MCU reset.
    pub fn reset(&self) -> Result<()> {
        let _ctrl = self.control_lock.lock();
        protocol::device_reset(self.control.as_ref())
    }

    pub fn enable_channel(&self, dir: Direction, channel: usize, enabled: bool) -> Result<()> {
        self.validate_channel(channel)?;
        self.reconfigure(|cfg| {
            let trx = cfg.channels[channel].dir_mut(dir);
            trx.enabled = enabled;
            // A channel never tuned gets a sane default carrier.
            if trx.center_frequency_hz == 0.0 {
                trx.center_frequency_hz = 1e8;
            }
        })
    }

    pub fn set_sample_rate(&self, rate_hz: f64, oversample: u8) -> Result<()> {
        self.reconfigure(|cfg| {
            for ch in &mut cfg.channels {
                for dir in [Direction::Rx, Direction::Tx] {
                    let trx = ch.dir_mut(dir);
                    trx.sample_rate_hz = rate_hz;
                    trx.oversample = oversample;
                }
            }
        })
    }

    pub fn set_sample_rate_dir(&self, dir: Direction, rate_hz: f64, oversample: u8) -> Result<()> {
        self.reconfigure(|cfg| {
            for ch in &mut cfg.channels {
                let trx = ch.dir_mut(dir);
                trx.sample_rate_hz = rate_hz;
                trx.oversample = oversample;
            }
        })
    }

    /// Host and RF sample rates of one channel.
    pub fn get_sample_rate(&self, dir: Direction, channel: usize) -> Result<(f64, f64)> {
        self.validate_channel(channel)?;
        let state = self.state.lock();
        let trx = state.last_config.channels[channel].dir(dir);
        Ok((
            trx.sample_rate_hz,
            trx.sample_rate_hz * f64::from(trx.oversample.max(1)),
        ))
    }

    #[must_use]
    pub fn get_sample_rate_range(&self) -> Range {
        self.configurator.soc().sampling_rate_range
    }

    #[must_use]
    pub fn get_num_channels(&self) -> usize {
        self.configurator.soc().channel_count
    }

    pub fn set_lo_frequency(&self, dir: Direction, channel: usize, frequency_hz: f64) -> Result<()> {
        self.validate_channel(channel)?;
        self.reconfigure(|cfg| {
            cfg.channels[channel].dir_mut(dir).center_frequency_hz = frequency_hz;
        })
    }

    pub fn get_lo_frequency(&self, dir: Direction, channel: usize) -> Result<f64> {
        self.validate_channel(channel)?;
        let state = self.state.lock();
        Ok(state.last_config.channels[channel].dir(dir).center_frequency_hz)
    }

    #[must_use]
    pub fn get_lo_frequency_range(&self) -> Range {
        self.configurator.soc().frequency_range
    }

    #[must_use]
    pub fn get_antenna_list(&self, dir: Direction) -> &'static [&'static str] {
        self.configurator.soc().path_names(dir)
    }

    pub fn set_antenna(&self, dir: Direction, channel: usize, path_index: usize) -> Result<()> {
        self.validate_channel(channel)?;
        self.reconfigure(|cfg| {
            cfg.channels[channel].dir_mut(dir).path_index = path_index;
        })
    }

    pub fn get_antenna(&self, dir: Direction, channel: usize) -> Result<usize> {
        self.validate_channel(channel)?;
        let state = self.state.lock();
        Ok(state.last_config.channels[channel].dir(dir).path_index)
    }

    pub fn get_antenna_bw(&self, dir: Direction, path_index: usize) -> Result<Range> {
        let soc = self.configurator.soc();
        let paths = soc.path_names(dir);
        let name = paths
            .get(path_index)
            .ok_or_else(|| Error::InvalidArgument(format!("path index {}", path_index)))?;
        soc.antenna_range(dir, name)
            .ok_or_else(|| Error::InvalidArgument(format!("path '{}' has no antenna", name)))
    }

    pub fn set_lpf_bw(&self, dir: Direction, channel: usize, bandwidth_hz: f64) -> Result<()> {
        self.validate_channel(channel)?;
        self.state.lock().last_lpf[channel][dir.idx()] = bandwidth_hz;
        self.reconfigure(|cfg| {
            cfg.channels[channel].dir_mut(dir).lpf_bandwidth_hz = bandwidth_hz;
        })
    }

    pub fn get_lpf_bw(&self, dir: Direction, channel: usize) -> Result<f64> {
        self.validate_channel(channel)?;
        let state = self.state.lock();
        Ok(state.last_config.channels[channel].dir(dir).lpf_bandwidth_hz)
    }

    #[must_use]
    pub fn get_lpf_bw_range(&self, dir: Direction) -> Range {
        self.configurator.soc().lpf_range(dir)
    }

    /// Disable programs the wide-open 130 MHz setting; enable restores the
    /// last explicitly requested bandwidth.
    pub fn set_lpf_enabled(&self, dir: Direction, channel: usize, enabled: bool) -> Result<()> {
        self.validate_channel(channel)?;
        let bandwidth = if enabled {
            let state = self.state.lock();
            let remembered = state.last_lpf[channel][dir.idx()];
            if remembered > 0.0 {
                remembered
            } else {
                self.configurator.soc().lpf_range(dir).max
            }
        } else {
            130e6
        };
        self.reconfigure(|cfg| {
            cfg.channels[channel].dir_mut(dir).lpf_bandwidth_hz = bandwidth;
        })
    }

    // ====================================================================
    // Gain
    // ====================================================================

    /// Set gain on the piecewise-linear normalized scale [0, 1].
    pub fn set_normalized_gain(&self, dir: Direction, channel: usize, gain: f64) -> Result<()> {
        self.validate_channel(channel)?;
        let range = self.configurator.soc().gain_range(dir);
        let gain = gain.clamp(0.0, 1.0);
        let db = range.min + gain * range.width();
        self.reconfigure(|cfg| {
            cfg.channels[channel]
                .dir_mut(dir)
                .gain_db
                .insert(GainKind::Generic, db);
        })
    }

    pub fn get_normalized_gain(&self, dir: Direction, channel: usize) -> Result<f64> {
        self.validate_channel(channel)?;
        let range = self.configurator.soc().gain_range(dir);
        let db = self.stored_gain_db(dir, channel);
        Ok((db - range.min) / range.width())
    }

    /// Set gain in whole dB above the -12 dB floor.
    pub fn set_gain_db(&self, dir: Direction, channel: usize, gain: u32) -> Result<()> {
        self.validate_channel(channel)?;
        let db = f64::from(gain) - 12.0;
        self.reconfigure(|cfg| {
            cfg.channels[channel]
                .dir_mut(dir)
                .gain_db
                .insert(GainKind::Generic, db);
        })
    }

    pub fn get_gain_db(&self, dir: Direction, channel: usize) -> Result<u32> {
        self.validate_channel(channel)?;
        Ok((self.stored_gain_db(dir, channel) + 12.0 + 0.5) as u32)
    }

    fn stored_gain_db(&self, dir: Direction, channel: usize) -> f64 {
        let state = self.state.lock();
        state.last_config.channels[channel]
            .dir(dir)
            .gain_db
            .get(&GainKind::Generic)
            .copied()
            .unwrap_or(0.0)
    }

    // ====================================================================
    // Calibration and test signals
    // ====================================================================

    /// Schedule calibration for one channel. The flag is one-shot: it fires
    /// during this configure and is cleared in the stored copy.
    pub fn calibrate(&self, dir: Direction, channel: usize, bandwidth_hz: f64) -> Result<()> {
        self.validate_channel(channel)?;
        self.reconfigure(|cfg| {
            let trx = cfg.channels[channel].dir_mut(dir);
            trx.calibrate = true;
            if bandwidth_hz > 0.0 {
                trx.lpf_bandwidth_hz = bandwidth_hz;
            }
        })
    }

    pub fn set_test_signal(&self, dir: Direction, channel: usize, signal: TestSignal) -> Result<()> {
        self.validate_channel(channel)?;
        self.reconfigure(|cfg| {
            cfg.channels[channel].dir_mut(dir).test_signal = signal;
        })
    }

    /// Decode the active generator from the chip registers.
    pub fn get_test_signal(&self, dir: Direction, channel: usize) -> Result<TestSignal> {
        self.validate_channel(channel)?;
        let _ctrl = self.control_lock.lock();
        self.chip.get_test_signal(dir, channel)
    }

    // ====================================================================
    // Streams
    // ====================================================================

    /// Register a stream for one direction+channel and (re)build the module
    /// streamer around the accumulated channel set.
    pub fn setup_stream(&self, request: &StreamRequest) -> Result<usize> {
        self.validate_channel(usize::from(request.channel))?;
        self.check_not_streaming()?;

        // Make sure deferred configuration edits reach the hardware before
        // samples start flowing.
        let pending = self.state.lock().last_config.clone();
        self.configure(&pending)?;

        let stream_config = {
            let mut state = self.state.lock();
            let list = match request.direction {
                Direction::Rx => &mut state.last_stream.rx_channels,
                Direction::Tx => &mut state.last_stream.tx_channels,
            };
            if !list.contains(&request.channel) {
                list.push(request.channel);
                list.sort_unstable();
            }
            let (format, link) = resolve_formats(request.format, request.link_format);
            state.last_stream.format = format;
            state.last_stream.link_format = link;
            if request.fifo_size > 0 {
                state.last_stream.buffer_size = request.fifo_size;
            }
            state.last_stream.align_phase |= request.align_phase;
            state.last_stream.clone()
        };

        let streamer = Streamer::setup(
            stream_config,
            Arc::clone(&self.rx_pipe),
            Arc::clone(&self.tx_pipe),
            Arc::clone(&self.fpga),
        )?;
        self.streamers.lock()[0] = Some(Arc::new(streamer));

        let mut handles = self.handles.lock();
        let slot = handles.iter().position(Option::is_none).unwrap_or_else(|| {
            handles.push(None);
            handles.len() - 1
        });
        handles[slot] = Some(StreamHandleState {
            direction: request.direction,
            channel: request.channel,
            format: request.format,
            started: false,
        });
        Ok(slot)
    }

    /// Tear down one stream handle. The module streamer survives until the
    /// last handle is destroyed.
    pub fn destroy_stream(&self, handle: usize) -> Result<()> {
        let mut handles = self.handles.lock();
        let state = handles
            .get_mut(handle)
            .and_then(Option::take)
            .ok_or_else(|| Error::InvalidArgument(format!("stream handle {}", handle)))?;
        let last = !handles.iter().any(Option::is_some);
        drop(handles);
        if last {
            if let Some(streamer) = self.streamers.lock()[0].take() {
                streamer.stop();
            }
            let mut dev_state = self.state.lock();
            dev_state.caches.clear();
            dev_state.last_stream = StreamConfig::default();
        } else {
            // Remove the departed channel from the accumulated set.
            let mut dev_state = self.state.lock();
            let list = match state.direction {
                Direction::Rx => &mut dev_state.last_stream.rx_channels,
                Direction::Tx => &mut dev_state.last_stream.tx_channels,
            };
            list.retain(|c| *c != state.channel);
        }
        Ok(())
    }

    /// Start the hardware streamer. Starting any handle starts the module;
    /// every handle of the module observes `active` until the last stop.
    pub fn start_stream(&self, handle: usize) -> Result<()> {
        let streamer = self.streamer_for(handle)?;
        self.with_handle(handle, |h| h.started = true)?;
        if !streamer.is_running() {
            let _ctrl = self.control_lock.lock();
            protocol::stream_fifo_reset(self.control.as_ref())?;
            streamer.start()?;
        }
        Ok(())
    }

    /// Stop the module streamer, releasing cached buffers and cancelling
    /// outstanding transfers.
    pub fn stop_stream(&self, handle: usize) -> Result<()> {
        let streamer = self.streamer_for(handle)?;
        self.with_handle(handle, |h| h.started = false)?;
        if streamer.is_running() {
            streamer.stop();
        }
        // Every handle of this module is stopped with the hardware.
        let mut handles = self.handles.lock();
        for h in handles.iter_mut().flatten() {
            h.started = false;
        }
        drop(handles);
        self.state.lock().caches.clear();
        Ok(())
    }

    /// Receive samples on one Rx stream handle.
    ///
    /// On a MIMO stream read one channel at a time: reading channel A
    /// fetches both channels and caches B's samples until B is read.
    pub fn recv_stream(
        &self,
        handle: usize,
        dst: &mut SampleBufferMut<'_>,
        sample_count: usize,
        meta: Option<&mut StreamMeta>,
        timeout: Duration,
    ) -> Result<usize> {
        let (direction, channel, format) = self.handle_info(handle)?;
        if direction != Direction::Rx {
            return Err(report_error(Error::InvalidArgument(
                "receive on a Tx stream".into(),
            )));
        }
        if dst.len() < sample_count {
            return Err(Error::InvalidArgument("destination buffer too small".into()));
        }
        if !buffer_matches_format(matches!(dst, SampleBufferMut::F32(_)), format) {
            return Err(Error::InvalidArgument(
                "sample buffer type does not match the stream format".into(),
            ));
        }
        let streamer = self.streamer_for(handle)?;
        let link = streamer.config().link_format;
        let rx_channels = streamer.config().rx_channels.clone();

        // Serve from the cross-channel cache when a previous read of the
        // other channel already produced our samples.
        if rx_channels.len() > 1 {
            let mut state = self.state.lock();
            if let Some(pos) = state
                .caches
                .iter()
                .position(|c| c.direction == Direction::Rx && c.channel == channel)
            {
                let cache = state.caches.remove(pos);
                let produced = cache.samples.len().min(sample_count);
                codec::convert_from_link(&cache.samples[..produced], format, link, dst);
                if let Some(meta) = meta {
                    meta.timestamp = cache.timestamp;
                    meta.use_timestamp = true;
                }
                return Ok(produced);
            }
        }

        let mut scratch: Vec<Vec<SampleI16>> = rx_channels
            .iter()
            .map(|_| vec![SampleI16::default(); sample_count])
            .collect();
        let (produced, timestamp) = {
            let mut refs: Vec<&mut [SampleI16]> =
                scratch.iter_mut().map(Vec::as_mut_slice).collect();
            streamer.rx_read(&mut refs, sample_count, timeout)?
        };

        let mut state = self.state.lock();
        for (slot, ch) in rx_channels.iter().enumerate() {
            if *ch == channel {
                codec::convert_from_link(&scratch[slot][..produced], format, link, dst);
            } else {
                let mut samples = std::mem::take(&mut scratch[slot]);
                samples.truncate(produced);
                state.caches.push(ChannelCache {
                    direction: Direction::Rx,
                    channel: *ch,
                    samples,
                    timestamp,
                });
            }
        }
        if let Some(meta) = meta {
            meta.timestamp = timestamp;
            meta.use_timestamp = true;
        }
        Ok(produced)
    }

    /// Send samples on one Tx stream handle.
    ///
    /// Returns the accepted sample count, or a negative value when a
    /// timestamped burst already missed its slot (samples late). On a MIMO
    /// stream the write is held until every Tx channel has submitted.
    pub fn send_stream(
        &self,
        handle: usize,
        src: SampleBuffer<'_>,
        sample_count: usize,
        meta: Option<&StreamMeta>,
        timeout: Duration,
    ) -> Result<i64> {
        let (direction, channel, format) = self.handle_info(handle)?;
        if direction != Direction::Tx {
            return Err(report_error(Error::InvalidArgument(
                "send on an Rx stream".into(),
            )));
        }
        if src.len() < sample_count {
            return Err(Error::InvalidArgument("source buffer too small".into()));
        }
        if !buffer_matches_format(matches!(src, SampleBuffer::F32(_)), format) {
            return Err(Error::InvalidArgument(
                "sample buffer type does not match the stream format".into(),
            ));
        }
        let streamer = self.streamer_for(handle)?;
        let link = streamer.config().link_format;
        let tx_channels = streamer.config().tx_channels.clone();
        let meta = meta.copied().unwrap_or_default();

        let mut link_samples = Vec::with_capacity(sample_count);
        convert_partial(src, sample_count, format, link, &mut link_samples);

        if tx_channels.len() > 1 {
            let mut state = self.state.lock();
            state
                .caches
                .retain(|c| !(c.direction == Direction::Tx && c.channel == channel));
            state.caches.push(ChannelCache {
                direction: Direction::Tx,
                channel,
                samples: link_samples,
                timestamp: meta.timestamp,
            });

            let all_present = tx_channels.iter().all(|ch| {
                state
                    .caches
                    .iter()
                    .any(|c| c.direction == Direction::Tx && c.channel == *ch)
            });
            if !all_present {
                // Other channels still pending; report the samples accepted.
                return Ok(sample_count as i64);
            }

            let mut per_channel: Vec<Vec<SampleI16>> = Vec::with_capacity(tx_channels.len());
            for ch in &tx_channels {
                let pos = state
                    .caches
                    .iter()
                    .position(|c| c.direction == Direction::Tx && c.channel == *ch)
                    .expect("presence just checked");
                per_channel.push(state.caches.remove(pos).samples);
            }
            drop(state);

            let count = per_channel.iter().map(Vec::len).min().unwrap_or(0);
            let slices: Vec<&[SampleI16]> = per_channel.iter().map(Vec::as_slice).collect();
            return streamer.tx_write(&slices, count, &meta, timeout);
        }

        streamer.tx_write(&[&link_samples], sample_count, &meta, timeout)
    }

    /// Status of the direction behind one stream handle. Counters report
    /// their movement since the previous query.
    pub fn get_stream_status(&self, handle: usize) -> Result<StreamStatus> {
        let (direction, _, _) = self.handle_info(handle)?;
        let streamer = self.streamer_for(handle)?;
        let started = {
            let handles = self.handles.lock();
            handles
                .get(handle)
                .and_then(Option::as_ref)
                .is_some_and(|h| h.started)
        };
        let mut status = streamer.status(direction);
        status.active = started;
        Ok(status)
    }

    fn streamer_for(&self, handle: usize) -> Result<Arc<Streamer>> {
        let handles = self.handles.lock();
        handles
            .get(handle)
            .and_then(Option::as_ref)
            .ok_or_else(|| Error::InvalidArgument(format!("stream handle {}", handle)))?;
        drop(handles);
        self.streamers.lock()[0]
            .clone()
            .ok_or_else(|| Error::InvalidArgument("stream not set up".into()))
    }

    fn handle_info(&self, handle: usize) -> Result<(Direction, u8, DataFormat)> {
        let handles = self.handles.lock();
        let state = handles
            .get(handle)
            .and_then(Option::as_ref)
            .ok_or_else(|| Error::InvalidArgument(format!("stream handle {}", handle)))?;
        Ok((state.direction, state.channel, state.format))
    }

    fn with_handle<F>(&self, handle: usize, f: F) -> Result<()>
    where
        F: FnOnce(&mut StreamHandleState),
    {
        let mut handles = self.handles.lock();
        let state = handles
            .get_mut(handle)
            .and_then(Option::as_mut)
            .ok_or_else(|| Error::InvalidArgument(format!("stream handle {}", handle)))?;
        f(state);
        Ok(())
    }

    // ====================================================================
    // GPIO, custom parameters, memory
    // ====================================================================

    pub fn gpio_read(&self, buffer: &mut [u8]) -> Result<()> {
        let _ctrl = self.control_lock.lock();
        protocol::gpio_read(self.control.as_ref(), buffer)
    }

    pub fn gpio_write(&self, buffer: &[u8]) -> Result<()> {
        let _ctrl = self.control_lock.lock();
        protocol::gpio_write(self.control.as_ref(), buffer)
    }

    pub fn gpio_dir_read(&self, buffer: &mut [u8]) -> Result<()> {
        let _ctrl = self.control_lock.lock();
        protocol::gpio_dir_read(self.control.as_ref(), buffer)
    }

    pub fn gpio_dir_write(&self, buffer: &[u8]) -> Result<()> {
        let _ctrl = self.control_lock.lock();
        protocol::gpio_dir_write(self.control.as_ref(), buffer)
    }

    /// Read a named board knob; returns `(value, units)`.
    pub fn read_custom_board_param(&self, param_id: u8) -> Result<(f64, String)> {
        let _ctrl = self.control_lock.lock();
        let mut params = [CustomParameterIo {
            id: param_id,
            value: 0.0,
            units: String::new(),
        }];
        protocol::custom_param_read(self.control.as_ref(), &mut params)?;
        let p = params[0].clone();
        Ok((p.value, p.units))
    }

    pub fn write_custom_board_param(&self, param_id: u8, value: f64, units: &str) -> Result<()> {
        if let Some(param) = self
            .descriptor
            .custom_parameters
            .iter()
            .find(|p| p.id == param_id)
        {
            if param.read_only {
                return Err(report_error(Error::InvalidArgument(format!(
                    "parameter '{}' is read only",
                    param.name
                ))));
            }
        }
        let _ctrl = self.control_lock.lock();
        protocol::custom_param_write(
            self.control.as_ref(),
            &[CustomParameterIo {
                id: param_id,
                value,
                units: units.to_string(),
            }],
        )
    }

    /// Persist the VCTCXO trim DAC word to EEPROM.
    pub fn write_vctcxo_trim(&self, value: u16) -> Result<()> {
        let region = self
            .descriptor
            .vctcxo_dac_region
            .ok_or_else(|| Error::NotSupported("board has no VCTCXO EEPROM region".into()))?;
        let _ctrl = self.control_lock.lock();
        protocol::memory_write(
            self.control.as_ref(),
            MemoryTarget::Eeprom,
            region.address,
            &value.to_le_bytes(),
        )
    }

    pub fn read_vctcxo_trim(&self) -> Result<u16> {
        let region = self
            .descriptor
            .vctcxo_dac_region
            .ok_or_else(|| Error::NotSupported("board has no VCTCXO EEPROM region".into()))?;
        let _ctrl = self.control_lock.lock();
        let mut bytes = [0u8; 2];
        protocol::memory_read(
            self.control.as_ref(),
            MemoryTarget::Eeprom,
            region.address,
            &mut bytes,
        )?;
        Ok(u16::from_le_bytes(bytes))
    }

    /// Upload a gateware image to FPGA RAM or flash, with progress reports.
    pub fn upload_memory(
        &self,
        target: MemoryTarget,
        data: &[u8],
        callback: Option<UploadCallback<'_>>,
    ) -> Result<()> {
        if data.is_empty() {
            return Err(Error::InvalidArgument("empty upload image".into()));
        }
        let _ctrl = self.control_lock.lock();
        protocol::program_write(self.control.as_ref(), target, data, callback)
    }

    // ====================================================================
    // Clocks, cache, temperature
    // ====================================================================

    pub fn get_clock_freq(&self, clock_id: usize) -> Result<f64> {
        let clock = ClockId::from_index(clock_id)?;
        let _ctrl = self.control_lock.lock();
        self.chip.get_clock_freq(clock)
    }

    pub fn set_clock_freq(&self, clock_id: usize, frequency_hz: f64) -> Result<()> {
        let clock = ClockId::from_index(clock_id)?;
        {
            let _ctrl = self.control_lock.lock();
            self.chip.set_clock_freq(clock, frequency_hz)?;
        }
        self.pump_cgen_events()
    }

    /// Die temperature. Refused on chip revisions without the sensor.
    pub fn get_chip_temperature(&self) -> Result<f64> {
        let _ctrl = self.control_lock.lock();
        if self.chip.revision()? == REV_NO_TEMP_SENSOR {
            return Err(report_error(Error::NotSupported(
                "Feature is not available on this chip revision.".into(),
            )));
        }
        self.chip.temperature()
    }

    /// Flush the register shadow to the chip (`to_chip`) or refresh it from
    /// the chip.
    pub fn synchronize(&self, to_chip: bool) -> Result<()> {
        let _ctrl = self.control_lock.lock();
        self.chip.synchronize(to_chip)
    }

    pub fn enable_cache(&self, enabled: bool) {
        self.chip.enable_cache(enabled);
    }

    pub fn load_config(&self, path: &str) -> Result<()> {
        let _ctrl = self.control_lock.lock();
        self.chip.load_config(path)
    }

    pub fn save_config(&self, path: &str) -> Result<()> {
        let _ctrl = self.control_lock.lock();
        self.chip.save_config(path)
    }

    // ====================================================================
    // CGEN event pump
    // ====================================================================

    /// Consume pending `CgenChanged` events and retune the FPGA interface
    /// PLL, unless a configure sequence owns the clock tree right now (its
    /// final step performs the retune itself).
    fn pump_cgen_events(&self) -> Result<()> {
        let mut latest = None;
        while let Ok(freq) = self.cgen_events.try_recv() {
            latest = Some(freq);
        }
        let Some(freq) = latest else {
            return Ok(());
        };
        if self.configurator.in_progress() {
            return Ok(());
        }
        if self.configurator.last_plan_cgen() == Some(freq) {
            // The configure sequence that emitted this already retuned.
            return Ok(());
        }
        let (decimation, interpolation) = self.configurator.current_chains();
        let _ctrl = self.control_lock.lock();
        self.fpga
            .set_interface_frequency(freq, decimation, interpolation)
    }

    fn validate_channel(&self, channel: usize) -> Result<()> {
        if channel >= self.configurator.soc().channel_count {
            return Err(report_error(Error::InvalidArgument(format!(
                "channel index {}",
                channel
            ))));
        }
        Ok(())
    }
}

impl Drop for SdrDevice {
    fn drop(&mut self) {
        for streamer in self.streamers.lock().iter().flatten() {
            streamer.stop();
        }
    }
}

/// Float buffers go with `F32` streams; 16-bit buffers carry `I16` and
/// `I12` streams.
fn buffer_matches_format(is_f32: bool, format: DataFormat) -> bool {
    match format {
        DataFormat::F32 => is_f32,
        DataFormat::I16 | DataFormat::I12 => !is_f32,
    }
}

/// Host format to `(host, link)` mapping used by stream setup.
fn resolve_formats(format: DataFormat, link: Option<LinkFormat>) -> (DataFormat, LinkFormat) {
    let link = link.unwrap_or(match format {
        DataFormat::F32 | DataFormat::I16 => LinkFormat::I16,
        DataFormat::I12 => LinkFormat::I12,
    });
    (format, link)
}

/// Convert the head of a caller buffer into link-domain samples.
fn convert_partial(
    src: SampleBuffer<'_>,
    count: usize,
    format: DataFormat,
    link: LinkFormat,
    dst: &mut Vec<SampleI16>,
) {
    match src {
        SampleBuffer::F32(s) => {
            codec::convert_to_link(SampleBuffer::F32(&s[..count]), format, link, dst);
        }
        SampleBuffer::I16(s) => {
            codec::convert_to_link(SampleBuffer::I16(&s[..count]), format, link, dst);
        }
    }
}
