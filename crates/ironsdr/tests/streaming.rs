// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ironwave.io

//! Streaming-path integration tests against the virtual board.
//!
//! The mock Rx endpoint synthesizes a deterministic ramp
//! (`i = (timestamp + n) & 0x7FF`, `q = -i` on channel 0, swapped on
//! channel 1), so sample continuity and timestamps are checkable end to
//! end. The mock Tx endpoint captures frames for header inspection.

use ironsdr::comms::mock::{MockControlPipe, MockRxPipe, MockTxPipe};
use ironsdr::comms::{BulkPipe, ControlPipe};
use ironsdr::device::{SdrDevice, StreamRequest};
use ironsdr::soc::Fpga;
use ironsdr::stream::frame::FrameHeader;
use ironsdr::stream::{PacketCodec, Streamer};
use ironsdr::{DataFormat, Direction, LinkFormat, SampleI16, StreamConfig, StreamMeta};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn ramp(timestamp: u64, n: usize, channel: usize) -> SampleI16 {
    let v = (timestamp.wrapping_add(n as u64) & 0x07FF) as i16;
    if channel == 0 {
        SampleI16::new(v, -v)
    } else {
        SampleI16::new(-v, v)
    }
}

fn wait_until<F: Fn() -> bool>(what: &str, cond: F) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(5));
    }
}

struct Rig {
    control: Arc<MockControlPipe>,
    rx: Arc<MockRxPipe>,
    tx: Arc<MockTxPipe>,
    device: SdrDevice,
}

fn open_rig(link: LinkFormat, rx_channels: usize, budget: usize) -> Rig {
    let control = Arc::new(MockControlPipe::new());
    let rx = Arc::new(MockRxPipe::new(link, rx_channels, budget));
    let tx = Arc::new(MockTxPipe::new());
    let device = SdrDevice::new(
        Arc::clone(&control) as Arc<dyn ControlPipe>,
        Arc::clone(&rx) as Arc<dyn BulkPipe>,
        Arc::clone(&tx) as Arc<dyn BulkPipe>,
    )
    .expect("device open should succeed");
    Rig {
        control,
        rx,
        tx,
        device,
    }
}

fn rx_request(format: DataFormat, channel: u8) -> StreamRequest {
    StreamRequest {
        direction: Direction::Rx,
        channel,
        format,
        link_format: None,
        fifo_size: 0,
        align_phase: false,
    }
}

fn tx_request(format: DataFormat, channel: u8) -> StreamRequest {
    StreamRequest {
        direction: Direction::Tx,
        channel,
        format,
        link_format: None,
        fifo_size: 0,
        align_phase: false,
    }
}

#[test]
fn test_rx_timestamps_monotonic_and_data_intact() {
    let rig = open_rig(LinkFormat::I12, 1, 8);
    let spf = rig.rx.samples_per_frame();

    let handle = rig
        .device
        .setup_stream(&rx_request(DataFormat::I12, 0))
        .expect("stream setup should succeed");
    rig.device.start_stream(handle).expect("stream start should succeed");
    assert_eq!(rig.control.fifo_resets(), 1);

    let mut last_timestamp = None;
    for _ in 0..4 {
        let mut buf = vec![SampleI16::default(); spf];
        let mut meta = StreamMeta::default();
        let produced = rig
            .device
            .recv_stream(
                handle,
                &mut ironsdr::stream::codec::SampleBufferMut::I16(&mut buf),
                spf,
                Some(&mut meta),
                Duration::from_secs(1),
            )
            .expect("receive should succeed");
        assert_eq!(produced, spf);

        // Strictly monotonic sample clock, one frame per read.
        if let Some(prev) = last_timestamp {
            assert!(meta.timestamp >= prev + spf as u64);
        }
        last_timestamp = Some(meta.timestamp);

        for (n, sample) in buf.iter().enumerate() {
            assert_eq!(*sample, ramp(meta.timestamp, n, 0), "sample {}", n);
        }
    }

    let status = rig
        .device
        .get_stream_status(handle)
        .expect("status should succeed");
    assert!(status.active);
    assert_eq!(status.dropped, 0);
    assert!(status.timestamp >= 4 * spf as u64);

    rig.device.stop_stream(handle).expect("stream stop should succeed");
    let status = rig
        .device
        .get_stream_status(handle)
        .expect("status should succeed");
    assert!(!status.active);
    assert_eq!(status.fifo_filled, 0);
}

#[test]
fn test_rx_gap_counted_as_loss() {
    let rig = open_rig(LinkFormat::I16, 1, 2);
    let spf = rig.rx.samples_per_frame();

    let handle = rig
        .device
        .setup_stream(&rx_request(DataFormat::I16, 0))
        .expect("stream setup should succeed");
    rig.device.start_stream(handle).expect("stream start should succeed");

    let mut buf = vec![SampleI16::default(); spf];
    for _ in 0..2 {
        let produced = rig
            .device
            .recv_stream(
                handle,
                &mut ironsdr::stream::codec::SampleBufferMut::I16(&mut buf),
                spf,
                None,
                Duration::from_secs(1),
            )
            .expect("receive should succeed");
        assert_eq!(produced, spf);
    }

    // Drop five frames' worth of samples on the link, then resume.
    let skipped = 5 * spf as u64;
    rig.rx.skip_samples(skipped);
    rig.rx.add_budget(2);

    let mut meta = StreamMeta::default();
    let produced = rig
        .device
        .recv_stream(
            handle,
            &mut ironsdr::stream::codec::SampleBufferMut::I16(&mut buf),
            spf,
            Some(&mut meta),
            Duration::from_secs(1),
        )
        .expect("receive should succeed");
    assert_eq!(produced, spf);
    assert_eq!(meta.timestamp, 2 * spf as u64 + skipped);

    let status = rig
        .device
        .get_stream_status(handle)
        .expect("status should succeed");
    assert_eq!(status.dropped, skipped, "loss must count the gap samples");
    assert_eq!(status.underrun, 0);

    rig.device.stop_stream(handle).expect("stream stop should succeed");
}

#[test]
fn test_tx_scheduled_burst_header() {
    let rig = open_rig(LinkFormat::I16, 1, 4);
    let spf = rig.rx.samples_per_frame();

    let rx_handle = rig
        .device
        .setup_stream(&rx_request(DataFormat::I16, 0))
        .expect("rx setup should succeed");
    let tx_handle = rig
        .device
        .setup_stream(&tx_request(DataFormat::I16, 0))
        .expect("tx setup should succeed");
    rig.device.start_stream(rx_handle).expect("start should succeed");

    // Learn the current hardware clock from a received frame.
    let mut buf = vec![SampleI16::default(); spf];
    let mut meta = StreamMeta::default();
    rig.device
        .recv_stream(
            rx_handle,
            &mut ironsdr::stream::codec::SampleBufferMut::I16(&mut buf),
            spf,
            Some(&mut meta),
            Duration::from_secs(1),
        )
        .expect("receive should succeed");
    let r = meta.timestamp;

    // Schedule a full frame eight frames into the future.
    let scheduled = r + 8 * spf as u64;
    let samples: Vec<SampleI16> = (0..spf).map(|n| SampleI16::new(n as i16, 1)).collect();
    let sent = rig
        .device
        .send_stream(
            tx_handle,
            ironsdr::stream::codec::SampleBuffer::I16(&samples),
            spf,
            Some(&StreamMeta {
                timestamp: scheduled,
                use_timestamp: true,
                flush: true,
            }),
            Duration::from_secs(1),
        )
        .expect("send should succeed");
    assert_eq!(sent, spf as i64);

    wait_until("tx frame capture", || !rig.tx.captured_frames().is_empty());
    let frames = rig.tx.captured_frames();
    let header = FrameHeader::read_from(&frames[0]).expect("header should parse");
    assert_eq!(header.timestamp, scheduled);
    assert!(header.flags.flush);
    assert!(!header.flags.tx_immediate);

    rig.device.stop_stream(rx_handle).expect("stop should succeed");
}

#[test]
fn test_tx_late_submission_counts_underrun() {
    let rig = open_rig(LinkFormat::I16, 1, 4);
    let spf = rig.rx.samples_per_frame();

    let rx_handle = rig
        .device
        .setup_stream(&rx_request(DataFormat::I16, 0))
        .expect("rx setup should succeed");
    let tx_handle = rig
        .device
        .setup_stream(&tx_request(DataFormat::I16, 0))
        .expect("tx setup should succeed");
    rig.device.start_stream(rx_handle).expect("start should succeed");

    let mut buf = vec![SampleI16::default(); spf];
    rig.device
        .recv_stream(
            rx_handle,
            &mut ironsdr::stream::codec::SampleBufferMut::I16(&mut buf),
            spf,
            None,
            Duration::from_secs(1),
        )
        .expect("receive should succeed");

    // The hardware clock has passed tick 1 long ago.
    let samples = vec![SampleI16::default(); spf];
    let sent = rig
        .device
        .send_stream(
            tx_handle,
            ironsdr::stream::codec::SampleBuffer::I16(&samples),
            spf,
            Some(&StreamMeta {
                timestamp: 1,
                use_timestamp: true,
                flush: false,
            }),
            Duration::from_secs(1),
        )
        .expect("late send reports, not errors");
    assert!(sent <= 0, "late submission must report lateness, got {}", sent);

    let status = rig
        .device
        .get_stream_status(tx_handle)
        .expect("status should succeed");
    assert_eq!(status.underrun, 1, "exactly one underrun increment");

    // Delta semantics: the next query reports no new underruns.
    let status = rig
        .device
        .get_stream_status(tx_handle)
        .expect("status should succeed");
    assert_eq!(status.underrun, 0);

    rig.device.stop_stream(rx_handle).expect("stop should succeed");
}

#[test]
fn test_tx_partial_frame_held_until_flush() {
    let rig = open_rig(LinkFormat::I16, 1, 0);

    let tx_handle = rig
        .device
        .setup_stream(&tx_request(DataFormat::I16, 0))
        .expect("tx setup should succeed");
    rig.device.start_stream(tx_handle).expect("start should succeed");

    let samples = vec![SampleI16::new(7, -7); 100];
    let sent = rig
        .device
        .send_stream(
            tx_handle,
            ironsdr::stream::codec::SampleBuffer::I16(&samples),
            100,
            None,
            Duration::from_secs(1),
        )
        .expect("send should succeed");
    assert_eq!(sent, 100);

    // Not a full frame and no flush requested: nothing goes out.
    std::thread::sleep(Duration::from_millis(100));
    assert!(rig.tx.captured_frames().is_empty());

    let sent = rig
        .device
        .send_stream(
            tx_handle,
            ironsdr::stream::codec::SampleBuffer::I16(&[]),
            0,
            Some(&StreamMeta {
                timestamp: 0,
                use_timestamp: false,
                flush: true,
            }),
            Duration::from_secs(1),
        )
        .expect("flush send should succeed");
    assert_eq!(sent, 0);

    wait_until("flushed frame", || !rig.tx.captured_frames().is_empty());
    let frames = rig.tx.captured_frames();
    let header = FrameHeader::read_from(&frames[0]).expect("header should parse");
    assert_eq!(usize::from(header.payload_bytes), 100 * 4);
    assert!(header.flags.flush);
    assert!(header.flags.tx_immediate);

    rig.device.stop_stream(tx_handle).expect("stop should succeed");
}

#[test]
fn test_mimo_rx_single_channel_reads_use_cache() {
    let rig = open_rig(LinkFormat::I16, 2, 4);
    let spf = rig.rx.samples_per_frame();

    let h0 = rig
        .device
        .setup_stream(&rx_request(DataFormat::I16, 0))
        .expect("setup ch0 should succeed");
    let h1 = rig
        .device
        .setup_stream(&rx_request(DataFormat::I16, 1))
        .expect("setup ch1 should succeed");
    rig.device.start_stream(h0).expect("start should succeed");

    let mut buf0 = vec![SampleI16::default(); spf];
    let mut meta0 = StreamMeta::default();
    let produced = rig
        .device
        .recv_stream(
            h0,
            &mut ironsdr::stream::codec::SampleBufferMut::I16(&mut buf0),
            spf,
            Some(&mut meta0),
            Duration::from_secs(1),
        )
        .expect("ch0 receive should succeed");
    assert_eq!(produced, spf);

    // Channel 1 was fetched alongside channel 0 and must come from the
    // cache with the same timestamp.
    let mut buf1 = vec![SampleI16::default(); spf];
    let mut meta1 = StreamMeta::default();
    let produced = rig
        .device
        .recv_stream(
            h1,
            &mut ironsdr::stream::codec::SampleBufferMut::I16(&mut buf1),
            spf,
            Some(&mut meta1),
            Duration::from_secs(1),
        )
        .expect("ch1 receive should succeed");
    assert_eq!(produced, spf);
    assert_eq!(meta1.timestamp, meta0.timestamp);

    for n in 0..spf {
        assert_eq!(buf0[n], ramp(meta0.timestamp, n, 0));
        assert_eq!(buf1[n], ramp(meta1.timestamp, n, 1));
    }

    rig.device.stop_stream(h0).expect("stop should succeed");
}

#[test]
fn test_mimo_tx_write_waits_for_both_channels() {
    let rig = open_rig(LinkFormat::I16, 1, 0);

    let h0 = rig
        .device
        .setup_stream(&tx_request(DataFormat::I16, 0))
        .expect("setup ch0 should succeed");
    let h1 = rig
        .device
        .setup_stream(&tx_request(DataFormat::I16, 1))
        .expect("setup ch1 should succeed");
    rig.device.start_stream(h0).expect("start should succeed");

    let codec = PacketCodec::new(LinkFormat::I16, 2);
    let spf = codec.samples_per_frame();
    let a: Vec<SampleI16> = (0..spf).map(|n| SampleI16::new(n as i16, 0)).collect();
    let b: Vec<SampleI16> = (0..spf).map(|n| SampleI16::new(0, n as i16)).collect();

    let sent = rig
        .device
        .send_stream(
            h0,
            ironsdr::stream::codec::SampleBuffer::I16(&a),
            spf,
            None,
            Duration::from_secs(1),
        )
        .expect("ch0 send should succeed");
    assert_eq!(sent, spf as i64);

    // Only one channel submitted: the frame is held back.
    std::thread::sleep(Duration::from_millis(50));
    assert!(rig.tx.captured_frames().is_empty());

    let sent = rig
        .device
        .send_stream(
            h1,
            ironsdr::stream::codec::SampleBuffer::I16(&b),
            spf,
            None,
            Duration::from_secs(1),
        )
        .expect("ch1 send should succeed");
    assert_eq!(sent, spf as i64);

    wait_until("interleaved frame", || !rig.tx.captured_frames().is_empty());
    let frames = rig.tx.captured_frames();
    let mut out = vec![Vec::new(), Vec::new()];
    let (_, n) = codec
        .unpack_frame(&frames[0], &mut out)
        .expect("unpack should succeed");
    assert_eq!(n, spf);
    assert_eq!(out[0], a);
    assert_eq!(out[1], b);

    rig.device.stop_stream(h0).expect("stop should succeed");
}

#[test]
fn test_configure_refused_while_streaming() {
    let rig = open_rig(LinkFormat::I16, 1, 4);
    let handle = rig
        .device
        .setup_stream(&rx_request(DataFormat::I16, 0))
        .expect("setup should succeed");
    rig.device.start_stream(handle).expect("start should succeed");

    let err = rig
        .device
        .set_lo_frequency(Direction::Rx, 0, 868e6)
        .expect_err("configure must be refused while streaming");
    assert!(matches!(err, ironsdr::Error::Busy));

    rig.device.stop_stream(handle).expect("stop should succeed");
    rig.device
        .set_lo_frequency(Direction::Rx, 0, 868e6)
        .expect("configure works again after stop");
}

#[test]
fn test_stop_releases_every_pool_buffer() {
    let control = Arc::new(MockControlPipe::new());
    let rx = Arc::new(MockRxPipe::new(LinkFormat::I16, 1, 64));
    let tx = Arc::new(MockTxPipe::new());
    let fpga = Arc::new(Fpga::new(Arc::clone(&control) as Arc<dyn ControlPipe>));
    let spf = rx.samples_per_frame();

    let streamer = Streamer::setup(
        StreamConfig {
            rx_channels: vec![0],
            tx_channels: vec![0],
            format: DataFormat::I16,
            link_format: LinkFormat::I16,
            buffer_size: 4 * spf,
            align_phase: true,
            ..StreamConfig::default()
        },
        Arc::clone(&rx) as Arc<dyn BulkPipe>,
        Arc::clone(&tx) as Arc<dyn BulkPipe>,
        fpga,
    )
    .expect("streamer setup should succeed");

    streamer.start().expect("start should succeed");
    // Both directions enabled in the gateware.
    assert_eq!(control.fpga_reg(0x0007), 3);

    let mut buf = vec![SampleI16::default(); spf];
    let mut refs: Vec<&mut [SampleI16]> = vec![buf.as_mut_slice()];
    let (produced, timestamp) = streamer
        .rx_read(&mut refs, spf, Duration::from_secs(1))
        .expect("read should succeed");
    assert_eq!(produced, spf);
    // Phase-aligned start: the clock began at zero.
    assert_eq!(timestamp, 0);

    let samples = vec![SampleI16::new(1, 2); spf];
    streamer
        .tx_write(
            &[&samples],
            spf,
            &StreamMeta {
                timestamp: 0,
                use_timestamp: false,
                flush: true,
            },
            Duration::from_secs(1),
        )
        .expect("write should succeed");

    // The small FIFO cannot hold the whole budget: overruns accumulate
    // while buffers keep cycling through the pool.
    std::thread::sleep(Duration::from_millis(150));
    let rx_status = streamer.status(Direction::Rx);
    assert!(rx_status.overrun > 0, "expected overruns with a tiny FIFO");

    streamer.stop();
    assert_eq!(streamer.pool_used(), 0, "every frame buffer must return");
    assert_eq!(streamer.status(Direction::Rx).fifo_filled, 0);
    assert_eq!(streamer.status(Direction::Tx).fifo_filled, 0);
    assert_eq!(control.fpga_reg(0x0007), 0);

    // A stopped streamer can be armed again.
    rx.add_budget(4);
    streamer.start().expect("restart should succeed");
    streamer.stop();
    assert_eq!(streamer.pool_used(), 0);
}
