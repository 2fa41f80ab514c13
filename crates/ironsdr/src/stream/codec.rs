// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ironwave.io

//! Per-frame sample packing and unpacking.
//!
//! Stateless transformation between per-channel sample slices and the
//! interleaved link-format payload of one frame. Interleave order is
//! `Ch0_I Ch0_Q Ch1_I Ch1_Q ...` per sample.
//!
//! The 12-bit link format packs two values into three bytes:
//!
//! ```text
//! b0 = v0[7:0]
//! b1 = v0[11:8] | v1[3:0] << 4
//! b2 = v1[11:4]
//! ```
//!
//! so one complex sample always occupies exactly three bytes and never
//! straddles a frame boundary.

use crate::config::{FRAME_HEADER_SIZE, FRAME_PAYLOAD_SIZE};
use crate::error::Result;
use crate::stream::frame::{FrameFlags, FrameHeader};
use crate::stream::{DataFormat, LinkFormat, SampleF32, SampleI16};

/// Borrowed caller sample buffer, read side.
#[derive(Debug, Clone, Copy)]
pub enum SampleBuffer<'a> {
    F32(&'a [SampleF32]),
    I16(&'a [SampleI16]),
}

impl SampleBuffer<'_> {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            SampleBuffer::F32(s) => s.len(),
            SampleBuffer::I16(s) => s.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Borrowed caller sample buffer, write side.
#[derive(Debug)]
pub enum SampleBufferMut<'a> {
    F32(&'a mut [SampleF32]),
    I16(&'a mut [SampleI16]),
}

impl SampleBufferMut<'_> {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            SampleBufferMut::F32(s) => s.len(),
            SampleBufferMut::I16(s) => s.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Full scale of the 16-bit link format.
const FS_I16: f32 = 32767.0;
/// Full scale of the 12-bit link format.
const FS_I12: f32 = 2047.0;

fn saturate(x: f32, full_scale: f32) -> i16 {
    (x * full_scale).round().clamp(-full_scale - 1.0, full_scale) as i16
}

/// Convert caller samples into link-domain integers, appending to `dst`.
///
/// `F32` scales to the link full scale and saturates; `I16` host samples are
/// truncated to 12 bits when the link is 12-bit; `I12` host samples are
/// already link-domain.
pub fn convert_to_link(src: SampleBuffer<'_>, host: DataFormat, link: LinkFormat, dst: &mut Vec<SampleI16>) {
    match (src, host, link) {
        (SampleBuffer::F32(s), _, LinkFormat::I16) => {
            dst.extend(s.iter().map(|x| SampleI16::new(saturate(x.i, FS_I16), saturate(x.q, FS_I16))));
        }
        (SampleBuffer::F32(s), _, LinkFormat::I12) => {
            dst.extend(s.iter().map(|x| SampleI16::new(saturate(x.i, FS_I12), saturate(x.q, FS_I12))));
        }
        (SampleBuffer::I16(s), DataFormat::I16, LinkFormat::I12) => {
            dst.extend(s.iter().map(|x| SampleI16::new(x.i >> 4, x.q >> 4)));
        }
        (SampleBuffer::I16(s), _, _) => {
            dst.extend_from_slice(s);
        }
    }
}

/// Convert link-domain integers into caller samples. Writes `src.len()`
/// samples into the head of `dst`.
pub fn convert_from_link(src: &[SampleI16], host: DataFormat, link: LinkFormat, dst: &mut SampleBufferMut<'_>) {
    match (dst, host, link) {
        (SampleBufferMut::F32(d), _, LinkFormat::I16) => {
            for (out, s) in d.iter_mut().zip(src) {
                *out = SampleF32::new(f32::from(s.i) / FS_I16, f32::from(s.q) / FS_I16);
            }
        }
        (SampleBufferMut::F32(d), _, LinkFormat::I12) => {
            for (out, s) in d.iter_mut().zip(src) {
                *out = SampleF32::new(f32::from(s.i) / FS_I12, f32::from(s.q) / FS_I12);
            }
        }
        (SampleBufferMut::I16(d), DataFormat::I16, LinkFormat::I12) => {
            for (out, s) in d.iter_mut().zip(src) {
                *out = SampleI16::new(s.i << 4, s.q << 4);
            }
        }
        (SampleBufferMut::I16(d), _, _) => {
            d[..src.len()].copy_from_slice(src);
        }
    }
}

/// Stateless per-frame packer/unpacker for one direction's channel set.
#[derive(Debug, Clone, Copy)]
pub struct PacketCodec {
    link: LinkFormat,
    channels: usize,
}

impl PacketCodec {
    #[must_use]
    pub fn new(link: LinkFormat, channels: usize) -> Self {
        debug_assert!(channels >= 1);
        Self { link, channels }
    }

    /// Interleaved channel count.
    #[must_use]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Bytes one sample occupies across all interleaved channels.
    #[must_use]
    pub fn bytes_per_group(&self) -> usize {
        self.channels * self.link.bytes_per_sample()
    }

    /// Samples of each channel carried by one full frame.
    #[must_use]
    pub fn samples_per_frame(&self) -> usize {
        FRAME_PAYLOAD_SIZE / self.bytes_per_group()
    }

    /// Pack samples `offset..offset+count` of each channel into `frame`.
    ///
    /// Writes the header and as much payload as fits; returns the number of
    /// samples consumed per channel. `count` is capped to a full frame.
    pub fn pack_frame(
        &self,
        frame: &mut [u8],
        timestamp: u64,
        flags: FrameFlags,
        src: &[&[SampleI16]],
        offset: usize,
        count: usize,
    ) -> usize {
        debug_assert_eq!(src.len(), self.channels);
        let n = count.min(self.samples_per_frame());
        let header = FrameHeader {
            timestamp,
            payload_bytes: (n * self.bytes_per_group()) as u16,
            flags,
        };
        header.write_to(frame);

        let payload = &mut frame[FRAME_HEADER_SIZE..];
        match self.link {
            LinkFormat::I16 => {
                let mut pos = 0;
                for s in 0..n {
                    for ch in src {
                        let sample = ch[offset + s];
                        payload[pos..pos + 2].copy_from_slice(&sample.i.to_le_bytes());
                        payload[pos + 2..pos + 4].copy_from_slice(&sample.q.to_le_bytes());
                        pos += 4;
                    }
                }
            }
            LinkFormat::I12 => {
                let mut pos = 0;
                for s in 0..n {
                    for ch in src {
                        let sample = ch[offset + s];
                        pack_i12_pair(sample.i, sample.q, &mut payload[pos..pos + 3]);
                        pos += 3;
                    }
                }
            }
        }
        n
    }

    /// Unpack a received frame, appending each channel's samples to the
    /// matching `dst` vector.
    ///
    /// Channel slots beyond `dst.len()` are consumed but not written, so a
    /// caller reading fewer channels than the frame interleaves never gets
    /// foreign samples.
    pub fn unpack_frame(
        &self,
        frame: &[u8],
        dst: &mut [Vec<SampleI16>],
    ) -> Result<(FrameHeader, usize)> {
        let header = FrameHeader::read_from(frame)?;
        let n = usize::from(header.payload_bytes) / self.bytes_per_group();
        let payload = &frame[FRAME_HEADER_SIZE..];

        match self.link {
            LinkFormat::I16 => {
                let mut pos = 0;
                for _ in 0..n {
                    for ch in 0..self.channels {
                        if let Some(out) = dst.get_mut(ch) {
                            let i = i16::from_le_bytes([payload[pos], payload[pos + 1]]);
                            let q = i16::from_le_bytes([payload[pos + 2], payload[pos + 3]]);
                            out.push(SampleI16::new(i, q));
                        }
                        pos += 4;
                    }
                }
            }
            LinkFormat::I12 => {
                let mut pos = 0;
                for _ in 0..n {
                    for ch in 0..self.channels {
                        if let Some(out) = dst.get_mut(ch) {
                            let (i, q) = unpack_i12_pair(&payload[pos..pos + 3]);
                            out.push(SampleI16::new(i, q));
                        }
                        pos += 3;
                    }
                }
            }
        }
        Ok((header, n))
    }

    /// Header of a frame without touching the payload.
    pub fn extract_header(frame: &[u8]) -> Result<FrameHeader> {
        FrameHeader::read_from(frame)
    }
}

/// Pack two 12-bit values into three bytes.
fn pack_i12_pair(v0: i16, v1: i16, out: &mut [u8]) {
    out[0] = v0 as u8;
    out[1] = (((v0 >> 8) & 0x0F) as u8) | (((v1 & 0x0F) as u8) << 4);
    out[2] = (v1 >> 4) as u8;
}

/// Unpack three bytes into two sign-extended 12-bit values.
fn unpack_i12_pair(bytes: &[u8]) -> (i16, i16) {
    let v0 = u16::from(bytes[0]) | (u16::from(bytes[1] & 0x0F) << 8);
    let v1 = (u16::from(bytes[1]) >> 4) | (u16::from(bytes[2]) << 4);
    (sign_extend_12(v0), sign_extend_12(v1))
}

fn sign_extend_12(v: u16) -> i16 {
    ((v << 4) as i16) >> 4
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FRAME_SIZE;

    fn random_i12() -> i16 {
        (fastrand::i16(..) << 4) >> 4
    }

    #[test]
    fn test_i12_pack_known_vector() {
        // (1,0) (0,1) (-1,0) (0,-1): 3 bytes per complex sample.
        let samples = [
            SampleI16::new(1, 0),
            SampleI16::new(0, 1),
            SampleI16::new(-1, 0),
            SampleI16::new(0, -1),
        ];
        let mut packed = vec![0u8; samples.len() * 3];
        for (k, s) in samples.iter().enumerate() {
            pack_i12_pair(s.i, s.q, &mut packed[k * 3..k * 3 + 3]);
        }
        assert_eq!(
            packed,
            vec![
                0x01, 0x00, 0x00, // (1, 0)
                0x00, 0x10, 0x00, // (0, 1)
                0xFF, 0x0F, 0x00, // (-1, 0)
                0x00, 0xF0, 0xFF, // (0, -1)
            ]
        );
        for (k, s) in samples.iter().enumerate() {
            let (i, q) = unpack_i12_pair(&packed[k * 3..k * 3 + 3]);
            assert_eq!((i, q), (s.i, s.q));
        }
    }

    #[test]
    fn test_i12_roundtrip_random() {
        fastrand::seed(7);
        for _ in 0..1000 {
            let (v0, v1) = (random_i12(), random_i12());
            let mut bytes = [0u8; 3];
            pack_i12_pair(v0, v1, &mut bytes);
            assert_eq!(unpack_i12_pair(&bytes), (v0, v1));
        }
    }

    #[test]
    fn test_frame_roundtrip_i16_two_channels() {
        fastrand::seed(42);
        let codec = PacketCodec::new(LinkFormat::I16, 2);
        assert_eq!(codec.samples_per_frame(), 510);

        let ch0: Vec<SampleI16> = (0..510)
            .map(|_| SampleI16::new(fastrand::i16(..), fastrand::i16(..)))
            .collect();
        let ch1: Vec<SampleI16> = (0..510)
            .map(|_| SampleI16::new(fastrand::i16(..), fastrand::i16(..)))
            .collect();

        let mut frame = vec![0u8; FRAME_SIZE];
        let packed = codec.pack_frame(
            &mut frame,
            1000,
            FrameFlags::default(),
            &[&ch0, &ch1],
            0,
            510,
        );
        assert_eq!(packed, 510);

        let mut out = vec![Vec::new(), Vec::new()];
        let (header, n) = codec
            .unpack_frame(&frame, &mut out)
            .expect("unpack should succeed");
        assert_eq!(header.timestamp, 1000);
        assert_eq!(n, 510);
        assert_eq!(out[0], ch0);
        assert_eq!(out[1], ch1);
    }

    #[test]
    fn test_frame_roundtrip_i12() {
        fastrand::seed(43);
        let codec = PacketCodec::new(LinkFormat::I12, 1);
        assert_eq!(codec.samples_per_frame(), 1360);

        let ch0: Vec<SampleI16> = (0..200)
            .map(|_| SampleI16::new(random_i12(), random_i12()))
            .collect();
        let mut frame = vec![0u8; FRAME_SIZE];
        let flags = FrameFlags {
            tx_immediate: false,
            flush: true,
        };
        let packed = codec.pack_frame(&mut frame, 0, flags, &[&ch0], 0, 200);
        assert_eq!(packed, 200);

        let header = PacketCodec::extract_header(&frame).expect("header should parse");
        assert_eq!(usize::from(header.payload_bytes), 200 * 3);
        assert!(header.flags.flush);

        let mut out = vec![Vec::new()];
        let (_, n) = codec
            .unpack_frame(&frame, &mut out)
            .expect("unpack should succeed");
        assert_eq!(n, 200);
        assert_eq!(out[0], ch0);
    }

    #[test]
    fn test_unused_channel_slots_skipped() {
        let codec = PacketCodec::new(LinkFormat::I16, 2);
        let ch0 = vec![SampleI16::new(1, 2); 8];
        let ch1 = vec![SampleI16::new(3, 4); 8];
        let mut frame = vec![0u8; FRAME_SIZE];
        codec.pack_frame(&mut frame, 0, FrameFlags::default(), &[&ch0, &ch1], 0, 8);

        // Caller asks for channel 0 only; channel 1 slots are consumed
        // without being written anywhere.
        let mut out = vec![Vec::new()];
        let (_, n) = codec
            .unpack_frame(&frame, &mut out)
            .expect("unpack should succeed");
        assert_eq!(n, 8);
        assert_eq!(out[0], ch0);
    }

    #[test]
    fn test_f32_saturates_at_full_scale() {
        let src = [SampleF32::new(2.0, -2.0)];
        let mut link = Vec::new();
        convert_to_link(
            SampleBuffer::F32(&src),
            DataFormat::F32,
            LinkFormat::I16,
            &mut link,
        );
        assert_eq!(link[0], SampleI16::new(32767, -32768));
    }

    #[test]
    fn test_f32_roundtrip_within_one_lsb() {
        fastrand::seed(44);
        for link_fmt in [LinkFormat::I16, LinkFormat::I12] {
            let src: Vec<SampleF32> = (0..256)
                .map(|_| SampleF32::new(fastrand::f32() * 2.0 - 1.0, fastrand::f32() * 2.0 - 1.0))
                .collect();
            let mut link = Vec::new();
            convert_to_link(
                SampleBuffer::F32(&src),
                DataFormat::F32,
                link_fmt,
                &mut link,
            );
            let mut back = vec![SampleF32::default(); src.len()];
            convert_from_link(
                &link,
                DataFormat::F32,
                link_fmt,
                &mut SampleBufferMut::F32(&mut back),
            );
            let lsb = match link_fmt {
                LinkFormat::I16 => 1.0 / 32767.0,
                LinkFormat::I12 => 1.0 / 2047.0,
            };
            for (a, b) in src.iter().zip(&back) {
                assert!((a.i - b.i).abs() <= lsb);
                assert!((a.q - b.q).abs() <= lsb);
            }
        }
    }

    #[test]
    fn test_i16_host_i12_link_shifts() {
        let src = [SampleI16::new(0x7FF0, -0x8000)];
        let mut link = Vec::new();
        convert_to_link(
            SampleBuffer::I16(&src),
            DataFormat::I16,
            LinkFormat::I12,
            &mut link,
        );
        assert_eq!(link[0], SampleI16::new(0x07FF, -0x0800));

        let mut back = [SampleI16::default(); 1];
        convert_from_link(
            &link,
            DataFormat::I16,
            LinkFormat::I12,
            &mut SampleBufferMut::I16(&mut back),
        );
        assert_eq!(back[0], SampleI16::new(0x7FF0, -0x8000));
    }
}
