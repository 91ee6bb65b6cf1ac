//! Wire format of the native capture processes
//!
//! Audio arrives as `MCAP` packets: a 24-byte little-endian header followed by
//! interleaved 16-bit PCM. Raw video arrives as NV12 frames; encoded video as
//! AVCC (4-byte big-endian length prefixed NAL units).

use crate::error::{MediaError, MediaResult};
use bytes::{Buf, BufMut, BytesMut};
use std::io::{ErrorKind, Read};

/// "MCAP" read as a little-endian u32
pub const MCAP_MAGIC: u32 = 0x4D43_4150;
/// Protocol version emitted by the capture tools
pub const MCAP_VERSION: u8 = 2;
/// Encoded header size
pub const MCAP_HEADER_LEN: usize = 24;

/// Largest packet accepted, in frames (one second of audio)
const MAX_FRAMES_PER_PACKET: u32 = 48_000;

/// Header of one capture-process audio packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioPacketHeader {
    /// Bits per sample
    pub bits_per_sample: u8,
    /// Interleaved channel count
    pub channels: u8,
    /// Whether samples are floating point
    pub is_float: bool,
    /// Number of frames (samples per channel)
    pub sample_count: u32,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Capture timestamp in milliseconds
    pub timestamp_ms: u64,
}

impl AudioPacketHeader {
    /// Header as written by the capture tools: 16-bit stereo integer PCM at 48 kHz
    pub fn new(sample_count: u32, timestamp_ms: u64) -> Self {
        Self {
            bits_per_sample: 16,
            channels: 2,
            is_float: false,
            sample_count,
            sample_rate: 48_000,
            timestamp_ms,
        }
    }

    /// Decode and validate a header
    pub fn parse(mut data: &[u8]) -> MediaResult<Self> {
        if data.len() < MCAP_HEADER_LEN {
            return Err(MediaError::CaptureProtocol {
                reason: format!("header needs {} bytes, got {}", MCAP_HEADER_LEN, data.len()),
            });
        }
        let magic = data.get_u32_le();
        if magic != MCAP_MAGIC {
            return Err(MediaError::CaptureProtocol {
                reason: format!("bad magic {:#010x}", magic),
            });
        }
        let version = data.get_u8();
        if version != MCAP_VERSION {
            return Err(MediaError::CaptureProtocol {
                reason: format!("unsupported version {}", version),
            });
        }
        let header = Self {
            bits_per_sample: data.get_u8(),
            channels: data.get_u8(),
            is_float: data.get_u8() != 0,
            sample_count: data.get_u32_le(),
            sample_rate: data.get_u32_le(),
            timestamp_ms: data.get_u64_le(),
        };
        if header.bits_per_sample != 16 || header.is_float {
            return Err(MediaError::CaptureProtocol {
                reason: format!(
                    "only 16-bit integer PCM is supported (bits {}, float {})",
                    header.bits_per_sample, header.is_float
                ),
            });
        }
        if header.channels == 0 || header.sample_count > MAX_FRAMES_PER_PACKET {
            return Err(MediaError::CaptureProtocol {
                reason: format!(
                    "implausible packet: {} channels, {} frames",
                    header.channels, header.sample_count
                ),
            });
        }
        Ok(header)
    }

    /// Encode the header
    pub fn write_to(&self, out: &mut BytesMut) {
        out.reserve(MCAP_HEADER_LEN);
        out.put_u32_le(MCAP_MAGIC);
        out.put_u8(MCAP_VERSION);
        out.put_u8(self.bits_per_sample);
        out.put_u8(self.channels);
        out.put_u8(self.is_float as u8);
        out.put_u32_le(self.sample_count);
        out.put_u32_le(self.sample_rate);
        out.put_u64_le(self.timestamp_ms);
    }

    /// Size of the PCM body following the header
    pub fn payload_len(&self) -> usize {
        self.sample_count as usize * self.channels as usize * (self.bits_per_sample as usize / 8)
    }
}

/// One decoded audio packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioPacket {
    /// Packet header
    pub header: AudioPacketHeader,
    /// Interleaved samples
    pub samples: Vec<i16>,
}

impl AudioPacket {
    /// Serialize header and body
    pub fn to_bytes(&self) -> BytesMut {
        let mut out = BytesMut::with_capacity(MCAP_HEADER_LEN + self.samples.len() * 2);
        self.header.write_to(&mut out);
        for &sample in &self.samples {
            out.put_i16_le(sample);
        }
        out
    }
}

/// Read the next audio packet; `None` at a clean end of stream
pub fn read_audio_packet(reader: &mut impl Read) -> MediaResult<Option<AudioPacket>> {
    let mut header_bytes = [0u8; MCAP_HEADER_LEN];
    match reader.read_exact(&mut header_bytes) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let header = AudioPacketHeader::parse(&header_bytes)?;

    let mut body = vec![0u8; header.payload_len()];
    reader.read_exact(&mut body).map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            MediaError::CaptureProtocol {
                reason: "stream ended inside a packet".to_string(),
            }
        } else {
            e.into()
        }
    })?;
    let mut body = &body[..];
    let mut samples = Vec::with_capacity(body.len() / 2);
    while body.remaining() >= 2 {
        samples.push(body.get_i16_le());
    }
    Ok(Some(AudioPacket { header, samples }))
}

/// Size of an NV12 frame
pub fn nv12_frame_size(width: u32, height: u32) -> usize {
    width as usize * height as usize * 3 / 2
}
