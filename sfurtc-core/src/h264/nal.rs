//! NAL unit helpers: start-code splitting, AVCC conversion and SPS parsing

use crate::error::{Result, SfuRtcError};

/// 4-byte Annex-B start code
pub const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// NAL unit type (low five bits of the NAL header)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NalType {
    /// Coded slice of a non-IDR picture
    Slice,
    /// Slice data partition A/B/C
    Partition(u8),
    /// Coded slice of an IDR picture
    Idr,
    /// Supplemental enhancement information
    Sei,
    /// Sequence parameter set
    Sps,
    /// Picture parameter set
    Pps,
    /// Access unit delimiter
    Aud,
    /// Single-time aggregation packet (RTP only)
    StapA,
    /// Fragmentation unit A (RTP only)
    FuA,
    /// Anything else
    Other(u8),
}

impl NalType {
    /// Classify a NAL header byte
    pub fn from_header(header: u8) -> Self {
        match header & 0x1F {
            1 => NalType::Slice,
            t @ 2..=4 => NalType::Partition(t),
            5 => NalType::Idr,
            6 => NalType::Sei,
            7 => NalType::Sps,
            8 => NalType::Pps,
            9 => NalType::Aud,
            24 => NalType::StapA,
            28 => NalType::FuA,
            t => NalType::Other(t),
        }
    }

    /// Raw type value
    pub fn id(&self) -> u8 {
        match self {
            NalType::Slice => 1,
            NalType::Partition(t) => *t,
            NalType::Idr => 5,
            NalType::Sei => 6,
            NalType::Sps => 7,
            NalType::Pps => 8,
            NalType::Aud => 9,
            NalType::StapA => 24,
            NalType::FuA => 28,
            NalType::Other(t) => *t,
        }
    }

    /// Video coding layer NAL (carries picture data)
    pub fn is_vcl(&self) -> bool {
        matches!(self, NalType::Slice | NalType::Partition(_) | NalType::Idr)
    }
}

/// Find the next start code at or after `from`, returning (position, length)
fn find_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            if i > from && data[i - 1] == 0 {
                return Some((i - 1, 4));
            }
            return Some((i, 3));
        }
        i += 1;
    }
    None
}

/// Split an Annex-B byte stream into NAL units (start codes removed).
///
/// Accepts 3- and 4-byte start codes. Input without any start code is
/// treated as a single NAL unit.
pub fn split_annexb(data: &[u8]) -> Vec<&[u8]> {
    let Some((mut pos, mut len)) = find_start_code(data, 0) else {
        return if data.is_empty() { Vec::new() } else { vec![data] };
    };

    let mut out = Vec::new();
    loop {
        let nal_start = pos + len;
        let next = find_start_code(data, nal_start);
        let mut nal_end = next.map(|(p, _)| p).unwrap_or(data.len());
        if next.is_some() {
            // trailing_zero_8bits belong to neither unit
            while nal_end > nal_start && data[nal_end - 1] == 0 {
                nal_end -= 1;
            }
        }
        if nal_end > nal_start {
            out.push(&data[nal_start..nal_end]);
        }
        match next {
            Some((p, l)) => {
                pos = p;
                len = l;
            }
            None => break,
        }
    }
    out
}

/// Join NAL units into an Annex-B access unit with 4-byte start codes
pub fn join_annexb<'a, I>(nals: I) -> Vec<u8>
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut out = Vec::new();
    for nal in nals {
        out.extend_from_slice(&START_CODE);
        out.extend_from_slice(nal);
    }
    out
}

/// Split a 4-byte length-prefixed (AVCC) buffer into NAL units
pub fn split_avcc(data: &[u8]) -> Result<Vec<&[u8]>> {
    let mut out = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        if offset + 4 > data.len() {
            return Err(SfuRtcError::MalformedPayload {
                reason: format!("truncated AVCC length at offset {}", offset),
            });
        }
        let len = u32::from_be_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]) as usize;
        offset += 4;
        if offset + len > data.len() {
            return Err(SfuRtcError::MalformedPayload {
                reason: format!("AVCC unit of {} bytes exceeds buffer", len),
            });
        }
        if len > 0 {
            out.push(&data[offset..offset + len]);
        }
        offset += len;
    }
    Ok(out)
}

/// Convert AVCC (length-prefixed) data to Annex-B
pub fn avcc_to_annexb(data: &[u8]) -> Result<Vec<u8>> {
    Ok(join_annexb(split_avcc(data)?))
}

/// Convert Annex-B data to AVCC (4-byte big-endian length prefixes)
pub fn annexb_to_avcc(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 8);
    for nal in split_annexb(data) {
        out.extend_from_slice(&(nal.len() as u32).to_be_bytes());
        out.extend_from_slice(nal);
    }
    out
}

/// Whether an Annex-B access unit contains an IDR slice
pub fn contains_idr(annexb: &[u8]) -> bool {
    split_annexb(annexb)
        .iter()
        .any(|nal| !nal.is_empty() && NalType::from_header(nal[0]) == NalType::Idr)
}

/// Read the coded picture size from an SPS NAL unit (header byte included)
pub fn sps_dimensions(sps_nal: &[u8]) -> Result<(u32, u32)> {
    if sps_nal.len() < 4 || NalType::from_header(sps_nal[0]) != NalType::Sps {
        return Err(SfuRtcError::InvalidData {
            reason: "not an SPS NAL unit".to_string(),
        });
    }
    let rbsp = h264_reader::rbsp::decode_nal(&sps_nal[1..]);
    let sps = h264_reader::nal::sps::SeqParameterSet::from_bytes(&rbsp).map_err(|e| {
        SfuRtcError::InvalidData {
            reason: format!("bad SPS: {:?}", e),
        }
    })?;
    sps.pixel_dimensions().map_err(|e| SfuRtcError::InvalidData {
        reason: format!("SPS has invalid pixel dimensions: {:?}", e),
    })
}
