//! RTP packet model and wire encoding (RFC 3550)
//!
//! Only the fixed header, CSRC list, header extension and padding are
//! understood. Session logic (jitter, RTCP) lives elsewhere.

use crate::error::{Result, SfuRtcError};
use crate::role::PayloadKind;
use bytes::{BufMut, Bytes, BytesMut};

/// RTP protocol version
pub const RTP_VERSION: u8 = 2;
/// Fixed header size in bytes
pub const RTP_HEADER_LEN: usize = 12;

/// Complete RTP packet (header fields + payload)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    /// Marker bit
    pub marker: bool,
    /// Payload type (7 bits)
    pub payload_type: u8,
    /// Sequence number
    pub sequence: u16,
    /// Media timestamp
    pub timestamp: u32,
    /// Synchronization source
    pub ssrc: u32,
    /// Contributing sources
    pub csrcs: Vec<u32>,
    /// Payload with padding removed
    pub payload: Bytes,
}

impl RtpPacket {
    /// Convenience constructor for a packet without CSRCs
    pub fn new(
        payload_type: u8,
        marker: bool,
        sequence: u16,
        timestamp: u32,
        ssrc: u32,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            marker,
            payload_type,
            sequence,
            timestamp,
            ssrc,
            csrcs: Vec::new(),
            payload: payload.into(),
        }
    }

    /// Parse a packet from the wire
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < RTP_HEADER_LEN {
            return Err(SfuRtcError::MalformedRtp {
                reason: format!("packet too short: {} bytes", data.len()),
            });
        }

        let version = data[0] >> 6;
        if version != RTP_VERSION {
            return Err(SfuRtcError::MalformedRtp {
                reason: format!("unsupported version {}", version),
            });
        }
        let padding = data[0] & 0x20 != 0;
        let extension = data[0] & 0x10 != 0;
        let csrc_count = (data[0] & 0x0F) as usize;
        let marker = data[1] & 0x80 != 0;
        let payload_type = data[1] & 0x7F;
        let sequence = u16::from_be_bytes([data[2], data[3]]);
        let timestamp = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let ssrc = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

        let mut offset = RTP_HEADER_LEN;
        if data.len() < offset + csrc_count * 4 {
            return Err(SfuRtcError::MalformedRtp {
                reason: "truncated CSRC list".to_string(),
            });
        }
        let csrcs = data[offset..offset + csrc_count * 4]
            .chunks_exact(4)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        offset += csrc_count * 4;

        if extension {
            if data.len() < offset + 4 {
                return Err(SfuRtcError::MalformedRtp {
                    reason: "truncated header extension".to_string(),
                });
            }
            let words = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
            offset += 4 + words * 4;
            if data.len() < offset {
                return Err(SfuRtcError::MalformedRtp {
                    reason: "header extension exceeds packet".to_string(),
                });
            }
        }

        let mut end = data.len();
        if padding {
            let pad = data[end - 1] as usize;
            if pad == 0 || offset + pad > end {
                return Err(SfuRtcError::MalformedRtp {
                    reason: format!("invalid padding length {}", pad),
                });
            }
            end -= pad;
        }

        Ok(Self {
            marker,
            payload_type,
            sequence,
            timestamp,
            ssrc,
            csrcs,
            payload: Bytes::copy_from_slice(&data[offset..end]),
        })
    }

    /// Serialize to wire format (no extension, no padding)
    pub fn to_bytes(&self) -> Bytes {
        let mut buf =
            BytesMut::with_capacity(RTP_HEADER_LEN + self.csrcs.len() * 4 + self.payload.len());
        buf.put_u8((RTP_VERSION << 6) | (self.csrcs.len().min(15) as u8));
        buf.put_u8(((self.marker as u8) << 7) | (self.payload_type & 0x7F));
        buf.put_u16(self.sequence);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
        for csrc in self.csrcs.iter().take(15) {
            buf.put_u32(*csrc);
        }
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Typed interpretation of the payload type
    pub fn kind(&self) -> Option<PayloadKind> {
        PayloadKind::from_payload_type(self.payload_type)
    }
}

/// Per-stream sequence number and timestamp state for an outgoing track
#[derive(Debug, Clone)]
pub struct RtpSequencer {
    ssrc: u32,
    payload_type: u8,
    next_sequence: u16,
    timestamp: u32,
}

impl RtpSequencer {
    /// Create a sequencer starting from random sequence and timestamp values
    pub fn new(ssrc: u32, payload_type: u8) -> Self {
        Self::with_initial(ssrc, payload_type, rand::random(), rand::random())
    }

    /// Create a sequencer with explicit initial values
    pub fn with_initial(ssrc: u32, payload_type: u8, sequence: u16, timestamp: u32) -> Self {
        Self {
            ssrc,
            payload_type,
            next_sequence: sequence,
            timestamp,
        }
    }

    /// Synchronization source of the stream
    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Replace the SSRC (after the transport assigns one)
    pub fn set_ssrc(&mut self, ssrc: u32) {
        self.ssrc = ssrc;
    }

    /// Payload type stamped on each packet
    pub fn payload_type(&self) -> u8 {
        self.payload_type
    }

    /// Timestamp of the most recent access unit
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Sequence number the next packet will carry
    pub fn next_sequence(&self) -> u16 {
        self.next_sequence
    }

    /// Advance the media clock by one frame
    pub fn advance(&mut self, timestamp_increment: u32) -> u32 {
        self.timestamp = self.timestamp.wrapping_add(timestamp_increment);
        self.timestamp
    }

    /// Wrap a payload into the next packet of the stream
    pub fn next_packet(&mut self, payload: impl Into<Bytes>, marker: bool) -> RtpPacket {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        RtpPacket::new(
            self.payload_type,
            marker,
            sequence,
            self.timestamp,
            self.ssrc,
            payload,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_then_parse() {
        let packet = RtpPacket::new(111, true, 65535, 960, 0xDEADBEEF, vec![1u8, 2, 3]);
        let wire = packet.to_bytes();
        assert_eq!(wire[0], 0x80);
        assert_eq!(wire[1], 0x80 | 111);
        assert_eq!(RtpPacket::parse(&wire).unwrap(), packet);
    }

    #[test]
    fn test_parse_skips_extension_and_padding() {
        let mut wire = vec![0xB0, 96, 0, 7, 0, 0, 0, 1, 0, 0, 0, 9];
        // one-word extension
        wire.extend_from_slice(&[0xBE, 0xDE, 0, 1, 0xAA, 0xBB, 0xCC, 0xDD]);
        wire.extend_from_slice(&[0x65, 0x88]);
        // two padding bytes
        wire.extend_from_slice(&[0, 2]);
        let packet = RtpPacket::parse(&wire).unwrap();
        assert_eq!(packet.sequence, 7);
        assert_eq!(packet.ssrc, 9);
        assert_eq!(&packet.payload[..], &[0x65, 0x88]);
    }

    #[test]
    fn test_parse_rejects_short_and_bad_version() {
        assert!(RtpPacket::parse(&[0x80, 0]).is_err());
        let wire = [0x40u8, 96, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        assert!(matches!(
            RtpPacket::parse(&wire),
            Err(SfuRtcError::MalformedRtp { .. })
        ));
    }

    #[test]
    fn test_sequencer_wraps() {
        let mut seq = RtpSequencer::with_initial(1, 96, u16::MAX, 0);
        let a = seq.next_packet(vec![0u8], false);
        let b = seq.next_packet(vec![0u8], true);
        assert_eq!(a.sequence, u16::MAX);
        assert_eq!(b.sequence, 0);
        assert_eq!(seq.advance(3000), 3000);
    }
}
