//! H.264 access unit → RTP payloads (RFC 6184, single NAL unit + FU-A)
//!
//! The marker bit is set on exactly one payload per access unit: the last
//! payload of the last NAL unit.

use super::nal::split_annexb;
use crate::rtp::{RtpPacket, RtpSequencer};
use bytes::Bytes;

/// Largest RTP payload emitted, chosen to stay under a typical path MTU
pub const DEFAULT_MAX_PAYLOAD: usize = 1400;

const FU_A: u8 = 28;

/// One RTP payload produced by the packetizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPayload {
    /// Payload bytes (no start codes)
    pub bytes: Bytes,
    /// RTP marker bit
    pub marker: bool,
}

/// Packetizer configuration
#[derive(Debug, Clone)]
pub struct PacketizerConfig {
    /// Maximum payload size per packet
    pub max_payload: usize,
}

impl Default for PacketizerConfig {
    fn default() -> Self {
        Self {
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// Stateful per-stream H.264 packetizer
#[derive(Debug, Clone)]
pub struct H264Packetizer {
    config: PacketizerConfig,
    sequencer: RtpSequencer,
}

impl H264Packetizer {
    /// Create a packetizer for one outgoing video stream
    pub fn new(ssrc: u32, payload_type: u8) -> Self {
        Self::with_sequencer(PacketizerConfig::default(), RtpSequencer::new(ssrc, payload_type))
    }

    /// Create a packetizer with explicit configuration and sequencing state
    pub fn with_sequencer(config: PacketizerConfig, sequencer: RtpSequencer) -> Self {
        Self { config, sequencer }
    }

    /// Sequencing state of the stream
    pub fn sequencer(&self) -> &RtpSequencer {
        &self.sequencer
    }

    /// Mutable sequencing state, used when the transport reassigns the SSRC
    pub fn sequencer_mut(&mut self) -> &mut RtpSequencer {
        &mut self.sequencer
    }

    /// Split one Annex-B access unit into RTP payloads.
    ///
    /// Advances the stream timestamp by `timestamp_increment` when at least one
    /// payload is produced.
    pub fn packetize(&mut self, access_unit: &[u8], timestamp_increment: u32) -> Vec<RtpPayload> {
        let out = fragment_access_unit(access_unit, self.config.max_payload);
        if !out.is_empty() {
            self.sequencer.advance(timestamp_increment);
        }
        out
    }

    /// Packetize and wrap each payload in an RTP packet with sequence numbers assigned
    pub fn packetize_to_rtp(
        &mut self,
        access_unit: &[u8],
        timestamp_increment: u32,
    ) -> Vec<RtpPacket> {
        self.packetize(access_unit, timestamp_increment)
            .into_iter()
            .map(|p| self.sequencer.next_packet(p.bytes, p.marker))
            .collect()
    }
}

/// Stateless fragmentation of an access unit into payloads of at most `max_payload` bytes
pub fn fragment_access_unit(access_unit: &[u8], max_payload: usize) -> Vec<RtpPayload> {
    let nalus: Vec<&[u8]> = split_annexb(access_unit)
        .into_iter()
        .filter(|n| !n.is_empty())
        .collect();
    let mut out = Vec::new();
    let frag_budget = max_payload.saturating_sub(2);
    if frag_budget == 0 {
        return out;
    }

    for nalu in &nalus {
        if nalu.len() <= max_payload {
            out.push(RtpPayload {
                bytes: Bytes::copy_from_slice(nalu),
                marker: false,
            });
            continue;
        }

        let header = nalu[0];
        let indicator = (header & 0xE0) | FU_A;
        let nal_type = header & 0x1F;
        let mut offset = 1;
        while offset < nalu.len() {
            let take = (nalu.len() - offset).min(frag_budget);
            let start = if offset == 1 { 0x80 } else { 0 };
            let end = if offset + take == nalu.len() { 0x40 } else { 0 };
            let mut payload = Vec::with_capacity(2 + take);
            payload.push(indicator);
            payload.push(start | end | nal_type);
            payload.extend_from_slice(&nalu[offset..offset + take]);
            out.push(RtpPayload {
                bytes: Bytes::from(payload),
                marker: false,
            });
            offset += take;
        }
    }

    if let Some(last) = out.last_mut() {
        last.marker = true;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::h264::assembler::NalFrameAssembler;
    use crate::h264::nal::join_annexb;

    fn nal(ntype: u8, len: usize) -> Vec<u8> {
        let mut v = vec![0x60 | ntype];
        v.extend((0..len - 1).map(|i| (i % 251) as u8 + 1));
        v
    }

    #[test]
    fn test_small_units_are_single_packets() {
        let au = join_annexb([nal(7, 12).as_slice(), nal(8, 4).as_slice(), nal(5, 900).as_slice()]);
        let payloads = fragment_access_unit(&au, DEFAULT_MAX_PAYLOAD);
        assert_eq!(payloads.len(), 3);
        assert_eq!(payloads.iter().filter(|p| p.marker).count(), 1);
        assert!(payloads[2].marker);
        assert_eq!(payloads[0].bytes[0] & 0x1F, 7);
    }

    #[test]
    fn test_large_unit_fragmented() {
        let big = nal(5, 3000);
        let au = join_annexb([big.as_slice()]);
        let payloads = fragment_access_unit(&au, DEFAULT_MAX_PAYLOAD);
        assert_eq!(payloads.len(), 3);
        assert!(payloads.iter().all(|p| p.bytes.len() <= DEFAULT_MAX_PAYLOAD));
        assert_eq!(payloads[0].bytes[0] & 0x1F, 28);
        assert_eq!(payloads[0].bytes[1], 0x80 | 5);
        assert_eq!(payloads[1].bytes[1], 5);
        assert_eq!(payloads[2].bytes[1], 0x40 | 5);
        assert!(!payloads[0].marker && !payloads[1].marker && payloads[2].marker);
    }

    #[test]
    fn test_marker_only_on_last_nal_when_first_is_fragmented() {
        let au = join_annexb([nal(5, 2000).as_slice(), nal(1, 50).as_slice()]);
        let payloads = fragment_access_unit(&au, DEFAULT_MAX_PAYLOAD);
        let markers: Vec<bool> = payloads.iter().map(|p| p.marker).collect();
        assert_eq!(markers, vec![false, false, true]);
    }

    #[test]
    fn test_empty_access_unit() {
        let mut p = H264Packetizer::with_sequencer(
            PacketizerConfig::default(),
            RtpSequencer::with_initial(1, 96, 0, 1000),
        );
        assert!(p.packetize_to_rtp(&[], 3000).is_empty());
        assert_eq!(p.sequencer().timestamp(), 1000);
        assert_eq!(p.sequencer().next_sequence(), 0);
    }

    #[test]
    fn test_sequence_and_timestamp_per_access_unit() {
        let mut p = H264Packetizer::with_sequencer(
            PacketizerConfig::default(),
            RtpSequencer::with_initial(0xABCD, 97, 65534, 0),
        );
        let au = join_annexb([nal(5, 3000).as_slice()]);
        let first = p.packetize_to_rtp(&au, 3000);
        let second = p.packetize_to_rtp(&au, 3000);

        let seqs: Vec<u16> = first.iter().chain(second.iter()).map(|p| p.sequence).collect();
        assert_eq!(seqs, vec![65534, 65535, 0, 1, 2, 3]);
        assert!(first.iter().all(|p| p.timestamp == 3000));
        assert!(second.iter().all(|p| p.timestamp == 6000));
        assert!(first.iter().all(|p| p.payload_type == 97 && p.ssrc == 0xABCD));
    }

    #[test]
    fn test_round_trip_through_assembler() {
        let au = join_annexb([
            nal(7, 20).as_slice(),
            nal(8, 6).as_slice(),
            nal(5, 5000).as_slice(),
        ]);
        let mut p = H264Packetizer::new(7, 96);
        let packets = p.packetize_to_rtp(&au, 3000);
        let mut a = NalFrameAssembler::new();
        let mut out = None;
        for pkt in &packets {
            out = a.push(&pkt.payload, pkt.timestamp, pkt.sequence, pkt.marker);
        }
        let frame = out.unwrap();
        assert_eq!(frame.data, au);
        assert!(frame.is_keyframe);
    }
}
