//! RFC 6184 RTP → H.264 access unit reassembly
//!
//! Handles single NAL unit packets, STAP-A aggregates and FU-A fragments in
//! non-interleaved mode. Loss policy is drop-and-resync: a damaged frame is
//! never emitted and nothing waits for retransmission.

use super::nal::{join_annexb, NalType};
use tracing::debug;

/// A complete Annex-B access unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessUnit {
    /// Annex-B bytes with 4-byte start codes
    pub data: Vec<u8>,
    /// RTP timestamp shared by all packets of the unit
    pub timestamp: u32,
    /// Whether the unit contains an IDR slice
    pub is_keyframe: bool,
}

#[derive(Debug, Clone)]
struct FuState {
    buf: Vec<u8>,
}

/// Counters describing reassembly health
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblerStats {
    /// Access units emitted
    pub frames_emitted: u64,
    /// Frames discarded as damaged
    pub frames_dropped: u64,
    /// Incomplete FU-A fragments discarded by a new start
    pub fragments_discarded: u64,
}

/// Per-stream frame assembler
#[derive(Debug, Default, Clone)]
pub struct NalFrameAssembler {
    cur_ts: Option<u32>,
    expected_seq: Option<u16>,
    nalus: Vec<Vec<u8>>,
    fua: Option<FuState>,
    corrupted: bool,
    stats: AssemblerStats,
}

impl NalFrameAssembler {
    /// Create an empty assembler
    pub fn new() -> Self {
        Self::default()
    }

    /// Push one RTP payload; returns the access unit when the marker completes an intact frame
    pub fn push(
        &mut self,
        payload: &[u8],
        timestamp: u32,
        sequence: u16,
        marker: bool,
    ) -> Option<AccessUnit> {
        match self.cur_ts {
            Some(ts) if ts != timestamp => {
                if !self.nalus.is_empty() || self.fua.is_some() {
                    debug!(
                        "timestamp changed mid-frame ({} -> {}), dropping partial frame",
                        ts, timestamp
                    );
                    self.stats.frames_dropped += 1;
                }
                self.start_frame(timestamp);
            }
            None => self.cur_ts = Some(timestamp),
            _ => {}
        }

        if let Some(expected) = self.expected_seq {
            if sequence != expected {
                debug!("sequence gap: expected {}, got {}", expected, sequence);
                self.corrupted = true;
            }
        }
        self.expected_seq = Some(sequence.wrapping_add(1));

        if payload.is_empty() {
            self.corrupted = true;
            return self.finish_if_marker(marker);
        }

        match NalType::from_header(payload[0]) {
            NalType::FuA => self.push_fua(payload),
            NalType::StapA => self.push_stap_a(payload),
            NalType::Other(t) if t == 0 || t > 23 => {
                debug!("unsupported NAL packet type {}", t);
                self.corrupted = true;
            }
            _ => {
                if self.fua.take().is_some() {
                    self.corrupted = true;
                }
                self.nalus.push(payload.to_vec());
            }
        }

        self.finish_if_marker(marker)
    }

    fn push_fua(&mut self, payload: &[u8]) {
        if payload.len() < 2 {
            self.corrupted = true;
            return;
        }
        let indicator = payload[0];
        let header = payload[1];
        let start = header & 0x80 != 0;
        let end = header & 0x40 != 0;

        if start {
            if self.fua.is_some() || self.corrupted {
                // resync on the new fragment
                debug!("FU-A start before previous fragment completed, resyncing");
                self.stats.fragments_discarded += 1;
                self.nalus.clear();
                self.corrupted = false;
            }
            let mut buf = Vec::with_capacity(payload.len() + 1);
            buf.push((indicator & 0xE0) | (header & 0x1F));
            buf.extend_from_slice(&payload[2..]);
            self.fua = Some(FuState { buf });
        } else if let Some(state) = self.fua.as_mut() {
            state.buf.extend_from_slice(&payload[2..]);
        } else {
            self.corrupted = true;
            return;
        }

        if end {
            if let Some(state) = self.fua.take() {
                self.nalus.push(state.buf);
            }
        }
    }

    fn push_stap_a(&mut self, payload: &[u8]) {
        if self.fua.take().is_some() {
            self.corrupted = true;
        }
        let mut offset = 1;
        while offset < payload.len() {
            if offset + 2 > payload.len() {
                self.corrupted = true;
                return;
            }
            let len = u16::from_be_bytes([payload[offset], payload[offset + 1]]) as usize;
            offset += 2;
            if len == 0 || offset + len > payload.len() {
                self.corrupted = true;
                return;
            }
            self.nalus.push(payload[offset..offset + len].to_vec());
            offset += len;
        }
    }

    fn finish_if_marker(&mut self, marker: bool) -> Option<AccessUnit> {
        if !marker {
            return None;
        }

        let intact = !self.corrupted && self.fua.is_none() && !self.nalus.is_empty();
        let out = if intact {
            self.stats.frames_emitted += 1;
            Some(AccessUnit {
                data: join_annexb(self.nalus.iter().map(|n| n.as_slice())),
                timestamp: self.cur_ts.unwrap_or_default(),
                is_keyframe: self
                    .nalus
                    .iter()
                    .any(|n| NalType::from_header(n[0]) == NalType::Idr),
            })
        } else {
            self.stats.frames_dropped += 1;
            None
        };

        self.cur_ts = None;
        self.nalus.clear();
        self.fua = None;
        self.corrupted = false;
        out
    }

    fn start_frame(&mut self, timestamp: u32) {
        self.cur_ts = Some(timestamp);
        self.nalus.clear();
        self.fua = None;
        self.corrupted = false;
    }

    /// Drop all state; the next packet starts a fresh stream
    pub fn reset(&mut self) {
        self.cur_ts = None;
        self.expected_seq = None;
        self.nalus.clear();
        self.fua = None;
        self.corrupted = false;
    }

    /// Whether a frame is partially accumulated
    pub fn has_pending(&self) -> bool {
        !self.nalus.is_empty() || self.fua.is_some()
    }

    /// Reassembly counters
    pub fn stats(&self) -> AssemblerStats {
        self.stats
    }
}
