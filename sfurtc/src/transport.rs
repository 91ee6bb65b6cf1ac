//! Contracts with the signaling channel and the media transport
//!
//! The session drives negotiation and media through these traits and never
//! talks to a network stack directly.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sfurtc_core::{RtpPacket, StreamRole};

/// One ICE candidate as exchanged over signaling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// Candidate line
    pub candidate: String,
    /// Media stream identification tag
    pub sdp_mid: Option<String>,
    /// Index of the media description
    pub sdp_mline_index: Option<u16>,
}

impl IceCandidate {
    /// Candidate with no media association
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
        }
    }
}

/// Connection state reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportState {
    /// Not started
    New,
    /// Checking connectivity
    Connecting,
    /// Media can flow
    Connected,
    /// Connectivity lost; may come back
    Disconnected,
    /// Connectivity failed for good
    Failed,
    /// Closed locally or remotely
    Closed,
}

impl TransportState {
    /// Whether the session must be considered lost
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransportState::Failed | TransportState::Closed)
    }
}

/// Outbound half of the signaling exchange
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Deliver the local answer to the server
    async fn send_answer(&self, sdp: &str) -> Result<()>;

    /// Deliver a local ICE candidate to the server
    async fn send_ice_candidate(&self, candidate: &IceCandidate) -> Result<()>;
}

/// The multiplexed peer connection carrying all four streams
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Apply the server offer and produce the local answer
    async fn apply_remote_offer(&self, sdp: &str) -> Result<String>;

    /// Add a remote ICE candidate; only valid after an offer was applied
    async fn add_remote_ice_candidate(&self, candidate: &IceCandidate) -> Result<()>;

    /// Send one RTP packet on the track of `role`; must not block
    fn send_rtp(&self, role: StreamRole, packet: RtpPacket) -> Result<()>;

    /// SSRC the transport assigned to the local track of `role`
    fn local_ssrc(&self, role: StreamRole) -> Option<u32>;

    /// Tear the connection down
    async fn close(&self);
}
