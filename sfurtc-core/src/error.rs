//! Error types for the SFU media client core

use thiserror::Error;

/// Main error type for wire-level operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SfuRtcError {
    /// RTP packet could not be parsed
    #[error("Malformed RTP packet: {reason}")]
    MalformedRtp {
        /// Reason the packet was rejected
        reason: String,
    },

    /// H.264 payload could not be interpreted
    #[error("Malformed H.264 payload: {reason}")]
    MalformedPayload {
        /// Reason the payload was rejected
        reason: String,
    },

    /// Sequence gap detected while assembling a frame
    #[error("Sequence gap: expected {expected}, got {actual}")]
    SequenceGap {
        /// Sequence number that was expected
        expected: u16,
        /// Sequence number that arrived
        actual: u16,
    },

    /// Payload type outside the negotiated convention
    #[error("Unknown payload type: {payload_type}")]
    UnknownPayloadType {
        /// Raw RTP payload type
        payload_type: u8,
    },

    /// Invalid parameter data (SPS/PPS and similar)
    #[error("Invalid data: {reason}")]
    InvalidData {
        /// Reason for invalid data
        reason: String,
    },

    /// Invalid state error
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state
        expected: String,
        /// Actual state
        actual: String,
    },
}

impl SfuRtcError {
    /// Get error code for programmatic handling
    pub fn error_code(&self) -> String {
        match self {
            SfuRtcError::MalformedRtp { .. } => "MALFORMED_RTP".to_string(),
            SfuRtcError::MalformedPayload { .. } => "MALFORMED_PAYLOAD".to_string(),
            SfuRtcError::SequenceGap { .. } => "SEQUENCE_GAP".to_string(),
            SfuRtcError::UnknownPayloadType { .. } => "UNKNOWN_PAYLOAD_TYPE".to_string(),
            SfuRtcError::InvalidData { .. } => "INVALID_DATA".to_string(),
            SfuRtcError::InvalidState { .. } => "INVALID_STATE".to_string(),
        }
    }

    /// Classify the error into the failure taxonomy used for recovery decisions
    pub fn category(&self) -> FailureClass {
        match self {
            SfuRtcError::MalformedRtp { .. }
            | SfuRtcError::MalformedPayload { .. }
            | SfuRtcError::SequenceGap { .. }
            | SfuRtcError::UnknownPayloadType { .. } => FailureClass::WireAnomaly,
            SfuRtcError::InvalidData { .. } => FailureClass::Codec,
            SfuRtcError::InvalidState { .. } => FailureClass::SessionFatal,
        }
    }
}

/// How a failure is handled by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// Lost, reordered or malformed packets; recovered locally by resync
    WireAnomaly,
    /// Codec decode or encode failure; the original payload is forwarded or the frame dropped
    Codec,
    /// Platform capability missing or failing; a software path takes over
    CapabilityDowngrade,
    /// Transport or session failure; surfaced as a disconnect
    SessionFatal,
}

impl FailureClass {
    /// Whether the pipeline keeps running after this class of failure
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, FailureClass::SessionFatal)
    }
}

/// Result alias for core operations
pub type Result<T> = std::result::Result<T, SfuRtcError>;
