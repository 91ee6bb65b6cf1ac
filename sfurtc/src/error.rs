//! Error type for the session layer

use sfurtc_core::SfuRtcError;
use sfurtc_media::MediaError;
use thiserror::Error;

/// Errors surfaced by the session API
#[derive(Error, Debug)]
pub enum SessionError {
    /// Wire-level failure
    #[error(transparent)]
    Core(#[from] SfuRtcError),

    /// Media pipeline failure
    #[error(transparent)]
    Media(#[from] MediaError),

    /// Remote description could not be applied
    #[error("Negotiation failed: {reason}")]
    Negotiation {
        /// Reason reported by the transport
        reason: String,
    },

    /// Transport refused an operation
    #[error("Transport error: {reason}")]
    Transport {
        /// Reason reported by the transport
        reason: String,
    },

    /// Signaling channel failure
    #[error("Signaling error: {reason}")]
    Signaling {
        /// Reason reported by the channel
        reason: String,
    },

    /// Settings could not be read or written
    #[error("Settings error: {reason}")]
    Settings {
        /// What went wrong
        reason: String,
    },

    /// Operation not valid in the current session state
    #[error("Invalid state: {operation} while {state}")]
    InvalidState {
        /// Attempted operation
        operation: String,
        /// Current state
        state: String,
    },

    /// Logging could not be initialized
    #[error("Initialization failed: {reason}")]
    Initialization {
        /// Reason for the failure
        reason: String,
    },
}

impl SessionError {
    /// Whether the session can keep running after this error
    pub fn is_recoverable(&self) -> bool {
        match self {
            SessionError::Core(e) => e.category().is_recoverable(),
            SessionError::Media(e) => e.is_recoverable(),
            SessionError::Negotiation { .. } | SessionError::Transport { .. } => false,
            SessionError::Signaling { .. } | SessionError::Settings { .. } => true,
            SessionError::InvalidState { .. } | SessionError::Initialization { .. } => false,
        }
    }
}

impl From<std::io::Error> for SessionError {
    fn from(error: std::io::Error) -> Self {
        SessionError::Settings {
            reason: error.to_string(),
        }
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(error: serde_json::Error) -> Self {
        SessionError::Settings {
            reason: error.to_string(),
        }
    }
}

/// Result alias for session operations
pub type Result<T> = std::result::Result<T, SessionError>;
