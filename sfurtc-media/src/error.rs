//! Media processing error types and handling
//!
//! Every error maps onto the pipeline's failure taxonomy through
//! [`MediaError::failure_class`], which decides whether the caller forwards
//! original audio, drops a video frame, falls back to software, or gives up.

use sfurtc_core::{FailureClass, SfuRtcError};
use thiserror::Error;

/// Main error type for media processing operations
#[derive(Error, Debug)]
pub enum MediaError {
    /// I/O operation failed
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },

    /// Wire-level error from the core crate
    #[error("Wire error: {source}")]
    Wire {
        /// Underlying core error
        #[from]
        source: SfuRtcError,
    },

    /// Invalid configuration provided
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration {
        /// Error message
        message: String,
    },

    /// Encoding operation failed
    #[error("Encoding failed: {codec} - {reason}")]
    EncodingFailed {
        /// Codec name
        codec: String,
        /// Failure reason
        reason: String,
    },

    /// Decoding operation failed
    #[error("Decoding failed: {codec} - {reason}")]
    DecodingFailed {
        /// Codec name
        codec: String,
        /// Failure reason
        reason: String,
    },

    /// Codec initialization failed
    #[error("Codec initialization failed: {codec} - {reason}")]
    CodecInitializationFailed {
        /// Codec name
        codec: String,
        /// Failure reason
        reason: String,
    },

    /// Codec support was not compiled in
    #[error("Codec not available: {codec}")]
    CodecUnavailable {
        /// Codec name
        codec: String,
    },

    /// Hardware acceleration not available
    #[error("Hardware acceleration not available: {reason}")]
    HardwareAccelerationNotAvailable {
        /// Reason why hardware acceleration is not available
        reason: String,
    },

    /// Invalid frame data error
    #[error("Invalid frame data: expected {expected} bytes, got {actual}")]
    InvalidFrameData {
        /// Expected data size
        expected: usize,
        /// Actual data size
        actual: usize,
    },

    /// Capture-process protocol violation
    #[error("Capture protocol error: {reason}")]
    CaptureProtocol {
        /// Reason the data was rejected
        reason: String,
    },

    /// Device not found error
    #[error("Device not found: {device_id}")]
    DeviceNotFound {
        /// Device identifier
        device_id: String,
    },

    /// Audio device or stream failure
    #[error("Audio device error: {message}")]
    AudioDevice {
        /// Error message
        message: String,
    },

    /// External process failure
    #[error("Process error: {command} - {message}")]
    Process {
        /// Command that failed
        command: String,
        /// Error message
        message: String,
    },

    /// Invalid state for operation
    #[error("Invalid state: {message}")]
    InvalidState {
        /// State error message
        message: String,
    },

    /// Sample rate mismatch
    #[error("Sample rate mismatch: expected {expected}, got {actual}")]
    SampleRateMismatch {
        /// Expected sample rate
        expected: u32,
        /// Actual sample rate
        actual: u32,
    },

    /// Channel count mismatch
    #[error("Channel count mismatch: expected {expected}, got {actual}")]
    ChannelCountMismatch {
        /// Expected channel count
        expected: u32,
        /// Actual channel count
        actual: u32,
    },
}

/// Result type alias for media operations
pub type MediaResult<T> = Result<T, MediaError>;

impl MediaError {
    /// Check if error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            MediaError::Io { .. } => true,
            MediaError::Wire { .. } => true,
            MediaError::EncodingFailed { .. } => true,
            MediaError::DecodingFailed { .. } => true,
            MediaError::HardwareAccelerationNotAvailable { .. } => true,
            MediaError::CaptureProtocol { .. } => false,
            MediaError::CodecInitializationFailed { .. } => false,
            MediaError::CodecUnavailable { .. } => false,
            MediaError::Process { .. } => false,
            _ => false,
        }
    }

    /// Get error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            MediaError::Io { .. } => ErrorCategory::System,
            MediaError::Wire { .. } => ErrorCategory::Network,
            MediaError::InvalidConfiguration { .. } => ErrorCategory::Configuration,
            MediaError::EncodingFailed { .. } => ErrorCategory::Codec,
            MediaError::DecodingFailed { .. } => ErrorCategory::Codec,
            MediaError::CodecInitializationFailed { .. } => ErrorCategory::Codec,
            MediaError::CodecUnavailable { .. } => ErrorCategory::Codec,
            MediaError::HardwareAccelerationNotAvailable { .. } => ErrorCategory::Platform,
            MediaError::InvalidFrameData { .. } => ErrorCategory::Data,
            MediaError::CaptureProtocol { .. } => ErrorCategory::Format,
            MediaError::DeviceNotFound { .. } => ErrorCategory::Device,
            MediaError::AudioDevice { .. } => ErrorCategory::Audio,
            MediaError::Process { .. } => ErrorCategory::System,
            MediaError::InvalidState { .. } => ErrorCategory::State,
            MediaError::SampleRateMismatch { .. } => ErrorCategory::Audio,
            MediaError::ChannelCountMismatch { .. } => ErrorCategory::Audio,
        }
    }

    /// Map onto the pipeline failure taxonomy
    pub fn failure_class(&self) -> FailureClass {
        match self {
            MediaError::Wire { source } => source.category(),
            MediaError::HardwareAccelerationNotAvailable { .. } => FailureClass::CapabilityDowngrade,
            MediaError::EncodingFailed { .. }
            | MediaError::DecodingFailed { .. }
            | MediaError::CodecInitializationFailed { .. }
            | MediaError::CodecUnavailable { .. }
            | MediaError::InvalidFrameData { .. }
            | MediaError::SampleRateMismatch { .. }
            | MediaError::ChannelCountMismatch { .. } => FailureClass::Codec,
            _ => FailureClass::SessionFatal,
        }
    }
}

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// System-level errors (I/O, processes)
    System,
    /// Configuration and parameter errors
    Configuration,
    /// Codec-related errors
    Codec,
    /// Format and data structure errors
    Format,
    /// Platform compatibility errors
    Platform,
    /// Data validation errors
    Data,
    /// Device and hardware errors
    Device,
    /// State management errors
    State,
    /// Audio-specific errors
    Audio,
    /// Network and wire-format errors
    Network,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        let io_error = MediaError::Io {
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
        };
        assert_eq!(io_error.category(), ErrorCategory::System);
        assert!(io_error.is_recoverable());

        let codec_error = MediaError::CodecInitializationFailed {
            codec: "H.264".to_string(),
            reason: "Hardware not available".to_string(),
        };
        assert_eq!(codec_error.category(), ErrorCategory::Codec);
        assert!(!codec_error.is_recoverable());
    }

    #[test]
    fn test_failure_classes() {
        let hw = MediaError::HardwareAccelerationNotAvailable {
            reason: "no device".to_string(),
        };
        assert_eq!(hw.failure_class(), FailureClass::CapabilityDowngrade);

        let wire = MediaError::from(SfuRtcError::SequenceGap {
            expected: 1,
            actual: 3,
        });
        assert_eq!(wire.failure_class(), FailureClass::WireAnomaly);

        let decode = MediaError::DecodingFailed {
            codec: "opus".to_string(),
            reason: "corrupt".to_string(),
        };
        assert_eq!(decode.failure_class(), FailureClass::Codec);
    }

    #[test]
    fn test_error_display() {
        let error = MediaError::InvalidFrameData {
            expected: 1024,
            actual: 512,
        };
        assert_eq!(
            error.to_string(),
            "Invalid frame data: expected 1024 bytes, got 512"
        );
    }
}
