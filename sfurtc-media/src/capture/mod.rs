//! Local capture and encode pipelines
//!
//! Audio is captured in-process (cpal) or read from a capture process as
//! `MCAP` packets; video comes from a capture process as AVCC H.264. Both
//! end in a send sink implemented by the session.

pub mod audio;
pub mod avcc;
#[cfg(feature = "devices")]
pub mod device;
pub mod protocol;
pub mod video;

use bytes::Bytes;
use sfurtc_core::{AccessUnit, StreamRole};
use std::sync::Arc;

pub use audio::{pump_audio_packets, AudioPipelineConfig, AudioPipelineStats, AudioSendPipeline};
pub use avcc::AvccReader;
#[cfg(feature = "devices")]
pub use device::{input_device_names, CpalMicrophone};
pub use protocol::{nv12_frame_size, read_audio_packet, AudioPacket, AudioPacketHeader};
pub use video::{send_access_unit, VideoCaptureConfig, VideoCapturePipeline, VideoSource};

/// One encoded audio frame ready to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedAudioFrame {
    /// Microphone or screen audio
    pub role: StreamRole,
    /// Encoded payload
    pub payload: Bytes,
    /// Samples per channel, the RTP timestamp increment
    pub samples: u32,
}

/// One encoded access unit ready to packetize
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedVideoFrame {
    /// Camera or screen share
    pub role: StreamRole,
    /// Annex-B access unit
    pub access_unit: AccessUnit,
    /// RTP timestamp increment on the 90 kHz clock
    pub timestamp_increment: u32,
}

/// Destination of encoded audio; must not block
pub trait EncodedAudioSink: Send + Sync {
    /// Accept one frame
    fn send_audio(&self, frame: EncodedAudioFrame);
}

/// Destination of encoded video; must not block
pub trait EncodedVideoSink: Send + Sync {
    /// Accept one access unit
    fn send_video(&self, frame: EncodedVideoFrame);
}

/// Notifications from capture pipelines
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    /// Local voice activity changed
    VoiceActivity {
        /// Stream the activity was detected on
        role: StreamRole,
        /// Whether speech is present
        speaking: bool,
    },
    /// A capture source stopped on its own
    Stopped {
        /// Stream that stopped
        role: StreamRole,
        /// Why it stopped
        reason: String,
    },
}

/// Callback receiving capture notifications
pub type CaptureEventHandler = Arc<dyn Fn(CaptureEvent) + Send + Sync>;
