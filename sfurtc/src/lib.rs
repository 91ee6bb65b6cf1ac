//! # SFU RTC - Real-Time Media Client for Selective Forwarding Servers
//!
//! A participant in a call hosted by a selective forwarding server sends
//! microphone, camera, screen video and screen audio on one multiplexed
//! connection, and receives everyone else's streams on the same connection.
//! This crate ties the wire layer ([`sfurtc_core`]) and the media layer
//! ([`sfurtc_media`]) into a [`MediaSession`].
//!
//! ## Key Features
//!
//! - **Payload-type routing**: four logical streams on one connection,
//!   told apart by RTP payload type and attributed by server SSRC mappings
//! - **Per-user volume**: byte-identical forwarding at unity, scaled
//!   re-encoding otherwise
//! - **Resilient video**: hardware decoding with a one-way fallback to
//!   software per stream
//! - **Pluggable edges**: signaling, transport and settings are traits
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sfurtc::{SessionConfig, SfuRtc};
//!
//! let sfu = SfuRtc::init()?;
//! let session = sfu
//!     .session(SessionConfig::new("alice").with_microphone(), transport, signaling)
//!     .build();
//!
//! let mut events = session.events();
//! session.join().await?;
//! if let Some(answer) = session.on_remote_offer(&offer).await? {
//!     signaling.send_answer(&answer).await?;
//! }
//! while let Some(event) = events.next().await {
//!     println!("session event: {:?}", event);
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

// Re-export core types for easy access
pub use sfurtc_core::{
    AccessUnit, AudioEncoding, FailureClass, H264Packetizer, MappingSource, MappingUpdate,
    NalFrameAssembler, ParticipantId, PayloadKind, RtpPacket, RtpSequencer, SfuRtcError,
    SsrcMapping, SsrcRouter, StreamRole,
};

pub use sfurtc_media::{
    AgcConfig, AudioMixer, AudioPipelineConfig, AudioSendPipeline, AudioSink, AudioSubsystem,
    AudioSubsystemInfo, CaptureEvent, ChannelAudioSink, DecodedFrame, DecoderProvider,
    DecoderState, EncodedAudioFrame, EncodedAudioSink, EncodedVideoFrame, EncodedVideoSink,
    HardwareDecoder, MediaError, MixedPacket, MixerConfig, MixerStats, OpusConfig, RouteOutcome,
    SoftwareDecoder, StreamKey, VideoCaptureConfig, VideoEvent, VideoFrameSink,
    VideoRouterConfig, VolumeTable,
};
pub use sfurtc_media::video::VideoRouteOutcome;

// Public API modules
pub mod config;
pub mod error;
pub mod event;
pub mod logging;
pub mod session;
pub mod settings;
pub mod transport;

// Re-export main API types
pub use config::{GlobalConfig, MicrophoneConfig, SessionConfig};
pub use error::{Result, SessionError};
pub use event::{EventBus, EventFilter, EventStream, FilteredEventStream, MediaEvent};
pub use session::{MediaSession, ReceiveOutcome, SessionBuilder, SessionState};
pub use settings::{JsonFileSettings, MediaSettings, MemorySettings, SettingsStore};
pub use transport::{IceCandidate, MediaTransport, SignalingChannel, TransportState};

use std::sync::Arc;
use tracing::{debug, warn};

/// Main entry point for SFU RTC
///
/// Installs logging and brings up the audio subsystem once per process;
/// sessions are created from it.
#[derive(Debug, Clone)]
pub struct SfuRtc {
    inner: Arc<SfuRtcInner>,
}

#[derive(Debug)]
struct SfuRtcInner {
    config: GlobalConfig,
    audio: Option<AudioSubsystemInfo>,
}

impl SfuRtc {
    /// Initialize with default settings
    pub fn init() -> Result<Self> {
        Self::init_with(GlobalConfig::default())
    }

    /// Initialize with custom global configuration
    ///
    /// A missing audio backend is not fatal: sessions then run without
    /// device capture and playback.
    pub fn init_with(config: GlobalConfig) -> Result<Self> {
        if !logging::init_logging(&config)? {
            debug!("tracing subscriber already installed by the host");
        }

        let audio = if config.initialize_audio {
            match AudioSubsystem::initialize() {
                Ok(info) => Some(info),
                Err(e) => {
                    warn!("audio subsystem unavailable: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            inner: Arc::new(SfuRtcInner { config, audio }),
        })
    }

    /// Global configuration in effect
    pub fn config(&self) -> &GlobalConfig {
        &self.inner.config
    }

    /// Audio backend details, when the subsystem came up
    pub fn audio_info(&self) -> Option<&AudioSubsystemInfo> {
        self.inner.audio.as_ref()
    }

    /// Start building a session
    pub fn session(
        &self,
        config: SessionConfig,
        transport: Arc<dyn MediaTransport>,
        signaling: Arc<dyn SignalingChannel>,
    ) -> SessionBuilder {
        MediaSession::builder(config, transport, signaling)
    }

    /// Release the audio subsystem
    pub fn shutdown(&self) {
        AudioSubsystem::shutdown();
    }
}
