//! Configuration types and defaults

use sfurtc_core::ParticipantId;
use sfurtc_media::{AudioPipelineConfig, MixerConfig, VideoCaptureConfig, VideoRouterConfig};

/// Process-wide configuration
#[derive(Debug, Clone)]
pub struct GlobalConfig {
    /// Enable debug logging
    pub debug_logging: bool,
    /// Explicit `tracing` filter directive; overrides `debug_logging`
    pub log_filter: Option<String>,
    /// Bring up the native audio subsystem at init
    pub initialize_audio: bool,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            debug_logging: false,
            log_filter: None,
            initialize_audio: true,
        }
    }
}

/// Microphone capture options
#[derive(Debug, Clone, PartialEq)]
pub struct MicrophoneConfig {
    /// Framing, gain control and encoder settings
    pub pipeline: AudioPipelineConfig,
    /// Open the input device; when false the host pushes PCM itself
    pub open_device: bool,
}

impl Default for MicrophoneConfig {
    fn default() -> Self {
        Self {
            pipeline: AudioPipelineConfig::microphone(),
            open_device: true,
        }
    }
}

/// Per-session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Local participant
    pub participant: ParticipantId,
    /// Microphone capture, if any
    pub microphone: Option<MicrophoneConfig>,
    /// Screen-audio send pipeline, fed by the host
    pub screen_audio: Option<AudioPipelineConfig>,
    /// Camera capture process
    pub camera: Option<VideoCaptureConfig>,
    /// Screen capture process
    pub screen: Option<VideoCaptureConfig>,
    /// Receive-side mixer settings
    pub mixer: MixerConfig,
    /// Receive-side video settings
    pub video: VideoRouterConfig,
    /// Open the output device for mixed audio
    pub playback: bool,
    /// Playout buffer depth in milliseconds
    pub playout_buffer_ms: u32,
}

impl SessionConfig {
    /// Receive-only session for a participant
    pub fn new(participant: impl Into<ParticipantId>) -> Self {
        Self {
            participant: participant.into(),
            microphone: None,
            screen_audio: None,
            camera: None,
            screen: None,
            mixer: MixerConfig::default(),
            video: VideoRouterConfig::default(),
            playback: false,
            playout_buffer_ms: 200,
        }
    }

    /// Enable the microphone with default settings
    pub fn with_microphone(mut self) -> Self {
        self.microphone = Some(MicrophoneConfig::default());
        self
    }

    /// Enable a microphone pipeline fed by the host instead of a device
    pub fn with_external_microphone(mut self) -> Self {
        self.microphone = Some(MicrophoneConfig {
            open_device: false,
            ..MicrophoneConfig::default()
        });
        self
    }

    /// Enable the screen-audio send pipeline
    pub fn with_screen_audio(mut self) -> Self {
        self.screen_audio = Some(AudioPipelineConfig::screen_audio());
        self
    }

    /// Capture the camera through the given tool configuration
    pub fn with_camera(mut self, config: VideoCaptureConfig) -> Self {
        self.camera = Some(config);
        self
    }

    /// Capture a display through the given tool configuration
    pub fn with_screen(mut self, config: VideoCaptureConfig) -> Self {
        self.screen = Some(config);
        self
    }

    /// Play mixed audio on the output device
    pub fn with_playback(mut self) -> Self {
        self.playback = true;
        self
    }
}
