//! # SFU RTC Media
//!
//! Media processing for the SFU client: G.711 and Opus payload adapters,
//! the per-user volume mixer, automatic gain control, remote video decoding
//! with hardware-to-software fallback, and the local capture pipelines.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod agc;
pub mod capture;
pub mod codecs;
pub mod error;
pub mod g711;
pub mod gain;
pub mod mixer;
pub mod render;
pub mod runtime;
pub mod video;

// Re-export main types
pub use agc::{AgcConfig, AgcOutcome, AutomaticGainControl, VoiceActivity};
pub use capture::{
    AudioPipelineConfig, AudioSendPipeline, CaptureEvent, CaptureEventHandler, EncodedAudioFrame,
    EncodedAudioSink, EncodedVideoFrame, EncodedVideoSink, VideoCaptureConfig,
    VideoCapturePipeline,
};
pub use codecs::{AudioPayloadCodec, G711Codec, OpusConfig, OpusPayloadCodec, PathCodecs};
pub use error::{ErrorCategory, MediaError, MediaResult};
pub use mixer::{AudioMixer, MixerConfig, MixerStats, PathStats, RouteOutcome, VolumeTable};
pub use render::{AudioSink, ChannelAudioSink, MixedPacket, NullAudioSink, PlayoutMixer, PlayoutSink};
#[cfg(feature = "devices")]
pub use render::CpalPlayback;
pub use runtime::{AudioSubsystem, AudioSubsystemInfo};
pub use video::{
    DecodedFrame, DecoderProvider, DecoderState, HardwareDecoder, SoftwareDecoder, StreamKey,
    VideoEvent, VideoEventHandler, VideoFrameSink, VideoRouterConfig, VideoStreamRouter,
};
