//! Remote video: decoder capabilities, software decoders and the stream router

pub mod decoder;
pub mod router;
pub mod subprocess;

pub use decoder::{
    default_decoder_provider, DecodedFrame, DecoderProvider, HardwareDecoder, OpenH264Decoder,
    SoftwareBackend, SoftwareDecoder, SoftwareOnlyProvider, StreamKey,
};
pub use router::{
    DecoderPath, DecoderState, NullFrameSink, VideoEvent, VideoEventHandler, VideoFrameSink,
    VideoRouteOutcome, VideoRouterConfig, VideoStreamRouter, VideoStreamStats,
};
pub use subprocess::{LatestFrame, SubprocessConfig, SubprocessDecoder};
