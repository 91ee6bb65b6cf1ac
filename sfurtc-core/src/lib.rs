//! # SFU RTC Core
//!
//! Wire-level building blocks for a media client talking to a selective
//! forwarding server: the RTP packet model, the payload-type convention that
//! separates the four logical streams, H.264 packetization and reassembly,
//! and SSRC-to-participant routing.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod h264;
pub mod role;
pub mod rtp;
pub mod ssrc;

// Re-export main types
pub use error::{FailureClass, SfuRtcError};
pub use h264::{AccessUnit, H264Packetizer, NalFrameAssembler, NalType, PacketizerConfig};
pub use role::{AudioEncoding, ParticipantId, PayloadKind, StreamRole};
pub use rtp::{RtpPacket, RtpSequencer};
pub use ssrc::{MappingSource, MappingUpdate, SsrcMapping, SsrcRouter};
