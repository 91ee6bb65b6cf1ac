//! H.264 over RTP: NAL utilities, reassembly and packetization

pub mod assembler;
pub mod nal;
pub mod packetizer;

pub use assembler::{AccessUnit, AssemblerStats, NalFrameAssembler};
pub use nal::{
    annexb_to_avcc, avcc_to_annexb, contains_idr, join_annexb, sps_dimensions, split_annexb,
    split_avcc, NalType, START_CODE,
};
pub use packetizer::{
    fragment_access_unit, H264Packetizer, PacketizerConfig, RtpPayload, DEFAULT_MAX_PAYLOAD,
};
