//! Decoder capability traits and the provider factory
//!
//! The router only talks to these traits. Platform hardware decoders are
//! supplied by the host through a [`DecoderProvider`]; the built-in provider
//! offers software decoding only.

use crate::error::{MediaError, MediaResult};
use sfurtc_core::{ParticipantId, StreamRole};
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "h264")]
use openh264::{decoder::Decoder as H264Decoder, formats::YUVSource};
#[cfg(feature = "h264")]
use sfurtc_core::h264::START_CODE;

/// Identity of one remote video stream
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamKey {
    /// Sending participant
    pub participant: ParticipantId,
    /// Camera or screen share
    pub role: StreamRole,
}

impl StreamKey {
    /// Build a key
    pub fn new(participant: ParticipantId, role: StreamRole) -> Self {
        Self { participant, role }
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.participant, self.role)
    }
}

/// Decoded picture in planar I420 layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Y, U and V planes, tightly packed
    pub data: Vec<u8>,
}

impl DecodedFrame {
    /// Size of an I420 picture
    pub fn i420_size(width: u32, height: u32) -> usize {
        let (w, h) = (width as usize, height as usize);
        w * h + 2 * (w.div_ceil(2) * h.div_ceil(2))
    }
}

/// Platform decoder that renders directly
///
/// NAL units are passed without a start code.
pub trait HardwareDecoder: Send {
    /// Configure for a stream; `false` means the platform cannot decode it
    fn initialize(&mut self, width: u32, height: u32, sps: &[u8], pps: &[u8]) -> bool;

    /// Decode and present one VCL NAL unit
    fn decode_and_render(&mut self, nal: &[u8], is_keyframe: bool) -> MediaResult<()>;

    /// Release platform resources
    fn dispose(&mut self);
}

/// Software decoder returning pictures to the caller
///
/// NAL units are passed without a start code.
pub trait SoftwareDecoder: Send {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Prime the decoder with parameter sets
    fn initialize(&mut self, width: u32, height: u32, sps: &[u8], pps: &[u8]) -> MediaResult<()>;

    /// Decode one VCL NAL unit, returning a picture when one is ready
    fn decode(&mut self, nal: &[u8], is_keyframe: bool) -> MediaResult<Option<DecodedFrame>>;

    /// Release resources
    fn dispose(&mut self);
}

/// Factory for the decoders available on this machine
pub trait DecoderProvider: Send + Sync {
    /// Hardware decoder for a stream, if the platform has one
    fn hardware_decoder(&self, key: &StreamKey) -> Option<Box<dyn HardwareDecoder>>;

    /// Software decoder for a stream
    fn software_decoder(&self, key: &StreamKey) -> MediaResult<Box<dyn SoftwareDecoder>>;
}

/// Software decoding backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SoftwareBackend {
    /// In-process OpenH264
    OpenH264,
    /// External decoder process reading Annex-B on stdin
    Subprocess(super::subprocess::SubprocessConfig),
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        if cfg!(feature = "h264") {
            SoftwareBackend::OpenH264
        } else {
            SoftwareBackend::Subprocess(super::subprocess::SubprocessConfig::default())
        }
    }
}

/// Provider with no hardware path
#[derive(Debug, Clone, Default)]
pub struct SoftwareOnlyProvider {
    backend: SoftwareBackend,
}

impl SoftwareOnlyProvider {
    /// Provider using the given software backend
    pub fn new(backend: SoftwareBackend) -> Self {
        Self { backend }
    }
}

impl DecoderProvider for SoftwareOnlyProvider {
    fn hardware_decoder(&self, _key: &StreamKey) -> Option<Box<dyn HardwareDecoder>> {
        None
    }

    fn software_decoder(&self, _key: &StreamKey) -> MediaResult<Box<dyn SoftwareDecoder>> {
        match &self.backend {
            SoftwareBackend::OpenH264 => Ok(Box::new(OpenH264Decoder::new())),
            SoftwareBackend::Subprocess(config) => {
                Ok(Box::new(super::subprocess::SubprocessDecoder::new(config.clone())))
            }
        }
    }
}

/// Get the decoder provider for this build
pub fn default_decoder_provider() -> Arc<dyn DecoderProvider> {
    Arc::new(SoftwareOnlyProvider::default())
}

/// In-process OpenH264 decoder
#[derive(Default)]
pub struct OpenH264Decoder {
    #[cfg(feature = "h264")]
    decoder: Option<H264Decoder>,
    #[cfg(feature = "h264")]
    scratch: Vec<u8>,
}

impl OpenH264Decoder {
    /// Create an uninitialized decoder
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(feature = "h264")]
fn prefix_start_code(buf: &mut Vec<u8>, nal: &[u8]) {
    buf.clear();
    buf.extend_from_slice(&START_CODE);
    buf.extend_from_slice(nal);
}

#[cfg(feature = "h264")]
impl SoftwareDecoder for OpenH264Decoder {
    fn name(&self) -> &'static str {
        "openh264"
    }

    fn initialize(&mut self, _width: u32, _height: u32, sps: &[u8], pps: &[u8]) -> MediaResult<()> {
        let mut decoder = H264Decoder::new().map_err(|e| MediaError::CodecInitializationFailed {
            codec: "h264".to_string(),
            reason: format!("Failed to create H.264 decoder: {}", e),
        })?;
        for parameter_set in [sps, pps] {
            prefix_start_code(&mut self.scratch, parameter_set);
            decoder
                .decode(&self.scratch)
                .map_err(|e| MediaError::CodecInitializationFailed {
                    codec: "h264".to_string(),
                    reason: format!("Parameter set rejected: {}", e),
                })?;
        }
        self.decoder = Some(decoder);
        Ok(())
    }

    fn decode(&mut self, nal: &[u8], _is_keyframe: bool) -> MediaResult<Option<DecodedFrame>> {
        let decoder = self.decoder.as_mut().ok_or_else(|| MediaError::InvalidState {
            message: "H.264 decoder used before initialization".to_string(),
        })?;
        prefix_start_code(&mut self.scratch, nal);
        match decoder.decode(&self.scratch) {
            Ok(Some(yuv)) => Ok(Some(copy_i420(&yuv))),
            Ok(None) => Ok(None),
            Err(e) => Err(MediaError::DecodingFailed {
                codec: "h264".to_string(),
                reason: format!("H.264 decoding failed: {}", e),
            }),
        }
    }

    fn dispose(&mut self) {
        self.decoder = None;
    }
}

#[cfg(feature = "h264")]
fn copy_i420(yuv: &impl YUVSource) -> DecodedFrame {
    let (width, height) = yuv.dimensions();
    let (y_stride, u_stride, v_stride) = yuv.strides();
    let (cw, ch) = (width.div_ceil(2), height.div_ceil(2));

    let mut data = Vec::with_capacity(width * height + 2 * cw * ch);
    for row in 0..height {
        data.extend_from_slice(&yuv.y()[row * y_stride..row * y_stride + width]);
    }
    for row in 0..ch {
        data.extend_from_slice(&yuv.u()[row * u_stride..row * u_stride + cw]);
    }
    for row in 0..ch {
        data.extend_from_slice(&yuv.v()[row * v_stride..row * v_stride + cw]);
    }
    DecodedFrame {
        width: width as u32,
        height: height as u32,
        data,
    }
}

#[cfg(not(feature = "h264"))]
impl SoftwareDecoder for OpenH264Decoder {
    fn name(&self) -> &'static str {
        "openh264"
    }

    fn initialize(&mut self, _width: u32, _height: u32, _sps: &[u8], _pps: &[u8]) -> MediaResult<()> {
        Err(MediaError::CodecUnavailable {
            codec: "h264".to_string(),
        })
    }

    fn decode(&mut self, _nal: &[u8], _is_keyframe: bool) -> MediaResult<Option<DecodedFrame>> {
        Err(MediaError::CodecUnavailable {
            codec: "h264".to_string(),
        })
    }

    fn dispose(&mut self) {}
}
