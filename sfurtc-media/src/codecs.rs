//! Audio payload codec adapters
//!
//! The mixer needs to turn an RTP payload into PCM, scale it and turn it back
//! into a payload of the same format. G.711 is stateless and table driven;
//! Opus carries prediction state across packets, so each instance must see
//! exactly one stream.

use crate::error::{MediaError, MediaResult};
use crate::g711;
use sfurtc_core::AudioEncoding;

#[cfg(feature = "opus")]
use audiopus::{
    coder::{Decoder as OpusDecoder, Encoder as OpusEncoder},
    Application, Bitrate, Channels, SampleRate,
};

/// Largest Opus packet we produce
#[cfg(feature = "opus")]
const MAX_OPUS_PACKET: usize = 4000;
/// 120 ms at 48 kHz, the longest Opus frame
#[cfg(feature = "opus")]
const MAX_OPUS_FRAME_SAMPLES: usize = 5760;

/// Payload ↔ PCM conversion for one audio format
pub trait AudioPayloadCodec: Send + std::fmt::Debug {
    /// Payload format handled by this codec
    fn encoding(&self) -> AudioEncoding;

    /// Decode a payload into interleaved PCM
    fn decode(&mut self, payload: &[u8]) -> MediaResult<Vec<i16>>;

    /// Encode interleaved PCM into a payload
    fn encode(&mut self, pcm: &[i16]) -> MediaResult<Vec<u8>>;

    /// Drop any inter-frame state
    fn reset(&mut self) -> MediaResult<()> {
        Ok(())
    }
}

/// G.711 law
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum G711Law {
    /// µ-law (PCMU)
    MuLaw,
    /// A-law (PCMA)
    ALaw,
}

/// Stateless G.711 codec
#[derive(Debug, Clone, Copy)]
pub struct G711Codec {
    law: G711Law,
}

impl G711Codec {
    /// µ-law codec
    pub fn pcmu() -> Self {
        Self {
            law: G711Law::MuLaw,
        }
    }

    /// A-law codec
    pub fn pcma() -> Self {
        Self { law: G711Law::ALaw }
    }

    /// Law in use
    pub fn law(&self) -> G711Law {
        self.law
    }
}

impl AudioPayloadCodec for G711Codec {
    fn encoding(&self) -> AudioEncoding {
        match self.law {
            G711Law::MuLaw => AudioEncoding::Pcmu,
            G711Law::ALaw => AudioEncoding::Pcma,
        }
    }

    fn decode(&mut self, payload: &[u8]) -> MediaResult<Vec<i16>> {
        Ok(match self.law {
            G711Law::MuLaw => payload.iter().map(|&b| g711::ulaw_to_linear(b)).collect(),
            G711Law::ALaw => payload.iter().map(|&b| g711::alaw_to_linear(b)).collect(),
        })
    }

    fn encode(&mut self, pcm: &[i16]) -> MediaResult<Vec<u8>> {
        Ok(match self.law {
            G711Law::MuLaw => pcm.iter().map(|&s| g711::linear_to_ulaw(s)).collect(),
            G711Law::ALaw => pcm.iter().map(|&s| g711::linear_to_alaw(s)).collect(),
        })
    }
}

/// Opus codec configuration
#[derive(Debug, Clone, PartialEq)]
pub struct OpusConfig {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of audio channels
    pub channels: u8,
    /// Bitrate in bits per second
    pub bitrate: u32,
    /// Frame duration in milliseconds
    pub frame_duration_ms: u32,
}

impl Default for OpusConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
            bitrate: 64000,
            frame_duration_ms: 20,
        }
    }
}

impl OpusConfig {
    /// Mono voice preset
    pub fn voice_mono() -> Self {
        Self {
            channels: 1,
            bitrate: 32000,
            ..Self::default()
        }
    }

    /// Samples per channel in one frame
    pub fn samples_per_frame(&self) -> usize {
        (self.sample_rate as usize * self.frame_duration_ms as usize) / 1000
    }

    fn validate(&self) -> MediaResult<()> {
        if ![8000, 12000, 16000, 24000, 48000].contains(&self.sample_rate) {
            return Err(MediaError::InvalidConfiguration {
                message: format!(
                    "Unsupported Opus sample rate: {}. Supported: 8000, 12000, 16000, 24000, 48000",
                    self.sample_rate
                ),
            });
        }
        if self.channels != 1 && self.channels != 2 {
            return Err(MediaError::InvalidConfiguration {
                message: format!(
                    "Unsupported channel count: {}. Opus supports 1 or 2 channels",
                    self.channels
                ),
            });
        }
        Ok(())
    }
}

/// Stateful Opus codec owning one decoder and one encoder
pub struct OpusPayloadCodec {
    config: OpusConfig,
    #[cfg(feature = "opus")]
    decoder: OpusDecoder,
    #[cfg(feature = "opus")]
    encoder: OpusEncoder,
}

impl std::fmt::Debug for OpusPayloadCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpusPayloadCodec")
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(feature = "opus")]
impl OpusPayloadCodec {
    /// Create decoder and encoder for the given configuration
    pub fn new(config: OpusConfig) -> MediaResult<Self> {
        config.validate()?;
        let (decoder, encoder) = Self::build(&config)?;
        Ok(Self {
            config,
            decoder,
            encoder,
        })
    }

    fn build(config: &OpusConfig) -> MediaResult<(OpusDecoder, OpusEncoder)> {
        let sample_rate = match config.sample_rate {
            8000 => SampleRate::Hz8000,
            12000 => SampleRate::Hz12000,
            16000 => SampleRate::Hz16000,
            24000 => SampleRate::Hz24000,
            _ => SampleRate::Hz48000,
        };
        let channels = if config.channels == 1 {
            Channels::Mono
        } else {
            Channels::Stereo
        };

        let decoder = OpusDecoder::new(sample_rate, channels).map_err(|e| {
            MediaError::CodecInitializationFailed {
                codec: "opus".to_string(),
                reason: format!("Failed to create Opus decoder: {:?}", e),
            }
        })?;
        let mut encoder = OpusEncoder::new(sample_rate, channels, Application::Voip).map_err(|e| {
            MediaError::CodecInitializationFailed {
                codec: "opus".to_string(),
                reason: format!("Failed to create Opus encoder: {:?}", e),
            }
        })?;
        encoder
            .set_bitrate(Bitrate::BitsPerSecond(config.bitrate as i32))
            .map_err(|e| MediaError::CodecInitializationFailed {
                codec: "opus".to_string(),
                reason: format!("Failed to set Opus bitrate: {:?}", e),
            })?;
        Ok((decoder, encoder))
    }
}

#[cfg(not(feature = "opus"))]
impl OpusPayloadCodec {
    /// Create the codec; every decode and encode fails without Opus support
    pub fn new(config: OpusConfig) -> MediaResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }
}

impl OpusPayloadCodec {
    /// Active configuration
    pub fn config(&self) -> &OpusConfig {
        &self.config
    }
}

impl AudioPayloadCodec for OpusPayloadCodec {
    fn encoding(&self) -> AudioEncoding {
        AudioEncoding::Opus
    }

    #[cfg(feature = "opus")]
    fn decode(&mut self, payload: &[u8]) -> MediaResult<Vec<i16>> {
        let channels = self.config.channels as usize;
        let mut pcm = vec![0i16; MAX_OPUS_FRAME_SAMPLES * channels];
        let decoded = self
            .decoder
            .decode(Some(payload), &mut pcm, false)
            .map_err(|e| MediaError::DecodingFailed {
                codec: "opus".to_string(),
                reason: format!("Opus decoding failed: {:?}", e),
            })?;
        pcm.truncate(decoded * channels);
        Ok(pcm)
    }

    #[cfg(not(feature = "opus"))]
    fn decode(&mut self, _payload: &[u8]) -> MediaResult<Vec<i16>> {
        Err(MediaError::CodecUnavailable {
            codec: "opus".to_string(),
        })
    }

    #[cfg(feature = "opus")]
    fn encode(&mut self, pcm: &[i16]) -> MediaResult<Vec<u8>> {
        let mut output = vec![0u8; MAX_OPUS_PACKET];
        let size = self
            .encoder
            .encode(pcm, &mut output)
            .map_err(|e| MediaError::EncodingFailed {
                codec: "opus".to_string(),
                reason: format!("Opus encoding failed: {:?}", e),
            })?;
        output.truncate(size);
        Ok(output)
    }

    #[cfg(not(feature = "opus"))]
    fn encode(&mut self, _pcm: &[i16]) -> MediaResult<Vec<u8>> {
        Err(MediaError::CodecUnavailable {
            codec: "opus".to_string(),
        })
    }

    #[cfg(feature = "opus")]
    fn reset(&mut self) -> MediaResult<()> {
        let (decoder, encoder) = Self::build(&self.config)?;
        self.decoder = decoder;
        self.encoder = encoder;
        Ok(())
    }
}

/// Codec set for one mixer path: one stateful Opus instance plus G.711
#[derive(Debug)]
pub struct PathCodecs {
    opus: OpusPayloadCodec,
    pcmu: G711Codec,
    pcma: G711Codec,
}

impl PathCodecs {
    /// Create the codec set for a path
    pub fn new(opus: OpusConfig) -> MediaResult<Self> {
        Ok(Self {
            opus: OpusPayloadCodec::new(opus)?,
            pcmu: G711Codec::pcmu(),
            pcma: G711Codec::pcma(),
        })
    }

    /// Codec handling the given payload format
    pub fn codec_for(&mut self, encoding: AudioEncoding) -> &mut dyn AudioPayloadCodec {
        match encoding {
            AudioEncoding::Opus => &mut self.opus,
            AudioEncoding::Pcmu => &mut self.pcmu,
            AudioEncoding::Pcma => &mut self.pcma,
        }
    }

    /// Reset inter-frame state
    pub fn reset(&mut self) -> MediaResult<()> {
        self.opus.reset()
    }
}
