//! Outbound audio: framing, gain control and Opus encoding
//!
//! PCM arrives from a capture callback in arbitrary chunk sizes and layouts.
//! The pipeline converts it to the encoder's channel layout, cuts 20 ms
//! frames, runs gain control on microphone audio and hands encoded frames to
//! the send sink. Nothing here blocks on I/O.

use super::protocol::read_audio_packet;
use super::{CaptureEvent, CaptureEventHandler, EncodedAudioFrame, EncodedAudioSink};
use crate::agc::{AgcConfig, AutomaticGainControl, VoiceActivity};
use crate::codecs::{AudioPayloadCodec, OpusConfig, OpusPayloadCodec};
use crate::error::{MediaError, MediaResult};
use bytes::Bytes;
use parking_lot::Mutex;
use sfurtc_core::StreamRole;
use std::io::Read;
use std::sync::Arc;
use tracing::{debug, warn};

/// Audio send pipeline configuration
#[derive(Debug, Clone, PartialEq)]
pub struct AudioPipelineConfig {
    /// Encoder layout and frame duration
    pub opus: OpusConfig,
    /// Gain control; `None` passes audio through untouched
    pub agc: Option<AgcConfig>,
}

impl AudioPipelineConfig {
    /// Microphone defaults: gain control on, mono voice encoding
    pub fn microphone() -> Self {
        Self {
            opus: OpusConfig::voice_mono(),
            agc: Some(AgcConfig::default()),
        }
    }

    /// Screen-audio defaults: stereo, no gain control
    pub fn screen_audio() -> Self {
        Self {
            opus: OpusConfig::default(),
            agc: None,
        }
    }
}

/// Counters of an audio send pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioPipelineStats {
    /// Frames encoded and sent
    pub frames_sent: u64,
    /// Frames lost to encoder errors
    pub encode_errors: u64,
    /// Frames zeroed by mute
    pub frames_muted: u64,
}

/// PCM → Opus send pipeline for one stream role
pub struct AudioSendPipeline {
    role: StreamRole,
    config: AudioPipelineConfig,
    encoder: Box<dyn AudioPayloadCodec>,
    agc: Option<AutomaticGainControl>,
    sink: Arc<dyn EncodedAudioSink>,
    events: Option<CaptureEventHandler>,
    pending: Vec<i16>,
    muted: bool,
    stats: AudioPipelineStats,
}

impl AudioSendPipeline {
    /// Create a pipeline for an audio role
    pub fn new(
        role: StreamRole,
        config: AudioPipelineConfig,
        sink: Arc<dyn EncodedAudioSink>,
    ) -> MediaResult<Self> {
        if !role.is_audio() {
            return Err(MediaError::InvalidConfiguration {
                message: format!("{} is not an audio role", role),
            });
        }
        let encoder = Box::new(OpusPayloadCodec::new(config.opus.clone())?);
        Ok(Self::with_encoder(role, config, encoder, sink))
    }

    /// Create a pipeline around a specific encoder
    pub fn with_encoder(
        role: StreamRole,
        config: AudioPipelineConfig,
        encoder: Box<dyn AudioPayloadCodec>,
        sink: Arc<dyn EncodedAudioSink>,
    ) -> Self {
        let agc = config.agc.clone().map(AutomaticGainControl::new);
        Self {
            role,
            config,
            encoder,
            agc,
            sink,
            events: None,
            pending: Vec::new(),
            muted: false,
            stats: AudioPipelineStats::default(),
        }
    }

    /// Attach a capture event handler
    pub fn set_event_handler(&mut self, handler: CaptureEventHandler) {
        self.events = Some(handler);
    }

    /// Stream role
    pub fn role(&self) -> StreamRole {
        self.role
    }

    /// Mute or unmute; muted frames are still encoded as silence
    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    /// Whether muted
    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Gain controller, when enabled
    pub fn agc_mut(&mut self) -> Option<&mut AutomaticGainControl> {
        self.agc.as_mut()
    }

    /// Counters
    pub fn stats(&self) -> AudioPipelineStats {
        self.stats
    }

    /// Interleaved samples per encoded frame
    pub fn frame_len(&self) -> usize {
        self.config.opus.samples_per_frame() * self.config.opus.channels as usize
    }

    /// Push interleaved PCM with `channels` channels at the encoder rate
    pub fn push_pcm(&mut self, pcm: &[i16], channels: u16) {
        let target = self.config.opus.channels as u16;
        if channels == target {
            self.pending.extend_from_slice(pcm);
        } else {
            convert_channels(pcm, channels, target, &mut self.pending);
        }

        let frame_len = self.frame_len();
        if frame_len == 0 {
            return;
        }
        while self.pending.len() >= frame_len {
            let mut frame: Vec<i16> = self.pending.drain(..frame_len).collect();
            self.process_frame(&mut frame);
        }
    }

    fn process_frame(&mut self, frame: &mut [i16]) {
        if let Some(agc) = self.agc.as_mut() {
            let outcome = agc.process(frame);
            if let Some(transition) = outcome.transition {
                let speaking = transition == VoiceActivity::Started;
                debug!("{} voice activity: {}", self.role, speaking);
                if let Some(handler) = &self.events {
                    handler(CaptureEvent::VoiceActivity {
                        role: self.role,
                        speaking,
                    });
                }
            }
        }
        if self.muted {
            frame.fill(0);
            self.stats.frames_muted += 1;
        }

        match self.encoder.encode(frame) {
            Ok(payload) => {
                self.stats.frames_sent += 1;
                self.sink.send_audio(EncodedAudioFrame {
                    role: self.role,
                    payload: Bytes::from(payload),
                    samples: self.config.opus.samples_per_frame() as u32,
                });
            }
            Err(e) => {
                self.stats.encode_errors += 1;
                if self.stats.encode_errors == 1 || self.stats.encode_errors % 500 == 0 {
                    warn!("{} encode failed ({} total): {}", self.role, self.stats.encode_errors, e);
                }
            }
        }
    }

    /// Drop buffered samples and gain state
    pub fn reset(&mut self) {
        self.pending.clear();
        if let Some(agc) = self.agc.as_mut() {
            agc.reset();
        }
        if let Err(e) = self.encoder.reset() {
            warn!("{} encoder reset failed: {}", self.role, e);
        }
    }
}

/// Feed `MCAP` packets from a capture process into a pipeline until end of stream
///
/// Returns the number of packets consumed.
pub fn pump_audio_packets(
    mut reader: impl Read,
    pipeline: &Mutex<AudioSendPipeline>,
) -> MediaResult<u64> {
    let mut packets = 0;
    while let Some(packet) = read_audio_packet(&mut reader)? {
        let encoder_rate = pipeline.lock().config.opus.sample_rate;
        if packet.header.sample_rate != encoder_rate {
            return Err(MediaError::SampleRateMismatch {
                expected: encoder_rate,
                actual: packet.header.sample_rate,
            });
        }
        pipeline
            .lock()
            .push_pcm(&packet.samples, packet.header.channels as u16);
        packets += 1;
    }
    Ok(packets)
}

/// Downmix or upmix interleaved PCM
fn convert_channels(pcm: &[i16], from: u16, to: u16, out: &mut Vec<i16>) {
    let from = from.max(1) as usize;
    let to = to.max(1) as usize;
    for frame in pcm.chunks_exact(from) {
        if to == 1 {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            out.push((sum / from as i32) as i16);
        } else if from == 1 {
            out.extend(std::iter::repeat(frame[0]).take(to));
        } else {
            for c in 0..to {
                out.push(frame[c.min(from - 1)]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::protocol::{AudioPacket, AudioPacketHeader};
    use crate::codecs::G711Codec;
    use std::io::Cursor;

    #[derive(Default)]
    struct Collect(Mutex<Vec<EncodedAudioFrame>>);

    impl EncodedAudioSink for Collect {
        fn send_audio(&self, frame: EncodedAudioFrame) {
            self.0.lock().push(frame);
        }
    }

    fn pcmu_pipeline(agc: Option<AgcConfig>, sink: Arc<Collect>) -> AudioSendPipeline {
        let config = AudioPipelineConfig {
            opus: OpusConfig {
                channels: 1,
                ..OpusConfig::default()
            },
            agc,
        };
        AudioSendPipeline::with_encoder(
            StreamRole::Microphone,
            config,
            Box::new(G711Codec::pcmu()),
            sink,
        )
    }

    #[test]
    fn test_frames_are_cut_at_20ms() {
        let sink = Arc::new(Collect::default());
        let mut pipeline = pcmu_pipeline(None, sink.clone());
        pipeline.push_pcm(&vec![100i16; 700], 1);
        assert!(sink.0.lock().is_empty());
        pipeline.push_pcm(&vec![100i16; 1300], 1);
        let frames = sink.0.lock();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].payload.len(), 960);
        assert_eq!(frames[0].samples, 960);
    }

    #[test]
    fn test_stereo_input_is_downmixed() {
        let mut out = Vec::new();
        convert_channels(&[100, 300, -50, -150], 2, 1, &mut out);
        assert_eq!(out, vec![200, -100]);
        let mut out = Vec::new();
        convert_channels(&[7, 8], 1, 2, &mut out);
        assert_eq!(out, vec![7, 7, 8, 8]);
    }

    #[test]
    fn test_mute_sends_silence() {
        let sink = Arc::new(Collect::default());
        let mut pipeline = pcmu_pipeline(None, sink.clone());
        pipeline.set_muted(true);
        pipeline.push_pcm(&vec![8000i16; 960], 1);
        let frames = sink.0.lock();
        assert_eq!(frames.len(), 1);
        // µ-law silence
        assert!(frames[0].payload.iter().all(|&b| b == 0xFF));
        assert_eq!(pipeline.stats().frames_muted, 1);
    }

    #[test]
    fn test_voice_activity_events() {
        let sink = Arc::new(Collect::default());
        let mut pipeline = pcmu_pipeline(
            Some(AgcConfig {
                gate_enabled: true,
                ..AgcConfig::fixed_gain(1.0)
            }),
            sink,
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = seen.clone();
        pipeline.set_event_handler(Arc::new(move |event| recorder.lock().push(event)));

        let tone: Vec<i16> = (0..960)
            .map(|i| ((i as f32 * 0.13).sin() * 6000.0) as i16)
            .collect();
        pipeline.push_pcm(&tone, 1);
        assert_eq!(
            seen.lock().as_slice(),
            &[CaptureEvent::VoiceActivity {
                role: StreamRole::Microphone,
                speaking: true
            }]
        );
    }

    #[test]
    fn test_capture_stream_is_encoded() {
        let sink = Arc::new(Collect::default());
        let pipeline = Mutex::new(pcmu_pipeline(None, sink.clone()));
        let mut stream = Vec::new();
        for ts in 0..3u64 {
            let packet = AudioPacket {
                header: AudioPacketHeader::new(480, ts * 10),
                samples: vec![1000; 960],
            };
            stream.extend_from_slice(&packet.to_bytes());
        }
        let packets = pump_audio_packets(Cursor::new(stream), &pipeline).unwrap();
        assert_eq!(packets, 3);
        // 1440 stereo frames downmixed to mono make one full 960-sample frame
        assert_eq!(sink.0.lock().len(), 1);
    }

    #[test]
    fn test_rejects_video_role() {
        let sink = Arc::new(Collect::default());
        assert!(AudioSendPipeline::new(StreamRole::Camera, AudioPipelineConfig::microphone(), sink)
            .is_err());
    }
}
