//! Per-stream video routing and decoder selection
//!
//! Each (participant, role) stream gets its own frame assembler and decoder
//! state machine:
//!
//! ```text
//! NoDecoder -> AwaitingParameters -> Decoding(Hardware | Software)
//!                                         \-> Failed
//! ```
//!
//! Parameter sets are cached as they arrive and the decoder is created once
//! both SPS and PPS are known. A hardware decoder is always tried first; when
//! it refuses the stream the key is remembered so hardware is not retried
//! until the stream is torn down.
//!
//! Each stream has its own lock; the stream table is only held to look a
//! stream up, so a stalled decoder never blocks the other streams.

use super::decoder::{DecodedFrame, DecoderProvider, HardwareDecoder, SoftwareDecoder, StreamKey};
use crate::error::MediaError;
use parking_lot::Mutex;
use sfurtc_core::h264::{sps_dimensions, split_annexb, AssemblerStats};
use sfurtc_core::{AccessUnit, NalFrameAssembler, NalType, ParticipantId, RtpPacket, StreamRole};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Video router configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoRouterConfig {
    /// Camera dimensions used when the SPS cannot be parsed
    pub camera_fallback: (u32, u32),
    /// Screen-share dimensions used when the SPS cannot be parsed
    pub screen_fallback: (u32, u32),
    /// Consecutive recoverable decode errors tolerated before giving up
    pub max_consecutive_errors: u32,
}

impl Default for VideoRouterConfig {
    fn default() -> Self {
        Self {
            camera_fallback: (640, 480),
            screen_fallback: (1920, 1080),
            max_consecutive_errors: 30,
        }
    }
}

impl VideoRouterConfig {
    fn fallback_dimensions(&self, role: StreamRole) -> (u32, u32) {
        if role.is_screen() {
            self.screen_fallback
        } else {
            self.camera_fallback
        }
    }
}

/// Decoder path in use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderPath {
    /// Platform decoder rendering on its own
    Hardware,
    /// Software decoder handing frames to the sink
    Software,
}

/// Decoder state of one stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    /// Nothing received yet
    NoDecoder,
    /// Waiting for SPS and PPS
    AwaitingParameters,
    /// Decoder running
    Decoding(DecoderPath),
    /// Decoder broke; nothing is submitted until teardown
    Failed,
}

/// Notifications from the router
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoEvent {
    /// A hardware decoder accepted the stream
    HardwareDecoderReady {
        /// Stream
        key: StreamKey,
        /// Frame width
        width: u32,
        /// Frame height
        height: u32,
    },
    /// Hardware decoding was refused and software took over
    CapabilityDowngraded {
        /// Stream
        key: StreamKey,
        /// Why hardware was refused
        reason: String,
    },
    /// The stream's decoder failed for good
    DecoderFailed {
        /// Stream
        key: StreamKey,
        /// Failure description
        reason: String,
    },
}

/// Callback receiving router notifications
pub type VideoEventHandler = Arc<dyn Fn(VideoEvent) + Send + Sync>;

/// Receiver of software-decoded pictures
pub trait VideoFrameSink: Send + Sync {
    /// One decoded picture of a stream
    fn on_frame(&self, key: &StreamKey, frame: DecodedFrame);
}

/// Sink that discards pictures
#[derive(Debug, Default, Clone, Copy)]
pub struct NullFrameSink;

impl VideoFrameSink for NullFrameSink {
    fn on_frame(&self, _key: &StreamKey, _frame: DecodedFrame) {}
}

/// Outcome of routing one RTP packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoRouteOutcome {
    /// Packet buffered, frame not complete yet
    Pending,
    /// Frame assembled while waiting for parameter sets
    AwaitingParameters,
    /// Frame assembled and its slices submitted to the decoder
    Submitted {
        /// VCL NAL units submitted
        slices: usize,
        /// Whether the frame carried an IDR slice
        keyframe: bool,
    },
    /// Frame assembled but the decoder has failed
    Failed,
}

/// Counters for one stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VideoStreamStats {
    /// Assembler counters
    pub assembler: AssemblerStats,
    /// VCL NAL units submitted to a decoder
    pub slices_submitted: u64,
    /// Keyframe slices submitted
    pub keyframes: u64,
    /// Pictures handed to the frame sink
    pub frames_rendered: u64,
    /// Decode errors
    pub decode_errors: u64,
    /// Frames dropped before a decoder existed
    pub frames_without_decoder: u64,
}

enum ActiveDecoder {
    None,
    Hardware(Box<dyn HardwareDecoder>),
    Software(Box<dyn SoftwareDecoder>),
}

impl ActiveDecoder {
    fn dispose(&mut self) {
        match self {
            ActiveDecoder::None => {}
            ActiveDecoder::Hardware(decoder) => decoder.dispose(),
            ActiveDecoder::Software(decoder) => decoder.dispose(),
        }
        *self = ActiveDecoder::None;
    }
}

struct VideoStream {
    assembler: NalFrameAssembler,
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
    state: DecoderState,
    decoder: ActiveDecoder,
    consecutive_errors: u32,
    stats: VideoStreamStats,
}

type SharedStream = Arc<Mutex<VideoStream>>;

impl VideoStream {
    fn new() -> Self {
        Self {
            assembler: NalFrameAssembler::new(),
            sps: None,
            pps: None,
            state: DecoderState::NoDecoder,
            decoder: ActiveDecoder::None,
            consecutive_errors: 0,
            stats: VideoStreamStats::default(),
        }
    }
}

impl Drop for VideoStream {
    fn drop(&mut self) {
        self.decoder.dispose();
    }
}

/// Routes remote video to per-stream decoders
pub struct VideoStreamRouter {
    config: VideoRouterConfig,
    provider: Arc<dyn DecoderProvider>,
    sink: Arc<dyn VideoFrameSink>,
    events: Option<VideoEventHandler>,
    streams: Mutex<HashMap<StreamKey, SharedStream>>,
    hardware_failed: Mutex<HashSet<StreamKey>>,
}

impl VideoStreamRouter {
    /// Create a router
    pub fn new(
        config: VideoRouterConfig,
        provider: Arc<dyn DecoderProvider>,
        sink: Arc<dyn VideoFrameSink>,
    ) -> Self {
        Self {
            config,
            provider,
            sink,
            events: None,
            streams: Mutex::new(HashMap::new()),
            hardware_failed: Mutex::new(HashSet::new()),
        }
    }

    /// Attach a notification handler
    pub fn with_event_handler(mut self, handler: VideoEventHandler) -> Self {
        self.events = Some(handler);
        self
    }

    /// Route one RTP video packet of a known participant
    pub fn route(
        &self,
        participant: &ParticipantId,
        role: StreamRole,
        packet: &RtpPacket,
    ) -> VideoRouteOutcome {
        let key = StreamKey::new(participant.clone(), role);
        let shared = self.stream_or_insert(&key);
        let mut stream = shared.lock();

        let access_unit = stream.assembler.push(
            &packet.payload,
            packet.timestamp,
            packet.sequence,
            packet.marker,
        );
        stream.stats.assembler = stream.assembler.stats();
        match access_unit {
            Some(au) => self.handle_access_unit(&key, &mut stream, &au),
            None => VideoRouteOutcome::Pending,
        }
    }

    /// Feed an already assembled access unit
    pub fn route_access_unit(
        &self,
        participant: &ParticipantId,
        role: StreamRole,
        access_unit: &AccessUnit,
    ) -> VideoRouteOutcome {
        let key = StreamKey::new(participant.clone(), role);
        let shared = self.stream_or_insert(&key);
        let mut stream = shared.lock();
        self.handle_access_unit(&key, &mut stream, access_unit)
    }

    fn stream_or_insert(&self, key: &StreamKey) -> SharedStream {
        self.streams
            .lock()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(VideoStream::new())))
            .clone()
    }

    fn stream(&self, participant: &ParticipantId, role: StreamRole) -> Option<SharedStream> {
        self.streams
            .lock()
            .get(&StreamKey::new(participant.clone(), role))
            .cloned()
    }

    fn handle_access_unit(
        &self,
        key: &StreamKey,
        stream: &mut VideoStream,
        access_unit: &AccessUnit,
    ) -> VideoRouteOutcome {
        let nals = split_annexb(&access_unit.data);

        for nal in &nals {
            let Some(&header) = nal.first() else { continue };
            match NalType::from_header(header) {
                NalType::Sps => {
                    if stream.sps.as_deref() != Some(*nal) {
                        if matches!(stream.state, DecoderState::Decoding(_)) {
                            info!("{} parameter sets changed, restarting decoder", key);
                            stream.decoder.dispose();
                            stream.state = DecoderState::AwaitingParameters;
                        }
                        stream.sps = Some(nal.to_vec());
                    }
                }
                NalType::Pps => {
                    if stream.pps.as_deref() != Some(*nal) {
                        stream.pps = Some(nal.to_vec());
                    }
                }
                _ => {}
            }
        }

        if matches!(
            stream.state,
            DecoderState::NoDecoder | DecoderState::AwaitingParameters
        ) {
            self.try_create_decoder(key, stream);
        }

        match stream.state {
            DecoderState::Decoding(_) => self.submit(key, stream, &nals),
            DecoderState::Failed => VideoRouteOutcome::Failed,
            DecoderState::NoDecoder | DecoderState::AwaitingParameters => {
                stream.stats.frames_without_decoder += 1;
                VideoRouteOutcome::AwaitingParameters
            }
        }
    }

    fn try_create_decoder(&self, key: &StreamKey, stream: &mut VideoStream) {
        let (Some(sps), Some(pps)) = (stream.sps.clone(), stream.pps.clone()) else {
            stream.state = DecoderState::AwaitingParameters;
            return;
        };

        let (width, height) = match sps_dimensions(&sps) {
            Ok(dimensions) => dimensions,
            Err(e) => {
                let fallback = self.config.fallback_dimensions(key.role);
                debug!("{} SPS unreadable ({}), assuming {:?}", key, e, fallback);
                fallback
            }
        };

        let hardware_refused = self.hardware_failed.lock().contains(key);
        if !hardware_refused {
            if let Some(mut hardware) = self.provider.hardware_decoder(key) {
                if hardware.initialize(width, height, &sps, &pps) {
                    info!("{} decoding in hardware at {}x{}", key, width, height);
                    stream.decoder = ActiveDecoder::Hardware(hardware);
                    stream.state = DecoderState::Decoding(DecoderPath::Hardware);
                    stream.consecutive_errors = 0;
                    self.emit(VideoEvent::HardwareDecoderReady {
                        key: key.clone(),
                        width,
                        height,
                    });
                    return;
                }
                hardware.dispose();
                self.hardware_failed.lock().insert(key.clone());
                let reason = format!("hardware decoder refused {}x{}", width, height);
                warn!("{} {}, falling back to software", key, reason);
                self.emit(VideoEvent::CapabilityDowngraded {
                    key: key.clone(),
                    reason,
                });
            }
        }

        let created = self.provider.software_decoder(key).and_then(|mut software| {
            software.initialize(width, height, &sps, &pps)?;
            Ok(software)
        });
        match created {
            Ok(software) => {
                info!(
                    "{} decoding with {} at {}x{}",
                    key,
                    software.name(),
                    width,
                    height
                );
                stream.decoder = ActiveDecoder::Software(software);
                stream.state = DecoderState::Decoding(DecoderPath::Software);
                stream.consecutive_errors = 0;
            }
            Err(e) => self.fail(key, stream, &e),
        }
    }

    fn submit(&self, key: &StreamKey, stream: &mut VideoStream, nals: &[&[u8]]) -> VideoRouteOutcome {
        let mut slices = 0;
        let mut keyframe = false;

        for nal in nals {
            let Some(&header) = nal.first() else { continue };
            let nal_type = NalType::from_header(header);
            if !nal_type.is_vcl() {
                continue;
            }
            let is_keyframe = nal_type == NalType::Idr;

            let result = match &mut stream.decoder {
                ActiveDecoder::Hardware(decoder) => decoder.decode_and_render(nal, is_keyframe),
                ActiveDecoder::Software(decoder) => match decoder.decode(nal, is_keyframe) {
                    Ok(Some(frame)) => {
                        stream.stats.frames_rendered += 1;
                        self.sink.on_frame(key, frame);
                        Ok(())
                    }
                    Ok(None) => Ok(()),
                    Err(e) => Err(e),
                },
                ActiveDecoder::None => return VideoRouteOutcome::Failed,
            };

            slices += 1;
            keyframe |= is_keyframe;
            stream.stats.slices_submitted += 1;
            if is_keyframe {
                stream.stats.keyframes += 1;
            }

            match result {
                Ok(()) => stream.consecutive_errors = 0,
                Err(e) => {
                    stream.stats.decode_errors += 1;
                    stream.consecutive_errors += 1;
                    if !e.is_recoverable()
                        || stream.consecutive_errors >= self.config.max_consecutive_errors
                    {
                        self.fail(key, stream, &e);
                        return VideoRouteOutcome::Failed;
                    }
                    warn!("{} dropped slice: {}", key, e);
                }
            }
        }

        VideoRouteOutcome::Submitted { slices, keyframe }
    }

    fn fail(&self, key: &StreamKey, stream: &mut VideoStream, error: &MediaError) {
        warn!("{} decoder failed: {}", key, error);
        stream.decoder.dispose();
        stream.state = DecoderState::Failed;
        self.emit(VideoEvent::DecoderFailed {
            key: key.clone(),
            reason: error.to_string(),
        });
    }

    fn emit(&self, event: VideoEvent) {
        if let Some(handler) = &self.events {
            handler(event);
        }
    }

    /// Decoder state of a stream
    pub fn state(&self, participant: &ParticipantId, role: StreamRole) -> DecoderState {
        self.stream(participant, role)
            .map(|s| s.lock().state)
            .unwrap_or(DecoderState::NoDecoder)
    }

    /// Counters of a stream
    pub fn stats(&self, participant: &ParticipantId, role: StreamRole) -> Option<VideoStreamStats> {
        self.stream(participant, role).map(|s| s.lock().stats)
    }

    /// Whether hardware decoding was refused for a stream
    pub fn is_hardware_failed(&self, participant: &ParticipantId, role: StreamRole) -> bool {
        self.hardware_failed
            .lock()
            .contains(&StreamKey::new(participant.clone(), role))
    }

    /// Tear down one stream; a later stream under the same key starts fresh
    pub fn teardown(&self, participant: &ParticipantId, role: StreamRole) {
        let key = StreamKey::new(participant.clone(), role);
        let removed = self.streams.lock().remove(&key);
        if let Some(stream) = removed {
            // waits for a packet of this stream still in flight
            stream.lock().decoder.dispose();
            debug!("{} torn down", key);
        }
        self.hardware_failed.lock().remove(&key);
    }

    /// Tear down every stream of a participant
    pub fn teardown_participant(&self, participant: &ParticipantId) {
        for role in [StreamRole::Camera, StreamRole::ScreenShare] {
            self.teardown(participant, role);
        }
    }

    /// Tear down everything
    pub fn clear(&self) {
        let drained: Vec<SharedStream> = self.streams.lock().drain().map(|(_, s)| s).collect();
        for stream in drained {
            stream.lock().decoder.dispose();
        }
        self.hardware_failed.lock().clear();
    }

    /// Number of tracked streams
    pub fn stream_count(&self) -> usize {
        self.streams.lock().len()
    }
}

impl Drop for VideoStreamRouter {
    fn drop(&mut self) {
        self.clear();
    }
}
