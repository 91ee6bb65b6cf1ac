//! Media session controller
//!
//! Owns the receive pipeline (SSRC routing, mixer, video decoders), the
//! local send tracks, the capture pipelines and the negotiation state of one
//! call. Transport callbacks, capture threads and the UI all call into the
//! same [`MediaSession`], so every piece of state sits behind its own lock
//! and no lock is held across an `.await`.

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::event::{EventBus, EventFilter, EventStream, FilteredEventStream, MediaEvent};
use crate::settings::{MediaSettings, MemorySettings, SettingsStore};
use crate::transport::{IceCandidate, MediaTransport, SignalingChannel, TransportState};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sfurtc_core::{
    H264Packetizer, MappingUpdate, ParticipantId, RtpPacket, RtpSequencer,
    SsrcRouter, StreamRole,
};
use sfurtc_media::video::{default_decoder_provider, NullFrameSink, VideoRouteOutcome};
use sfurtc_media::{
    AudioMixer, AudioSendPipeline, AudioSink, CaptureEvent, CaptureEventHandler, DecoderProvider, DecoderState,
    EncodedAudioFrame, EncodedAudioSink, EncodedVideoFrame, EncodedVideoSink, MixerStats,
    NullAudioSink, RouteOutcome, VideoCapturePipeline, VideoEvent, VideoFrameSink,
    VideoStreamRouter,
};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[cfg(feature = "devices")]
use sfurtc_media::{capture::CpalMicrophone, CpalPlayback, PlayoutMixer, PlayoutSink};

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Not joined
    Idle,
    /// Joined, waiting for the transport to connect
    Connecting,
    /// Media is flowing
    Connected,
    /// Transport lost; call `leave` before joining again
    Disconnected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// What happened to one inbound RTP packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Handled by the audio mixer
    Audio(RouteOutcome),
    /// Handled by the video router
    Video(VideoRouteOutcome),
    /// Video from an SSRC with no known owner
    Unattributed,
    /// Payload type outside the convention
    UnknownPayloadType(u8),
    /// Not a valid RTP packet
    Malformed,
    /// No session is active
    Inactive,
}

#[derive(Debug, Default)]
struct Negotiation {
    joined: bool,
    cached_offer: Option<String>,
    remote_applied: bool,
    pending_ice: Vec<IceCandidate>,
}

enum TrackSender {
    Audio(RtpSequencer),
    Video(H264Packetizer),
}

impl TrackSender {
    fn new(role: StreamRole, ssrc: u32) -> Self {
        if role.is_audio() {
            TrackSender::Audio(RtpSequencer::new(ssrc, role.payload_type()))
        } else {
            TrackSender::Video(H264Packetizer::new(ssrc, role.payload_type()))
        }
    }

    fn set_ssrc(&mut self, ssrc: u32) {
        match self {
            TrackSender::Audio(sequencer) => sequencer.set_ssrc(ssrc),
            TrackSender::Video(packetizer) => packetizer.sequencer_mut().set_ssrc(ssrc),
        }
    }
}

#[cfg(feature = "devices")]
type Playback = CpalPlayback;
#[cfg(not(feature = "devices"))]
type Playback = std::convert::Infallible;

struct ActiveMedia {
    mixer: Arc<AudioMixer>,
    video: Arc<VideoStreamRouter>,
    // Stops on drop
    _playback: Option<Playback>,
}

#[derive(Default)]
struct Capture {
    microphone: Option<Arc<Mutex<AudioSendPipeline>>>,
    screen_audio: Option<Arc<Mutex<AudioSendPipeline>>>,
    // Stops on drop
    #[cfg(feature = "devices")]
    _microphone_device: Option<CpalMicrophone>,
    camera: Option<VideoCapturePipeline>,
    screen: Option<VideoCapturePipeline>,
}

struct SessionInner {
    id: Uuid,
    config: SessionConfig,
    transport: Arc<dyn MediaTransport>,
    signaling: Arc<dyn SignalingChannel>,
    settings: Arc<dyn SettingsStore>,
    decoder_provider: Arc<dyn DecoderProvider>,
    audio_sink: Option<Arc<dyn AudioSink>>,
    frame_sink: Arc<dyn VideoFrameSink>,
    events: Arc<EventBus>,
    ssrc_router: Arc<SsrcRouter>,
    state: RwLock<SessionState>,
    joined_at: RwLock<Option<DateTime<Utc>>>,
    media: RwLock<Option<ActiveMedia>>,
    negotiation: Mutex<Negotiation>,
    senders: Mutex<HashMap<StreamRole, TrackSender>>,
    capture: Mutex<Capture>,
    participants: RwLock<BTreeSet<ParticipantId>>,
    media_settings: RwLock<MediaSettings>,
}

/// Fluent builder for a [`MediaSession`]
pub struct SessionBuilder {
    config: SessionConfig,
    transport: Arc<dyn MediaTransport>,
    signaling: Arc<dyn SignalingChannel>,
    settings: Option<Arc<dyn SettingsStore>>,
    decoder_provider: Option<Arc<dyn DecoderProvider>>,
    audio_sink: Option<Arc<dyn AudioSink>>,
    frame_sink: Option<Arc<dyn VideoFrameSink>>,
}

impl SessionBuilder {
    /// Start building a session over the given collaborators
    pub fn new(
        config: SessionConfig,
        transport: Arc<dyn MediaTransport>,
        signaling: Arc<dyn SignalingChannel>,
    ) -> Self {
        Self {
            config,
            transport,
            signaling,
            settings: None,
            decoder_provider: None,
            audio_sink: None,
            frame_sink: None,
        }
    }

    /// Settings store; defaults to an in-memory store
    pub fn settings(mut self, settings: Arc<dyn SettingsStore>) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Video decoder factory; defaults to software decoding only
    pub fn decoder_provider(mut self, provider: Arc<dyn DecoderProvider>) -> Self {
        self.decoder_provider = Some(provider);
        self
    }

    /// Destination of mixed audio; overrides device playback
    pub fn audio_sink(mut self, sink: Arc<dyn AudioSink>) -> Self {
        self.audio_sink = Some(sink);
        self
    }

    /// Destination of software-decoded pictures
    pub fn frame_sink(mut self, sink: Arc<dyn VideoFrameSink>) -> Self {
        self.frame_sink = Some(sink);
        self
    }

    /// Create the session in the `Idle` state
    pub fn build(self) -> MediaSession {
        MediaSession {
            inner: Arc::new(SessionInner {
                id: Uuid::new_v4(),
                config: self.config,
                transport: self.transport,
                signaling: self.signaling,
                settings: self
                    .settings
                    .unwrap_or_else(|| Arc::new(MemorySettings::new())),
                decoder_provider: self
                    .decoder_provider
                    .unwrap_or_else(default_decoder_provider),
                audio_sink: self.audio_sink,
                frame_sink: self.frame_sink.unwrap_or_else(|| Arc::new(NullFrameSink)),
                events: Arc::new(EventBus::new()),
                ssrc_router: Arc::new(SsrcRouter::new()),
                state: RwLock::new(SessionState::Idle),
                joined_at: RwLock::new(None),
                media: RwLock::new(None),
                negotiation: Mutex::new(Negotiation::default()),
                senders: Mutex::new(HashMap::new()),
                capture: Mutex::new(Capture::default()),
                participants: RwLock::new(BTreeSet::new()),
                media_settings: RwLock::new(MediaSettings::default()),
            }),
        }
    }
}

/// One media session against a forwarding server
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct MediaSession {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for MediaSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaSession")
            .field("id", &self.inner.id)
            .field("participant", &self.inner.config.participant)
            .field("state", &self.state())
            .finish()
    }
}

impl MediaSession {
    /// Start building a session
    pub fn builder(
        config: SessionConfig,
        transport: Arc<dyn MediaTransport>,
        signaling: Arc<dyn SignalingChannel>,
    ) -> SessionBuilder {
        SessionBuilder::new(config, transport, signaling)
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        *self.inner.state.read()
    }

    /// Identifier of this session, unique per process run
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// When the current join started
    pub fn joined_at(&self) -> Option<DateTime<Utc>> {
        *self.inner.joined_at.read()
    }

    /// Local participant
    pub fn participant(&self) -> &ParticipantId {
        &self.inner.config.participant
    }

    /// Subscribe to session events
    pub fn events(&self) -> EventStream {
        self.inner.events.subscribe()
    }

    /// Subscribe to the events that pass `filter`
    pub fn events_filtered(&self, filter: EventFilter) -> FilteredEventStream {
        self.inner.events.subscribe().filtered(filter)
    }

    /// Subscribe to one remote participant's events plus connection changes
    pub fn participant_events(&self, participant: ParticipantId) -> FilteredEventStream {
        self.events_filtered(EventFilter::participant(participant))
    }

    /// Shared SSRC routing table
    pub fn ssrc_router(&self) -> Arc<SsrcRouter> {
        self.inner.ssrc_router.clone()
    }

    /// Settings read at join, updated by the setters below
    pub fn media_settings(&self) -> MediaSettings {
        self.inner.media_settings.read().clone()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Join: load settings, build the pipelines, start capture and apply
    /// an offer that arrived early
    pub async fn join(&self) -> Result<()> {
        let inner = &self.inner;
        {
            let mut state = inner.state.write();
            if *state != SessionState::Idle {
                return Err(SessionError::InvalidState {
                    operation: "join".to_string(),
                    state: state.to_string(),
                });
            }
            *state = SessionState::Connecting;
        }
        *inner.joined_at.write() = Some(Utc::now());
        info!("{} joining (session {})", inner.config.participant, inner.id);
        inner.publish(MediaEvent::StateChanged {
            state: SessionState::Connecting,
        });

        let settings = match inner.settings.media_settings() {
            Ok(settings) => settings,
            Err(e) => {
                warn!("failed to load media settings, using defaults: {}", e);
                inner.publish_error(&e);
                MediaSettings::default()
            }
        };
        *inner.media_settings.write() = settings.clone();

        let media = match inner.build_media(&settings) {
            Ok(media) => media,
            Err(e) => {
                *inner.state.write() = SessionState::Idle;
                *inner.joined_at.write() = None;
                inner.publish(MediaEvent::StateChanged {
                    state: SessionState::Idle,
                });
                return Err(e);
            }
        };
        match inner.settings.load_volumes() {
            Ok(volumes) => media.mixer.load_volumes(&volumes),
            Err(e) => {
                warn!("failed to load volumes: {}", e);
                inner.publish_error(&e);
            }
        }
        *inner.media.write() = Some(media);

        {
            let mut senders = inner.senders.lock();
            for role in StreamRole::ALL {
                let ssrc = inner.transport.local_ssrc(role).unwrap_or(0);
                senders.insert(role, TrackSender::new(role, ssrc));
            }
        }

        let capture = inner.start_capture(Arc::downgrade(&self.inner), &settings);
        *inner.capture.lock() = capture;

        let cached = {
            let mut negotiation = inner.negotiation.lock();
            negotiation.joined = true;
            negotiation.cached_offer.take()
        };
        if let Some(offer) = cached {
            debug!("applying offer cached before join");
            let answer = inner.apply_offer(&offer).await?;
            inner.publish(MediaEvent::LocalAnswer { sdp: answer.clone() });
            if let Err(e) = inner.signaling.send_answer(&answer).await {
                warn!("failed to send answer: {}", e);
                inner.publish_error(&e);
            }
        }
        Ok(())
    }

    /// Leave: stop capture, drop decoders and routing state, end event
    /// subscriptions. Returns once everything is released.
    pub fn leave(&self) -> SessionState {
        let inner = &self.inner;
        let capture = std::mem::take(&mut *inner.capture.lock());
        drop(capture);

        inner.senders.lock().clear();
        let media = inner.media.write().take();
        if let Some(media) = media {
            media.video.clear();
            if let Err(e) = media.mixer.reset() {
                debug!("mixer reset during leave: {}", e);
            }
        }
        inner.ssrc_router.clear();
        inner.participants.write().clear();
        *inner.negotiation.lock() = Negotiation::default();
        *inner.state.write() = SessionState::Idle;
        *inner.joined_at.write() = None;

        info!("{} left (session {})", inner.config.participant, inner.id);
        inner.publish(MediaEvent::StateChanged {
            state: SessionState::Idle,
        });
        inner.events.close();
        SessionState::Idle
    }

    /// Leave and close the transport
    pub async fn shutdown(&self) {
        self.leave();
        self.inner.transport.close().await;
    }

    /// Transport connection state changed
    pub fn on_transport_state(&self, transport_state: TransportState) {
        let inner = &self.inner;
        debug!("transport state {:?}", transport_state);
        match transport_state {
            TransportState::Connected => {
                let changed = {
                    let mut state = inner.state.write();
                    if *state == SessionState::Connecting {
                        *state = SessionState::Connected;
                        true
                    } else {
                        false
                    }
                };
                if changed {
                    info!("{} connected", inner.config.participant);
                    inner.publish(MediaEvent::StateChanged {
                        state: SessionState::Connected,
                    });
                }
            }
            state if state.is_terminal() => {
                inner.disconnect(format!("transport {:?}", state));
            }
            _ => {}
        }
    }

    // ------------------------------------------------------------------
    // Negotiation
    // ------------------------------------------------------------------

    /// Server offer; returns the answer, or `None` when cached until join
    pub async fn on_remote_offer(&self, sdp: &str) -> Result<Option<String>> {
        let inner = &self.inner;
        {
            let mut negotiation = inner.negotiation.lock();
            if !negotiation.joined {
                if negotiation.cached_offer.is_some() {
                    debug!("replacing cached offer");
                }
                negotiation.cached_offer = Some(sdp.to_string());
                return Ok(None);
            }
        }
        inner.apply_offer(sdp).await.map(Some)
    }

    /// Remote ICE candidate; queued until a remote description is applied
    pub async fn on_remote_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let inner = &self.inner;
        {
            let mut negotiation = inner.negotiation.lock();
            if !negotiation.remote_applied {
                negotiation.pending_ice.push(candidate);
                return Ok(());
            }
        }
        inner.transport.add_remote_ice_candidate(&candidate).await
    }

    /// Local ICE candidate gathered by the transport
    pub async fn on_local_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let inner = &self.inner;
        inner.publish(MediaEvent::LocalIceCandidate {
            candidate: candidate.clone(),
        });
        inner.signaling.send_ice_candidate(&candidate).await
    }

    /// Remote candidates waiting for a remote description
    pub fn pending_ice_candidates(&self) -> usize {
        self.inner.negotiation.lock().pending_ice.len()
    }

    /// Whether an offer is waiting for join
    pub fn has_cached_offer(&self) -> bool {
        self.inner.negotiation.lock().cached_offer.is_some()
    }

    // ------------------------------------------------------------------
    // Receive path
    // ------------------------------------------------------------------

    /// Server SSRC mapping
    pub fn on_ssrc_mapping(&self, ssrc: u32, participant: ParticipantId, role: StreamRole) {
        self.on_ssrc_mappings(vec![MappingUpdate {
            ssrc,
            participant,
            role,
        }]);
    }

    /// Batch of server SSRC mappings
    pub fn on_ssrc_mappings(&self, updates: Vec<MappingUpdate>) {
        let inner = &self.inner;
        if let Some((mixer, _)) = inner.receivers() {
            for update in &updates {
                if !update.role.is_audio() {
                    continue;
                }
                if let Some(old) = inner.ssrc_router.ssrc_for(&update.participant, update.role) {
                    if old != update.ssrc {
                        mixer.forget_stream(old);
                    }
                }
            }
        }
        inner.ssrc_router.observe_batch(updates);
    }

    /// Raw RTP packet from the transport
    pub fn on_rtp(&self, data: &[u8]) -> ReceiveOutcome {
        match RtpPacket::parse(data) {
            Ok(packet) => self.on_rtp_packet(&packet),
            Err(e) => {
                debug!("dropping malformed RTP: {}", e);
                ReceiveOutcome::Malformed
            }
        }
    }

    /// Parsed RTP packet from the transport
    pub fn on_rtp_packet(&self, packet: &RtpPacket) -> ReceiveOutcome {
        let inner = &self.inner;
        let Some((mixer, video)) = inner.receivers() else {
            return ReceiveOutcome::Inactive;
        };
        let Some(kind) = packet.kind() else {
            debug!(
                "dropping packet with payload type {} from {:#010x}",
                packet.payload_type, packet.ssrc
            );
            return ReceiveOutcome::UnknownPayloadType(packet.payload_type);
        };
        let role = kind.role();
        if role.is_audio() {
            return ReceiveOutcome::Audio(mixer.route(packet, None));
        }
        match inner.ssrc_router.resolve(packet.ssrc, role) {
            Some(participant) => ReceiveOutcome::Video(video.route(&participant, role, packet)),
            None => {
                debug!("no owner for {} SSRC {:#010x}", role, packet.ssrc);
                ReceiveOutcome::Unattributed
            }
        }
    }

    /// Remote participant joined
    pub fn participant_joined(&self, participant: ParticipantId) {
        let inserted = self.inner.participants.write().insert(participant.clone());
        if inserted {
            info!("participant {} joined", participant);
            self.inner
                .publish(MediaEvent::ParticipantJoined { participant });
        }
    }

    /// Remote participant left; all derived state is released
    pub fn participant_left(&self, participant: &ParticipantId) {
        let inner = &self.inner;
        inner.participants.write().remove(participant);
        if let Some((mixer, video)) = inner.receivers() {
            for role in [StreamRole::Microphone, StreamRole::ScreenAudio] {
                if let Some(ssrc) = inner.ssrc_router.ssrc_for(participant, role) {
                    mixer.forget_stream(ssrc);
                }
            }
            video.teardown_participant(participant);
        }
        inner.ssrc_router.stop_watching(participant);
        inner.ssrc_router.purge_participant(participant);
        info!("participant {} left", participant);
        inner.publish(MediaEvent::ParticipantLeft {
            participant: participant.clone(),
        });
    }

    /// Remote participants currently present
    pub fn participants(&self) -> Vec<ParticipantId> {
        self.inner.participants.read().iter().cloned().collect()
    }

    /// Start watching a participant's screen share
    pub fn start_watching_screen_share(&self, participant: ParticipantId) {
        self.inner.ssrc_router.start_watching(participant.clone());
        self.inner.publish(MediaEvent::ScreenShareWatchChanged {
            participant,
            watching: true,
        });
    }

    /// Stop watching a participant's screen share and release its decoder
    pub fn stop_watching_screen_share(&self, participant: &ParticipantId) {
        let inner = &self.inner;
        let screen_audio = inner
            .ssrc_router
            .ssrc_for(participant, StreamRole::ScreenAudio);
        inner.ssrc_router.stop_watching(participant);
        if let Some((mixer, video)) = inner.receivers() {
            video.teardown(participant, StreamRole::ScreenShare);
            if let Some(ssrc) = screen_audio {
                mixer.forget_stream(ssrc);
            }
        }
        inner.publish(MediaEvent::ScreenShareWatchChanged {
            participant: participant.clone(),
            watching: false,
        });
    }

    /// A remote participant stopped sending one stream
    pub fn remote_stream_stopped(&self, participant: &ParticipantId, role: StreamRole) {
        let inner = &self.inner;
        if let Some((mixer, video)) = inner.receivers() {
            if role.is_video() {
                video.teardown(participant, role);
            } else if let Some(ssrc) = inner.ssrc_router.ssrc_for(participant, role) {
                mixer.forget_stream(ssrc);
            }
        }
        debug!("{} stopped {}", participant, role);
        inner.publish(MediaEvent::RemoteStreamStopped {
            participant: participant.clone(),
            role,
        });
    }

    /// Decoder state of a remote video stream
    pub fn video_state(&self, participant: &ParticipantId, role: StreamRole) -> DecoderState {
        match self.inner.receivers() {
            Some((_, video)) => video.state(participant, role),
            None => DecoderState::NoDecoder,
        }
    }

    /// Mixer counters, when joined
    pub fn mixer_stats(&self) -> Option<MixerStats> {
        self.inner.receivers().map(|(mixer, _)| mixer.stats())
    }

    // ------------------------------------------------------------------
    // Volumes and local audio settings
    // ------------------------------------------------------------------

    /// Set a participant's volume; returns the clamped value
    pub fn set_user_volume(&self, participant: ParticipantId, volume: f32) -> Result<f32> {
        let mixer = self.inner.mixer("set_user_volume")?;
        let applied = mixer.set_user_volume(participant.clone(), volume);
        self.inner.persist_volumes(&mixer);
        self.inner.publish(MediaEvent::VolumeChanged {
            participant: Some(participant),
            volume: applied,
        });
        Ok(applied)
    }

    /// A participant's volume
    pub fn user_volume(&self, participant: &ParticipantId) -> Result<f32> {
        Ok(self.inner.mixer("user_volume")?.user_volume(participant))
    }

    /// Set the master volume; returns the clamped value
    pub fn set_master_volume(&self, volume: f32) -> Result<f32> {
        let mixer = self.inner.mixer("set_master_volume")?;
        let applied = mixer.set_master_volume(volume);
        self.inner.persist_volumes(&mixer);
        self.inner.publish(MediaEvent::VolumeChanged {
            participant: None,
            volume: applied,
        });
        Ok(applied)
    }

    /// The master volume
    pub fn master_volume(&self) -> Result<f32> {
        Ok(self.inner.mixer("master_volume")?.master_volume())
    }

    /// Mute or unmute the microphone
    pub fn set_microphone_muted(&self, muted: bool) {
        if let Some(pipeline) = &self.inner.capture.lock().microphone {
            pipeline.lock().set_muted(muted);
        }
    }

    /// Change the manual microphone gain and persist it
    pub fn set_manual_gain(&self, gain: f32) -> Result<()> {
        self.update_settings(|settings| settings.manual_gain = gain.max(0.0))
    }

    /// Change the noise gate and persist it
    pub fn set_gate(&self, enabled: bool, threshold: f32) -> Result<()> {
        self.update_settings(|settings| {
            settings.gate_enabled = enabled;
            settings.gate_threshold = threshold.max(0.0);
        })
    }

    fn update_settings(&self, apply: impl FnOnce(&mut MediaSettings)) -> Result<()> {
        let inner = &self.inner;
        let settings = {
            let mut current = inner.media_settings.write();
            apply(&mut current);
            current.clone()
        };
        if let Some(pipeline) = &inner.capture.lock().microphone {
            if let Some(agc) = pipeline.lock().agc_mut() {
                agc.set_manual_gain(settings.manual_gain);
                agc.set_gate(settings.gate_enabled, settings.gate_threshold);
            }
        }
        inner.settings.save_media_settings(&settings)
    }

    // ------------------------------------------------------------------
    // Send path
    // ------------------------------------------------------------------

    /// Send one encoded audio frame on the microphone or screen-audio track
    pub fn send_audio(&self, role: StreamRole, payload: Bytes, samples: u32) -> Result<()> {
        self.inner.send_audio(role, payload, samples)
    }

    /// Packetize and send one Annex-B access unit on a video track
    pub fn send_video(&self, role: StreamRole, access_unit: &[u8], timestamp_increment: u32) -> Result<()> {
        self.inner.send_video(role, access_unit, timestamp_increment)
    }

    /// Send pipeline of an audio role, for hosts that feed PCM themselves
    pub fn audio_pipeline(&self, role: StreamRole) -> Option<Arc<Mutex<AudioSendPipeline>>> {
        let capture = self.inner.capture.lock();
        match role {
            StreamRole::Microphone => capture.microphone.clone(),
            StreamRole::ScreenAudio => capture.screen_audio.clone(),
            _ => None,
        }
    }

    /// Whether local capture of a role is active
    pub fn is_capturing(&self, role: StreamRole) -> bool {
        let capture = self.inner.capture.lock();
        match role {
            StreamRole::Microphone => capture.microphone.is_some(),
            StreamRole::ScreenAudio => capture.screen_audio.is_some(),
            StreamRole::Camera => capture.camera.as_ref().is_some_and(|p| p.is_running()),
            StreamRole::ScreenShare => capture.screen.as_ref().is_some_and(|p| p.is_running()),
        }
    }

    /// SSRC stamped on outgoing packets of a role
    pub fn local_ssrc(&self, role: StreamRole) -> Option<u32> {
        self.inner.senders.lock().get(&role).map(|sender| match sender {
            TrackSender::Audio(sequencer) => sequencer.ssrc(),
            TrackSender::Video(packetizer) => packetizer.sequencer().ssrc(),
        })
    }
}

impl EncodedAudioSink for MediaSession {
    fn send_audio(&self, frame: EncodedAudioFrame) {
        self.inner.send_audio_frame(frame);
    }
}

impl EncodedVideoSink for MediaSession {
    fn send_video(&self, frame: EncodedVideoFrame) {
        self.inner.send_video_frame(frame);
    }
}

/// Send sink handed to capture pipelines; does not keep the session alive
struct CaptureSink(Weak<SessionInner>);

impl EncodedAudioSink for CaptureSink {
    fn send_audio(&self, frame: EncodedAudioFrame) {
        if let Some(inner) = self.0.upgrade() {
            inner.send_audio_frame(frame);
        }
    }
}

impl EncodedVideoSink for CaptureSink {
    fn send_video(&self, frame: EncodedVideoFrame) {
        if let Some(inner) = self.0.upgrade() {
            inner.send_video_frame(frame);
        }
    }
}

impl SessionInner {
    fn publish(&self, event: MediaEvent) {
        self.events.publish(event);
    }

    fn publish_error(&self, error: &SessionError) {
        self.publish(MediaEvent::Error {
            error: error.to_string(),
            recoverable: error.is_recoverable(),
        });
    }

    fn downgrade(&self, subject: &str, reason: String) {
        warn!("{} unavailable: {}", subject, reason);
        self.publish(MediaEvent::CapabilityDowngraded {
            subject: subject.to_string(),
            reason,
        });
    }

    fn receivers(&self) -> Option<(Arc<AudioMixer>, Arc<VideoStreamRouter>)> {
        self.media
            .read()
            .as_ref()
            .map(|media| (media.mixer.clone(), media.video.clone()))
    }

    fn mixer(&self, operation: &str) -> Result<Arc<AudioMixer>> {
        self.receivers()
            .map(|(mixer, _)| mixer)
            .ok_or_else(|| SessionError::InvalidState {
                operation: operation.to_string(),
                state: self.state.read().to_string(),
            })
    }

    fn persist_volumes(&self, mixer: &AudioMixer) {
        if let Err(e) = self.settings.save_volumes(&mixer.volumes()) {
            warn!("failed to save volumes: {}", e);
            self.publish_error(&e);
        }
    }

    fn disconnect(&self, reason: String) {
        {
            let mut state = self.state.write();
            if matches!(*state, SessionState::Idle | SessionState::Disconnected) {
                return;
            }
            *state = SessionState::Disconnected;
        }
        warn!("{} disconnected: {}", self.config.participant, reason);
        self.publish(MediaEvent::StateChanged {
            state: SessionState::Disconnected,
        });
        self.publish(MediaEvent::Disconnected { reason });
    }

    fn build_media(&self, settings: &MediaSettings) -> Result<ActiveMedia> {
        let (sink, playback) = match &self.audio_sink {
            Some(sink) => (sink.clone(), None),
            None if self.config.playback => self.open_playback(settings),
            None => (Arc::new(NullAudioSink) as Arc<dyn AudioSink>, None),
        };

        let mixer = AudioMixer::new(self.config.mixer.clone(), self.ssrc_router.clone(), sink)?;

        let events = self.events.clone();
        let video = VideoStreamRouter::new(
            self.config.video.clone(),
            self.decoder_provider.clone(),
            self.frame_sink.clone(),
        )
        .with_event_handler(Arc::new(move |event: VideoEvent| events.publish(event.into())));

        Ok(ActiveMedia {
            mixer: Arc::new(mixer),
            video: Arc::new(video),
            _playback: playback,
        })
    }

    #[cfg(feature = "devices")]
    fn open_playback(&self, settings: &MediaSettings) -> (Arc<dyn AudioSink>, Option<Playback>) {
        let opus = self.config.mixer.microphone.clone();
        let playout = PlayoutSink::new(PlayoutMixer::new(
            opus.clone(),
            self.config.playout_buffer_ms,
        ));
        match CpalPlayback::start(
            playout.playout(),
            settings.output_device.clone(),
            opus.sample_rate,
            opus.channels as u16,
        ) {
            Ok(playback) => (Arc::new(playout), Some(playback)),
            Err(e) => {
                self.downgrade("audio playback", e.to_string());
                (Arc::new(NullAudioSink), None)
            }
        }
    }

    #[cfg(not(feature = "devices"))]
    fn open_playback(&self, _settings: &MediaSettings) -> (Arc<dyn AudioSink>, Option<Playback>) {
        self.downgrade("audio playback", "device support not built".to_string());
        (Arc::new(NullAudioSink), None)
    }

    fn capture_events(&self) -> CaptureEventHandler {
        let events = self.events.clone();
        Arc::new(move |event: CaptureEvent| events.publish(event.into()))
    }

    fn start_capture(&self, weak: Weak<SessionInner>, settings: &MediaSettings) -> Capture {
        let sink = Arc::new(CaptureSink(weak));
        let mut capture = Capture::default();

        if let Some(microphone) = &self.config.microphone {
            let mut config = microphone.pipeline.clone();
            if let Some(agc) = config.agc.as_mut() {
                settings.apply_to(agc);
            }
            if settings.noise_suppression || settings.echo_cancellation {
                debug!("noise suppression and echo cancellation are left to the input device");
            }
            match AudioSendPipeline::new(StreamRole::Microphone, config, sink.clone()) {
                Ok(mut pipeline) => {
                    pipeline.set_event_handler(self.capture_events());
                    let pipeline = Arc::new(Mutex::new(pipeline));
                    #[cfg(feature = "devices")]
                    if microphone.open_device {
                        match CpalMicrophone::start(
                            pipeline.clone(),
                            settings.input_device.clone(),
                            microphone.pipeline.opus.sample_rate,
                        ) {
                            Ok(device) => capture._microphone_device = Some(device),
                            Err(e) => self.downgrade("microphone", e.to_string()),
                        }
                    }
                    #[cfg(not(feature = "devices"))]
                    if microphone.open_device {
                        self.downgrade("microphone", "device support not built".to_string());
                    }
                    capture.microphone = Some(pipeline);
                }
                Err(e) => self.downgrade("microphone", e.to_string()),
            }
        }

        if let Some(config) = &self.config.screen_audio {
            match AudioSendPipeline::new(StreamRole::ScreenAudio, config.clone(), sink.clone()) {
                Ok(pipeline) => capture.screen_audio = Some(Arc::new(Mutex::new(pipeline))),
                Err(e) => self.downgrade("screen audio", e.to_string()),
            }
        }

        for (slot, config) in [
            (&mut capture.camera, &self.config.camera),
            (&mut capture.screen, &self.config.screen),
        ] {
            let Some(config) = config else { continue };
            let role = config.role();
            let started = VideoCapturePipeline::new(config.clone()).and_then(|mut pipeline| {
                pipeline.start(sink.clone(), Some(self.capture_events()))?;
                Ok(pipeline)
            });
            match started {
                Ok(pipeline) => *slot = Some(pipeline),
                Err(e) => self.downgrade(role.as_str(), e.to_string()),
            }
        }

        capture
    }

    async fn apply_offer(&self, sdp: &str) -> Result<String> {
        let answer = match self.transport.apply_remote_offer(sdp).await {
            Ok(answer) => answer,
            Err(e) => {
                let error = SessionError::Negotiation {
                    reason: e.to_string(),
                };
                self.disconnect(error.to_string());
                return Err(error);
            }
        };

        let pending = {
            let mut negotiation = self.negotiation.lock();
            negotiation.remote_applied = true;
            std::mem::take(&mut negotiation.pending_ice)
        };
        if !pending.is_empty() {
            debug!("flushing {} queued ICE candidates", pending.len());
        }
        for candidate in &pending {
            if let Err(e) = self.transport.add_remote_ice_candidate(candidate).await {
                warn!("queued ICE candidate rejected: {}", e);
            }
        }

        let mut assigned = Vec::new();
        {
            let mut senders = self.senders.lock();
            for role in StreamRole::ALL {
                let Some(ssrc) = self.transport.local_ssrc(role) else {
                    continue;
                };
                senders
                    .entry(role)
                    .or_insert_with(|| TrackSender::new(role, ssrc))
                    .set_ssrc(ssrc);
                assigned.push((role, ssrc));
            }
        }
        if !assigned.is_empty() {
            info!("local SSRCs assigned: {:?}", assigned);
            self.publish(MediaEvent::LocalSsrcsAssigned { ssrcs: assigned });
        }
        Ok(answer)
    }

    fn send_audio_frame(&self, frame: EncodedAudioFrame) {
        if let Err(e) = self.send_audio(frame.role, frame.payload, frame.samples) {
            debug!("audio frame not sent: {}", e);
        }
    }

    fn send_video_frame(&self, frame: EncodedVideoFrame) {
        if let Err(e) = self.send_video(frame.role, &frame.access_unit.data, frame.timestamp_increment) {
            debug!("video frame not sent: {}", e);
        }
    }

    fn send_audio(&self, role: StreamRole, payload: Bytes, samples: u32) -> Result<()> {
        let packet = {
            let mut senders = self.senders.lock();
            match senders.get_mut(&role) {
                Some(TrackSender::Audio(sequencer)) => {
                    let packet = sequencer.next_packet(payload, false);
                    sequencer.advance(samples);
                    packet
                }
                Some(TrackSender::Video(_)) => {
                    return Err(SessionError::InvalidState {
                        operation: format!("send_audio on {}", role),
                        state: "video track".to_string(),
                    })
                }
                None => return Err(self.not_sending("send_audio")),
            }
        };
        self.transport.send_rtp(role, packet)
    }

    fn send_video(&self, role: StreamRole, access_unit: &[u8], timestamp_increment: u32) -> Result<()> {
        let packets = {
            let mut senders = self.senders.lock();
            match senders.get_mut(&role) {
                Some(TrackSender::Video(packetizer)) => {
                    packetizer.packetize_to_rtp(access_unit, timestamp_increment)
                }
                Some(TrackSender::Audio(_)) => {
                    return Err(SessionError::InvalidState {
                        operation: format!("send_video on {}", role),
                        state: "audio track".to_string(),
                    })
                }
                None => return Err(self.not_sending("send_video")),
            }
        };
        for packet in packets {
            self.transport.send_rtp(role, packet)?;
        }
        Ok(())
    }

    fn not_sending(&self, operation: &str) -> SessionError {
        SessionError::InvalidState {
            operation: operation.to_string(),
            state: self.state.read().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_sender_roles() {
        assert!(matches!(
            TrackSender::new(StreamRole::Microphone, 1),
            TrackSender::Audio(_)
        ));
        let mut sender = TrackSender::new(StreamRole::ScreenShare, 1);
        sender.set_ssrc(42);
        match sender {
            TrackSender::Video(packetizer) => {
                assert_eq!(packetizer.sequencer().ssrc(), 42);
                assert_eq!(packetizer.sequencer().payload_type(), 97);
            }
            TrackSender::Audio(_) => panic!("screen share must packetize"),
        }
    }

    #[test]
    fn test_state_names() {
        assert_eq!(SessionState::Connecting.to_string(), "connecting");
        assert_eq!(SessionState::Disconnected.to_string(), "disconnected");
    }
}
