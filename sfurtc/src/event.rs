//! Session events and their fan-out
//!
//! Every notification the session produces goes through one [`EventBus`].
//! Subscribers own an [`EventStream`]; [`EventBus::close`] ends all of them
//! at once when the session is left.

use crate::session::SessionState;
use crate::transport::IceCandidate;
use futures::Stream;
use parking_lot::Mutex;
use sfurtc_core::{ParticipantId, StreamRole};
use sfurtc_media::{CaptureEvent, StreamKey, VideoEvent};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::debug;

/// Events produced by a media session
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    /// Session state changed
    StateChanged {
        /// New state
        state: SessionState,
    },
    /// Local answer produced for an offer that arrived before join completed
    LocalAnswer {
        /// Answer SDP
        sdp: String,
    },
    /// Local ICE candidate to forward to the server
    LocalIceCandidate {
        /// The candidate
        candidate: IceCandidate,
    },
    /// SSRCs the transport assigned to the local send tracks
    LocalSsrcsAssigned {
        /// One entry per role with an assigned SSRC
        ssrcs: Vec<(StreamRole, u32)>,
    },
    /// A remote participant joined
    ParticipantJoined {
        /// Participant ID
        participant: ParticipantId,
    },
    /// A remote participant left
    ParticipantLeft {
        /// Participant ID
        participant: ParticipantId,
    },
    /// A remote stream stopped
    RemoteStreamStopped {
        /// Participant ID
        participant: ParticipantId,
        /// Role that stopped
        role: StreamRole,
    },
    /// Local user started or stopped watching a screen share
    ScreenShareWatchChanged {
        /// Sharing participant
        participant: ParticipantId,
        /// Whether it is now watched
        watching: bool,
    },
    /// Local voice activity changed
    LocalVoiceActivity {
        /// Whether speech is present
        speaking: bool,
    },
    /// A local capture source stopped
    CaptureStopped {
        /// Stream that stopped
        role: StreamRole,
        /// Why
        reason: String,
    },
    /// Hardware decoding started for a remote stream
    HardwareDecoderReady {
        /// Sending participant
        participant: ParticipantId,
        /// Stream role
        role: StreamRole,
        /// Picture width
        width: u32,
        /// Picture height
        height: u32,
    },
    /// A feature fell back to a lesser path; the session keeps running
    CapabilityDowngraded {
        /// What was affected
        subject: String,
        /// Why
        reason: String,
    },
    /// A remote video decoder failed for good
    DecoderFailed {
        /// Sending participant
        participant: ParticipantId,
        /// Stream role
        role: StreamRole,
        /// Why
        reason: String,
    },
    /// A volume changed
    VolumeChanged {
        /// Participant, or `None` for the master volume
        participant: Option<ParticipantId>,
        /// New volume after clamping
        volume: f32,
    },
    /// Transport was lost; the session does not reconnect by itself
    Disconnected {
        /// Reason
        reason: String,
    },
    /// Non-fatal error
    Error {
        /// Description
        error: String,
        /// Whether the session keeps running
        recoverable: bool,
    },
}

impl MediaEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            MediaEvent::StateChanged { .. } => "state_changed",
            MediaEvent::LocalAnswer { .. } => "local_answer",
            MediaEvent::LocalIceCandidate { .. } => "local_ice_candidate",
            MediaEvent::LocalSsrcsAssigned { .. } => "local_ssrcs_assigned",
            MediaEvent::ParticipantJoined { .. } => "participant_joined",
            MediaEvent::ParticipantLeft { .. } => "participant_left",
            MediaEvent::RemoteStreamStopped { .. } => "remote_stream_stopped",
            MediaEvent::ScreenShareWatchChanged { .. } => "screen_share_watch_changed",
            MediaEvent::LocalVoiceActivity { .. } => "local_voice_activity",
            MediaEvent::CaptureStopped { .. } => "capture_stopped",
            MediaEvent::HardwareDecoderReady { .. } => "hardware_decoder_ready",
            MediaEvent::CapabilityDowngraded { .. } => "capability_downgraded",
            MediaEvent::DecoderFailed { .. } => "decoder_failed",
            MediaEvent::VolumeChanged { .. } => "volume_changed",
            MediaEvent::Disconnected { .. } => "disconnected",
            MediaEvent::Error { .. } => "error",
        }
    }

    /// Remote participant the event concerns, if any
    pub fn participant(&self) -> Option<&ParticipantId> {
        match self {
            MediaEvent::ParticipantJoined { participant }
            | MediaEvent::ParticipantLeft { participant }
            | MediaEvent::RemoteStreamStopped { participant, .. }
            | MediaEvent::ScreenShareWatchChanged { participant, .. }
            | MediaEvent::HardwareDecoderReady { participant, .. }
            | MediaEvent::DecoderFailed { participant, .. } => Some(participant),
            MediaEvent::VolumeChanged { participant, .. } => participant.as_ref(),
            _ => None,
        }
    }

    /// Stream role the event concerns, if any
    pub fn role(&self) -> Option<StreamRole> {
        match self {
            MediaEvent::RemoteStreamStopped { role, .. }
            | MediaEvent::CaptureStopped { role, .. }
            | MediaEvent::HardwareDecoderReady { role, .. }
            | MediaEvent::DecoderFailed { role, .. } => Some(*role),
            _ => None,
        }
    }

    /// Check if this is a participant-related event
    pub fn is_participant_event(&self) -> bool {
        matches!(
            self,
            MediaEvent::ParticipantJoined { .. }
                | MediaEvent::ParticipantLeft { .. }
                | MediaEvent::RemoteStreamStopped { .. }
                | MediaEvent::ScreenShareWatchChanged { .. }
                | MediaEvent::VolumeChanged { .. }
        )
    }

    /// Check if this is a media pipeline event
    pub fn is_media_event(&self) -> bool {
        matches!(
            self,
            MediaEvent::LocalVoiceActivity { .. }
                | MediaEvent::CaptureStopped { .. }
                | MediaEvent::HardwareDecoderReady { .. }
                | MediaEvent::CapabilityDowngraded { .. }
                | MediaEvent::DecoderFailed { .. }
        )
    }

    /// Check if this is a connection-related event
    pub fn is_connection_event(&self) -> bool {
        matches!(
            self,
            MediaEvent::StateChanged { .. }
                | MediaEvent::LocalAnswer { .. }
                | MediaEvent::LocalIceCandidate { .. }
                | MediaEvent::LocalSsrcsAssigned { .. }
                | MediaEvent::Disconnected { .. }
        )
    }

    /// Check if this is an error event
    pub fn is_error_event(&self) -> bool {
        matches!(
            self,
            MediaEvent::Error { .. } | MediaEvent::DecoderFailed { .. }
        )
    }
}

impl From<VideoEvent> for MediaEvent {
    fn from(event: VideoEvent) -> Self {
        match event {
            VideoEvent::HardwareDecoderReady { key, width, height } => {
                MediaEvent::HardwareDecoderReady {
                    participant: key.participant,
                    role: key.role,
                    width,
                    height,
                }
            }
            VideoEvent::CapabilityDowngraded { key, reason } => MediaEvent::CapabilityDowngraded {
                subject: subject(&key),
                reason,
            },
            VideoEvent::DecoderFailed { key, reason } => MediaEvent::DecoderFailed {
                participant: key.participant,
                role: key.role,
                reason,
            },
        }
    }
}

impl From<CaptureEvent> for MediaEvent {
    fn from(event: CaptureEvent) -> Self {
        match event {
            CaptureEvent::VoiceActivity { speaking, .. } => {
                MediaEvent::LocalVoiceActivity { speaking }
            }
            CaptureEvent::Stopped { role, reason } => MediaEvent::CaptureStopped { role, reason },
        }
    }
}

fn subject(key: &StreamKey) -> String {
    format!("{} decoder", key)
}

/// Publisher side of the session's events
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<MediaEvent>>>,
}

impl EventBus {
    /// Create a bus with no subscribers
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new subscription
    pub fn subscribe(&self) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        EventStream::new(rx)
    }

    /// Deliver an event to every live subscriber
    pub fn publish(&self, event: MediaEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        debug!(
            "published {} to {} subscribers",
            event.event_type(),
            subscribers.len()
        );
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }

    /// End every subscription; streams yield their buffered events, then `None`
    pub fn close(&self) {
        self.subscribers.lock().clear();
    }
}

/// Stream of session events for async iteration
#[derive(Debug)]
pub struct EventStream {
    receiver: mpsc::UnboundedReceiver<MediaEvent>,
}

impl EventStream {
    /// Create a new event stream with a receiver
    pub fn new(receiver: mpsc::UnboundedReceiver<MediaEvent>) -> Self {
        Self { receiver }
    }

    /// Get the next event from the stream
    pub async fn next(&mut self) -> Option<MediaEvent> {
        self.receiver.recv().await
    }

    /// Try to get the next event without blocking
    pub fn try_next(&mut self) -> Result<Option<MediaEvent>, mpsc::error::TryRecvError> {
        match self.receiver.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => {
                Err(mpsc::error::TryRecvError::Disconnected)
            }
        }
    }

    /// Close the event stream
    pub fn close(&mut self) {
        self.receiver.close();
    }

    /// Apply a filter to this stream
    pub fn filtered(self, filter: EventFilter) -> FilteredEventStream {
        FilteredEventStream::new(self, filter)
    }
}

impl Stream for EventStream {
    type Item = MediaEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// Scope of a filtered subscription
///
/// An event passes when it concerns the selected participant and role
/// (unset means any). Session-level events carry neither and pass only
/// when their class is enabled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFilter {
    participant: Option<ParticipantId>,
    roles: Option<Vec<StreamRole>>,
    connection: bool,
    errors: bool,
}

impl EventFilter {
    /// Pass everything
    pub fn all() -> Self {
        Self {
            connection: true,
            errors: true,
            ..Self::default()
        }
    }

    /// Events about one remote participant, plus connection changes
    pub fn participant(participant: ParticipantId) -> Self {
        Self {
            participant: Some(participant),
            connection: true,
            ..Self::default()
        }
    }

    /// Restrict to these stream roles
    pub fn with_roles(mut self, roles: &[StreamRole]) -> Self {
        self.roles = Some(roles.to_vec());
        self
    }

    /// Also pass session-level errors
    pub fn with_errors(mut self) -> Self {
        self.errors = true;
        self
    }

    /// Drop connection events
    pub fn without_connection(mut self) -> Self {
        self.connection = false;
        self
    }

    /// Whether `event` passes
    pub fn matches(&self, event: &MediaEvent) -> bool {
        if event.is_connection_event() {
            return self.connection;
        }
        if matches!(event, MediaEvent::Error { .. }) {
            return self.errors;
        }
        if let Some(ref wanted) = self.participant {
            if event.participant() != Some(wanted) {
                return false;
            }
        }
        match (&self.roles, event.role()) {
            (Some(roles), Some(role)) => roles.contains(&role),
            (Some(_), None) => false,
            (None, _) => true,
        }
    }
}

/// [`EventStream`] that skips events outside an [`EventFilter`]
#[derive(Debug)]
pub struct FilteredEventStream {
    stream: EventStream,
    filter: EventFilter,
}

impl FilteredEventStream {
    /// Wrap a subscription
    pub fn new(stream: EventStream, filter: EventFilter) -> Self {
        Self { stream, filter }
    }

    /// Next matching event; `None` once the session's bus closed
    pub async fn next(&mut self) -> Option<MediaEvent> {
        loop {
            let event = self.stream.next().await?;
            if self.filter.matches(&event) {
                return Some(event);
            }
        }
    }

    /// Next buffered matching event, if any
    pub fn try_next(&mut self) -> Result<Option<MediaEvent>, mpsc::error::TryRecvError> {
        while let Some(event) = self.stream.try_next()? {
            if self.filter.matches(&event) {
                return Ok(Some(event));
            }
        }
        Ok(None)
    }

    /// Current filter
    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }
}

impl Stream for FilteredEventStream {
    type Item = MediaEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.stream).poll_next(cx) {
                Poll::Ready(Some(event)) if !self.filter.matches(&event) => continue,
                other => return other,
            }
        }
    }
}
