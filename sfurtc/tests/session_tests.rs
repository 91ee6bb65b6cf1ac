//! Integration tests for the media session controller

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use sfurtc::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// ============================================================================
// Test doubles
// ============================================================================

/// Transport that assigns fixed SSRCs once an offer is applied
#[derive(Default)]
struct MockTransport {
    offers: Mutex<Vec<String>>,
    remote_ice: Mutex<Vec<IceCandidate>>,
    sent: Mutex<Vec<(StreamRole, RtpPacket)>>,
    ssrcs: Mutex<HashMap<StreamRole, u32>>,
    reject_offers: AtomicBool,
    closed: AtomicBool,
}

impl MockTransport {
    fn sent(&self) -> Vec<(StreamRole, RtpPacket)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl MediaTransport for MockTransport {
    async fn apply_remote_offer(&self, sdp: &str) -> Result<String> {
        if self.reject_offers.load(Ordering::SeqCst) {
            return Err(SessionError::Transport {
                reason: "malformed offer".to_string(),
            });
        }
        self.offers.lock().push(sdp.to_string());
        let mut ssrcs = self.ssrcs.lock();
        ssrcs.insert(StreamRole::Microphone, 1001);
        ssrcs.insert(StreamRole::ScreenAudio, 1002);
        ssrcs.insert(StreamRole::Camera, 2001);
        ssrcs.insert(StreamRole::ScreenShare, 2002);
        Ok(format!("answer:{}", sdp))
    }

    async fn add_remote_ice_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        if self.offers.lock().is_empty() {
            return Err(SessionError::Transport {
                reason: "no remote description".to_string(),
            });
        }
        self.remote_ice.lock().push(candidate.clone());
        Ok(())
    }

    fn send_rtp(&self, role: StreamRole, packet: RtpPacket) -> Result<()> {
        self.sent.lock().push((role, packet));
        Ok(())
    }

    fn local_ssrc(&self, role: StreamRole) -> Option<u32> {
        self.ssrcs.lock().get(&role).copied()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct MockSignaling {
    answers: Mutex<Vec<String>>,
    candidates: Mutex<Vec<IceCandidate>>,
}

#[async_trait]
impl SignalingChannel for MockSignaling {
    async fn send_answer(&self, sdp: &str) -> Result<()> {
        self.answers.lock().push(sdp.to_string());
        Ok(())
    }

    async fn send_ice_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        self.candidates.lock().push(candidate.clone());
        Ok(())
    }
}

struct Harness {
    session: MediaSession,
    transport: Arc<MockTransport>,
    signaling: Arc<MockSignaling>,
}

fn harness(config: SessionConfig) -> Harness {
    harness_with(config, |builder| builder)
}

fn harness_with(
    config: SessionConfig,
    customize: impl FnOnce(SessionBuilder) -> SessionBuilder,
) -> Harness {
    let transport = Arc::new(MockTransport::default());
    let signaling = Arc::new(MockSignaling::default());
    let builder = MediaSession::builder(config, transport.clone(), signaling.clone());
    Harness {
        session: customize(builder).build(),
        transport,
        signaling,
    }
}

fn drain(events: &mut EventStream) -> Vec<MediaEvent> {
    let mut out = Vec::new();
    while let Ok(Some(event)) = events.try_next() {
        out.push(event);
    }
    out
}

fn pcmu_packet(ssrc: u32, sequence: u16) -> RtpPacket {
    // 0xFF is digital silence in mu-law
    RtpPacket::new(0, false, sequence, sequence as u32 * 160, ssrc, vec![0xFFu8; 160])
}

// ============================================================================
// Negotiation
// ============================================================================

#[tokio::test]
async fn test_offer_before_join_is_applied_at_join() -> anyhow::Result<()> {
    let h = harness(SessionConfig::new("me"));
    let mut events = h.session.events();

    assert_eq!(h.session.on_remote_offer("offer-1").await?, None);
    assert!(h.session.has_cached_offer());
    assert!(h.transport.offers.lock().is_empty());

    h.session.join().await?;

    assert!(!h.session.has_cached_offer());
    assert_eq!(*h.transport.offers.lock(), vec!["offer-1".to_string()]);
    assert_eq!(*h.signaling.answers.lock(), vec!["answer:offer-1".to_string()]);
    assert_eq!(h.session.local_ssrc(StreamRole::Microphone), Some(1001));
    assert_eq!(h.session.local_ssrc(StreamRole::ScreenShare), Some(2002));

    let events = drain(&mut events);
    assert!(events.contains(&MediaEvent::LocalAnswer {
        sdp: "answer:offer-1".to_string()
    }));
    let assigned = events
        .iter()
        .find_map(|event| match event {
            MediaEvent::LocalSsrcsAssigned { ssrcs } => Some(ssrcs.clone()),
            _ => None,
        })
        .expect("SSRC assignment event");
    assert_eq!(assigned.len(), 4);
    assert!(assigned.contains(&(StreamRole::Camera, 2001)));
    Ok(())
}

#[tokio::test]
async fn test_latest_cached_offer_wins() -> anyhow::Result<()> {
    let h = harness(SessionConfig::new("me"));
    h.session.on_remote_offer("offer-1").await?;
    h.session.on_remote_offer("offer-2").await?;
    h.session.join().await?;
    assert_eq!(*h.transport.offers.lock(), vec!["offer-2".to_string()]);
    Ok(())
}

#[tokio::test]
async fn test_offer_after_join_returns_answer() -> anyhow::Result<()> {
    let h = harness(SessionConfig::new("me"));
    h.session.join().await?;

    let answer = h.session.on_remote_offer("offer-1").await?;
    assert_eq!(answer.as_deref(), Some("answer:offer-1"));
    // caller delivers the answer itself
    assert!(h.signaling.answers.lock().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_remote_ice_waits_for_offer() -> anyhow::Result<()> {
    let h = harness(SessionConfig::new("me"));
    h.session
        .on_remote_ice_candidate(IceCandidate::new("candidate:1"))
        .await?;
    h.session.join().await?;
    h.session
        .on_remote_ice_candidate(IceCandidate::new("candidate:2"))
        .await?;
    assert_eq!(h.session.pending_ice_candidates(), 2);
    assert!(h.transport.remote_ice.lock().is_empty());

    h.session.on_remote_offer("offer-1").await?;
    assert_eq!(h.session.pending_ice_candidates(), 0);

    h.session
        .on_remote_ice_candidate(IceCandidate::new("candidate:3"))
        .await?;
    let applied: Vec<String> = h
        .transport
        .remote_ice
        .lock()
        .iter()
        .map(|c| c.candidate.clone())
        .collect();
    assert_eq!(applied, vec!["candidate:1", "candidate:2", "candidate:3"]);
    Ok(())
}

#[tokio::test]
async fn test_local_ice_goes_to_signaling() -> anyhow::Result<()> {
    let h = harness(SessionConfig::new("me"));
    let mut events = h.session.events();
    let candidate = IceCandidate {
        candidate: "candidate:local".to_string(),
        sdp_mid: Some("0".to_string()),
        sdp_mline_index: Some(0),
    };
    h.session.on_local_ice_candidate(candidate.clone()).await?;

    assert_eq!(*h.signaling.candidates.lock(), vec![candidate.clone()]);
    assert_eq!(
        drain(&mut events),
        vec![MediaEvent::LocalIceCandidate { candidate }]
    );
    Ok(())
}

#[tokio::test]
async fn test_rejected_offer_disconnects() -> anyhow::Result<()> {
    let h = harness(SessionConfig::new("me"));
    h.session.join().await?;
    let mut events = h.session.events();
    h.transport.reject_offers.store(true, Ordering::SeqCst);

    let result = h.session.on_remote_offer("offer-1").await;
    assert!(matches!(result, Err(SessionError::Negotiation { .. })));
    assert_eq!(h.session.state(), SessionState::Disconnected);
    assert!(drain(&mut events)
        .iter()
        .any(|event| matches!(event, MediaEvent::Disconnected { .. })));
    Ok(())
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_transport_states_drive_session_state() -> anyhow::Result<()> {
    let h = harness(SessionConfig::new("me"));
    let mut events = h.session.events();

    h.session.join().await?;
    assert_eq!(h.session.state(), SessionState::Connecting);
    assert!(h.session.joined_at().is_some());

    h.session.on_transport_state(TransportState::Connected);
    assert_eq!(h.session.state(), SessionState::Connected);

    h.session.on_transport_state(TransportState::Disconnected);
    assert_eq!(h.session.state(), SessionState::Connected);

    h.session.on_transport_state(TransportState::Failed);
    assert_eq!(h.session.state(), SessionState::Disconnected);
    // a second terminal report is not repeated
    h.session.on_transport_state(TransportState::Closed);

    let disconnects = drain(&mut events)
        .into_iter()
        .filter(|event| matches!(event, MediaEvent::Disconnected { .. }))
        .count();
    assert_eq!(disconnects, 1);
    Ok(())
}

#[tokio::test]
async fn test_join_twice_is_rejected() -> anyhow::Result<()> {
    let h = harness(SessionConfig::new("me"));
    h.session.join().await?;
    assert!(matches!(
        h.session.join().await,
        Err(SessionError::InvalidState { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_leave_releases_everything() -> anyhow::Result<()> {
    let h = harness(SessionConfig::new("me").with_external_microphone());
    let mut events = h.session.events();
    h.session.join().await?;
    h.session.on_remote_ice_candidate(IceCandidate::new("c")).await?;
    h.session.participant_joined(ParticipantId::from("bob"));
    h.session
        .on_ssrc_mapping(5000, ParticipantId::from("bob"), StreamRole::Microphone);
    assert!(h.session.is_capturing(StreamRole::Microphone));

    assert_eq!(h.session.leave(), SessionState::Idle);

    assert_eq!(h.session.state(), SessionState::Idle);
    assert!(h.session.ssrc_router().is_empty());
    assert!(h.session.participants().is_empty());
    assert_eq!(h.session.pending_ice_candidates(), 0);
    assert!(!h.session.is_capturing(StreamRole::Microphone));
    assert_eq!(h.session.local_ssrc(StreamRole::Microphone), None);
    assert_eq!(h.session.on_rtp(&pcmu_packet(5000, 1).to_bytes()), ReceiveOutcome::Inactive);

    // buffered events drain, then the stream ends
    let mut last = None;
    while let Some(event) = events.next().await {
        last = Some(event);
    }
    assert_eq!(
        last,
        Some(MediaEvent::StateChanged {
            state: SessionState::Idle
        })
    );

    // the session can be joined again
    h.session.join().await?;
    assert_eq!(h.session.state(), SessionState::Connecting);
    Ok(())
}

#[tokio::test]
async fn test_shutdown_closes_transport() -> anyhow::Result<()> {
    let h = harness(SessionConfig::new("me"));
    h.session.join().await?;
    h.session.shutdown().await;
    assert!(h.transport.closed.load(Ordering::SeqCst));
    assert_eq!(h.session.state(), SessionState::Idle);
    Ok(())
}

// ============================================================================
// Receive path
// ============================================================================

#[tokio::test]
async fn test_audio_routes_through_mixer() -> anyhow::Result<()> {
    let (sink, mut rx) = ChannelAudioSink::new();
    let h = harness_with(SessionConfig::new("me"), |b| b.audio_sink(Arc::new(sink)));
    h.session.join().await?;
    let bob = ParticipantId::from("bob");
    h.session.on_ssrc_mapping(5000, bob.clone(), StreamRole::Microphone);

    let outcome = h.session.on_rtp(&pcmu_packet(5000, 1).to_bytes());
    assert_eq!(outcome, ReceiveOutcome::Audio(RouteOutcome::Forwarded));
    let mixed = rx.try_recv()?;
    assert_eq!(mixed.participant, Some(bob.clone()));
    assert_eq!(mixed.ssrc, 5000);

    h.session.set_user_volume(bob, 0.5)?;
    let outcome = h.session.on_rtp(&pcmu_packet(5000, 2).to_bytes());
    assert_eq!(outcome, ReceiveOutcome::Audio(RouteOutcome::Scaled));

    let stats = h.session.mixer_stats().expect("joined");
    assert_eq!(stats.microphone.forwarded_unchanged, 1);
    assert_eq!(stats.microphone.scaled, 1);
    Ok(())
}

#[tokio::test]
async fn test_unroutable_packets() -> anyhow::Result<()> {
    let h = harness(SessionConfig::new("me"));
    assert_eq!(
        h.session.on_rtp(&pcmu_packet(5000, 1).to_bytes()),
        ReceiveOutcome::Inactive
    );
    h.session.join().await?;

    assert_eq!(h.session.on_rtp(&[0x80, 0x60]), ReceiveOutcome::Malformed);

    let unknown = RtpPacket::new(50, false, 1, 0, 7, vec![1u8, 2, 3]);
    assert_eq!(
        h.session.on_rtp(&unknown.to_bytes()),
        ReceiveOutcome::UnknownPayloadType(50)
    );

    // camera video from an SSRC nobody announced
    let camera = RtpPacket::new(96, true, 1, 0, 9000, vec![0x41u8, 0x9a, 0x00]);
    assert_eq!(
        h.session.on_rtp(&camera.to_bytes()),
        ReceiveOutcome::Unattributed
    );
    Ok(())
}

#[tokio::test]
async fn test_video_reaches_router_once_attributed() -> anyhow::Result<()> {
    let h = harness(SessionConfig::new("me"));
    h.session.join().await?;
    let bob = ParticipantId::from("bob");

    // screen video is inferred from the single watched share
    h.session.start_watching_screen_share(bob.clone());
    let sps = RtpPacket::new(97, false, 1, 0, 9100, vec![0x67u8, 0x42, 0x00, 0x1f]);
    assert!(matches!(
        h.session.on_rtp_packet(&sps),
        ReceiveOutcome::Video(_)
    ));
    assert_eq!(
        h.session.ssrc_router().ssrc_for(&bob, StreamRole::ScreenShare),
        Some(9100)
    );

    h.session.on_ssrc_mapping(9000, bob.clone(), StreamRole::Camera);
    let slice = RtpPacket::new(96, true, 1, 0, 9000, vec![0x41u8, 0x9a, 0x00]);
    assert_eq!(
        h.session.on_rtp_packet(&slice),
        ReceiveOutcome::Video(VideoRouteOutcome::AwaitingParameters)
    );
    assert_eq!(
        h.session.video_state(&bob, StreamRole::Camera),
        DecoderState::AwaitingParameters
    );

    h.session.remote_stream_stopped(&bob, StreamRole::Camera);
    assert_eq!(
        h.session.video_state(&bob, StreamRole::Camera),
        DecoderState::NoDecoder
    );
    Ok(())
}

#[tokio::test]
async fn test_participant_left_purges_state() -> anyhow::Result<()> {
    let h = harness(SessionConfig::new("me"));
    h.session.join().await?;
    let mut events = h.session.events();
    let bob = ParticipantId::from("bob");

    h.session.participant_joined(bob.clone());
    h.session.participant_joined(bob.clone());
    h.session.on_ssrc_mappings(vec![
        MappingUpdate {
            ssrc: 5000,
            participant: bob.clone(),
            role: StreamRole::Microphone,
        },
        MappingUpdate {
            ssrc: 9000,
            participant: bob.clone(),
            role: StreamRole::Camera,
        },
    ]);
    h.session.start_watching_screen_share(bob.clone());
    assert_eq!(h.session.participants(), vec![bob.clone()]);

    h.session.participant_left(&bob);

    assert!(h.session.participants().is_empty());
    assert!(h.session.ssrc_router().is_empty());
    assert!(!h.session.ssrc_router().is_watching(&bob));
    let events = drain(&mut events);
    let joined = events
        .iter()
        .filter(|e| matches!(e, MediaEvent::ParticipantJoined { .. }))
        .count();
    assert_eq!(joined, 1);
    assert!(events.contains(&MediaEvent::ParticipantLeft { participant: bob }));
    Ok(())
}

#[tokio::test]
async fn test_participant_events_are_scoped() -> anyhow::Result<()> {
    let h = harness(SessionConfig::new("me"));
    h.session.join().await?;
    let bob = ParticipantId::from("bob");
    let mut bob_events = h.session.participant_events(bob.clone());

    h.session.participant_joined(ParticipantId::from("alice"));
    h.session.participant_joined(bob.clone());
    h.session.remote_stream_stopped(&bob, StreamRole::Camera);
    h.session.participant_left(&ParticipantId::from("alice"));
    h.session.leave();

    let mut seen = Vec::new();
    while let Some(event) = bob_events.next().await {
        seen.push(event);
    }
    assert_eq!(
        seen,
        vec![
            MediaEvent::ParticipantJoined {
                participant: bob.clone(),
            },
            MediaEvent::RemoteStreamStopped {
                participant: bob,
                role: StreamRole::Camera,
            },
            MediaEvent::StateChanged {
                state: SessionState::Idle,
            },
        ]
    );
    Ok(())
}

// ============================================================================
// Send path
// ============================================================================

#[tokio::test]
async fn test_send_audio_stamps_role_headers() -> anyhow::Result<()> {
    let h = harness(SessionConfig::new("me"));
    assert!(h
        .session
        .send_audio(StreamRole::Microphone, Bytes::from_static(&[1, 2]), 960)
        .is_err());

    h.session.join().await?;
    h.session.on_remote_offer("offer-1").await?;
    h.session
        .send_audio(StreamRole::Microphone, Bytes::from_static(&[1, 2]), 960)?;
    h.session
        .send_audio(StreamRole::Microphone, Bytes::from_static(&[3, 4]), 960)?;
    h.session
        .send_audio(StreamRole::ScreenAudio, Bytes::from_static(&[5]), 960)?;

    let sent = h.transport.sent();
    assert_eq!(sent.len(), 3);
    let (role, first) = &sent[0];
    let (_, second) = &sent[1];
    assert_eq!(*role, StreamRole::Microphone);
    assert_eq!(first.payload_type, 111);
    assert_eq!(first.ssrc, 1001);
    assert_eq!(second.sequence, first.sequence.wrapping_add(1));
    assert_eq!(second.timestamp, first.timestamp.wrapping_add(960));
    assert_eq!(sent[2].1.payload_type, 112);
    assert_eq!(sent[2].1.ssrc, 1002);

    assert!(matches!(
        h.session
            .send_audio(StreamRole::Camera, Bytes::from_static(&[1]), 960),
        Err(SessionError::InvalidState { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_send_video_fragments_access_units() -> anyhow::Result<()> {
    let h = harness(SessionConfig::new("me"));
    h.session.join().await?;
    h.session.on_remote_offer("offer-1").await?;

    let mut access_unit = vec![0, 0, 0, 1, 0x67, 0x42, 0x00, 0x1f];
    access_unit.extend_from_slice(&[0, 0, 0, 1, 0x68, 0xce, 0x3c, 0x80]);
    access_unit.extend_from_slice(&[0, 0, 0, 1, 0x65]);
    access_unit.extend(std::iter::repeat(0xAB).take(4000));
    h.session.send_video(StreamRole::Camera, &access_unit, 3000)?;

    let sent = h.transport.sent();
    assert!(sent.len() > 3);
    for (role, packet) in &sent {
        assert_eq!(*role, StreamRole::Camera);
        assert_eq!(packet.payload_type, 96);
        assert_eq!(packet.ssrc, 2001);
        assert!(packet.payload.len() <= 1400);
    }
    let markers: Vec<bool> = sent.iter().map(|(_, p)| p.marker).collect();
    assert_eq!(markers.iter().filter(|m| **m).count(), 1);
    assert_eq!(markers.last(), Some(&true));
    let timestamp = sent[0].1.timestamp;
    assert!(sent.iter().all(|(_, p)| p.timestamp == timestamp));
    Ok(())
}

#[cfg(feature = "opus")]
#[tokio::test]
async fn test_microphone_pcm_is_encoded_and_sent() -> anyhow::Result<()> {
    let h = harness(SessionConfig::new("me").with_external_microphone());
    h.session.join().await?;
    h.session.on_remote_offer("offer-1").await?;

    let pipeline = h
        .session
        .audio_pipeline(StreamRole::Microphone)
        .expect("microphone pipeline");
    let frame_len = pipeline.lock().frame_len();
    let pcm: Vec<i16> = (0..frame_len * 2)
        .map(|i| ((i as f32 * 0.05).sin() * 3000.0) as i16)
        .collect();
    pipeline.lock().push_pcm(&pcm, 1);

    let sent = h.transport.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent
        .iter()
        .all(|(role, p)| *role == StreamRole::Microphone && p.payload_type == 111));
    assert_eq!(sent[1].1.timestamp, sent[0].1.timestamp.wrapping_add(960));

    h.session.set_microphone_muted(true);
    assert!(pipeline.lock().is_muted());
    Ok(())
}

// ============================================================================
// Settings and volumes
// ============================================================================

#[tokio::test]
async fn test_volumes_persist_across_sessions() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("settings.json");
    let bob = ParticipantId::from("bob");

    {
        let store = Arc::new(JsonFileSettings::new(&path));
        let h = harness_with(SessionConfig::new("me"), |b| b.settings(store));
        let mut events = h.session.events();
        h.session.join().await?;
        assert_eq!(h.session.set_user_volume(bob.clone(), 5.0)?, 3.0);
        assert_eq!(h.session.set_master_volume(0.5)?, 0.5);
        assert!(drain(&mut events).contains(&MediaEvent::VolumeChanged {
            participant: Some(bob.clone()),
            volume: 3.0
        }));
        h.session.leave();
    }
    assert!(std::fs::read_to_string(&path)?.contains("bob"));

    let store = Arc::new(JsonFileSettings::new(&path));
    let h = harness_with(SessionConfig::new("me"), |b| b.settings(store));
    assert!(matches!(
        h.session.user_volume(&bob),
        Err(SessionError::InvalidState { .. })
    ));
    h.session.join().await?;
    assert_eq!(h.session.user_volume(&bob)?, 3.0);
    assert_eq!(h.session.master_volume()?, 0.5);
    assert_eq!(h.session.user_volume(&ParticipantId::from("carol"))?, 1.0);
    Ok(())
}

#[tokio::test]
async fn test_corrupt_settings_fall_back_to_defaults() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("settings.json");
    std::fs::write(&path, b"{broken")?;

    let store = Arc::new(JsonFileSettings::new(&path));
    let h = harness_with(SessionConfig::new("me"), |b| b.settings(store));
    let mut events = h.session.events();
    h.session.join().await?;

    assert_eq!(h.session.media_settings(), MediaSettings::default());
    assert!(drain(&mut events).iter().any(|event| matches!(
        event,
        MediaEvent::Error {
            recoverable: true,
            ..
        }
    )));
    Ok(())
}

#[tokio::test]
async fn test_gain_settings_are_saved() -> anyhow::Result<()> {
    let store = Arc::new(MemorySettings::new());
    let h = harness_with(SessionConfig::new("me").with_external_microphone(), |b| {
        b.settings(store.clone())
    });
    h.session.join().await?;

    h.session.set_manual_gain(1.8)?;
    h.session.set_gate(true, 250.0)?;

    let saved = store.media_settings()?;
    assert_eq!(saved.manual_gain, 1.8);
    assert!(saved.gate_enabled);
    assert_eq!(saved.gate_threshold, 250.0);

    let pipeline = h
        .session
        .audio_pipeline(StreamRole::Microphone)
        .expect("microphone pipeline");
    let mut pipeline = pipeline.lock();
    let agc = pipeline.agc_mut().expect("microphone gain control");
    assert_eq!(agc.config().manual_gain, 1.8);
    assert!(agc.config().gate_enabled);
    Ok(())
}

#[tokio::test]
async fn test_stored_settings_shape_microphone() -> anyhow::Result<()> {
    let media = MediaSettings {
        manual_gain: 2.0,
        ..MediaSettings::default()
    };
    let store = Arc::new(MemorySettings::with_values(media, VolumeTable::default()));
    let h = harness_with(SessionConfig::new("me").with_external_microphone(), |b| {
        b.settings(store)
    });
    h.session.join().await?;

    let pipeline = h
        .session
        .audio_pipeline(StreamRole::Microphone)
        .expect("microphone pipeline");
    let mut pipeline = pipeline.lock();
    assert_eq!(
        pipeline.agc_mut().map(|agc| agc.config().manual_gain),
        Some(2.0)
    );
    Ok(())
}

// ============================================================================
// Entry point
// ============================================================================

#[tokio::test]
async fn test_entry_point_builds_sessions() -> anyhow::Result<()> {
    let sfu = SfuRtc::init_with(GlobalConfig {
        initialize_audio: false,
        ..GlobalConfig::default()
    })?;
    assert!(sfu.audio_info().is_none());

    let transport = Arc::new(MockTransport::default());
    let signaling = Arc::new(MockSignaling::default());
    let session = sfu
        .session(SessionConfig::new("me"), transport, signaling)
        .build();
    session.join().await?;
    assert_eq!(session.participant().as_str(), "me");
    assert_eq!(session.state(), SessionState::Connecting);
    Ok(())
}
