//! Integration tests for remote video routing
//!
//! Uses scripted decoders to observe which decoder path each stream takes
//! and what the router hands to it.

use parking_lot::Mutex;
use sfurtc_core::role::PT_CAMERA_H264;
use sfurtc_core::{H264Packetizer, ParticipantId, RtpPacket, StreamRole};
use sfurtc_media::video::{DecoderPath, VideoRouteOutcome};
use sfurtc_media::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const SPS: &[u8] = b"\x67\x4d\x40\x1e\x9a\x64\x05\x01\xef\xf3\x50\x10\x10\x14\x00\x00\x0f\xa0\x00\x01\x38\x80\x10";
const PPS: &[u8] = &[0x68, 0xEE, 0x3C, 0x80];

#[derive(Default)]
struct Counters {
    hardware_created: AtomicUsize,
    hardware_initialized: AtomicUsize,
    hardware_decodes: AtomicUsize,
    software_created: AtomicUsize,
    software_decodes: AtomicUsize,
    keyframes: AtomicUsize,
}

struct ScriptedHardware {
    accept: bool,
    counters: Arc<Counters>,
}

impl HardwareDecoder for ScriptedHardware {
    fn initialize(&mut self, _width: u32, _height: u32, _sps: &[u8], _pps: &[u8]) -> bool {
        self.counters.hardware_initialized.fetch_add(1, Ordering::SeqCst);
        self.accept
    }

    fn decode_and_render(&mut self, _nal: &[u8], is_keyframe: bool) -> MediaResult<()> {
        self.counters.hardware_decodes.fetch_add(1, Ordering::SeqCst);
        if is_keyframe {
            self.counters.keyframes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn dispose(&mut self) {}
}

/// Whether scripted software decodes fail, and how
#[derive(Clone, Copy)]
enum Failure {
    Recoverable,
    Fatal,
}

impl Failure {
    fn error(self) -> MediaError {
        match self {
            Failure::Recoverable => MediaError::DecodingFailed {
                codec: "h264".to_string(),
                reason: "corrupt slice".to_string(),
            },
            Failure::Fatal => MediaError::CodecInitializationFailed {
                codec: "h264".to_string(),
                reason: "decoder lost".to_string(),
            },
        }
    }
}

struct ScriptedSoftware {
    failure: Option<Failure>,
    counters: Arc<Counters>,
}

impl SoftwareDecoder for ScriptedSoftware {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn initialize(&mut self, _width: u32, _height: u32, _sps: &[u8], _pps: &[u8]) -> MediaResult<()> {
        Ok(())
    }

    fn decode(&mut self, nal: &[u8], is_keyframe: bool) -> MediaResult<Option<DecodedFrame>> {
        self.counters.software_decodes.fetch_add(1, Ordering::SeqCst);
        if is_keyframe {
            self.counters.keyframes.fetch_add(1, Ordering::SeqCst);
        }
        if let Some(failure) = self.failure {
            return Err(failure.error());
        }
        Ok(Some(DecodedFrame {
            width: 2,
            height: 2,
            data: vec![nal[0]; DecodedFrame::i420_size(2, 2)],
        }))
    }

    fn dispose(&mut self) {}
}

struct ScriptedProvider {
    hardware: Option<bool>,
    software_failure: Option<Failure>,
    counters: Arc<Counters>,
}

impl DecoderProvider for ScriptedProvider {
    fn hardware_decoder(&self, _key: &StreamKey) -> Option<Box<dyn HardwareDecoder>> {
        let accept = self.hardware?;
        self.counters.hardware_created.fetch_add(1, Ordering::SeqCst);
        Some(Box::new(ScriptedHardware {
            accept,
            counters: self.counters.clone(),
        }))
    }

    fn software_decoder(&self, _key: &StreamKey) -> MediaResult<Box<dyn SoftwareDecoder>> {
        self.counters.software_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSoftware {
            failure: self.software_failure,
            counters: self.counters.clone(),
        }))
    }
}

#[derive(Default)]
struct CollectFrames {
    frames: Mutex<Vec<(StreamKey, DecodedFrame)>>,
}

impl VideoFrameSink for CollectFrames {
    fn on_frame(&self, key: &StreamKey, frame: DecodedFrame) {
        self.frames.lock().push((key.clone(), frame));
    }
}

struct Harness {
    router: VideoStreamRouter,
    counters: Arc<Counters>,
    frames: Arc<CollectFrames>,
    events: Arc<Mutex<Vec<VideoEvent>>>,
    packetizer: H264Packetizer,
}

fn harness(hardware: Option<bool>, software_failure: Option<Failure>) -> Harness {
    let counters = Arc::new(Counters::default());
    let provider = Arc::new(ScriptedProvider {
        hardware,
        software_failure,
        counters: counters.clone(),
    });
    let frames = Arc::new(CollectFrames::default());
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink_events = events.clone();
    let router = VideoStreamRouter::new(VideoRouterConfig::default(), provider, frames.clone())
        .with_event_handler(Arc::new(move |event| sink_events.lock().push(event)));
    Harness {
        router,
        counters,
        frames,
        events,
        packetizer: H264Packetizer::new(0x5000, PT_CAMERA_H264),
    }
}

fn annexb(nals: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::new();
    for nal in nals {
        out.extend_from_slice(&[0, 0, 0, 1]);
        out.extend_from_slice(nal);
    }
    out
}

/// Keyframe with parameter sets and two IDR slices, one large enough to fragment
fn keyframe() -> Vec<u8> {
    let mut big_idr = vec![0x65, 0x88];
    big_idr.extend((0..3000).map(|i| (i % 200) as u8 + 1));
    annexb(&[SPS, PPS, &[0x06, 0x05, 0x01], &big_idr, &[0x65, 0x99, 0x10]])
}

fn delta_frame() -> Vec<u8> {
    annexb(&[&[0x09, 0xF0], &[0x41, 0x9A, 0x02], &[0x41, 0x9B, 0x03]])
}

fn send(h: &mut Harness, participant: &ParticipantId, data: &[u8]) -> VideoRouteOutcome {
    let packets: Vec<RtpPacket> = h.packetizer.packetize_to_rtp(data, 3000);
    assert!(!packets.is_empty());
    let mut last = VideoRouteOutcome::Pending;
    for packet in &packets {
        last = h.router.route(participant, StreamRole::Camera, packet);
    }
    last
}

// ============================================================================
// DECODER SELECTION TESTS
// ============================================================================

#[test]
fn test_hardware_refusal_falls_back_once() {
    let mut h = harness(Some(false), None);
    let alice = ParticipantId::from("alice");

    let outcome = send(&mut h, &alice, &keyframe());
    assert_eq!(
        outcome,
        VideoRouteOutcome::Submitted {
            slices: 2,
            keyframe: true
        }
    );
    for _ in 0..3 {
        send(&mut h, &alice, &delta_frame());
    }
    // a repeated keyframe must not reopen the hardware path
    send(&mut h, &alice, &keyframe());

    let c = &h.counters;
    assert_eq!(c.hardware_created.load(Ordering::SeqCst), 1);
    assert_eq!(c.hardware_initialized.load(Ordering::SeqCst), 1);
    assert_eq!(c.hardware_decodes.load(Ordering::SeqCst), 0);
    assert_eq!(c.software_created.load(Ordering::SeqCst), 1);
    // each VCL NAL decoded exactly once
    assert_eq!(c.software_decodes.load(Ordering::SeqCst), 2 + 3 * 2 + 2);
    assert_eq!(c.keyframes.load(Ordering::SeqCst), 4);
    assert_eq!(h.frames.frames.lock().len(), 10);

    assert_eq!(
        h.router.state(&alice, StreamRole::Camera),
        DecoderState::Decoding(DecoderPath::Software)
    );
    assert!(h.router.is_hardware_failed(&alice, StreamRole::Camera));

    let events = h.events.lock();
    let downgrades = events
        .iter()
        .filter(|e| matches!(e, VideoEvent::CapabilityDowngraded { .. }))
        .count();
    assert_eq!(downgrades, 1);
    assert!(!events
        .iter()
        .any(|e| matches!(e, VideoEvent::HardwareDecoderReady { .. })));
}

#[test]
fn test_teardown_allows_hardware_again() {
    let mut h = harness(Some(false), None);
    let bob = ParticipantId::from("bob");

    send(&mut h, &bob, &keyframe());
    assert!(h.router.is_hardware_failed(&bob, StreamRole::Camera));

    h.router.teardown(&bob, StreamRole::Camera);
    assert_eq!(h.router.state(&bob, StreamRole::Camera), DecoderState::NoDecoder);
    assert!(!h.router.is_hardware_failed(&bob, StreamRole::Camera));

    send(&mut h, &bob, &keyframe());
    assert_eq!(h.counters.hardware_created.load(Ordering::SeqCst), 2);
    assert_eq!(h.counters.software_created.load(Ordering::SeqCst), 2);
}

#[test]
fn test_hardware_path_renders_directly() {
    let mut h = harness(Some(true), None);
    let carol = ParticipantId::from("carol");

    send(&mut h, &carol, &keyframe());
    send(&mut h, &carol, &delta_frame());

    assert_eq!(
        h.router.state(&carol, StreamRole::Camera),
        DecoderState::Decoding(DecoderPath::Hardware)
    );
    assert_eq!(h.counters.hardware_decodes.load(Ordering::SeqCst), 4);
    assert_eq!(h.counters.software_created.load(Ordering::SeqCst), 0);
    assert!(h.frames.frames.lock().is_empty());

    let events = h.events.lock();
    assert!(matches!(
        events.as_slice(),
        [VideoEvent::HardwareDecoderReady {
            width: 640,
            height: 480,
            ..
        }]
    ));
}

#[test]
fn test_frames_wait_for_parameter_sets() {
    let mut h = harness(None, None);
    let dave = ParticipantId::from("dave");

    assert_eq!(
        send(&mut h, &dave, &delta_frame()),
        VideoRouteOutcome::AwaitingParameters
    );
    assert_eq!(
        h.router.state(&dave, StreamRole::Camera),
        DecoderState::AwaitingParameters
    );
    assert_eq!(h.counters.software_created.load(Ordering::SeqCst), 0);

    assert!(matches!(
        send(&mut h, &dave, &keyframe()),
        VideoRouteOutcome::Submitted { keyframe: true, .. }
    ));
    let stats = h.router.stats(&dave, StreamRole::Camera).unwrap();
    assert_eq!(stats.frames_without_decoder, 1);
    assert_eq!(stats.slices_submitted, 2);
}

// ============================================================================
// FAILURE TESTS
// ============================================================================

#[test]
fn test_fatal_decode_error_fails_stream() {
    let mut h = harness(None, Some(Failure::Fatal));
    let erin = ParticipantId::from("erin");

    assert_eq!(send(&mut h, &erin, &keyframe()), VideoRouteOutcome::Failed);
    assert_eq!(h.router.state(&erin, StreamRole::Camera), DecoderState::Failed);
    assert_eq!(send(&mut h, &erin, &delta_frame()), VideoRouteOutcome::Failed);
    // only the first slice reached the decoder
    assert_eq!(h.counters.software_decodes.load(Ordering::SeqCst), 1);
    assert!(h
        .events
        .lock()
        .iter()
        .any(|e| matches!(e, VideoEvent::DecoderFailed { .. })));
}

#[test]
fn test_recoverable_errors_tolerated_up_to_threshold() {
    let mut h = harness(None, Some(Failure::Recoverable));
    let frank = ParticipantId::from("frank");

    assert!(matches!(
        send(&mut h, &frank, &keyframe()),
        VideoRouteOutcome::Submitted { .. }
    ));
    let mut frames = 1;
    while h.router.state(&frank, StreamRole::Camera) != DecoderState::Failed {
        send(&mut h, &frank, &delta_frame());
        frames += 1;
        assert!(frames < 100, "stream never failed");
    }
    let stats = h.router.stats(&frank, StreamRole::Camera).unwrap();
    assert_eq!(
        stats.decode_errors,
        VideoRouterConfig::default().max_consecutive_errors as u64
    );
}

#[test]
fn test_lost_packet_drops_frame() {
    let mut h = harness(None, None);
    let grace = ParticipantId::from("grace");

    let mut packets = h.packetizer.packetize_to_rtp(&keyframe(), 3000);
    assert!(packets.len() > 2);
    packets.remove(1);
    for packet in &packets {
        assert_eq!(
            h.router.route(&grace, StreamRole::Camera, packet),
            VideoRouteOutcome::Pending
        );
    }
    assert_eq!(h.counters.software_decodes.load(Ordering::SeqCst), 0);

    // next intact keyframe decodes normally
    assert!(matches!(
        send(&mut h, &grace, &keyframe()),
        VideoRouteOutcome::Submitted { keyframe: true, .. }
    ));
}

#[test]
fn test_participant_teardown_clears_both_streams() {
    let mut h = harness(None, None);
    let heidi = ParticipantId::from("heidi");

    send(&mut h, &heidi, &keyframe());
    let au = sfurtc_core::AccessUnit {
        data: keyframe(),
        timestamp: 0,
        is_keyframe: true,
    };
    h.router.route_access_unit(&heidi, StreamRole::ScreenShare, &au);
    assert_eq!(h.router.stream_count(), 2);

    h.router.teardown_participant(&heidi);
    assert_eq!(h.router.stream_count(), 0);
}
