//! Integration tests for SSRC routing under concurrent access

use sfurtc_core::*;
use std::sync::Arc;
use std::thread;

#[test]
fn test_concurrent_mapping_and_resolve() {
    let router = Arc::new(SsrcRouter::new());
    let writers: Vec<_> = (0..4u32)
        .map(|w| {
            let router = router.clone();
            thread::spawn(move || {
                for i in 0..250u32 {
                    let ssrc = w * 1000 + i;
                    router.observe_mapping(
                        ssrc,
                        ParticipantId::new(format!("p{}-{}", w, i)),
                        StreamRole::Microphone,
                    );
                }
            })
        })
        .collect();
    let reader = {
        let router = router.clone();
        thread::spawn(move || {
            for i in 0..1000u32 {
                let _ = router.resolve(i, StreamRole::Microphone);
            }
        })
    };
    for w in writers {
        w.join().unwrap();
    }
    reader.join().unwrap();

    assert_eq!(router.len(), 1000);
    assert_eq!(
        router.resolve(3042, StreamRole::Microphone),
        Some(ParticipantId::new("p3-42"))
    );
}

#[test]
fn test_rtp_classification_then_routing() {
    let router = SsrcRouter::new();
    router.observe_mapping(1001, ParticipantId::new("alice"), StreamRole::Microphone);
    router.start_watching(ParticipantId::new("bob"));

    let mic = RtpPacket::new(111, false, 1, 960, 1001, vec![0xF8u8, 0xFF, 0xFE]);
    let screen = RtpPacket::new(97, true, 1, 3000, 5555, vec![0x65u8, 0x88]);

    let mic_kind = RtpPacket::parse(&mic.to_bytes()).unwrap().kind().unwrap();
    let screen_kind = screen.kind().unwrap();

    assert_eq!(
        router.resolve(mic.ssrc, mic_kind.role()),
        Some(ParticipantId::new("alice"))
    );
    assert_eq!(
        router.resolve(screen.ssrc, screen_kind.role()),
        Some(ParticipantId::new("bob"))
    );
}

#[test]
fn test_switching_watched_share_reattributes_screen_ssrc() {
    let router = SsrcRouter::new();
    let a = ParticipantId::new("a");
    let b = ParticipantId::new("b");

    router.start_watching(a.clone());
    assert_eq!(router.resolve(5000, StreamRole::ScreenAudio), Some(a.clone()));
    assert_eq!(router.ssrc_for(&a, StreamRole::ScreenAudio), Some(5000));

    router.stop_watching(&a);
    assert_eq!(router.mapping(5000), None);
    assert_eq!(router.ssrc_for(&a, StreamRole::ScreenAudio), None);

    router.start_watching(b.clone());
    assert_eq!(router.resolve(5000, StreamRole::ScreenAudio), Some(b.clone()));
    assert_eq!(router.mapping(5000).map(|m| m.source), Some(MappingSource::Inferred));
}

#[test]
fn test_stop_watching_keeps_server_mappings() {
    let router = SsrcRouter::new();
    let a = ParticipantId::new("a");

    router.start_watching(a.clone());
    router.observe_mapping(6000, a.clone(), StreamRole::ScreenShare);
    assert_eq!(router.resolve(6001, StreamRole::ScreenAudio), Some(a.clone()));

    router.stop_watching(&a);
    assert_eq!(router.resolve(6000, StreamRole::ScreenShare), Some(a.clone()));
    assert_eq!(router.mapping(6000).map(|m| m.source), Some(MappingSource::Server));
    assert_eq!(router.resolve(6001, StreamRole::ScreenAudio), None);
}
