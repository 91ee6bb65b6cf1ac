//! Audio mixer
//!
//! Single entry point for inbound audio RTP. Each packet is attributed to a
//! participant, scaled by `master × user` volume and forwarded to the output
//! sink in its original payload format. Two paths exist, microphone and
//! screen audio, and each owns exactly one stateful decoder/encoder pair no
//! matter how many participants are in the session.

use crate::codecs::{OpusConfig, PathCodecs};
use crate::error::MediaResult;
use crate::gain::{apply_gain, is_unity};
use crate::render::{AudioSink, MixedPacket};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sfurtc_core::{AudioEncoding, ParticipantId, PayloadKind, RtpPacket, SsrcRouter, StreamRole};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Upper bound for user and master volume
pub const MAX_VOLUME: f32 = 3.0;

/// Mixer configuration
#[derive(Debug, Clone, PartialEq)]
pub struct MixerConfig {
    /// Opus layout of the microphone path
    pub microphone: OpusConfig,
    /// Opus layout of the screen-audio path
    pub screen_audio: OpusConfig,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            microphone: OpusConfig::default(),
            screen_audio: OpusConfig::default(),
        }
    }
}

/// Persisted volume settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeTable {
    /// Master volume
    pub master: f32,
    /// Per-participant volume
    #[serde(default)]
    pub users: BTreeMap<ParticipantId, f32>,
}

impl Default for VolumeTable {
    fn default() -> Self {
        Self {
            master: 1.0,
            users: BTreeMap::new(),
        }
    }
}

/// What happened to a routed packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Payload forwarded byte-identical at unity volume
    Forwarded,
    /// Payload decoded, scaled and re-encoded
    Scaled,
    /// Original payload forwarded after a codec failure
    ForwardedOriginal,
    /// Screen audio dropped because no share is watched
    DroppedUnwatched,
    /// Payload type is not audio
    DroppedNotAudio,
}

/// Counters for one mixer path
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PathStats {
    /// Packets forwarded untouched on the fast path
    pub forwarded_unchanged: u64,
    /// Packets scaled and re-encoded
    pub scaled: u64,
    /// Screen-audio packets dropped while nothing is watched
    pub dropped_unwatched: u64,
    /// Packets forwarded as-is after a decode or encode failure
    pub decode_failures: u64,
}

/// Counters for both paths
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MixerStats {
    /// Microphone path
    pub microphone: PathStats,
    /// Screen-audio path
    pub screen_audio: PathStats,
}

struct MixerPath {
    codecs: PathCodecs,
    stats: PathStats,
}

impl MixerPath {
    fn new(config: &OpusConfig) -> MediaResult<Self> {
        Ok(Self {
            codecs: PathCodecs::new(config.clone())?,
            stats: PathStats::default(),
        })
    }

    fn scale(&mut self, encoding: AudioEncoding, payload: &[u8], gain: f32) -> MediaResult<Vec<u8>> {
        let codec = self.codecs.codec_for(encoding);
        let mut pcm = codec.decode(payload)?;
        apply_gain(&mut pcm, gain);
        codec.encode(&pcm)
    }
}

/// Per-user volume mixer
pub struct AudioMixer {
    config: MixerConfig,
    router: Arc<SsrcRouter>,
    sink: Arc<dyn AudioSink>,
    microphone: Mutex<MixerPath>,
    screen_audio: Mutex<MixerPath>,
    users: RwLock<HashMap<ParticipantId, f32>>,
    master: RwLock<f32>,
}

impl AudioMixer {
    /// Create a mixer forwarding to `sink`
    pub fn new(
        config: MixerConfig,
        router: Arc<SsrcRouter>,
        sink: Arc<dyn AudioSink>,
    ) -> MediaResult<Self> {
        let microphone = MixerPath::new(&config.microphone)?;
        let screen_audio = MixerPath::new(&config.screen_audio)?;
        Ok(Self {
            config,
            router,
            sink,
            microphone: Mutex::new(microphone),
            screen_audio: Mutex::new(screen_audio),
            users: RwLock::new(HashMap::new()),
            master: RwLock::new(1.0),
        })
    }

    /// Route one inbound audio packet; `participant` skips SSRC resolution when known
    pub fn route(&self, packet: &RtpPacket, participant: Option<ParticipantId>) -> RouteOutcome {
        let (role, encoding) = match packet.kind() {
            Some(PayloadKind::Audio { role, encoding }) => (role, encoding),
            _ => {
                debug!(
                    "mixer ignoring payload type {} on ssrc {}",
                    packet.payload_type, packet.ssrc
                );
                return RouteOutcome::DroppedNotAudio;
            }
        };

        let path = match role {
            StreamRole::ScreenAudio => {
                if !self.router.is_watching_any() {
                    self.screen_audio.lock().stats.dropped_unwatched += 1;
                    return RouteOutcome::DroppedUnwatched;
                }
                &self.screen_audio
            }
            _ => &self.microphone,
        };

        let participant = participant.or_else(|| self.router.resolve(packet.ssrc, role));
        let gain = self.effective_volume(participant.as_ref());

        let mut path = path.lock();
        let (payload, outcome) = if is_unity(gain) {
            path.stats.forwarded_unchanged += 1;
            (packet.payload.clone(), RouteOutcome::Forwarded)
        } else {
            match path.scale(encoding, &packet.payload, gain) {
                Ok(scaled) => {
                    path.stats.scaled += 1;
                    (Bytes::from(scaled), RouteOutcome::Scaled)
                }
                Err(e) => {
                    path.stats.decode_failures += 1;
                    warn!(
                        "{} scaling failed on ssrc {}, forwarding original: {}",
                        role, packet.ssrc, e
                    );
                    (packet.payload.clone(), RouteOutcome::ForwardedOriginal)
                }
            }
        };

        // delivered under the path lock so per-path order is preserved
        self.sink.deliver(MixedPacket {
            participant,
            role,
            encoding,
            ssrc: packet.ssrc,
            sequence: packet.sequence,
            timestamp: packet.timestamp,
            marker: packet.marker,
            payload,
        });
        outcome
    }

    /// Set a participant's volume, clamped to [0, 3]
    pub fn set_user_volume(&self, participant: ParticipantId, volume: f32) -> f32 {
        let volume = clamp_volume(volume);
        debug!("volume for {} set to {:.2}", participant, volume);
        self.users.write().insert(participant, volume);
        volume
    }

    /// Volume of a participant, 1.0 when never set
    pub fn user_volume(&self, participant: &ParticipantId) -> f32 {
        self.users.read().get(participant).copied().unwrap_or(1.0)
    }

    /// Set the master volume, clamped to [0, 3]
    pub fn set_master_volume(&self, volume: f32) -> f32 {
        let volume = clamp_volume(volume);
        *self.master.write() = volume;
        volume
    }

    /// Current master volume
    pub fn master_volume(&self) -> f32 {
        *self.master.read()
    }

    /// Effective gain applied to a participant's audio
    pub fn effective_volume(&self, participant: Option<&ParticipantId>) -> f32 {
        let user = participant.map(|p| self.user_volume(p)).unwrap_or(1.0);
        self.master_volume() * user
    }

    /// Replace all volumes with a persisted table
    pub fn load_volumes(&self, table: &VolumeTable) {
        *self.master.write() = clamp_volume(table.master);
        let mut users = self.users.write();
        users.clear();
        for (participant, volume) in &table.users {
            users.insert(participant.clone(), clamp_volume(*volume));
        }
        debug!("loaded {} user volumes", users.len());
    }

    /// Snapshot of all volumes for persistence
    pub fn volumes(&self) -> VolumeTable {
        VolumeTable {
            master: self.master_volume(),
            users: self
                .users
                .read()
                .iter()
                .map(|(p, v)| (p.clone(), *v))
                .collect(),
        }
    }

    /// Let the sink drop audio buffered for a stream that ended
    pub fn forget_stream(&self, ssrc: u32) {
        self.sink.flush_ssrc(ssrc);
    }

    /// Recreate both decoder/encoder pairs and flush the sink
    pub fn reset(&self) -> MediaResult<()> {
        let microphone = MixerPath::new(&self.config.microphone)?;
        let screen_audio = MixerPath::new(&self.config.screen_audio)?;
        *self.microphone.lock() = microphone;
        *self.screen_audio.lock() = screen_audio;
        self.sink.flush();
        info!("audio mixer reset");
        Ok(())
    }

    /// Per-path counters
    pub fn stats(&self) -> MixerStats {
        MixerStats {
            microphone: self.microphone.lock().stats,
            screen_audio: self.screen_audio.lock().stats,
        }
    }
}

fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        return 1.0;
    }
    volume.clamp(0.0, MAX_VOLUME)
}
