//! Stream roles and the payload-type convention shared with the media server
//!
//! Four logical streams travel over one transport. Each is identified on the
//! wire by its RTP payload type; raw integers are resolved into [`PayloadKind`]
//! once, at the routing boundary, and never inspected again downstream.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opus microphone audio
pub const PT_MICROPHONE_OPUS: u8 = 111;
/// Opus screen-share audio
pub const PT_SCREEN_AUDIO_OPUS: u8 = 112;
/// H.264 camera video
pub const PT_CAMERA_H264: u8 = 96;
/// H.264 screen-share video
pub const PT_SCREEN_H264: u8 = 97;
/// Static G.711 µ-law
pub const PT_PCMU: u8 = 0;
/// Static G.711 A-law
pub const PT_PCMA: u8 = 8;

/// Logical stream a packet belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StreamRole {
    /// Microphone audio
    Microphone,
    /// Audio captured alongside a screen share
    ScreenAudio,
    /// Camera video
    Camera,
    /// Screen-share video
    ScreenShare,
}

impl StreamRole {
    /// All roles, in track order
    pub const ALL: [StreamRole; 4] = [
        StreamRole::Microphone,
        StreamRole::ScreenAudio,
        StreamRole::Camera,
        StreamRole::ScreenShare,
    ];

    /// Whether the role carries audio
    pub fn is_audio(&self) -> bool {
        matches!(self, StreamRole::Microphone | StreamRole::ScreenAudio)
    }

    /// Whether the role carries video
    pub fn is_video(&self) -> bool {
        !self.is_audio()
    }

    /// Whether the role belongs to a screen share
    pub fn is_screen(&self) -> bool {
        matches!(self, StreamRole::ScreenAudio | StreamRole::ScreenShare)
    }

    /// Payload type used when sending this role
    pub fn payload_type(&self) -> u8 {
        match self {
            StreamRole::Microphone => PT_MICROPHONE_OPUS,
            StreamRole::ScreenAudio => PT_SCREEN_AUDIO_OPUS,
            StreamRole::Camera => PT_CAMERA_H264,
            StreamRole::ScreenShare => PT_SCREEN_H264,
        }
    }

    /// RTP clock rate for the role
    pub fn clock_rate(&self) -> u32 {
        if self.is_audio() {
            48_000
        } else {
            90_000
        }
    }

    /// Short name used in logs and track ids
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamRole::Microphone => "microphone",
            StreamRole::ScreenAudio => "screen-audio",
            StreamRole::Camera => "camera",
            StreamRole::ScreenShare => "screen",
        }
    }
}

impl fmt::Display for StreamRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audio payload encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioEncoding {
    /// Opus (stateful)
    Opus,
    /// G.711 µ-law
    Pcmu,
    /// G.711 A-law
    Pcma,
}

/// Typed interpretation of an RTP payload type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    /// Audio in the given role and encoding
    Audio {
        /// Stream the audio belongs to
        role: StreamRole,
        /// Payload encoding
        encoding: AudioEncoding,
    },
    /// H.264 video in the given role
    Video {
        /// Stream the video belongs to
        role: StreamRole,
    },
}

impl PayloadKind {
    /// Resolve a raw payload type, `None` when it is outside the convention
    pub fn from_payload_type(payload_type: u8) -> Option<Self> {
        let kind = match payload_type {
            PT_MICROPHONE_OPUS => PayloadKind::Audio {
                role: StreamRole::Microphone,
                encoding: AudioEncoding::Opus,
            },
            PT_SCREEN_AUDIO_OPUS => PayloadKind::Audio {
                role: StreamRole::ScreenAudio,
                encoding: AudioEncoding::Opus,
            },
            PT_PCMU => PayloadKind::Audio {
                role: StreamRole::Microphone,
                encoding: AudioEncoding::Pcmu,
            },
            PT_PCMA => PayloadKind::Audio {
                role: StreamRole::Microphone,
                encoding: AudioEncoding::Pcma,
            },
            PT_CAMERA_H264 => PayloadKind::Video {
                role: StreamRole::Camera,
            },
            PT_SCREEN_H264 => PayloadKind::Video {
                role: StreamRole::ScreenShare,
            },
            _ => return None,
        };
        Some(kind)
    }

    /// Stream role of the payload
    pub fn role(&self) -> StreamRole {
        match self {
            PayloadKind::Audio { role, .. } | PayloadKind::Video { role } => *role,
        }
    }
}

/// Opaque participant identifier assigned by the server
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Wrap a server-assigned id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ParticipantId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_type_round_trip() {
        for role in StreamRole::ALL {
            let kind = PayloadKind::from_payload_type(role.payload_type()).unwrap();
            assert_eq!(kind.role(), role);
        }
    }

    #[test]
    fn test_g711_maps_to_microphone() {
        assert_eq!(
            PayloadKind::from_payload_type(0),
            Some(PayloadKind::Audio {
                role: StreamRole::Microphone,
                encoding: AudioEncoding::Pcmu
            })
        );
        assert_eq!(
            PayloadKind::from_payload_type(8),
            Some(PayloadKind::Audio {
                role: StreamRole::Microphone,
                encoding: AudioEncoding::Pcma
            })
        );
        assert_eq!(PayloadKind::from_payload_type(100), None);
    }

    #[test]
    fn test_role_classification() {
        assert!(StreamRole::ScreenAudio.is_audio());
        assert!(StreamRole::ScreenAudio.is_screen());
        assert!(StreamRole::Camera.is_video());
        assert!(!StreamRole::Camera.is_screen());
        assert_eq!(StreamRole::Camera.clock_rate(), 90_000);
    }
}
