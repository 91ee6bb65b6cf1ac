//! Device and volume settings collaborator
//!
//! The session reads settings when it starts and writes per-user volumes
//! back on every change. Where settings live is the host's choice; a JSON
//! file store and an in-memory store are provided.

use crate::error::{Result, SessionError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sfurtc_media::{AgcConfig, VolumeTable};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Persisted device and processing settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaSettings {
    /// Selected input device name
    pub input_device: Option<String>,
    /// Selected output device name
    pub output_device: Option<String>,
    /// User microphone gain
    pub manual_gain: f32,
    /// Enable the noise gate
    pub gate_enabled: bool,
    /// Gate threshold (output RMS)
    pub gate_threshold: f32,
    /// Noise suppression requested
    pub noise_suppression: bool,
    /// Echo cancellation requested
    pub echo_cancellation: bool,
}

impl Default for MediaSettings {
    fn default() -> Self {
        let agc = AgcConfig::default();
        Self {
            input_device: None,
            output_device: None,
            manual_gain: agc.manual_gain,
            gate_enabled: agc.gate_enabled,
            gate_threshold: agc.gate_threshold,
            noise_suppression: true,
            echo_cancellation: true,
        }
    }
}

impl MediaSettings {
    /// Apply the user-controlled fields to a gain control configuration
    pub fn apply_to(&self, agc: &mut AgcConfig) {
        agc.manual_gain = self.manual_gain;
        agc.gate_enabled = self.gate_enabled;
        agc.gate_threshold = self.gate_threshold;
    }
}

/// Storage for settings and the volume table
pub trait SettingsStore: Send + Sync {
    /// Current device and processing settings
    fn media_settings(&self) -> Result<MediaSettings>;

    /// Replace the device and processing settings
    fn save_media_settings(&self, settings: &MediaSettings) -> Result<()>;

    /// Persisted per-user volume table
    fn load_volumes(&self) -> Result<VolumeTable>;

    /// Persist the per-user volume table
    fn save_volumes(&self, volumes: &VolumeTable) -> Result<()>;
}

/// Settings kept in memory only
#[derive(Debug, Default)]
pub struct MemorySettings {
    media: RwLock<MediaSettings>,
    volumes: RwLock<VolumeTable>,
}

impl MemorySettings {
    /// Empty store with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with values
    pub fn with_values(media: MediaSettings, volumes: VolumeTable) -> Self {
        Self {
            media: RwLock::new(media),
            volumes: RwLock::new(volumes),
        }
    }
}

impl SettingsStore for MemorySettings {
    fn media_settings(&self) -> Result<MediaSettings> {
        Ok(self.media.read().clone())
    }

    fn save_media_settings(&self, settings: &MediaSettings) -> Result<()> {
        *self.media.write() = settings.clone();
        Ok(())
    }

    fn load_volumes(&self) -> Result<VolumeTable> {
        Ok(self.volumes.read().clone())
    }

    fn save_volumes(&self, volumes: &VolumeTable) -> Result<()> {
        *self.volumes.write() = volumes.clone();
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct SettingsFile {
    media: MediaSettings,
    volumes: VolumeTable,
}

/// Settings stored in one JSON file
///
/// A missing file reads as defaults. Writes replace the file through a
/// temporary sibling so a crash never leaves it half written.
#[derive(Debug)]
pub struct JsonFileSettings {
    path: PathBuf,
    cache: RwLock<Option<SettingsFile>>,
}

impl JsonFileSettings {
    /// Store backed by `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: RwLock::new(None),
        }
    }

    /// Location of the file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<SettingsFile> {
        if let Some(cached) = self.cache.read().as_ref() {
            return Ok(cached.clone());
        }
        let file = match fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("settings file {} not found, using defaults", self.path.display());
                SettingsFile::default()
            }
            Err(e) => return Err(e.into()),
        };
        *self.cache.write() = Some(file.clone());
        Ok(file)
    }

    fn update(&self, apply: impl FnOnce(&mut SettingsFile)) -> Result<()> {
        let mut file = self.read()?;
        apply(&mut file);
        let json = serde_json::to_vec_pretty(&file)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            warn!("failed to replace {}: {}", self.path.display(), e);
            SessionError::Settings {
                reason: format!("failed to replace {}: {}", self.path.display(), e),
            }
        })?;
        *self.cache.write() = Some(file);
        Ok(())
    }
}

impl SettingsStore for JsonFileSettings {
    fn media_settings(&self) -> Result<MediaSettings> {
        Ok(self.read()?.media)
    }

    fn save_media_settings(&self, settings: &MediaSettings) -> Result<()> {
        self.update(|file| file.media = settings.clone())
    }

    fn load_volumes(&self) -> Result<VolumeTable> {
        Ok(self.read()?.volumes)
    }

    fn save_volumes(&self, volumes: &VolumeTable) -> Result<()> {
        self.update(|file| file.volumes = volumes.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sfurtc_core::ParticipantId;

    #[test]
    fn test_json_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let store = JsonFileSettings::new(&path);
        assert_eq!(store.media_settings().unwrap(), MediaSettings::default());

        let mut volumes = VolumeTable::default();
        volumes.master = 0.8;
        volumes.users.insert(ParticipantId::from("alice"), 2.5);
        store.save_volumes(&volumes).unwrap();

        let settings = MediaSettings {
            input_device: Some("USB Mic".to_string()),
            gate_enabled: true,
            ..MediaSettings::default()
        };
        store.save_media_settings(&settings).unwrap();

        let reopened = JsonFileSettings::new(&path);
        assert_eq!(reopened.load_volumes().unwrap(), volumes);
        assert_eq!(reopened.media_settings().unwrap(), settings);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, b"{not json").unwrap();
        let store = JsonFileSettings::new(&path);
        assert!(matches!(
            store.load_volumes(),
            Err(SessionError::Settings { .. })
        ));
    }

    #[test]
    fn test_settings_shape_agc() {
        let settings = MediaSettings {
            manual_gain: 1.5,
            gate_enabled: true,
            gate_threshold: 300.0,
            ..MediaSettings::default()
        };
        let mut agc = AgcConfig::default();
        settings.apply_to(&mut agc);
        assert_eq!(agc.manual_gain, 1.5);
        assert!(agc.gate_enabled);
        assert_eq!(agc.gate_threshold, 300.0);
    }
}
