//! Process-wide native audio subsystem lifecycle
//!
//! Initialization and shutdown are idempotent and serialized through one
//! state lock created on first use. `is_initialized` only reads state.

use crate::error::MediaResult;
use parking_lot::Mutex;
use std::sync::OnceLock;
use tracing::{debug, info};

/// Information gathered when the subsystem starts
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AudioSubsystemInfo {
    /// Name of the audio host backend
    pub host: String,
    /// Default output device, if any
    pub default_output: Option<String>,
    /// Default input device, if any
    pub default_input: Option<String>,
}

#[derive(Debug, Default)]
struct SubsystemState {
    info: Option<AudioSubsystemInfo>,
    generation: u64,
}

fn state() -> &'static Mutex<SubsystemState> {
    static STATE: OnceLock<Mutex<SubsystemState>> = OnceLock::new();
    STATE.get_or_init(|| Mutex::new(SubsystemState::default()))
}

/// Handle to the process-wide audio subsystem
pub struct AudioSubsystem;

impl AudioSubsystem {
    /// Start the subsystem; later calls return the existing state
    pub fn initialize() -> MediaResult<AudioSubsystemInfo> {
        let mut state = state().lock();
        if let Some(info) = &state.info {
            debug!("audio subsystem already initialized");
            return Ok(info.clone());
        }
        let info = probe()?;
        state.generation += 1;
        info!(
            "audio subsystem initialized (host {}, generation {})",
            info.host, state.generation
        );
        state.info = Some(info.clone());
        Ok(info)
    }

    /// Stop the subsystem; a no-op when not running
    pub fn shutdown() {
        let mut state = state().lock();
        if state.info.take().is_some() {
            info!("audio subsystem shut down");
        }
    }

    /// Whether the subsystem is running
    pub fn is_initialized() -> bool {
        state().lock().info.is_some()
    }

    /// Number of times the subsystem has been started in this process
    pub fn generation() -> u64 {
        state().lock().generation
    }
}

#[cfg(feature = "devices")]
fn probe() -> MediaResult<AudioSubsystemInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    Ok(AudioSubsystemInfo {
        host: format!("{:?}", host.id()),
        default_output: host.default_output_device().and_then(|d| d.name().ok()),
        default_input: host.default_input_device().and_then(|d| d.name().ok()),
    })
}

#[cfg(not(feature = "devices"))]
fn probe() -> MediaResult<AudioSubsystemInfo> {
    Ok(AudioSubsystemInfo {
        host: "none".to_string(),
        default_output: None,
        default_input: None,
    })
}
