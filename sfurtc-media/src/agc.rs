//! Automatic gain control with noise gate and voice-activity detection
//!
//! Runs once per captured frame, on the capture callback that owns it. The
//! controller levels speech toward a target RMS, the gate silences frames
//! whose processed level is below a threshold, and voice activity is derived
//! from the gate decision with a wall-clock hold before reporting silence.

use crate::gain::{apply_gain, rms};
use std::time::{Duration, Instant};
use tracing::debug;

/// Configuration options for AGC
#[derive(Debug, Clone, PartialEq)]
pub struct AgcConfig {
    /// Enable adaptive gain (manual and baseline gains still apply when off)
    pub enabled: bool,
    /// RMS level the controller steers toward
    pub target_rms: f32,
    /// Lower bound of the adaptive gain
    pub min_gain: f32,
    /// Upper bound of the adaptive gain
    pub max_gain: f32,
    /// Smoothing coefficient used while gain is falling
    pub attack: f32,
    /// Smoothing coefficient used while gain is rising
    pub release: f32,
    /// Input RMS below which the gain is frozen
    pub silence_threshold: f32,
    /// Constant pre-gain
    pub baseline_boost: f32,
    /// User-adjustable gain
    pub manual_gain: f32,
    /// Enable the noise gate
    pub gate_enabled: bool,
    /// Output RMS below which the gate closes
    pub gate_threshold: f32,
    /// Time voice activity is held after the gate closes
    pub vad_hold: Duration,
}

impl Default for AgcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            target_rms: 3000.0,
            min_gain: 0.5,
            max_gain: 8.0,
            attack: 0.3,
            release: 0.02,
            silence_threshold: 100.0,
            baseline_boost: 1.0,
            manual_gain: 1.0,
            gate_enabled: false,
            gate_threshold: 150.0,
            vad_hold: Duration::from_millis(200),
        }
    }
}

impl AgcConfig {
    /// Preset for noisy environments: gate on, stronger threshold
    pub fn noisy_room() -> Self {
        Self {
            gate_enabled: true,
            gate_threshold: 400.0,
            ..Self::default()
        }
    }

    /// Preset with adaptive gain disabled
    pub fn fixed_gain(manual_gain: f32) -> Self {
        Self {
            enabled: false,
            manual_gain,
            ..Self::default()
        }
    }
}

/// Voice activity transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceActivity {
    /// Speech started
    Started,
    /// Speech stopped (after the hold elapsed)
    Stopped,
}

/// Result of processing one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgcOutcome {
    /// Frame RMS before processing
    pub input_rms: f32,
    /// Frame RMS after gain (before gating)
    pub output_rms: f32,
    /// Whether the gate let the frame through
    pub gate_open: bool,
    /// Whether voice activity is reported
    pub speaking: bool,
    /// Transition produced by this frame, if any
    pub transition: Option<VoiceActivity>,
}

/// Automatic gain control state
#[derive(Debug)]
pub struct AutomaticGainControl {
    config: AgcConfig,
    gain: f32,
    speaking: bool,
    last_voice: Option<Instant>,
}

impl AutomaticGainControl {
    /// Create a controller with the given configuration
    pub fn new(config: AgcConfig) -> Self {
        Self {
            config: normalize_bounds(config),
            gain: 1.0,
            speaking: false,
            last_voice: None,
        }
    }

    /// Current adaptive gain
    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Whether voice activity is currently reported
    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Active configuration
    pub fn config(&self) -> &AgcConfig {
        &self.config
    }

    /// Replace the configuration; adaptive state is kept
    pub fn set_config(&mut self, config: AgcConfig) {
        self.config = normalize_bounds(config);
        self.gain = self.gain.clamp(self.config.min_gain, self.config.max_gain);
    }

    /// Update the user-adjustable gain
    pub fn set_manual_gain(&mut self, gain: f32) {
        self.config.manual_gain = gain.max(0.0);
    }

    /// Update the gate settings
    pub fn set_gate(&mut self, enabled: bool, threshold: f32) {
        self.config.gate_enabled = enabled;
        self.config.gate_threshold = threshold.max(0.0);
    }

    /// Return to unity gain and silence
    pub fn reset(&mut self) {
        self.gain = 1.0;
        self.speaking = false;
        self.last_voice = None;
    }

    /// Process a frame in place using the current time
    pub fn process(&mut self, samples: &mut [i16]) -> AgcOutcome {
        self.process_at(samples, Instant::now())
    }

    /// Process a frame in place at an explicit instant
    pub fn process_at(&mut self, samples: &mut [i16], now: Instant) -> AgcOutcome {
        let input_rms = rms(samples);

        if self.config.enabled && input_rms > self.config.silence_threshold {
            let desired = (self.config.target_rms / input_rms)
                .clamp(self.config.min_gain, self.config.max_gain);
            let coefficient = if desired < self.gain {
                self.config.attack
            } else {
                self.config.release
            };
            self.gain += coefficient * (desired - self.gain);
        }

        let adaptive = if self.config.enabled { self.gain } else { 1.0 };
        let total = self.config.baseline_boost * adaptive * self.config.manual_gain;
        apply_gain(samples, total);
        let output_rms = rms(samples);

        let gate_open = !self.config.gate_enabled || output_rms >= self.config.gate_threshold;
        if !gate_open {
            samples.fill(0);
        }

        let transition = self.update_activity(gate_open && output_rms > 0.0, now);
        AgcOutcome {
            input_rms,
            output_rms,
            gate_open,
            speaking: self.speaking,
            transition,
        }
    }

    fn update_activity(&mut self, voiced: bool, now: Instant) -> Option<VoiceActivity> {
        if voiced {
            self.last_voice = Some(now);
            if !self.speaking {
                self.speaking = true;
                debug!("voice activity started (gain {:.2})", self.gain);
                return Some(VoiceActivity::Started);
            }
            return None;
        }

        if self.speaking {
            let held = self
                .last_voice
                .map(|t| now.saturating_duration_since(t) < self.config.vad_hold)
                .unwrap_or(false);
            if !held {
                self.speaking = false;
                debug!("voice activity stopped");
                return Some(VoiceActivity::Stopped);
            }
        }
        None
    }
}

impl Default for AutomaticGainControl {
    fn default() -> Self {
        Self::new(AgcConfig::default())
    }
}

/// Order the gain bounds so clamping is always defined
fn normalize_bounds(mut config: AgcConfig) -> AgcConfig {
    let defaults = AgcConfig::default();
    if !config.min_gain.is_finite() {
        config.min_gain = defaults.min_gain;
    }
    if !config.max_gain.is_finite() {
        config.max_gain = defaults.max_gain;
    }
    if config.min_gain > config.max_gain {
        std::mem::swap(&mut config.min_gain, &mut config.max_gain);
    }
    config
}
