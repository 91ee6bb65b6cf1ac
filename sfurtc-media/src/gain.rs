//! Sample-level gain helpers shared by the mixer and the gain controller

/// Magnitude above which the soft knee starts compressing
pub const SOFT_KNEE_THRESHOLD: f32 = 30_000.0;

const HEADROOM: f32 = i16::MAX as f32 - SOFT_KNEE_THRESHOLD;

/// Soft-knee limiter.
///
/// Values within ±30000 pass through. Beyond the knee the excess is blended
/// toward full scale so it approaches ±32767 without reaching a hard edge,
/// then the result is clamped to the i16 range.
#[inline]
pub fn soft_clip(value: f32) -> i16 {
    let magnitude = value.abs();
    if magnitude <= SOFT_KNEE_THRESHOLD {
        return value as i16;
    }
    let excess = magnitude - SOFT_KNEE_THRESHOLD;
    let compressed = SOFT_KNEE_THRESHOLD + HEADROOM * (excess / (excess + HEADROOM));
    let limited = compressed.min(i16::MAX as f32);
    if value < 0.0 {
        (-limited).max(i16::MIN as f32) as i16
    } else {
        limited as i16
    }
}

/// Multiply samples in place with soft-knee limiting
pub fn apply_gain(samples: &mut [i16], gain: f32) {
    for sample in samples.iter_mut() {
        *sample = soft_clip(*sample as f32 * gain);
    }
}

/// Root-mean-square level of a frame
pub fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / samples.len() as f64).sqrt() as f32
}

/// Whether a gain is close enough to unity to skip processing
#[inline]
pub fn is_unity(gain: f32) -> bool {
    (gain - 1.0).abs() < 1e-3
}
