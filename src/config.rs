//! Engine construction parameters.

/// Number of tracker channels. Fixed by the format (`FM_ch` in the glossary).
pub const CHANNEL_COUNT: usize = 24;

/// Wavetable length (`LUT`). Phase accumulators index into this many entries.
pub const LUT_SIZE: usize = 2048;

/// Legacy fixed-point scale the note-increment formula was calibrated for.
pub const LUT_RATIO: f32 = 2.0;

/// Sample rate every time constant in the engine is calibrated against.
pub const REFERENCE_SAMPLE_RATE: f32 = 48_000.0;

/// Construction-time parameters for an [`crate::engine::Engine`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    /// Output sample rate in Hz.
    pub sample_rate: f32,
    /// Initial reverb tail length, 0.0..=1.0 (see spec §4.6 / §6 `S` effect).
    pub reverb_length: f32,
    /// Initial reverb room size, 0.0..=1.0. Changing this reallocates the
    /// reverb's delay-line buffer.
    pub reverb_room_size: f32,
}

impl EngineConfig {
    /// `sampleRateRatio` from the spec: scales every time constant so
    /// behavior is sample-rate independent.
    pub fn sample_rate_ratio(&self) -> f32 {
        REFERENCE_SAMPLE_RATE / self.sample_rate
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: REFERENCE_SAMPLE_RATE,
            reverb_length: 0.5,
            reverb_room_size: 0.5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_rate_ratio_is_one_at_reference_rate() {
        let cfg = EngineConfig {
            sample_rate: 48_000.0,
            ..Default::default()
        };
        assert!((cfg.sample_rate_ratio() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn sample_rate_ratio_halves_at_double_rate() {
        let cfg = EngineConfig {
            sample_rate: 96_000.0,
            ..Default::default()
        };
        assert!((cfg.sample_rate_ratio() - 0.5).abs() < 1e-6);
    }
}
