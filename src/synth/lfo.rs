//! Per-channel low-frequency oscillator: a delay, an attack ramp into its
//! envelope, then a free-running wavetable read that modulates pitch
//! (vibrato) and amplitude (tremolo) on every operator in the voice
//! (spec §4.2/§4.3).

use crate::synth::wavetable::{Waveform, WavetableSet};

/// Per-note LFO coefficients, derived from the instrument's `lfo_speed`,
/// `lfo_delay`, `lfo_attack`, `lfo_waveform` fields and scaled by
/// `sampleRateRatio`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LfoParams {
    /// Phase increment per control-tick, in wavetable-index units.
    pub incr: f32,
    /// One-pole attack coefficient ramping the LFO envelope up to 1.0.
    pub attack: f32,
    /// Control-ticks to wait, silent, before the attack ramp starts.
    pub delay_ticks: f32,
    pub waveform: Waveform,
}

impl Default for LfoParams {
    fn default() -> Self {
        Self {
            incr: 0.0,
            attack: 1.0,
            delay_ticks: 0.0,
            waveform: Waveform::Sine,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Lfo {
    params: LfoParams,
    phase: f32,
    env: f32,
    delay_cpt: f32,
}

impl Lfo {
    /// Rearms the LFO for a new note. `offset` is the instrument's 0..31
    /// initial phase bucket, spread across the wavetable.
    pub fn reset(&mut self, params: LfoParams, offset: u8) {
        self.params = params;
        self.phase = (offset as f32 / 32.0) * crate::config::LUT_SIZE as f32;
        self.env = 0.0;
        self.delay_cpt = 0.0;
    }

    /// Advances one control-tick.
    pub fn tick(&mut self) {
        if self.delay_cpt < self.params.delay_ticks {
            self.delay_cpt += 1.0;
            return;
        }
        self.phase += self.params.incr;
        self.env += (1.0 - self.env) * self.params.attack;
    }

    /// Current LFO output, in -1.0..=1.0 scaled by its envelope.
    pub fn value(&self, tables: &WavetableSet) -> f32 {
        tables.sample(self.params.waveform, self.phase) * self.env
    }

    /// In-place setters used by effect `K`'s global-parameter edits (spec
    /// §4.5): these update the running LFO's coefficients without
    /// resetting phase or envelope, unlike [`Lfo::reset`].
    pub fn set_speed(&mut self, incr: f32) {
        self.params.incr = incr;
    }

    pub fn set_delay_ticks(&mut self, delay_ticks: f32) {
        self.params.delay_ticks = delay_ticks;
    }

    pub fn set_attack(&mut self, attack: f32) {
        self.params.attack = attack;
    }

    pub fn set_waveform(&mut self, waveform: Waveform) {
        self.params.waveform = waveform;
    }

    pub fn set_offset(&mut self, offset: u8) {
        self.phase = (offset as f32 / 32.0) * crate::config::LUT_SIZE as f32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stays_silent_during_delay() {
        let mut lfo = Lfo::default();
        lfo.reset(
            LfoParams {
                incr: 5.0,
                attack: 0.5,
                delay_ticks: 10.0,
                waveform: Waveform::Sine,
            },
            0,
        );
        let tables = WavetableSet::new(48_000.0);
        for _ in 0..5 {
            lfo.tick();
            assert_eq!(lfo.value(&tables), 0.0);
        }
    }

    #[test]
    fn envelope_ramps_up_after_delay() {
        let mut lfo = Lfo::default();
        lfo.reset(
            LfoParams {
                incr: 3.0,
                attack: 0.3,
                delay_ticks: 0.0,
                waveform: Waveform::Sine,
            },
            0,
        );
        for _ in 0..50 {
            lfo.tick();
        }
        assert!(lfo.env > 0.9);
    }

    #[test]
    fn offset_spreads_initial_phase() {
        let mut a = Lfo::default();
        let mut b = Lfo::default();
        let params = LfoParams::default();
        a.reset(params, 0);
        b.reset(params, 16);
        assert!((a.phase - b.phase).abs() > 1.0);
    }
}
