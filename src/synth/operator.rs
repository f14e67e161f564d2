//! One FM operator's runtime state: phase accumulator, envelope-driven
//! amplitude, and the delayed pitch-envelope glide (spec §4.2).

use crate::synth::envelope::{Envelope, EnvelopeParams};
use crate::synth::wavetable::{Waveform, WavetableSet};

/// Per-note-scaled operator parameters, computed once at note-on from the
/// instrument's [`crate::sequencer::song::OperatorDef`] plus keyboard
/// tracking and the channel's current note (spec §4.2 `mt_calcOpVol` /
/// `mt_calcPitch`).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OperatorNoteParams {
    pub envelope: EnvelopeParams,
    /// Base phase increment in wavetable-index units per sample, before
    /// pitch-envelope glide, pitch bend, or LFO vibrato are applied.
    pub base_incr: f32,
    pub vol: f32,
    pub waveform: Waveform,
    pub lfo_fm: f32,
    pub lfo_am: f32,
    pub connect: i8,
    pub connect2: i8,
    pub connect_out: i8,
    /// Initial phase, in wavetable-index units (`offset` field spread over
    /// the table).
    pub initial_phase: f32,
    /// Pitch-envelope glide rate toward 1.0, 0..1 per tick, while the note
    /// is held (`pitchDecay`).
    pub pitch_decay_rate: f32,
    /// Pitch-envelope glide rate used instead of `pitch_decay_rate` once the
    /// note has been released.
    pub pitch_release_rate: f32,
    /// Computed from `pitchInitialRatio`: the glide's starting point at
    /// note-on, decaying toward 1.0 at `pitch_decay_rate`.
    pub pitch_initial_ratio: f32,
    /// Computed from `pitchFinalRatio`: the glide's post-release target.
    pub pitch_final_ratio: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct Operator {
    envelope: Envelope,
    params: OperatorNoteParams,
    phase: f32,
    amp: f32,
    amp_delta: f32,
    pitch: f32,
    pitch_mod: f32,
    pitch_dest_ratio: f32,
    pitch_time: f32,
    /// Last rendered sample, read by sibling operators' `connect`/`connect2`
    /// routing and by the channel's feedback path.
    pub out: f32,
}

impl Default for Operator {
    fn default() -> Self {
        Self {
            envelope: Envelope::default(),
            params: OperatorNoteParams::default(),
            phase: 0.0,
            amp: 0.0,
            amp_delta: 0.0,
            pitch: 0.0,
            pitch_mod: 1.0,
            pitch_dest_ratio: 1.0,
            pitch_time: 0.0,
            out: 0.0,
        }
    }
}

impl Operator {
    /// Arms the operator for a new note. `reset_phase` mirrors the
    /// instrument's `phaseReset` flag (or forced by click-smoothing/LFO
    /// reset logic one level up); `env_reset` mirrors `envReset`.
    pub fn note_on(&mut self, params: OperatorNoteParams, reset_phase: bool, env_reset: bool) {
        self.params = params;
        if reset_phase {
            self.phase = params.initial_phase;
        }
        if env_reset {
            self.amp = 0.0;
            self.out = 0.0;
        }
        self.pitch_mod = params.pitch_initial_ratio;
        self.pitch_dest_ratio = 1.0;
        self.pitch_time = params.pitch_decay_rate;
        self.envelope.note_on(params.envelope, env_reset);
    }

    pub fn note_off(&mut self) {
        self.envelope.note_off();
        self.pitch_time = self.params.pitch_release_rate;
        self.pitch_dest_ratio = self.params.pitch_final_ratio;
    }

    pub fn is_idle(&self) -> bool {
        self.envelope.is_idle()
    }

    pub fn connect(&self) -> i8 {
        self.params.connect
    }

    pub fn connect2(&self) -> i8 {
        self.params.connect2
    }

    pub fn connect_out(&self) -> i8 {
        self.params.connect_out
    }

    pub fn base_incr(&self) -> f32 {
        self.params.base_incr
    }

    pub fn waveform(&self) -> Waveform {
        self.params.waveform
    }

    /// Applies a portamento-up/down step (effect `E`/`F`): `incr += delta *
    /// incr`.
    pub fn bend_incr(&mut self, delta_ratio: f32) {
        self.params.base_incr += delta_ratio * self.params.base_incr;
    }

    /// Applies a portamento-to-note glide step (effect `G`): `incr +=
    /// (dest - incr) * factor`.
    pub fn glide_incr_toward(&mut self, dest_incr: f32, factor: f32) {
        self.params.base_incr += (dest_incr - self.params.base_incr) * factor;
    }

    pub fn set_lfo_fm(&mut self, depth: f32) {
        self.params.lfo_fm = depth;
    }

    pub fn set_lfo_am(&mut self, depth: f32) {
        self.params.lfo_am = depth;
    }

    /// Replaces the note-scaled parameter set in place, without touching
    /// phase, envelope state, or pitch glide — used by effect `K`'s
    /// instrument-parameter edits (spec §4.5), which recompute a single
    /// field's derived value but must not retrigger the note.
    pub fn set_params(&mut self, params: OperatorNoteParams) {
        self.params = params;
    }

    /// Advances the envelope and pitch glide by one control-tick (~8
    /// samples) and recomputes the per-sample `pitch`/`amp_delta` deltas
    /// used by [`Operator::render_sample`].
    pub fn tick(&mut self, lfo: f32, pitch_bend: f32, channel_vol: f32, samples_per_tick: u32) {
        let env = self.envelope.tick();
        self.pitch_mod -= (self.pitch_mod - self.pitch_dest_ratio) * self.pitch_time;

        let target_amp = env * self.params.vol * channel_vol * (1.0 - lfo * self.params.lfo_am);
        self.amp_delta = (target_amp - self.amp) / samples_per_tick as f32;
        self.pitch = self.params.base_incr * self.pitch_mod * pitch_bend * (1.0 + lfo * self.params.lfo_fm);
    }

    /// Renders one sample. `phase_mod` is the sum (in wavetable-index units)
    /// of whatever sibling operators/feedback route into this operator's
    /// phase this sample.
    pub fn render_sample(&mut self, phase_mod: f32, tables: &WavetableSet) -> f32 {
        self.phase += self.pitch;
        self.amp += self.amp_delta;
        let sample = tables.sample(self.params.waveform, self.phase + phase_mod) * self.amp;
        self.out = sample;
        sample
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> OperatorNoteParams {
        OperatorNoteParams {
            envelope: EnvelopeParams {
                delay_ticks: 0.0,
                a: 0.9,
                hold_ticks: 0.0,
                d: 0.9,
                s: 0.5,
                r: 0.5,
                initial: 0.0,
                env_loop: false,
            },
            base_incr: 10.0,
            vol: 1.0,
            waveform: Waveform::Sine,
            lfo_fm: 0.0,
            lfo_am: 0.0,
            connect: -1,
            connect2: -1,
            connect_out: 0,
            initial_phase: 0.0,
            pitch_decay_rate: 0.1,
            pitch_release_rate: 0.1,
            pitch_initial_ratio: 1.0,
            pitch_final_ratio: 1.0,
        }
    }

    #[test]
    fn renders_nonzero_after_attack() {
        let mut op = Operator::default();
        op.note_on(params(), true, true);
        for _ in 0..50 {
            op.tick(0.0, 1.0, 1.0, 8);
            for _ in 0..8 {
                op.render_sample(0.0, &WavetableSet::new(48_000.0));
            }
        }
        assert!(op.amp > 0.0);
    }

    #[test]
    fn goes_idle_after_release() {
        let mut op = Operator::default();
        let mut p = params();
        p.envelope.r = 0.3;
        op.note_on(p, true, true);
        let tables = WavetableSet::new(48_000.0);
        for _ in 0..200 {
            op.tick(0.0, 1.0, 1.0, 8);
            for _ in 0..8 {
                op.render_sample(0.0, &tables);
            }
        }
        op.note_off();
        for _ in 0..200 {
            op.tick(0.0, 1.0, 1.0, 8);
            for _ in 0..8 {
                op.render_sample(0.0, &tables);
            }
        }
        assert!(op.is_idle());
    }

    #[test]
    fn phase_modulation_input_shifts_output() {
        let tables = WavetableSet::new(48_000.0);
        let mut op = Operator::default();
        op.note_on(params(), true, true);
        op.amp = 1.0;
        op.phase = 0.0;
        let unmodulated = tables.sample(Waveform::Sine, 0.0);
        let modulated = op.render_sample(512.0, &tables);
        assert_ne!(unmodulated, modulated);
    }
}
