//! A single tracker channel: six FM operators, their routing matrix, the
//! channel LFO, panning/volume/reverb send, and note-transition click
//! smoothing (spec §4.3).

use crate::sequencer::song::{Instrument, OperatorDef, OPERATOR_COUNT};
use crate::synth::envelope::EnvelopeParams;
use crate::synth::lfo::{Lfo, LfoParams};
use crate::synth::operator::{Operator, OperatorNoteParams};
use crate::synth::wavetable::{Waveform, WavetableSet};

const SEMITONE_RATIO: f32 = 0.059463 * 0.01;

fn calc_pitch(
    op: &OperatorDef,
    note: u8,
    temperament_cents: f32,
    tuning_fraction: f32,
    tables: &WavetableSet,
    sample_rate_ratio: f32,
) -> f32 {
    let note = note.min(127) as usize;
    let frequency =
        tables.note_incr[note] * (1.0 + temperament_cents * SEMITONE_RATIO);
    let incr = if !op.fixed_freq {
        frequency * (op.mult as f32 + op.finetune as f32 / 24.0 + op.detune as f32 / 2400.0)
    } else {
        (op.mult as f32 * op.mult as f32 + op.mult as f32 * op.finetune as f32 / 24.0)
            * crate::config::LUT_RATIO
            * sample_rate_ratio
    };
    incr * (1.0 + tuning_fraction)
}

fn calc_op_vol(op: &OperatorDef, note: u8, volume: u8, kbd_center_note: u8, tables: &WavetableSet) -> f32 {
    let vol_scaling = op.kbd_vol_scaling as f32 * 0.001;
    let note_scaling = 1.0 + (note as f32 - kbd_center_note as f32) * vol_scaling;
    let vel_sensitivity = op.vel_sensitivity as f32 / 99.0;
    let base_vol = if op.muted { 0 } else { op.vol };
    let op_vol = (tables.exp_vol[volume.min(99) as usize] * vel_sensitivity + (1.0 - vel_sensitivity))
        * tables.exp_vol_op[base_vol.min(99) as usize];
    (op_vol * note_scaling).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Copy, Default)]
struct ClickFade {
    level: f32,
    from: f32,
    delta: f32,
    incr: f32,
}

impl ClickFade {
    fn arm(&mut self, from: f32, delta: f32, note: u8) {
        self.level = 1.0;
        self.from = from;
        self.delta = delta.clamp(-2000.0, 2000.0);
        self.incr = 0.95 - note as f32 * 0.001;
    }

    fn blend(&mut self, rendered: f32) -> f32 {
        if self.level <= 0.00001 {
            return rendered;
        }
        let out = rendered * (1.0 - self.level) + self.from * self.level;
        self.from += self.delta * self.level;
        self.level *= self.incr;
        out
    }
}

pub struct Channel {
    operators: [Operator; OPERATOR_COUNT],
    /// Live copy of the current instrument's operator definitions, kept so
    /// effect `K`'s per-field edits (spec §4.5) can be applied and
    /// recomputed without needing the original [`Instrument`] around.
    op_defs: [OperatorDef; OPERATOR_COUNT],
    /// Copy of the current instrument's per-pitch-class temperament table,
    /// kept for the same reason as `op_defs`.
    temperament: [f32; 12],
    lfo: Lfo,
    pan: f32,
    dest_pan: f32,
    pub vol: f32,
    instr_vol: f32,
    pub reverb_send: f32,
    pub pitch_bend: f32,
    mixer: f32,
    to_mix: [i8; 4],
    feedback_source: usize,
    feedback_level: f32,
    fade: ClickFade,
    note: u8,
    untransposed_note: u8,
    transpose: i8,
    tuning_fraction: f32,
    /// The note-velocity each operator's volume was last computed from,
    /// reused when a `K` edit recomputes just one operator's volume.
    last_note_volume: u8,
    active: bool,
    last_render: f32,
    last_render2: f32,
}

impl Default for Channel {
    fn default() -> Self {
        Self {
            operators: Default::default(),
            op_defs: Default::default(),
            temperament: [0.0; 12],
            lfo: Lfo::default(),
            pan: 127.0,
            dest_pan: 127.0,
            vol: 1.0,
            instr_vol: 1.0,
            reverb_send: 0.0,
            pitch_bend: 1.0,
            mixer: 0.0,
            to_mix: [-1; 4],
            feedback_source: 0,
            feedback_level: 0.0,
            fade: ClickFade::default(),
            note: 255,
            untransposed_note: 255,
            transpose: 0,
            tuning_fraction: 0.0,
            last_note_volume: 99,
            active: false,
            last_render: 0.0,
            last_render2: 0.0,
        }
    }
}

/// Builds a note-scaled [`OperatorNoteParams`] from an operator definition
/// plus the channel context (spec §4.2 `mt_calcOpVol` / `mt_calcPitch`).
/// Shared by [`Channel::note_on`] (full retrigger) and the `K` effect's
/// single-field recompute (no retrigger: phase/envelope are left alone by
/// the caller).
fn build_operator_params(
    def: &OperatorDef,
    note: u8,
    temperament: f32,
    volume: u8,
    tuning_fraction: f32,
    tables: &WavetableSet,
    sample_rate_ratio: f32,
) -> OperatorNoteParams {
    let vol = calc_op_vol(def, note, volume, def.kbd_center_note, tables);
    let base_incr = calc_pitch(def, note, temperament, tuning_fraction, tables, sample_rate_ratio);

    let a = tables.exp_env[scale_kbd(def.a, def.kbd_a_scaling, note, def.kbd_center_note)] * sample_rate_ratio;
    let d = 1.0
        - (-tables.exp_env[scale_kbd(def.d, def.kbd_d_scaling, note, def.kbd_center_note)]
            * sample_rate_ratio)
            .exp();
    let r = if def.r >= 0 {
        (-tables.exp_env[def.r as usize] * sample_rate_ratio).exp()
    } else {
        2.0 - (-tables.exp_env[(-def.r) as usize] * sample_rate_ratio).exp()
    };

    OperatorNoteParams {
        envelope: EnvelopeParams {
            delay_ticks: tables.exp_env[def.delay.min(70) as usize] * 3000.0 / sample_rate_ratio,
            a,
            hold_ticks: tables.exp_env[def.h.min(80) as usize] * 700.0 / sample_rate_ratio,
            d,
            s: tables.exp_vol[def.s.min(99) as usize],
            r,
            initial: tables.exp_vol[def.i.min(99) as usize],
            env_loop: def.env_loop,
        },
        base_incr,
        vol,
        waveform: Waveform::from_index(def.waveform),
        lfo_fm: tables.exp_vol[def.lfo_fm.min(99) as usize].powi(2),
        lfo_am: tables.exp_vol[def.lfo_am.min(99) as usize],
        connect: def.connect,
        connect2: def.connect2,
        connect_out: def.connect_out,
        initial_phase: (def.offset as f32 / 32.0) * crate::config::LUT_SIZE as f32,
        pitch_decay_rate: tables.exp_vol[def.pitch_decay.min(99) as usize],
        pitch_release_rate: tables.exp_vol[def.pitch_release.min(99) as usize],
        pitch_initial_ratio: pitch_ratio(def.pitch_initial_ratio, tables),
        pitch_final_ratio: pitch_ratio(def.pitch_final_ratio, tables),
    }
}

impl Channel {
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn pan(&self) -> f32 {
        self.pan
    }

    pub fn set_pan(&mut self, pan: u8) {
        self.pan = pan as f32;
        self.dest_pan = pan as f32;
    }

    pub fn set_dest_pan(&mut self, pan: u8) {
        self.dest_pan = pan as f32;
    }

    pub fn glide_pan(&mut self, transition_speed: f32) {
        self.pan = (self.pan * (transition_speed - 1.0) + self.dest_pan) / transition_speed;
    }

    pub fn set_vol(&mut self, vol: f32) {
        self.vol = vol.clamp(0.0, 1.0);
    }

    pub fn set_vibrato(&mut self, fxdata: u8, tables_lut_ratio: f32) {
        let incr = ((fxdata >> 4) as f32) * 128.0 * tables_lut_ratio;
        let depth = (fxdata & 15) as f32 * 0.003;
        for op in &mut self.operators {
            op.set_lfo_fm(depth);
        }
        self.lfo_set_incr(incr);
    }

    pub fn set_tremolo(&mut self, fxdata: u8, tables_lut_ratio: f32) {
        let incr = ((fxdata >> 4) as f32) * 128.0 * tables_lut_ratio;
        let depth = (fxdata & 15) as f32 * 0.003;
        for op in &mut self.operators {
            op.set_lfo_am(depth);
        }
        self.lfo_set_incr(incr);
    }

    fn lfo_set_incr(&mut self, incr: f32) {
        self.lfo = Lfo::default();
        let params = LfoParams {
            incr,
            attack: 1.0,
            delay_ticks: 0.0,
            waveform: Waveform::Sine,
        };
        self.lfo.reset(params, 0);
    }

    pub fn portamento_up(&mut self, amount: f32) {
        for op in &mut self.operators {
            op.bend_incr(amount);
        }
    }

    pub fn portamento_down(&mut self, amount: f32) {
        self.portamento_up(-amount);
    }

    /// Glides every operator's pitch increment toward the increment a
    /// (non-retriggering) note-on at `dest_note` would have used.
    pub fn portamento_to_note(
        &mut self,
        dest_note: u8,
        instrument: &Instrument,
        tables: &WavetableSet,
        sample_rate_ratio: f32,
        factor: f32,
    ) {
        let note = (dest_note as i16 + self.transpose as i16).clamp(0, 127) as u8;
        let temperament = instrument.temperament[note as usize % 12];
        for (op, def) in self.operators.iter_mut().zip(instrument.operators.iter()) {
            let dest = calc_pitch(def, note, temperament, self.tuning_fraction, tables, sample_rate_ratio);
            op.glide_incr_toward(dest, factor);
        }
    }

    /// Starts a new note. `volume == 255` keeps the operators' previously
    /// computed volumes (a pure retrigger); any other value recomputes them.
    pub fn note_on(
        &mut self,
        instrument: &Instrument,
        note: u8,
        volume: u8,
        global_transpose: i8,
        tables: &WavetableSet,
        sample_rate_ratio: f32,
    ) {
        self.untransposed_note = note;
        self.transpose = instrument.transpose;
        self.tuning_fraction = instrument.tuning as f32 * 0.0006;
        let transpose_add = global_transpose as i16 * instrument.is_transposable() as i16;
        let effective_note =
            (note as i16 + self.transpose as i16 + transpose_add).clamp(0, 127) as u8;
        self.note = effective_note;

        self.instr_vol = tables.exp_vol[instrument.volume.min(99) as usize];
        self.to_mix = instrument.to_mix;
        self.feedback_source = instrument.feedback_source.min(5) as usize;
        self.feedback_level = tables.exp_vol[instrument.feedback.min(99) as usize];
        self.pitch_bend = 1.0;

        let reset_phase = instrument.phase_reset();
        let env_reset = instrument.env_reset();

        if instrument.lfo_reset() {
            let lfo_params = LfoParams {
                incr: instrument.lfo_speed as f32 * 4.0 * sample_rate_ratio,
                attack: tables.exp_env[instrument.lfo_attack.min(99) as usize] * sample_rate_ratio,
                delay_ticks: tables.exp_env[instrument.lfo_delay.min(99) as usize] * 200.0
                    / sample_rate_ratio,
                waveform: lfo_waveform_for(instrument.lfo_waveform),
            };
            self.lfo.reset(lfo_params, instrument.lfo_offset);
        }

        let smooth_transition = instrument.smooth() && self.last_render.abs() > 0.1;
        let temperament = instrument.temperament[effective_note as usize % 12];

        self.op_defs = instrument.operators;
        self.temperament = instrument.temperament;
        let vol_source = if volume < 100 { volume } else { 99 };
        self.last_note_volume = vol_source;

        for (op, def) in self.operators.iter_mut().zip(instrument.operators.iter()) {
            let op_vol_source = if volume < 100 { volume } else { def.vol };
            let params = build_operator_params(
                def,
                effective_note,
                temperament,
                op_vol_source,
                self.tuning_fraction,
                tables,
                sample_rate_ratio,
            );
            op.note_on(params, reset_phase || env_reset, env_reset);
        }

        if smooth_transition {
            let delta = (self.last_render - self.last_render2) * sample_rate_ratio;
            self.fade.arm(self.last_render, delta, effective_note);
        }

        self.active = true;
    }

    pub fn note_off(&mut self) {
        for op in &mut self.operators {
            op.note_off();
        }
    }

    /// Effect `K` dispatch for `kfx / 32 == 0`: edits one of the
    /// instrument-wide (non-operator) parameters (spec §4.5 `K` table).
    /// Frequency-affecting edits (transpose, tuning) recompute every
    /// operator's `base_incr` from scratch, exactly as a fresh note-on
    /// would, but without touching phase or envelope state.
    pub fn edit_global_param(
        &mut self,
        field: u8,
        fxdata: u8,
        tables: &WavetableSet,
        sample_rate_ratio: f32,
    ) {
        match field {
            0 => self.instr_vol = tables.exp_vol[fxdata.min(99) as usize],
            1 => {
                let new_transpose = (fxdata as i16 - 128).clamp(-12, 12) as i8;
                let delta = new_transpose as i16 - self.transpose as i16;
                self.transpose = new_transpose;
                self.note = (self.note as i16 + delta).clamp(0, 127) as u8;
                self.recompute_pitches(tables, sample_rate_ratio);
            }
            2 => {
                self.tuning_fraction = (fxdata as i16 - 128).clamp(-100, 100) as f32 * 0.0006;
                self.recompute_pitches(tables, sample_rate_ratio);
            }
            3 => self.lfo.set_speed(fxdata as f32 * 4.0 * sample_rate_ratio),
            4 => self
                .lfo
                .set_delay_ticks(tables.exp_env[fxdata.min(99) as usize] * 200.0 / sample_rate_ratio),
            5 => self
                .lfo
                .set_attack(tables.exp_env[fxdata.min(99) as usize] * sample_rate_ratio),
            6 => self.lfo.set_waveform(lfo_waveform_for(fxdata.min(19))),
            7 => self.lfo.set_offset(fxdata.min(31)),
            _ => {}
        }
    }

    /// Effect `K` dispatch for `kfx / 32 >= 1`: edits one field of operator
    /// `op_index`'s definition and recomputes that operator's derived
    /// params in place (spec §4.5 `K` table's 0..16 operator-field list).
    pub fn edit_operator_param(
        &mut self,
        op_index: usize,
        field: u8,
        fxdata: u8,
        tables: &WavetableSet,
        sample_rate_ratio: f32,
    ) {
        let Some(def) = self.op_defs.get_mut(op_index) else {
            return;
        };
        match field {
            0 => def.vol = fxdata.min(99),
            1 => def.muted = fxdata != 0,
            2 => def.waveform = fxdata.min(7),
            3 => {
                def.fixed_freq = false;
                def.mult = fxdata.min(40);
            }
            4 => {
                def.fixed_freq = true;
                def.mult = fxdata;
            }
            5 => def.finetune = fxdata.min(24),
            6 => def.detune = (fxdata as i16 - 128).clamp(-100, 100) * 100 / 128,
            7 => def.delay = fxdata.min(70),
            8 => def.i = fxdata.min(99),
            9 => def.a = fxdata.min(99),
            10 => def.h = fxdata.min(80),
            11 => def.d = fxdata.min(99),
            12 => def.s = fxdata.min(99),
            13 => def.r = (fxdata as i16 - 128).clamp(-99, 99) as i8,
            14 => def.env_loop = fxdata != 0,
            15 => def.lfo_fm = fxdata.min(99),
            16 => def.lfo_am = fxdata.min(99),
            _ => return,
        }
        self.recompute_operator(op_index, tables, sample_rate_ratio);
    }

    fn recompute_pitches(&mut self, tables: &WavetableSet, sample_rate_ratio: f32) {
        for idx in 0..OPERATOR_COUNT {
            self.recompute_operator(idx, tables, sample_rate_ratio);
        }
    }

    fn recompute_operator(&mut self, idx: usize, tables: &WavetableSet, sample_rate_ratio: f32) {
        let temperament = self.temperament[self.note as usize % 12];
        let params = build_operator_params(
            &self.op_defs[idx],
            self.note,
            temperament,
            self.last_note_volume,
            self.tuning_fraction,
            tables,
            sample_rate_ratio,
        );
        self.operators[idx].set_params(params);
    }

    /// Advances the LFO and pan glide by one control-tick.
    pub fn tick(&mut self, transition_speed: f32) {
        self.glide_pan(transition_speed.max(1.0));
        self.lfo.tick();
    }

    /// Runs the per-tick pitch/amplitude recompute for every operator (spec
    /// §4.3 step 4), using the freshly ticked LFO value.
    pub fn update_operators(&mut self, tables: &WavetableSet, samples_per_tick: u32) {
        let lfo_value = self.lfo.value(tables);
        let vol = self.vol * self.instr_vol;
        for op in &mut self.operators {
            op.tick(lfo_value, self.pitch_bend, vol, samples_per_tick);
        }
        self.active = self.operators.iter().any(|o| !o.is_idle());
    }

    /// Renders one sample, returning the equal-power-panned stereo pair
    /// (not yet scaled by reverb send — callers add [`Channel::reverb_send`]
    /// separately into the reverb bus).
    pub fn render_sample(&mut self, tables: &WavetableSet) -> (f32, f32) {
        let mut outs = [0f32; OPERATOR_COUNT];
        for i in 0..OPERATOR_COUNT {
            outs[i] = self.operators[i].out;
        }
        self.mixer = self
            .to_mix
            .iter()
            .filter_map(|&idx| (idx >= 0).then(|| outs[idx as usize]))
            .sum();

        let feedback_out = outs[self.feedback_source] * self.feedback_level;

        let mut mix = 0.0f32;
        for i in 0..OPERATOR_COUNT {
            let connect = self.operators[i].connect();
            let connect2 = self.operators[i].connect2();
            let mut phase_mod = 0.0;
            if connect >= 0 {
                phase_mod += outs[connect as usize];
            }
            if (0..=5).contains(&connect2) {
                phase_mod += outs[connect2 as usize];
            } else if connect2 == 6 {
                phase_mod += self.mixer;
            }
            if i == 0 {
                phase_mod += feedback_out;
            }
            let sample = self.operators[i].render_sample(phase_mod, tables);
            outs[i] = sample;
            if self.operators[i].connect_out() >= 0 {
                mix += sample;
            }
        }

        let rendu = mix * self.vol * self.instr_vol;
        let rendu = self.fade.blend(rendu);

        self.last_render2 = self.last_render;
        self.last_render = rendu;

        let pan_index = self.pan * crate::config::LUT_RATIO;
        let left_gain = tables.sample(Waveform::Sine, crate::config::LUT_SIZE as f32 / 4.0 + pan_index);
        let right_gain = tables.sample(Waveform::Sine, pan_index);

        (rendu * left_gain.abs(), rendu * right_gain.abs())
    }
}

fn scale_kbd(base: u8, kbd_scaling: f32, note: u8, center: u8) -> usize {
    let v = base as f32 + kbd_scaling * (note as f32 - center as f32) * 0.07;
    v.clamp(0.0, 99.0) as usize
}

/// Converts a signed -99..99 `pitchInitialRatio`/`pitchFinalRatio` knob into
/// a multiplicative pitch ratio.
fn pitch_ratio(ratio: i8, tables: &WavetableSet) -> f32 {
    if ratio > 0 {
        1.0 + tables.exp_vol[ratio as usize].powi(2) * 12.0
    } else if ratio < 0 {
        1.0 + ratio as f32 / 99.0
    } else {
        1.0
    }
}

fn lfo_waveform_for(lfo_waveform: u8) -> Waveform {
    // The legacy engine picks from a 20-entry table of masked sine
    // variants; this port maps the same index onto one of the engine's
    // eight shared wavetables, which keeps LFO rate/delay/attack behavior
    // identical while dropping the bit-masked sub-waveforms (see DESIGN.md).
    match lfo_waveform.min(19) {
        0..=4 => Waveform::Sine,
        5..=7 => Waveform::Triangle,
        8 | 9 => Waveform::Square,
        10..=13 => Waveform::HalfSine,
        14 => Waveform::SoftSaw,
        _ => Waveform::SharpSaw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::song::Instrument;

    #[test]
    fn note_on_activates_channel() {
        let mut ch = Channel::default();
        let instr = Instrument::default();
        let tables = WavetableSet::new(48_000.0);
        ch.note_on(&instr, 60, 99, 0, &tables, 1.0);
        assert!(ch.is_active());
    }

    #[test]
    fn renders_sound_after_note_on() {
        let mut ch = Channel::default();
        let instr = Instrument::default();
        let tables = WavetableSet::new(48_000.0);
        ch.note_on(&instr, 69, 99, 0, &tables, 1.0);
        let mut heard = false;
        for _ in 0..200 {
            ch.update_operators(&tables, 8);
            for _ in 0..8 {
                let (l, r) = ch.render_sample(&tables);
                if l.abs() > 1e-6 || r.abs() > 1e-6 {
                    heard = true;
                }
            }
        }
        assert!(heard);
    }

    #[test]
    fn note_off_eventually_silences_channel() {
        let mut ch = Channel::default();
        let instr = Instrument::default();
        let tables = WavetableSet::new(48_000.0);
        ch.note_on(&instr, 69, 99, 0, &tables, 1.0);
        for _ in 0..50 {
            ch.update_operators(&tables, 8);
            for _ in 0..8 {
                ch.render_sample(&tables);
            }
        }
        ch.note_off();
        for _ in 0..5000 {
            ch.update_operators(&tables, 8);
            for _ in 0..8 {
                ch.render_sample(&tables);
            }
        }
        assert!(!ch.is_active());
    }

    #[test]
    fn pan_glide_converges_to_destination() {
        let mut ch = Channel::default();
        ch.set_pan(0);
        ch.set_dest_pan(255);
        for _ in 0..5000 {
            ch.glide_pan(20.0);
        }
        assert!((ch.pan - 255.0).abs() < 1.0);
    }

    #[test]
    fn operator_param_edit_changes_waveform_without_retrigger() {
        let mut ch = Channel::default();
        let instr = Instrument::default();
        let tables = WavetableSet::new(48_000.0);
        ch.note_on(&instr, 69, 99, 0, &tables, 1.0);
        assert_eq!(ch.operators[0].waveform(), Waveform::Sine);
        ch.edit_operator_param(0, 2, 4, &tables, 1.0);
        assert_eq!(ch.operators[0].waveform(), Waveform::Square);
        assert!(ch.is_active());
    }

    #[test]
    fn global_param_edit_shifts_transpose() {
        let mut ch = Channel::default();
        let instr = Instrument::default();
        let tables = WavetableSet::new(48_000.0);
        ch.note_on(&instr, 69, 99, 0, &tables, 1.0);
        let before = ch.operators[0].base_incr();
        ch.edit_global_param(1, 128 + 12, &tables, 1.0);
        let after = ch.operators[0].base_incr();
        assert!(after > before);
    }
}
