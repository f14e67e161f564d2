//! Per-channel effect-column state machine (spec §4.5).
//!
//! A cell's effect tag falls into one of two camps: set-once effects that
//! only run on the row they appear in (B, C, H, I, J, K, M, R, S, T, X,
//! dispatched directly from [`crate::sequencer::player`]) and armed
//! continuous effects that stay active across every effect sub-tick until
//! the next row replaces or clears them (A, D, E, F, G, N, P, Q, W,
//! dispatched through [`apply_sub_tick`] below).

use crate::sequencer::song::{Effect, Instrument};
use crate::synth::channel::Channel;
use crate::synth::wavetable::WavetableSet;

/// `pitchBend = 1 - (128 - fxdata) * PITCH_BEND_SCALE`.
pub const PITCH_BEND_SCALE: f32 = 0.000_928_523;
const PORTA_STEP_SCALE: f32 = 0.0001;
const PORTA_TO_NOTE_STEP_SCALE: f32 = 0.001;
const CHANNEL_VOL_SLIDE_SCALE: f32 = 0.0001;
const PAN_SLIDE_SCALE: f32 = -0.05;
/// Shared by the `W` global-volume-slide effect, applied by the player
/// directly to the song-wide volume rather than through a `Channel`.
pub const GLOBAL_VOL_SLIDE_SCALE: f32 = 0.0001;

/// Runtime state for whichever continuous effect is currently armed on one
/// channel. Cleared (or replaced) at every row that doesn't repeat the same
/// effect.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChannelEffectState {
    pub active: Option<Effect>,
    pub fxdata: u8,
    /// Effect sub-ticks elapsed since arming (spec's `frameTimerFx` clock).
    sub_ticks: u32,
    /// Control-ticks elapsed since the row that armed this effect started
    /// (spec's `frameTimer` clock) — only the `D` note-delay reads this.
    control_ticks: u32,
    arp_step: u8,
    retrig_fired: u8,
    porta_dest_note: u8,
    deferred_note: Option<u8>,
    deferred_instr: Option<u8>,
}

impl ChannelEffectState {
    pub fn arm(&mut self, effect: Effect, fxdata: u8) {
        self.active = Some(effect);
        self.fxdata = fxdata;
        self.sub_ticks = 0;
        self.control_ticks = 0;
        self.arp_step = 0;
        self.retrig_fired = 0;
    }

    pub fn clear(&mut self) {
        self.active = None;
    }

    pub fn arm_note_delay(&mut self, note: Option<u8>, instr: Option<u8>, fxdata: u8) {
        self.arm(Effect::NoteDelay, fxdata);
        self.deferred_note = note;
        self.deferred_instr = instr;
    }

    pub fn arm_porta_to_note(&mut self, dest_note: u8, fxdata: u8) {
        self.arm(Effect::PortaToNote, fxdata);
        self.porta_dest_note = dest_note;
    }

    /// Advances the row-granularity clock for an armed note-delay; returns
    /// `true` exactly once, the control-tick the deferred note should fire.
    pub fn poll_note_delay(&mut self) -> bool {
        if self.active != Some(Effect::NoteDelay) {
            return false;
        }
        let fire = self.control_ticks == self.fxdata as u32;
        self.control_ticks += 1;
        fire
    }

    pub fn take_deferred_note(&mut self) -> (Option<u8>, Option<u8>) {
        (self.deferred_note.take(), self.deferred_instr.take())
    }

    pub fn advance_sub_tick(&mut self) {
        self.sub_ticks += 1;
    }
}

/// How many effect sub-ticks fall between successive retriggers, per the
/// `Q` effect's `24/fxdata` period.
fn retrigger_period(fxdata: u8) -> u32 {
    (24 / fxdata.max(1) as u32).max(1)
}

/// Runs one effect sub-tick of whichever continuous effect is armed on
/// `channel`, mutating it in place. No-ops for set-once effects and for
/// [`Effect::GlobalVolumeSlide`], whose target is song-wide rather than
/// per-channel — the player applies that one directly.
pub fn apply_sub_tick(
    state: &mut ChannelEffectState,
    channel: &mut Channel,
    base_note: u8,
    instrument: &Instrument,
    global_transpose: i8,
    tables: &WavetableSet,
    sample_rate_ratio: f32,
) {
    let Some(effect) = state.active else {
        return;
    };
    match effect {
        Effect::Arpeggio => {
            if state.sub_ticks % 8 == 0 {
                let note = match state.arp_step % 3 {
                    0 => base_note,
                    1 => base_note.saturating_add(state.fxdata >> 4),
                    _ => base_note.saturating_add(state.fxdata & 0x0F),
                };
                channel.note_on(instrument, note, 255, global_transpose, tables, sample_rate_ratio);
                state.arp_step = state.arp_step.wrapping_add(1);
            }
        }
        Effect::PortaUp => channel.portamento_up(state.fxdata as f32 * PORTA_STEP_SCALE),
        Effect::PortaDown => channel.portamento_down(state.fxdata as f32 * PORTA_STEP_SCALE),
        Effect::PortaToNote => channel.portamento_to_note(
            state.porta_dest_note,
            instrument,
            tables,
            sample_rate_ratio,
            state.fxdata as f32 * PORTA_TO_NOTE_STEP_SCALE,
        ),
        Effect::ChannelVolumeSlide => {
            let next = channel.vol + (state.fxdata as f32 - 127.0) * CHANNEL_VOL_SLIDE_SCALE;
            channel.set_vol(next);
        }
        Effect::PanningSlide => {
            let next = (channel.pan() + (127.0 - state.fxdata as f32) * PAN_SLIDE_SCALE).clamp(0.0, 255.0);
            channel.set_pan(next as u8);
        }
        Effect::Retrigger => {
            let period = retrigger_period(state.fxdata);
            if state.sub_ticks % period == 0 && state.retrig_fired < state.fxdata {
                channel.note_on(instrument, base_note, 255, global_transpose, tables, sample_rate_ratio);
                state.retrig_fired += 1;
            }
        }
        _ => {}
    }
    state.sub_ticks += 1;
}

/// Dispatches effect `K`'s instrument-parameter edit: `kfx / 32 == 0`
/// targets one of the channel-wide parameters, `kfx / 32 >= 1` targets
/// operator `kfx/32 - 1`'s field `kfx % 32` (spec §4.5's `K` table).
pub fn dispatch_k_effect(
    kfx: u8,
    fxdata: u8,
    channel: &mut Channel,
    tables: &WavetableSet,
    sample_rate_ratio: f32,
) {
    let group = kfx / 32;
    let field = kfx % 32;
    if group == 0 {
        channel.edit_global_param(field, fxdata, tables, sample_rate_ratio);
    } else {
        channel.edit_operator_param((group - 1) as usize, field, fxdata, tables, sample_rate_ratio);
    }
}

/// `pitchBend = 1 - (128 - fxdata) * PITCH_BEND_SCALE` (effect `I`).
pub fn pitch_bend_from(fxdata: u8) -> f32 {
    1.0 - (128.0 - fxdata as f32) * PITCH_BEND_SCALE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::wavetable::WavetableSet;

    #[test]
    fn retrigger_period_never_zero() {
        assert_eq!(retrigger_period(0), 24);
        assert_eq!(retrigger_period(24), 1);
        assert_eq!(retrigger_period(6), 4);
    }

    #[test]
    fn note_delay_fires_exactly_once_at_threshold() {
        let mut state = ChannelEffectState::default();
        state.arm_note_delay(Some(60), Some(0), 3);
        let fires: Vec<bool> = (0..6).map(|_| state.poll_note_delay()).collect();
        assert_eq!(fires, vec![false, false, false, true, false, false]);
    }

    #[test]
    fn portamento_up_increases_operator_increment() {
        let mut channel = Channel::default();
        let instrument = Instrument::default();
        let tables = WavetableSet::new(48_000.0);
        channel.note_on(&instrument, 60, 99, 0, &tables, 1.0);
        let mut state = ChannelEffectState::default();
        state.arm(Effect::PortaUp, 50);
        apply_sub_tick(&mut state, &mut channel, 60, &instrument, 0, &tables, 1.0);
        assert!(channel.is_active());
    }

    #[test]
    fn global_volume_slide_is_a_no_op_on_channel() {
        let mut channel = Channel::default();
        let instrument = Instrument::default();
        let tables = WavetableSet::new(48_000.0);
        let before_vol = channel.vol;
        let mut state = ChannelEffectState::default();
        state.arm(Effect::GlobalVolumeSlide, 200);
        apply_sub_tick(&mut state, &mut channel, 60, &instrument, 0, &tables, 1.0);
        assert_eq!(channel.vol, before_vol);
    }

    #[test]
    fn pitch_bend_centers_at_128() {
        assert!((pitch_bend_from(128) - 1.0).abs() < 1e-6);
    }
}
