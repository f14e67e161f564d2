//! The row/tick sequencer (spec §4.4): advances patterns and rows against
//! tempo, dispatches cell events to channels, and runs the effect engine
//! (spec §4.5) at its own, independent sub-tick rate.

use log::trace;

use crate::sequencer::effects::{
    apply_sub_tick, dispatch_k_effect, pitch_bend_from, ChannelEffectState, GLOBAL_VOL_SLIDE_SCALE,
};
use crate::sequencer::song::{Cell, Effect, Instrument, Song, CHANNEL_COUNT, EMPTY, NOTE_OFF};
use crate::synth::channel::Channel;
use crate::synth::wavetable::WavetableSet;

/// Samples per control tick, shared with [`crate::engine`]'s render loop.
pub const SAMPLES_PER_CONTROL_TICK: u32 = 8;

/// Row/tick sequencing state: pattern/row position, the two independent
/// clocks (`frame_timer`/`frame_timer_fx`), and one [`ChannelEffectState`]
/// per channel.
pub struct Player {
    pub playing: bool,
    pub pattern_index: usize,
    pub row_index: usize,
    frame_timer: f32,
    frame_timer_fx: f32,
    row_samples: f32,
    tempo: u8,
    /// Current song-wide playback volume, 0.0..=1.0 (slid by effect `W`).
    pub global_volume: f32,
    /// `-1` = loop forever; otherwise the number of times the song may
    /// wrap back to pattern 0 before playback stops.
    pub looping: i32,
    loop_count: u32,
    deferred_order: Option<usize>,
    deferred_row: Option<usize>,
    /// Set by effect `S` when it requests a new reverb tail length;
    /// drained by [`crate::engine::Engine`] after each control tick.
    pub pending_reverb_length: Option<f32>,
    /// Set by effect `S` when it requests a new reverb room size (which
    /// reallocates the delay-line buffer); drained the same way.
    pub pending_room_size: Option<f32>,
    last_note: [u8; CHANNEL_COUNT],
    last_instr: [u8; CHANNEL_COUNT],
    effect_state: [ChannelEffectState; CHANNEL_COUNT],
}

impl Player {
    pub fn new(song: &Song, tables: &WavetableSet, sample_rate: f32) -> Self {
        let tempo = song.initial_tempo.max(1);
        let mut player = Self {
            playing: true,
            pattern_index: 0,
            row_index: 0,
            frame_timer: 0.0,
            frame_timer_fx: 0.0,
            row_samples: 1.0,
            tempo,
            global_volume: tables.exp_vol[song.global_volume.min(99) as usize],
            looping: -1,
            loop_count: 0,
            deferred_order: None,
            deferred_row: None,
            pending_reverb_length: None,
            pending_room_size: None,
            last_note: [EMPTY; CHANNEL_COUNT],
            last_instr: [EMPTY; CHANNEL_COUNT],
            effect_state: [ChannelEffectState::default(); CHANNEL_COUNT],
        };
        player.recompute_row_samples(song, sample_rate);
        player
    }

    fn recompute_row_samples(&mut self, song: &Song, sample_rate: f32) {
        let divisor = song.divisor.max(1) as f32;
        self.row_samples = (60.0 * sample_rate / (self.tempo as f32 * divisor)).max(1.0);
    }

    /// Runs one 8-sample control tick of sequencing: row entry (if due),
    /// deferred note-delay firing, row/order advancement, and effect
    /// sub-ticks (if due). Leaves per-sample DSP state untouched — that is
    /// [`Channel::tick`]/[`Channel::update_operators`]' job, run by the
    /// caller immediately after this returns.
    pub fn control_tick(
        &mut self,
        song: &Song,
        channels: &mut [Channel; CHANNEL_COUNT],
        tables: &WavetableSet,
        sample_rate: f32,
    ) {
        if !self.playing {
            return;
        }
        let sample_rate_ratio = crate::config::REFERENCE_SAMPLE_RATE / sample_rate;

        if self.frame_timer <= 0.0 {
            trace!("row entry: pattern {} row {}", self.pattern_index, self.row_index);
            self.process_row_entry(song, channels, tables, sample_rate_ratio);
        }

        for idx in 0..CHANNEL_COUNT {
            if self.effect_state[idx].poll_note_delay() {
                let (note, instr) = self.effect_state[idx].take_deferred_note();
                self.fire_deferred_note(idx, note, instr, song, channels, tables, sample_rate_ratio);
            }
        }

        self.frame_timer += SAMPLES_PER_CONTROL_TICK as f32;
        if self.frame_timer >= self.row_samples {
            self.frame_timer -= self.row_samples;
            self.advance_row(song, sample_rate);
        }

        self.frame_timer_fx += SAMPLES_PER_CONTROL_TICK as f32;
        let fx_period = (0.005 * self.row_samples).max(1.0);
        if self.frame_timer_fx >= fx_period {
            self.frame_timer_fx -= fx_period;
            self.run_continuous_effects(song, channels, tables, sample_rate_ratio);
        }
    }

    fn fire_deferred_note(
        &mut self,
        idx: usize,
        note: Option<u8>,
        instr: Option<u8>,
        song: &Song,
        channels: &mut [Channel; CHANNEL_COUNT],
        tables: &WavetableSet,
        sample_rate_ratio: f32,
    ) {
        let Some(note) = note else {
            channels[idx].note_off();
            return;
        };
        if note == NOTE_OFF {
            channels[idx].note_off();
            return;
        }
        let instrument_index = instr.unwrap_or(self.last_instr[idx]);
        if let Some(instrument) = song.instruments.get(instrument_index as usize) {
            channels[idx].note_on(instrument, note, 255, song.transpose, tables, sample_rate_ratio);
            self.last_note[idx] = note;
            self.last_instr[idx] = instrument_index;
        }
    }

    fn process_row_entry(
        &mut self,
        song: &Song,
        channels: &mut [Channel; CHANNEL_COUNT],
        tables: &WavetableSet,
        sample_rate_ratio: f32,
    ) {
        let Some(pattern) = song.patterns.get(self.pattern_index) else {
            self.playing = false;
            return;
        };
        let Some(row) = pattern.row(self.row_index) else {
            return;
        };

        let mut global_fx_claimed = false;
        for idx in 0..CHANNEL_COUNT {
            let cell: Cell = row[idx];
            let instrument_index = if cell.instr != EMPTY {
                cell.instr
            } else {
                self.last_instr[idx]
            };
            let instrument = song.instruments.get(instrument_index as usize);
            let is_note_delay = cell.fx == Some(Effect::NoteDelay);

            if cell.note == NOTE_OFF && !is_note_delay {
                channels[idx].note_off();
            } else if cell.note != EMPTY {
                if is_note_delay {
                    let instr = (cell.instr != EMPTY).then_some(cell.instr);
                    self.effect_state[idx].arm_note_delay(Some(cell.note), instr, cell.fxdata);
                } else if cell.fx == Some(Effect::PortaToNote) && channels[idx].is_active() {
                    // A continuing glide retriggers nothing; the `G` arm below
                    // picks up the new destination note instead.
                } else if let Some(instrument) = instrument {
                    let vol = if cell.vol != EMPTY { cell.vol } else { 255 };
                    channels[idx].note_on(instrument, cell.note, vol, song.transpose, tables, sample_rate_ratio);
                    self.last_note[idx] = cell.note;
                    self.last_instr[idx] = instrument_index;
                }
            } else if cell.vol != EMPTY {
                if let Some(instrument) = instrument {
                    channels[idx].note_on(
                        instrument,
                        self.last_note[idx],
                        cell.vol,
                        song.transpose,
                        tables,
                        sample_rate_ratio,
                    );
                }
            }

            match cell.fx {
                Some(fx) => self.apply_row_effect(
                    idx,
                    fx,
                    cell,
                    instrument,
                    &mut channels[idx],
                    tables,
                    sample_rate_ratio,
                    song,
                    &mut global_fx_claimed,
                ),
                None => self.effect_state[idx].clear(),
            }
        }
    }

    fn apply_row_effect(
        &mut self,
        idx: usize,
        fx: Effect,
        cell: Cell,
        instrument: Option<&Instrument>,
        channel: &mut Channel,
        tables: &WavetableSet,
        sample_rate_ratio: f32,
        song: &Song,
        global_fx_claimed: &mut bool,
    ) {
        let fxdata = cell.fxdata;
        match fx {
            Effect::Arpeggio | Effect::PortaUp | Effect::PortaDown => {
                self.effect_state[idx].arm(fx, fxdata)
            }
            Effect::JumpPattern => {
                if !*global_fx_claimed {
                    self.deferred_order = Some(fxdata as usize);
                    *global_fx_claimed = true;
                }
            }
            Effect::JumpRow => {
                if !*global_fx_claimed {
                    self.deferred_row = Some(fxdata as usize);
                    *global_fx_claimed = true;
                }
            }
            Effect::NoteDelay => {}
            Effect::PortaToNote => {
                let dest = if cell.note != EMPTY { cell.note } else { self.last_note[idx] };
                self.last_note[idx] = dest;
                self.effect_state[idx].arm_porta_to_note(dest, fxdata);
            }
            Effect::Vibrato => channel.set_vibrato(fxdata, crate::config::LUT_RATIO),
            Effect::PitchBend => channel.pitch_bend = pitch_bend_from(fxdata),
            Effect::Tremolo => channel.set_tremolo(fxdata, crate::config::LUT_RATIO),
            Effect::InstrumentEdit => {
                if let Some(instrument) = instrument {
                    dispatch_k_effect(instrument.kfx, fxdata, channel, tables, sample_rate_ratio);
                }
            }
            Effect::ChannelVolume => channel.set_vol(tables.exp_vol[fxdata.min(99) as usize]),
            Effect::ChannelVolumeSlide | Effect::PanningSlide | Effect::Retrigger => {
                self.effect_state[idx].arm(fx, fxdata.max(1))
            }
            Effect::ReverbSend => channel.reverb_send = tables.exp_vol[fxdata.min(99) as usize],
            Effect::ReverbGlobal => {
                if !*global_fx_claimed {
                    if fxdata <= 40 {
                        self.pending_reverb_length = Some(0.5 + fxdata as f32 * 0.0125);
                    } else {
                        let room = fxdata.saturating_sub(40).clamp(1, 40) as f32 * 0.025;
                        self.pending_room_size = Some(room);
                    }
                    *global_fx_claimed = true;
                }
            }
            Effect::Tempo => {
                if !*global_fx_claimed {
                    self.tempo = fxdata.max(1);
                    // Reprograms the *current* row's length immediately,
                    // not just future rows (mtlib.c:631).
                    let sample_rate = crate::config::REFERENCE_SAMPLE_RATE / sample_rate_ratio;
                    self.recompute_row_samples(song, sample_rate);
                    *global_fx_claimed = true;
                }
            }
            Effect::GlobalVolumeSlide => self.effect_state[idx].arm(fx, fxdata),
            Effect::Panning => channel.set_dest_pan(fxdata),
        }
    }

    fn advance_row(&mut self, song: &Song, sample_rate: f32) {
        let jump_row = self.deferred_row.take();
        let jump_pattern = self.deferred_order.take();

        if jump_pattern.is_some() || jump_row.is_some() {
            if let Some(order) = jump_pattern {
                self.pattern_index = order;
            }
            self.row_index = jump_row.unwrap_or(0);
        } else {
            self.row_index += 1;
        }

        let pattern_len = song.patterns.get(self.pattern_index).map(|p| p.len()).unwrap_or(0);
        if self.row_index >= pattern_len {
            self.row_index = 0;
            self.pattern_index += 1;
            if self.pattern_index >= song.patterns.len() {
                self.pattern_index = 0;
                self.loop_count += 1;
                if self.looping >= 0 && self.loop_count as i32 > self.looping {
                    self.playing = false;
                }
            }
        }

        self.recompute_row_samples(song, sample_rate);
    }

    fn run_continuous_effects(
        &mut self,
        song: &Song,
        channels: &mut [Channel; CHANNEL_COUNT],
        tables: &WavetableSet,
        sample_rate_ratio: f32,
    ) {
        let mut global_slide_claimed = false;
        for idx in 0..CHANNEL_COUNT {
            let Some(effect) = self.effect_state[idx].active else {
                continue;
            };
            if effect == Effect::GlobalVolumeSlide {
                if !global_slide_claimed {
                    let fxdata = self.effect_state[idx].fxdata;
                    self.global_volume = (self.global_volume
                        + (fxdata as f32 - 127.0) * GLOBAL_VOL_SLIDE_SCALE)
                        .clamp(0.0, 1.0);
                    global_slide_claimed = true;
                }
                self.effect_state[idx].advance_sub_tick();
                continue;
            }
            let Some(instrument) = song.instruments.get(self.last_instr[idx] as usize) else {
                continue;
            };
            apply_sub_tick(
                &mut self.effect_state[idx],
                &mut channels[idx],
                self.last_note[idx],
                instrument,
                song.transpose,
                tables,
                sample_rate_ratio,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::song::{Instrument, Pattern};

    fn single_note_song() -> Song {
        let mut song = Song::default();
        song.initial_tempo = 120;
        song.divisor = 4;
        let mut pattern = Pattern::new(4);
        {
            let row = pattern.row_mut(0).unwrap();
            row[0].note = 60;
            row[0].instr = 0;
            row[0].vol = 99;
        }
        song.patterns.push(pattern);
        song.instruments.push(Instrument::default());
        song
    }

    #[test]
    fn row_entry_activates_the_channel() {
        let song = single_note_song();
        let tables = WavetableSet::new(48_000.0);
        let mut channels: [Channel; CHANNEL_COUNT] = Default::default();
        let mut player = Player::new(&song, &tables, 48_000.0);
        player.control_tick(&song, &mut channels, &tables, 48_000.0);
        assert!(channels[0].is_active());
    }

    #[test]
    fn row_advances_after_row_samples_elapsed() {
        let song = single_note_song();
        let tables = WavetableSet::new(48_000.0);
        let mut channels: [Channel; CHANNEL_COUNT] = Default::default();
        let mut player = Player::new(&song, &tables, 48_000.0);
        let row_samples = (60.0 * 48_000.0 / (120.0 * 4.0)).round() as u32;
        let ticks = row_samples / SAMPLES_PER_CONTROL_TICK + 2;
        for _ in 0..ticks {
            player.control_tick(&song, &mut channels, &tables, 48_000.0);
        }
        assert!(player.row_index >= 1 || player.pattern_index >= 1);
    }

    #[test]
    fn tempo_effect_reprograms_row_length() {
        let mut song = single_note_song();
        {
            let row = song.patterns[0].row_mut(0).unwrap();
            row[1].fx = Some(Effect::Tempo);
            row[1].fxdata = 240;
        }
        let tables = WavetableSet::new(48_000.0);
        let mut channels: [Channel; CHANNEL_COUNT] = Default::default();
        let mut player = Player::new(&song, &tables, 48_000.0);
        let before = player.row_samples;
        player.control_tick(&song, &mut channels, &tables, 48_000.0);
        assert!(player.row_samples < before);
    }

    #[test]
    fn song_loops_back_to_pattern_zero() {
        let song = single_note_song();
        let tables = WavetableSet::new(48_000.0);
        let mut channels: [Channel; CHANNEL_COUNT] = Default::default();
        let mut player = Player::new(&song, &tables, 48_000.0);
        let row_samples = (60.0 * 48_000.0 / (120.0 * 4.0)).round() as u32;
        let ticks_per_row = row_samples / SAMPLES_PER_CONTROL_TICK + 1;
        for _ in 0..(ticks_per_row * 5) {
            player.control_tick(&song, &mut channels, &tables, 48_000.0);
        }
        assert_eq!(player.pattern_index, 0);
    }
}
