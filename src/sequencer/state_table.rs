//! Precomputed per-(pattern, row) derived state for O(1) seeking (spec
//! §4.7): tempo, per-channel pan/volume, and elapsed time, propagated
//! forward linearly through the song's patterns. Jump effects (`B`/`C`)
//! are not simulated — seeking assumes linear pattern order, matching the
//! legacy behavior the spec carries forward.

use crate::sequencer::song::{Effect, Song, CHANNEL_COUNT};

/// Derived globals as of one row, valid until the next row changes them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RowState {
    pub tempo: u8,
    pub pan: [u8; CHANNEL_COUNT],
    pub vol: [u8; CHANNEL_COUNT],
    /// Seconds from the start of the song to this row.
    pub time: f64,
}

/// A flattened, per-pattern-indexed table of [`RowState`]s built by
/// [`StateTable::build`].
pub struct StateTable {
    rows: Vec<RowState>,
    pattern_offsets: Vec<usize>,
    pattern_lengths: Vec<usize>,
}

impl StateTable {
    /// Builds the table by propagating tempo/pan/vol/time forward across
    /// every row of every pattern, in song order.
    pub fn build(song: &Song) -> Self {
        let mut rows = Vec::new();
        let mut pattern_offsets = Vec::with_capacity(song.patterns.len());
        let mut pattern_lengths = Vec::with_capacity(song.patterns.len());

        let mut tempo = song.initial_tempo.max(1);
        let mut pan = [127u8; CHANNEL_COUNT];
        let mut vol = [99u8; CHANNEL_COUNT];
        for (i, defaults) in song.channels.iter().enumerate() {
            pan[i] = defaults.pan;
            vol[i] = defaults.vol;
        }
        let mut time = 0.0f64;
        let divisor = song.divisor.max(1) as f64;

        for pattern in &song.patterns {
            pattern_offsets.push(rows.len());
            pattern_lengths.push(pattern.len());
            for row_cells in pattern.rows() {
                for (channel, cell) in row_cells.iter().enumerate() {
                    match cell.fx {
                        Some(Effect::Tempo) => tempo = cell.fxdata.max(1),
                        Some(Effect::ChannelVolume) => vol[channel] = cell.fxdata.min(99),
                        Some(Effect::Panning) => pan[channel] = cell.fxdata,
                        _ => {}
                    }
                }
                rows.push(RowState {
                    tempo,
                    pan,
                    vol,
                    time,
                });
                time += 60.0 / (tempo as f64 * divisor);
            }
        }

        Self {
            rows,
            pattern_offsets,
            pattern_lengths,
        }
    }

    /// Total number of (pattern, row) entries across the whole song.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row_state(&self, pattern: usize, row: usize) -> Option<&RowState> {
        let offset = self.pattern_offsets.get(pattern)?;
        let length = self.pattern_lengths.get(pattern)?;
        if row >= *length {
            return None;
        }
        self.rows.get(offset + row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::song::{Cell, Pattern};

    #[test]
    fn time_advances_monotonically() {
        let mut song = Song::default();
        song.patterns.push(Pattern::new(4));
        let table = StateTable::build(&song);
        let t0 = table.row_state(0, 0).unwrap().time;
        let t1 = table.row_state(0, 1).unwrap().time;
        let t3 = table.row_state(0, 3).unwrap().time;
        assert!(t0 < t1);
        assert!(t1 < t3);
    }

    #[test]
    fn tempo_effect_changes_subsequent_rows() {
        let mut song = Song::default();
        song.initial_tempo = 120;
        let mut pattern = Pattern::new(4);
        {
            let row = pattern.row_mut(1).unwrap();
            row[0] = Cell {
                fx: Some(Effect::Tempo),
                fxdata: 200,
                ..Cell::EMPTY
            };
        }
        song.patterns.push(pattern);
        let table = StateTable::build(&song);
        assert_eq!(table.row_state(0, 0).unwrap().tempo, 120);
        assert_eq!(table.row_state(0, 1).unwrap().tempo, 200);
        assert_eq!(table.row_state(0, 2).unwrap().tempo, 200);
    }

    #[test]
    fn pan_effect_only_changes_its_own_channel() {
        let mut song = Song::default();
        let mut pattern = Pattern::new(2);
        {
            let row = pattern.row_mut(0).unwrap();
            row[3] = Cell {
                fx: Some(Effect::Panning),
                fxdata: 200,
                ..Cell::EMPTY
            };
        }
        song.patterns.push(pattern);
        let table = StateTable::build(&song);
        let row0 = table.row_state(0, 0).unwrap();
        assert_eq!(row0.pan[3], 200);
        assert_eq!(row0.pan[0], 127);
    }

    #[test]
    fn out_of_range_row_is_none() {
        let mut song = Song::default();
        song.patterns.push(Pattern::new(2));
        let table = StateTable::build(&song);
        assert!(table.row_state(0, 5).is_none());
        assert!(table.row_state(1, 0).is_none());
    }
}
