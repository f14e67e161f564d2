//! Binary (de)serialization of [`Song`] to the MDTS file format (spec §6).
//!
//! Layout: header, song metadata, per-channel defaults, patterns, embedded
//! instruments, then a trailing Adler-32 checksum over everything before it.
//! A checksum mismatch means the file was hand-edited or truncated by
//! something other than this writer: the body is still parsed — running the
//! same per-instrument corruption recovery a clean load would — but the load
//! as a whole is reported as an error (spec §7).

use log::warn;

use crate::error::EngineError;
use crate::format::adler32::adler32;
use crate::format::byte_io::{ByteReader, ByteWriter};
use crate::format::instrument_file::{read_instrument, write_instrument, CURRENT_VERSION};
use crate::sequencer::song::{
    Cell, ChannelDefaults, Effect, Pattern, Song, CHANNEL_COUNT, EMPTY,
};

const SONG_MAGIC: &[u8; 4] = b"MDTS";
const REVERB_SCALE: f32 = 160.0;

fn write_cell(w: &mut ByteWriter, cell: &Cell) {
    w.u8(cell.note);
    w.u8(cell.instr);
    w.u8(cell.vol);
    w.u8(cell.fx.map(Effect::tag).unwrap_or(EMPTY));
    w.u8(cell.fxdata);
}

fn read_cell(r: &mut ByteReader) -> Result<Cell, EngineError> {
    let note = r.u8()?;
    let instr = r.u8()?;
    let vol = r.u8()?;
    let fx_tag = r.u8()?;
    let fxdata = r.u8()?;
    Ok(Cell {
        note,
        instr,
        vol,
        fx: Effect::from_tag(fx_tag),
        fxdata,
    })
}

/// Encodes `song` to the MDTS binary layout, including the trailing
/// checksum.
pub fn save_song(song: &Song) -> Vec<u8> {
    let mut w = ByteWriter::new();
    w.bytes_raw(SONG_MAGIC);
    w.u8(CURRENT_VERSION);
    w.bytes_raw(&[0u8; 3]);

    w.pascal_string(&song.name, 31);
    w.pascal_string(&song.author, 31);
    w.pascal_string(&song.comment, 255);

    w.u8(song.initial_tempo);
    w.u8(song.divisor);
    w.u8(song.global_volume);
    w.i8(song.transpose);
    w.u8((song.reverb_length.clamp(0.0, 1.0) * REVERB_SCALE).round() as u8);
    w.u8((song.reverb_room_size.clamp(0.0, 1.0) * REVERB_SCALE).round() as u8);

    for channel in &song.channels {
        w.u8(channel.pan);
        w.u8(channel.vol);
        w.u8(channel.reverb_send);
    }

    w.u32(song.patterns.len() as u32);
    for pattern in &song.patterns {
        w.u32(pattern.len() as u32);
        for row in pattern.rows() {
            for cell in row {
                write_cell(&mut w, cell);
            }
        }
    }

    w.u32(song.instruments.len() as u32);
    for instrument in &song.instruments {
        write_instrument(&mut w, instrument);
    }

    let checksum = adler32(w.bytes());
    w.u32(checksum);
    w.into_bytes()
}

/// Decodes a song written by [`save_song`]. Structural corruption (bad
/// magic, truncated file, unsupported version) is a hard error. A checksum
/// mismatch still runs the full parse (and its per-instrument recovery
/// pass) but is reported as [`EngineError::FileCorrupted`] once parsing
/// completes.
pub fn load_song(bytes: &[u8]) -> Result<Song, EngineError> {
    if bytes.len() < 4 {
        return Err(EngineError::FileCorrupted("file too short"));
    }
    let body_len = bytes.len().saturating_sub(4);
    let (body, trailer) = bytes.split_at(body_len);
    let stored_checksum = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let checksum_mismatch = adler32(body) != stored_checksum;
    if checksum_mismatch {
        warn!("song checksum mismatch, attempting recovery");
    }

    let mut r = ByteReader::new(body);
    r.expect_magic(SONG_MAGIC)?;
    let version = r.u8()?;
    if version > CURRENT_VERSION {
        return Err(EngineError::FileVersion {
            expected: CURRENT_VERSION,
            found: version,
        });
    }
    r.bytes_raw(3)?;

    let name = r.pascal_string()?;
    let author = r.pascal_string()?;
    let comment = r.pascal_string()?;

    let initial_tempo = r.u8()?;
    let divisor = r.u8()?.max(1);
    let global_volume = r.u8()?.min(99);
    let transpose = r.i8()?.clamp(-12, 12);
    let reverb_length = r.u8()? as f32 / REVERB_SCALE;
    let reverb_room_size = r.u8()? as f32 / REVERB_SCALE;

    let mut channels = [ChannelDefaults::default(); CHANNEL_COUNT];
    for channel in &mut channels {
        channel.pan = r.u8()?;
        channel.vol = r.u8()?.min(99);
        channel.reverb_send = r.u8()?.min(99);
    }

    let pattern_count = r.u32()? as usize;
    let mut patterns = Vec::with_capacity(pattern_count);
    for _ in 0..pattern_count {
        let row_count = r.u32()? as usize;
        let mut pattern = Pattern::new(row_count);
        for row_index in 0..pattern.len() {
            let row = pattern.row_mut(row_index).expect("row within bounds");
            for cell in row.iter_mut() {
                *cell = read_cell(&mut r)?;
            }
        }
        patterns.push(pattern);
    }

    let instrument_count = r.u32()? as usize;
    let mut instruments = Vec::with_capacity(instrument_count);
    for _ in 0..instrument_count {
        instruments.push(read_instrument(&mut r)?);
    }

    let song = Song {
        name,
        author,
        comment,
        patterns,
        instruments,
        initial_tempo,
        divisor,
        global_volume,
        transpose,
        reverb_length,
        reverb_room_size,
        channels,
    };

    if checksum_mismatch {
        return Err(EngineError::FileCorrupted("checksum mismatch"));
    }
    Ok(song)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::song::Instrument;

    fn sample_song() -> Song {
        let mut song = Song::default();
        song.name = "Test Song".to_string();
        let mut pattern = Pattern::new(8);
        {
            let row = pattern.row_mut(0).unwrap();
            row[0].note = 60;
            row[0].instr = 0;
            row[0].vol = 80;
            row[0].fx = Some(Effect::Tempo);
            row[0].fxdata = 140;
        }
        song.patterns.push(pattern);
        song.instruments.push(Instrument::default());
        song
    }

    #[test]
    fn song_round_trips() {
        let song = sample_song();
        let bytes = save_song(&song);
        let loaded = load_song(&bytes).unwrap();
        assert_eq!(loaded.name, song.name);
        assert_eq!(loaded.patterns.len(), 1);
        assert_eq!(loaded.patterns[0].len(), 8);
        let cell = loaded.patterns[0].cell(0, 0).unwrap();
        assert_eq!(cell.note, 60);
        assert_eq!(cell.fx, Some(Effect::Tempo));
        assert_eq!(cell.fxdata, 140);
        assert_eq!(loaded.instruments.len(), 1);
    }

    #[test]
    fn reports_corrupted_checksum_after_recovery_pass() {
        let song = sample_song();
        let mut bytes = save_song(&song);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(load_song(&bytes), Err(EngineError::FileCorrupted(_))));
    }

    #[test]
    fn rejects_truncated_file() {
        let bytes = [0u8; 2];
        assert!(load_song(&bytes).is_err());
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = save_song(&sample_song());
        bytes[0] = b'X';
        assert!(load_song(&bytes).is_err());
    }
}
