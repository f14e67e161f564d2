//! Binary (de)serialization of [`OperatorDef`]/[`Instrument`] and the
//! standalone MDTI/MDTB file formats (spec §6).
//!
//! The operator/instrument byte layouts here are also reused by
//! [`crate::format::song_file`], which embeds instruments inline.

use crate::error::EngineError;
use crate::format::byte_io::{ByteReader, ByteWriter};
use crate::sequencer::song::{Instrument, OperatorDef, OPERATOR_COUNT};

pub const CURRENT_VERSION: u8 = 1;
const INSTRUMENT_MAGIC: &[u8; 4] = b"MDTI";
const BANK_MAGIC: &[u8; 4] = b"MDTB";
const SLOT_MAGIC: &[u8; 4] = b"SLOT";

/// Number of slots in a bank file (spec §6: fixed-size instrument bank).
pub const BANK_SLOT_COUNT: usize = 128;

pub fn write_operator(w: &mut ByteWriter, op: &OperatorDef) {
    w.i8(op.connect);
    w.i8(op.connect2);
    w.i8(op.connect_out);
    w.u8(op.waveform);
    w.u8(op.vol);
    w.bool(op.fixed_freq);
    w.u8(op.mult);
    w.u8(op.finetune);
    w.i16(op.detune);
    w.u8(op.delay);
    w.u8(op.a);
    w.u8(op.h);
    w.u8(op.d);
    w.u8(op.s);
    w.i8(op.r);
    w.bool(op.env_loop);
    w.u8(op.i);
    w.u8(op.offset);
    w.i8(op.pitch_initial_ratio);
    w.i8(op.pitch_final_ratio);
    w.u8(op.pitch_decay);
    w.u8(op.pitch_release);
    w.u8(op.lfo_fm);
    w.u8(op.lfo_am);
    w.u8(op.vel_sensitivity);
    w.i16(op.kbd_vol_scaling);
    w.f32(op.kbd_a_scaling);
    w.f32(op.kbd_d_scaling);
    w.i16(op.kbd_pitch_scaling);
    w.u8(op.kbd_center_note);
    w.bool(op.muted);
}

pub fn read_operator(r: &mut ByteReader) -> Result<OperatorDef, EngineError> {
    Ok(OperatorDef {
        connect: r.i8()?,
        connect2: r.i8()?,
        connect_out: r.i8()?,
        waveform: r.u8()?,
        vol: r.u8()?,
        fixed_freq: r.bool()?,
        mult: r.u8()?,
        finetune: r.u8()?,
        detune: r.i16()?,
        delay: r.u8()?,
        a: r.u8()?,
        h: r.u8()?,
        d: r.u8()?,
        s: r.u8()?,
        r: r.i8()?,
        env_loop: r.bool()?,
        i: r.u8()?,
        offset: r.u8()?,
        pitch_initial_ratio: r.i8()?,
        pitch_final_ratio: r.i8()?,
        pitch_decay: r.u8()?,
        pitch_release: r.u8()?,
        lfo_fm: r.u8()?,
        lfo_am: r.u8()?,
        vel_sensitivity: r.u8()?,
        kbd_vol_scaling: r.i16()?,
        kbd_a_scaling: r.f32()?,
        kbd_d_scaling: r.f32()?,
        kbd_pitch_scaling: r.i16()?,
        kbd_center_note: r.u8()?,
        muted: r.bool()?,
    })
}

pub fn write_instrument(w: &mut ByteWriter, instr: &Instrument) {
    w.pascal_string(&instr.name, 31);
    w.u8(instr.version);
    for op in &instr.operators {
        write_operator(w, op);
    }
    for v in &instr.to_mix {
        w.i8(*v);
    }
    w.u8(instr.feedback_source);
    w.u8(instr.feedback);
    w.u8(instr.volume);
    w.u8(instr.lfo_waveform);
    w.u8(instr.lfo_speed);
    w.u8(instr.lfo_delay);
    w.u8(instr.lfo_attack);
    w.u8(instr.lfo_offset);
    w.i8(instr.transpose);
    w.i16(instr.tuning);
    for cents in &instr.temperament {
        w.f32(*cents);
    }
    w.u8(instr.flags);
    w.u8(instr.kfx);
}

pub fn read_instrument(r: &mut ByteReader) -> Result<Instrument, EngineError> {
    let name = r.pascal_string()?;
    let version = r.u8()?;
    if version > CURRENT_VERSION {
        return Err(EngineError::FileVersion {
            expected: CURRENT_VERSION,
            found: version,
        });
    }
    let mut operators: [OperatorDef; OPERATOR_COUNT] = Default::default();
    for op in &mut operators {
        *op = read_operator(r)?;
    }
    let mut to_mix = [-1i8; 4];
    for v in &mut to_mix {
        *v = r.i8()?;
    }
    let feedback_source = r.u8()?;
    let feedback = r.u8()?;
    let volume = r.u8()?;
    let lfo_waveform = r.u8()?;
    let lfo_speed = r.u8()?;
    let lfo_delay = r.u8()?;
    let lfo_attack = r.u8()?;
    let lfo_offset = r.u8()?;
    let transpose = r.i8()?;
    let tuning = r.i16()?;
    let mut temperament = [0.0f32; 12];
    for c in &mut temperament {
        *c = r.f32()?;
    }
    let flags = r.u8()?;
    let kfx = r.u8()?;

    let mut instrument = Instrument {
        name,
        version,
        operators,
        to_mix,
        feedback_source,
        feedback,
        volume,
        lfo_waveform,
        lfo_speed,
        lfo_delay,
        lfo_attack,
        lfo_offset,
        transpose,
        tuning,
        temperament,
        flags,
        kfx,
    };
    instrument.recover();
    Ok(instrument)
}

/// Encodes a single instrument to an MDTI file body.
pub fn save_instrument(instr: &Instrument) -> Vec<u8> {
    let mut w = ByteWriter::new();
    w.bytes_raw(INSTRUMENT_MAGIC);
    w.u8(CURRENT_VERSION);
    w.bytes_raw(&[0u8; 3]);
    write_instrument(&mut w, instr);
    w.into_bytes()
}

/// Decodes an MDTI file body written by [`save_instrument`].
pub fn load_instrument(bytes: &[u8]) -> Result<Instrument, EngineError> {
    let mut r = ByteReader::new(bytes);
    r.expect_magic(INSTRUMENT_MAGIC)?;
    let version = r.u8()?;
    if version > CURRENT_VERSION {
        return Err(EngineError::FileVersion {
            expected: CURRENT_VERSION,
            found: version,
        });
    }
    r.bytes_raw(3)?;
    read_instrument(&mut r)
}

/// Encodes a fixed-size instrument bank. `slots[i] == None` leaves that
/// slot empty on disk (no `SLOT` body written for it).
pub fn save_instrument_bank(slots: &[Option<Instrument>]) -> Result<Vec<u8>, EngineError> {
    if slots.len() != BANK_SLOT_COUNT {
        return Err(EngineError::FileCorrupted("bank must have exactly 128 slots"));
    }
    let mut w = ByteWriter::new();
    w.bytes_raw(BANK_MAGIC);
    w.u8(CURRENT_VERSION);
    w.bytes_raw(&[0u8; 3]);
    for (index, slot) in slots.iter().enumerate() {
        w.bytes_raw(SLOT_MAGIC);
        w.u8(index as u8);
        w.bool(slot.is_some());
        if let Some(instr) = slot {
            write_instrument(&mut w, instr);
        }
    }
    Ok(w.into_bytes())
}

/// Decodes an instrument bank written by [`save_instrument_bank`].
pub fn load_instrument_bank(bytes: &[u8]) -> Result<Vec<Option<Instrument>>, EngineError> {
    let mut r = ByteReader::new(bytes);
    r.expect_magic(BANK_MAGIC)?;
    let version = r.u8()?;
    if version > CURRENT_VERSION {
        return Err(EngineError::FileVersion {
            expected: CURRENT_VERSION,
            found: version,
        });
    }
    r.bytes_raw(3)?;
    let mut slots = Vec::with_capacity(BANK_SLOT_COUNT);
    for expected_index in 0..BANK_SLOT_COUNT {
        r.expect_magic(SLOT_MAGIC)?;
        let index = r.u8()?;
        if index as usize != expected_index {
            return Err(EngineError::FileCorrupted("bank slot out of order"));
        }
        let occupied = r.bool()?;
        slots.push(if occupied {
            Some(read_instrument(&mut r)?)
        } else {
            None
        });
    }
    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instrument_round_trips() {
        let instr = Instrument::default();
        let bytes = save_instrument(&instr);
        let loaded = load_instrument(&bytes).unwrap();
        assert_eq!(loaded.name, instr.name);
        assert_eq!(loaded.operators[0].a, instr.operators[0].a);
    }

    #[test]
    fn rejects_bad_magic() {
        let bytes = [0u8; 16];
        assert!(load_instrument(&bytes).is_err());
    }

    #[test]
    fn bank_round_trips_sparse_slots() {
        let mut slots: Vec<Option<Instrument>> = vec![None; BANK_SLOT_COUNT];
        slots[0] = Some(Instrument::default());
        let mut second = Instrument::default();
        second.name = "Lead".to_string();
        slots[5] = Some(second);
        let bytes = save_instrument_bank(&slots).unwrap();
        let loaded = load_instrument_bank(&bytes).unwrap();
        assert!(loaded[0].is_some());
        assert!(loaded[1].is_none());
        assert_eq!(loaded[5].as_ref().unwrap().name, "Lead");
    }

    #[test]
    fn rejects_wrong_slot_count() {
        let slots: Vec<Option<Instrument>> = vec![None; 4];
        assert!(save_instrument_bank(&slots).is_err());
    }
}
