//! Band-limited wavetables and exponential scale tables, built once at
//! engine construction and shared read-only (spec §4.1).

use rand::{RngCore, SeedableRng};
use rand_pcg::Pcg32;

use crate::config::LUT_SIZE;

/// One entry per [`crate::sequencer::song::OperatorDef::waveform`] slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    SoftSaw,
    SharpSaw,
    Triangle,
    Square,
    DoubleSine,
    HalfSine,
    Noise,
}

impl Waveform {
    pub const COUNT: usize = 8;

    pub fn from_index(index: u8) -> Waveform {
        use Waveform::*;
        match index.min(7) {
            0 => Sine,
            1 => SoftSaw,
            2 => SharpSaw,
            3 => Triangle,
            4 => Square,
            5 => DoubleSine,
            6 => HalfSine,
            _ => Noise,
        }
    }

    fn index(self) -> usize {
        use Waveform::*;
        match self {
            Sine => 0,
            SoftSaw => 1,
            SharpSaw => 2,
            Triangle => 3,
            Square => 4,
            DoubleSine => 5,
            HalfSine => 6,
            Noise => 7,
        }
    }
}

/// The full set of precomputed, read-only tables the engine renders from.
pub struct WavetableSet {
    tables: [Vec<f32>; Waveform::COUNT],
    /// `expVol[i]`: perceptual (decibel-log) volume curve, 0..99.
    pub exp_vol: [f32; 100],
    /// `expEnv[i]`: geometric envelope/LFO time scale, 0..99.
    pub exp_env: [f32; 100],
    /// `expVolOp[i] = expVol[i] * i/100`.
    pub exp_vol_op: [f32; 100],
    /// Phase-index increment per sample for each MIDI note, at this table
    /// set's sample rate (spec §4.1's `noteIncr`, expressed directly in
    /// wavetable-index units — see the module note below).
    pub note_incr: [f32; 128],
}

// Note on units: the source keeps `phase`/`pitch`/`incr` as a 22.10
// fixed-point accumulator and shifts right by 10 to index the table. This
// port keeps the phase accumulator as a plain `f32` counted directly in
// wavetable-index units (a `LUT`-periodic float), which is audibly
// equivalent and a good deal simpler in safe Rust. `note_incr` is therefore
// built from the spec's own "implementers may recompute" guidance
// (`LUT * freq_hz / sampleRate`) rather than the legacy `32840` constant,
// and every other raw-fixed-point formula in the spec (fixed-frequency
// operators, portamento targets) is scaled down by the same `1024` the
// source's bit-shift divided out.
pub const FIXED_POINT_SHIFT: f32 = 1024.0;

impl WavetableSet {
    pub fn new(sample_rate: f32) -> Self {
        let tables = [
            Self::build_sine(),
            Self::build_shaped(0.2, 1.0),
            Self::build_shaped(0.05, 1.0),
            Self::build_triangle(0.01),
            Self::build_square(0.1, 0.7),
            Self::build_double_sine(),
            Self::build_half_sine(),
            Self::build_noise(),
        ];

        let mut exp_vol = [0f32; 100];
        let mut exp_env = [0f32; 100];
        let mut exp_vol_op = [0f32; 100];

        let mut ini = 0.00001f32;
        for i in 1..99 {
            exp_vol[i] = 10f32.powf((100.0f32 / (i as f32 + 1.0)).log10() * -10.0 / 20.0);
            exp_env[i] = ini;
            ini *= 1.1;
            exp_vol_op[i] = exp_vol[i] * (i as f32 * 0.01);
        }
        exp_env[96] = 0.1;
        exp_env[97] = 0.2;
        exp_env[98] = 0.5;
        exp_env[99] = 1.0;
        exp_vol[99] = 1.0;
        exp_vol_op[99] = 1.0;

        let mut note_incr = [0f32; 128];
        for (n, incr) in note_incr.iter_mut().enumerate() {
            let freq_hz = 440.0 * 2f32.powf((n as f32 - 69.0) / 12.0);
            *incr = LUT_SIZE as f32 * freq_hz / sample_rate;
        }

        Self {
            tables,
            exp_vol,
            exp_env,
            exp_vol_op,
            note_incr,
        }
    }

    /// Looks up `table[index mod LUT]`, wrapping a (possibly negative or
    /// out-of-range) float phase into the table.
    #[inline]
    pub fn sample(&self, waveform: Waveform, index: f32) -> f32 {
        let table = &self.tables[waveform.index()];
        let len = table.len() as f32;
        let wrapped = index.rem_euclid(len);
        table[wrapped as usize]
    }

    pub fn table(&self, waveform: Waveform) -> &[f32] {
        &self.tables[waveform.index()]
    }

    fn build_sine() -> Vec<f32> {
        (0..LUT_SIZE)
            .map(|i| (i as f32 * 2.0 * std::f32::consts::PI / LUT_SIZE as f32).sin())
            .collect()
    }

    /// Band-limited triangle/square blend used for the two saw shapes and
    /// the triangle table itself (spec §4.1: "blend ... shaping factor").
    fn shaped_triangle(phase: f32, shaping: f32) -> f32 {
        let tri = 4.0 * (phase - (phase + 0.5).floor()).abs() - 1.0;
        let soft = (1.0 - shaping) * tri + shaping * (std::f32::consts::PI * tri / 2.0).sin();
        soft
    }

    fn shaped_square(phase: f32, shaping: f32) -> f32 {
        let raw = if phase.rem_euclid(1.0) < 0.5 { 1.0 } else { -1.0 };
        let two_pi_phase = 2.0 * std::f32::consts::PI * phase;
        (1.0 - shaping) * raw + shaping * two_pi_phase.sin()
    }

    fn build_shaped(shaping: f32, square_amp: f32) -> Vec<f32> {
        let mut table: Vec<f32> = (0..LUT_SIZE)
            .map(|i| {
                let phase = i as f32 / LUT_SIZE as f32;
                let tri = Self::shaped_triangle(phase, shaping);
                let sq = Self::shaped_square(phase, shaping) * square_amp;
                (tri + sq) * 0.5
            })
            .collect();
        normalize(&mut table);
        table
    }

    fn build_triangle(shaping: f32) -> Vec<f32> {
        let mut table: Vec<f32> = (0..LUT_SIZE)
            .map(|i| Self::shaped_triangle(i as f32 / LUT_SIZE as f32, shaping))
            .collect();
        normalize(&mut table);
        table
    }

    fn build_square(shaping: f32, amplitude: f32) -> Vec<f32> {
        let mut table: Vec<f32> = (0..LUT_SIZE)
            .map(|i| Self::shaped_square(i as f32 / LUT_SIZE as f32, shaping) * amplitude)
            .collect();
        normalize(&mut table);
        table
    }

    fn build_double_sine() -> Vec<f32> {
        (0..LUT_SIZE)
            .map(|i| (i as f32 * 2.0 * std::f32::consts::PI / 1024.0).sin())
            .collect()
    }

    fn build_half_sine() -> Vec<f32> {
        (0..LUT_SIZE)
            .map(|i| {
                if i < LUT_SIZE / 2 {
                    (i as f32 * 2.0 * std::f32::consts::PI / LUT_SIZE as f32).sin()
                } else {
                    0.0
                }
            })
            .collect()
    }

    fn build_noise() -> Vec<f32> {
        let mut rng = Pcg32::seed_from_u64(0);
        (0..LUT_SIZE)
            .map(|_| (rng.next_u32() as f32 / u32::MAX as f32) - 0.5)
            .collect()
    }
}

fn normalize(table: &mut [f32]) {
    let peak = table.iter().fold(0.0f32, |m, &v| m.max(v.abs()));
    if peak > 0.0 {
        for v in table.iter_mut() {
            *v /= peak;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn periodic_tables_are_normalized() {
        let set = WavetableSet::new(48_000.0);
        for wf in [
            Waveform::Sine,
            Waveform::SoftSaw,
            Waveform::SharpSaw,
            Waveform::Triangle,
            Waveform::Square,
            Waveform::DoubleSine,
            Waveform::HalfSine,
        ] {
            let peak = set.table(wf).iter().fold(0.0f32, |m, &v| m.max(v.abs()));
            assert!(
                (0.9..=1.1).contains(&peak),
                "{:?} peak {} out of range",
                wf,
                peak
            );
        }
    }

    #[test]
    fn noise_table_is_bounded_and_not_flat() {
        let set = WavetableSet::new(48_000.0);
        let table = set.table(Waveform::Noise);
        assert!(table.iter().all(|&v| (-0.5..=0.5).contains(&v)));
        assert!(table.iter().any(|&v| v != table[0]));
    }

    #[test]
    fn exp_vol_is_monotonic_and_ends_at_one() {
        let set = WavetableSet::new(48_000.0);
        for i in 1..98 {
            assert!(set.exp_vol[i] < set.exp_vol[i + 1]);
        }
        assert_eq!(set.exp_vol[99], 1.0);
    }

    #[test]
    fn exp_env_is_monotonic_and_ends_at_one() {
        let set = WavetableSet::new(48_000.0);
        for i in 1..98 {
            assert!(set.exp_env[i] < set.exp_env[i + 1]);
        }
        assert_eq!(set.exp_env[99], 1.0);
    }

    #[test]
    fn note_69_is_440hz_at_48khz() {
        let set = WavetableSet::new(48_000.0);
        let incr = set.note_incr[69];
        let freq = incr * 48_000.0 / LUT_SIZE as f32;
        assert!((freq - 440.0).abs() / 440.0 < 0.001);
    }

    #[test]
    fn note_incr_scales_with_sample_rate() {
        let at_48k = WavetableSet::new(48_000.0).note_incr[69];
        let at_96k = WavetableSet::new(96_000.0).note_incr[69];
        assert!((at_48k / at_96k - 2.0).abs() < 1e-4);
    }
}
