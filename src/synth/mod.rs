//! FM voice DSP: operators, envelopes, LFO, channel routing, and reverb.

pub mod channel;
pub mod envelope;
pub mod lfo;
pub mod operator;
pub mod reverb;
pub mod wavetable;

pub use channel::Channel;
pub use wavetable::{Waveform, WavetableSet};
