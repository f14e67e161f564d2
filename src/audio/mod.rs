// DSP hygiene utilities shared by the synth and reverb modules.

pub mod dsp_utils;
