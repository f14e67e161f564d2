//! FM-synthesis tracker playback engine.
//!
//! Renders a [`sequencer::song::Song`] (patterns of note/effect cells across
//! 24 channels, played by a bank of FM-synthesis instruments) to an
//! interleaved stereo stream through [`Engine::render`].

pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod format;
pub mod quantize;
pub mod sequencer;
pub mod synth;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::EngineError;
pub use sequencer::song::{Cell, Instrument, OperatorDef, Pattern, Song};
