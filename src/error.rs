//! Crate-wide error type for file I/O and persistence paths.
//!
//! Engine-internal DSP and sequencing operations never fail (out-of-range
//! parameters are clamped, per the engine's "never fail" design); `EngineError`
//! is only returned by the [`crate::format`] module's load/save paths.

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("file I/O error: {0}")]
    FileIo(#[from] std::io::Error),

    #[error("unsupported file version: expected {expected}, found {found}")]
    FileVersion { expected: u8, found: u8 },

    #[error("file corrupted: {0}")]
    FileCorrupted(&'static str),
}
