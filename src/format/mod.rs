//! On-disk binary formats: songs (MDTS), single instruments (MDTI), and
//! instrument banks (MDTB) (spec §6).

pub mod adler32;
pub mod byte_io;
pub mod instrument_file;
pub mod song_file;

pub use instrument_file::{load_instrument, load_instrument_bank, save_instrument, save_instrument_bank};
pub use song_file::{load_song, save_song};
