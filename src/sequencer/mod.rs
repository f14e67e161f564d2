//! The tracker data model, effect dispatch, seek table, and row/tick player.

pub mod effects;
pub mod player;
pub mod song;
pub mod state_table;

pub use effects::ChannelEffectState;
pub use player::Player;
pub use song::{Cell, Effect, Instrument, OperatorDef, Pattern, Song};
pub use state_table::{RowState, StateTable};
