//! Pattern data
//!
//! - `store`: per-track boolean step grids that survive editor resizing
//! - `piano_roll`: per-track note lists layered on top of the step grid

pub mod piano_roll;
pub mod store;

pub use piano_roll::{PianoRollNote, PianoRollStore};
pub use store::{MutationSource, PatternStore};
