//! Step-trigger playback
//!
//! - `loop_sync`: loop extension and boundary restarts for track graphs
//! - `piano_roll`: ephemeral per-note voices layered on the step grid

pub mod loop_sync;
pub mod piano_roll;

pub use loop_sync::{
    extended_loop_end, repeat_count, LoopSyncEngine, StepContext, TriggerOutcome,
};
pub use piano_roll::PianoRollPlayer;
