//! Tempo/Pitch Mapper
//!
//! Pure, stateless conversions:
//! - BPM pairs to playback rate, and grid settings to step durations
//! - Semitone offsets to transposed keys and frequency ratios
//!
//! Callers validate ranges before calling in; nothing here clamps.

mod pitch;
mod tempo;

pub use pitch::{interval_name, semitones_to_ratio, transpose, Key};
pub use tempo::{bpm_to_rate, pattern_duration, step_duration, steps_per_beat};
