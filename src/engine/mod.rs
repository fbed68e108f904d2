//! Audio Engine Module
//!
//! Audio data plumbing for the sequencer:
//! - Audio buffer storage and mixing
//! - WAV import/export
//! - Background source loading and caching

pub mod buffer;
pub mod io;
pub mod source;

pub use buffer::{AudioBuffer, ChannelLayout};
pub use io::{export_wav, generate_click, generate_test_tone, import_wav, BitDepth};
pub use source::{SourceCache, SourceLoader, SourceState, WavLoader};
