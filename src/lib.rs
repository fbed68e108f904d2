//! Stepgrid - Multi-Track Step Sequencer Engine
//!
//! Real-time playback and parameter synchronization for a step sequencer:
//! a drift-free transport clock, per-track signal graphs that are rebuilt
//! rather than patched when tempo, pitch or loop points change, and loop
//! extension so looped material exactly fills any pattern length.
//!
//! # Architecture
//!
//! - `pattern`: step grids and piano-roll notes
//! - `mapper`: tempo and pitch conversions
//! - `engine`: audio buffers, WAV I/O and background source loading
//! - `dsp`: the processing stages a track graph can carry
//! - `graph`: per-track graph handles and their lifecycle
//! - `playback`: loop synchronization and the piano-roll sub-player
//! - `transport`: the clock and the tick thread
//! - `sequencer`: the facade tying it all together

pub mod cli;
pub mod config;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod graph;
pub mod mapper;
pub mod pattern;
pub mod playback;
pub mod sequencer;
pub mod track;
pub mod transport;

pub use config::EngineConfig;
pub use error::{Result, SequencerError};
pub use mapper::Key;
pub use pattern::{MutationSource, PianoRollNote};
pub use sequencer::{Sequencer, StepEvent};
pub use track::{LoopWindow, SourceRef, Track, TrackId, TrackSpec};
pub use transport::{LoopRegion, PlayheadReceiver, PlayheadUpdate, TransportRunner, TransportState};
