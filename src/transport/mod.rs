//! Transport
//!
//! - `clock`: elapsed-time step clock, the single source of timing
//! - `runner`: the tick thread and the decoupled playhead channel

pub mod clock;
pub mod runner;

pub use clock::{LoopRegion, TransportClock, TransportState};
pub use runner::{lock_sequencer, PlayheadReceiver, PlayheadUpdate, TransportRunner, RUNNER_THREAD_NAME};
