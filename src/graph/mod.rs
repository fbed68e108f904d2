//! Track Audio Graph Manager
//!
//! - `transform`: transform-chain selection and construction
//! - `handle`: the live, immutable signal chain of one track
//! - `manager`: per-track handle lifecycle and reload decisions

pub mod handle;
pub mod manager;
pub mod transform;

pub use handle::{AudioGraphHandle, Cursor, PlaybackState};
pub use manager::{GraphParams, TrackGraphManager};
pub use transform::{GraphFactory, Smoothing, TransformChain};
