//! DSP stages
//!
//! Processing stages a track graph can carry. All implement `Effect` and
//! are assembled in order by `EffectChain`.

mod chain;
mod compressor;
mod effect;
mod eq;
mod pitch_shift;

pub use chain::{EffectChain, EffectPosition};
pub use compressor::{Compressor, CompressorParams};
pub use effect::{Effect, EffectParams};
pub use eq::{ShelfBand, ShelfType, ToneEq};
pub use pitch_shift::{PitchShifter, FFT_SIZE, OVERSAMPLING};
