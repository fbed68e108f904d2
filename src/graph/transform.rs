//! Transform selection and graph construction

use std::sync::Arc;

use serde::Serialize;

use super::handle::AudioGraphHandle;
use crate::config::EngineConfig;
use crate::dsp::{Compressor, CompressorParams, EffectChain, PitchShifter, ToneEq};
use crate::engine::AudioBuffer;
use crate::track::{LoopWindow, TrackId};

/// Amount of dynamics smoothing after the pitch-shift stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Smoothing {
    /// Compressor only
    Light,
    /// Compressor plus tonal correction
    Heavy,
}

/// Signal transform a graph applies to its source
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum TransformChain {
    /// Plain playback-rate scaling
    RateOnly { rate: f64 },
    /// Rate scaling followed by a pitch-shift stage and smoothing
    ShiftedSmoothed {
        rate: f64,
        semitones: f64,
        smoothing: Smoothing,
    },
}

impl TransformChain {
    /// Pick the transform for a rate and pitch shift
    ///
    /// Depends only on `|semitones|`: below `unison_threshold` the shift is
    /// ignored, up to `heavy_shift_threshold` it gets light smoothing, and
    /// beyond that heavy smoothing with tonal correction.
    pub fn select(rate: f64, semitones: f64, config: &EngineConfig) -> Self {
        let magnitude = semitones.abs();
        if magnitude < config.unison_threshold {
            TransformChain::RateOnly { rate }
        } else if magnitude <= config.heavy_shift_threshold {
            TransformChain::ShiftedSmoothed {
                rate,
                semitones,
                smoothing: Smoothing::Light,
            }
        } else {
            TransformChain::ShiftedSmoothed {
                rate,
                semitones,
                smoothing: Smoothing::Heavy,
            }
        }
    }

    pub fn rate(&self) -> f64 {
        match *self {
            TransformChain::RateOnly { rate } => rate,
            TransformChain::ShiftedSmoothed { rate, .. } => rate,
        }
    }

    /// Pitch shift carried by the chain (zero for `RateOnly`)
    pub fn semitones(&self) -> f64 {
        match *self {
            TransformChain::RateOnly { .. } => 0.0,
            TransformChain::ShiftedSmoothed { semitones, .. } => semitones,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TransformChain::RateOnly { .. } => "rate-only",
            TransformChain::ShiftedSmoothed {
                smoothing: Smoothing::Light,
                ..
            } => "shifted-light",
            TransformChain::ShiftedSmoothed {
                smoothing: Smoothing::Heavy,
                ..
            } => "shifted-heavy",
        }
    }
}

/// Builds effect chains and graph handles
#[derive(Debug, Clone)]
pub struct GraphFactory {
    config: EngineConfig,
}

impl GraphFactory {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Select the transform for a rate and shift using this factory's thresholds
    pub fn select(&self, rate: f64, semitones: f64) -> TransformChain {
        TransformChain::select(rate, semitones, &self.config)
    }

    /// Assemble the processing stages for a transform
    pub fn build_chain(&self, transform: &TransformChain) -> EffectChain {
        let mut chain = EffectChain::new(self.config.sample_rate, self.config.block_size);
        if let TransformChain::ShiftedSmoothed {
            semitones,
            smoothing,
            ..
        } = *transform
        {
            chain.add(Box::new(PitchShifter::new(semitones)));
            match smoothing {
                Smoothing::Light => {
                    chain.add(Box::new(Compressor::with_params(CompressorParams::light())));
                }
                Smoothing::Heavy => {
                    chain.add(Box::new(Compressor::with_params(CompressorParams::heavy())));
                    chain.add(Box::new(ToneEq::for_shift(semitones)));
                }
            }
        }
        chain
    }

    /// Build a stopped handle for a track
    pub fn build(
        &self,
        track: TrackId,
        source: Arc<AudioBuffer>,
        transform: TransformChain,
        loop_window: Option<LoopWindow>,
        gain: f32,
    ) -> AudioGraphHandle {
        let chain = self.build_chain(&transform);
        AudioGraphHandle::new(
            track,
            source,
            transform,
            chain,
            loop_window,
            gain,
            self.config.sample_rate,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0.0, "rate-only" ; "no shift")]
    #[test_case(0.05, "rate-only" ; "below unison threshold")]
    #[test_case(-0.09, "rate-only" ; "negative below threshold")]
    #[test_case(0.1, "shifted-light" ; "at unison threshold")]
    #[test_case(3.0, "shifted-light" ; "minor third")]
    #[test_case(5.0, "shifted-light" ; "at heavy threshold")]
    #[test_case(-5.0, "shifted-light" ; "negative at heavy threshold")]
    #[test_case(5.5, "shifted-heavy" ; "above heavy threshold")]
    #[test_case(-12.0, "shifted-heavy" ; "octave down")]
    fn test_selection_by_magnitude(semitones: f64, label: &str) {
        let config = EngineConfig::default();
        assert_eq!(TransformChain::select(1.0, semitones, &config).label(), label);
    }

    #[test]
    fn test_selection_carries_rate() {
        let config = EngineConfig::default();
        let t = TransformChain::select(1.25, 7.0, &config);
        assert_eq!(t.rate(), 1.25);
        assert_eq!(t.semitones(), 7.0);
        assert_eq!(TransformChain::select(0.5, 0.0, &config).semitones(), 0.0);
    }

    #[test]
    fn test_chain_contents_per_variant() {
        let factory = GraphFactory::new(EngineConfig::default());

        let rate_only = factory.build_chain(&factory.select(1.0, 0.0));
        assert!(rate_only.is_empty());

        let light = factory.build_chain(&factory.select(1.0, 3.0));
        assert_eq!(light.effect_types(), vec!["pitch_shift", "compressor"]);

        let heavy = factory.build_chain(&factory.select(1.0, -9.0));
        assert_eq!(heavy.effect_types(), vec!["pitch_shift", "compressor", "eq"]);
    }
}
