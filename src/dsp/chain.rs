//! Effect chain
//!
//! Stages run in chain order (index 0 first). Inserted stages are placed by
//! their recommended position: pitch shift, then dynamics, then tone.

use super::Effect;
use crate::engine::AudioBuffer;

/// Order priority for the stages a track graph can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EffectPosition {
    PitchShift = 0,
    Compressor = 1,
    Eq = 2,
}

impl EffectPosition {
    pub fn for_effect_type(effect_type: &str) -> Self {
        match effect_type {
            "pitch_shift" => EffectPosition::PitchShift,
            "compressor" => EffectPosition::Compressor,
            _ => EffectPosition::Eq,
        }
    }
}

/// Ordered list of processing stages
pub struct EffectChain {
    effects: Vec<Box<dyn Effect>>,
    sample_rate: u32,
    samples_per_block: usize,
}

impl std::fmt::Debug for EffectChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectChain")
            .field("effects", &self.effect_types())
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

impl EffectChain {
    pub fn new(sample_rate: u32, samples_per_block: usize) -> Self {
        Self {
            effects: Vec::new(),
            sample_rate,
            samples_per_block,
        }
    }

    /// Prepare all effects for processing
    pub fn prepare(&mut self, sample_rate: u32, samples_per_block: usize) {
        self.sample_rate = sample_rate;
        self.samples_per_block = samples_per_block;
        for effect in &mut self.effects {
            effect.prepare(sample_rate, samples_per_block);
        }
    }

    /// Reset all effects
    pub fn reset(&mut self) {
        for effect in &mut self.effects {
            effect.reset();
        }
    }

    /// Add an effect at its recommended position
    pub fn add(&mut self, mut effect: Box<dyn Effect>) {
        effect.prepare(self.sample_rate, self.samples_per_block);
        let priority = EffectPosition::for_effect_type(effect.effect_type());
        let index = self
            .effects
            .iter()
            .position(|e| EffectPosition::for_effect_type(e.effect_type()) > priority)
            .unwrap_or(self.effects.len());
        self.effects.insert(index, effect);
    }

    /// Process the buffer through every enabled stage
    pub fn process(&mut self, buffer: &mut AudioBuffer) {
        for effect in &mut self.effects {
            if effect.is_enabled() {
                effect.process(buffer);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Effect> {
        self.effects.iter().map(|e| e.as_ref())
    }

    /// Effect type identifiers in processing order
    pub fn effect_types(&self) -> Vec<&'static str> {
        self.effects.iter().map(|e| e.effect_type()).collect()
    }

    /// Total latency of all enabled stages
    pub fn latency_samples(&self) -> usize {
        self.effects
            .iter()
            .filter(|e| e.is_enabled())
            .map(|e| e.latency_samples())
            .sum()
    }

    /// Describe the chain as JSON
    pub fn to_json(&self) -> serde_json::Value {
        let effects: Vec<_> = self
            .effects
            .iter()
            .map(|e| {
                serde_json::json!({
                    "type": e.effect_type(),
                    "enabled": e.is_enabled(),
                    "params": e.get_params(),
                })
            })
            .collect();

        serde_json::json!({
            "effects": effects,
            "sample_rate": self.sample_rate,
            "samples_per_block": self.samples_per_block,
        })
    }
}
