//! Effect trait definition
//!
//! Base trait for the processing stages a track graph can carry.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::AudioBuffer;

/// Parameters common to all effects
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectParams {
    /// Unique identifier for this effect instance
    pub id: String,
    /// Whether the effect is enabled
    pub enabled: bool,
}

impl Default for EffectParams {
    fn default() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            enabled: true,
        }
    }
}

/// Base trait for all DSP stages
///
/// Stages process audio buffers in-place. Their parameters are fixed at
/// construction; a graph that needs different settings is rebuilt.
pub trait Effect: Send {
    /// Process audio buffer in-place
    fn process(&mut self, buffer: &mut AudioBuffer);

    /// Prepare the effect for processing
    ///
    /// Called when sample rate or block size changes.
    fn prepare(&mut self, sample_rate: u32, max_block_size: usize);

    /// Clear internal state (filter history, FFT frames)
    fn reset(&mut self);

    /// Get the effect type identifier
    fn effect_type(&self) -> &'static str;

    /// Get human-readable display name
    fn display_name(&self) -> &str;

    /// Get the unique instance ID
    fn id(&self) -> &str;

    /// Check if effect is enabled
    fn is_enabled(&self) -> bool;

    /// Enable or disable the effect
    fn set_enabled(&mut self, enabled: bool);

    /// Get all parameters as JSON (for inspection)
    fn get_params(&self) -> Value;

    /// Delay introduced by the effect, in samples
    fn latency_samples(&self) -> usize {
        0
    }
}

/// Helper macro to implement common Effect trait methods
#[macro_export]
macro_rules! impl_effect_common {
    ($effect_type:expr, $display_name:expr) => {
        fn effect_type(&self) -> &'static str {
            $effect_type
        }

        fn display_name(&self) -> &str {
            $display_name
        }

        fn id(&self) -> &str {
            &self.common.id
        }

        fn is_enabled(&self) -> bool {
            self.common.enabled
        }

        fn set_enabled(&mut self, enabled: bool) {
            self.common.enabled = enabled;
        }
    };
}
