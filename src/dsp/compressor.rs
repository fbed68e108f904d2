//! Smoothing compressor
//!
//! Feed-forward compressor used after the pitch-shift stage to even out the
//! level bumps phase-vocoder resynthesis produces. Linked stereo detection,
//! hard knee, one-pole attack/release on the gain.

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{Effect, EffectParams};
use crate::engine::buffer::{db_to_linear, linear_to_db};
use crate::engine::AudioBuffer;
use crate::error::{Result, SequencerError};
use crate::impl_effect_common;

/// Compressor parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressorParams {
    /// Threshold level in dB (-60 to 0 dB)
    pub threshold_db: f32,
    /// Compression ratio (1.0 to 20.0)
    pub ratio: f32,
    /// Attack time in milliseconds (0.1 to 100 ms)
    pub attack_ms: f32,
    /// Release time in milliseconds (10 to 1000 ms)
    pub release_ms: f32,
    /// Makeup gain in dB (0 to 24 dB)
    pub makeup_gain_db: f32,
}

impl Default for CompressorParams {
    fn default() -> Self {
        Self::light()
    }
}

impl CompressorParams {
    /// Gentle smoothing for moderate shifts
    pub fn light() -> Self {
        Self {
            threshold_db: -12.0,
            ratio: 2.0,
            attack_ms: 10.0,
            release_ms: 120.0,
            makeup_gain_db: 1.0,
        }
    }

    /// Firmer smoothing for large shifts
    pub fn heavy() -> Self {
        Self {
            threshold_db: -18.0,
            ratio: 4.0,
            attack_ms: 5.0,
            release_ms: 200.0,
            makeup_gain_db: 3.0,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(-60.0..=0.0).contains(&self.threshold_db) {
            return Err(SequencerError::invalid("threshold_db", self.threshold_db, "-60 to 0 dB"));
        }
        if !(1.0..=20.0).contains(&self.ratio) {
            return Err(SequencerError::invalid("ratio", self.ratio, "1.0 to 20.0"));
        }
        if !(0.1..=100.0).contains(&self.attack_ms) {
            return Err(SequencerError::invalid("attack_ms", self.attack_ms, "0.1 to 100 ms"));
        }
        if !(10.0..=1000.0).contains(&self.release_ms) {
            return Err(SequencerError::invalid("release_ms", self.release_ms, "10 to 1000 ms"));
        }
        if !(0.0..=24.0).contains(&self.makeup_gain_db) {
            return Err(SequencerError::invalid("makeup_gain_db", self.makeup_gain_db, "0 to 24 dB"));
        }
        Ok(())
    }

    /// Clamp parameters to valid ranges
    pub fn clamp(&mut self) {
        self.threshold_db = self.threshold_db.clamp(-60.0, 0.0);
        self.ratio = self.ratio.clamp(1.0, 20.0);
        self.attack_ms = self.attack_ms.clamp(0.1, 100.0);
        self.release_ms = self.release_ms.clamp(10.0, 1000.0);
        self.makeup_gain_db = self.makeup_gain_db.clamp(0.0, 24.0);
    }
}

/// Dynamics smoothing stage
#[derive(Debug, Clone)]
pub struct Compressor {
    common: EffectParams,
    params: CompressorParams,
    sample_rate: u32,
    attack_coeff: f32,
    release_coeff: f32,
    /// Current gain (linear), shared across channels
    gain: f32,
}

impl Compressor {
    pub fn with_params(params: CompressorParams) -> Self {
        let mut params = params;
        params.clamp();
        let mut comp = Self {
            common: EffectParams::default(),
            params,
            sample_rate: 48000,
            attack_coeff: 0.0,
            release_coeff: 0.0,
            gain: 1.0,
        };
        comp.update_coefficients();
        comp
    }

    pub fn params(&self) -> &CompressorParams {
        &self.params
    }

    /// Current gain reduction in dB
    pub fn gain_reduction_db(&self) -> f32 {
        linear_to_db(self.gain).max(-96.0)
    }

    fn update_coefficients(&mut self) {
        let rate = self.sample_rate as f32;
        let attack_samples = self.params.attack_ms / 1000.0 * rate;
        let release_samples = self.params.release_ms / 1000.0 * rate;
        self.attack_coeff = (-1.0 / attack_samples.max(1.0)).exp();
        self.release_coeff = (-1.0 / release_samples.max(1.0)).exp();
    }

    /// Gain reduction in dB (zero or negative) for an input level
    fn compute_gain_db(&self, input_db: f32) -> f32 {
        let threshold = self.params.threshold_db;
        if input_db <= threshold {
            0.0
        } else {
            (threshold + (input_db - threshold) / self.params.ratio) - input_db
        }
    }
}

impl Effect for Compressor {
    fn process(&mut self, buffer: &mut AudioBuffer) {
        let makeup = db_to_linear(self.params.makeup_gain_db);

        for frame in 0..buffer.len() {
            let level = buffer
                .samples
                .iter()
                .map(|ch| ch[frame].abs())
                .fold(0.0_f32, f32::max);

            let target = db_to_linear(self.compute_gain_db(linear_to_db(level)));
            let coeff = if target < self.gain {
                self.attack_coeff
            } else {
                self.release_coeff
            };
            self.gain = coeff * self.gain + (1.0 - coeff) * target;

            let total = self.gain * makeup;
            for channel in buffer.samples.iter_mut() {
                channel[frame] *= total;
            }
        }
    }

    fn prepare(&mut self, sample_rate: u32, _max_block_size: usize) {
        self.sample_rate = sample_rate;
        self.update_coefficients();
    }

    fn reset(&mut self) {
        self.gain = 1.0;
    }

    fn get_params(&self) -> serde_json::Value {
        json!(self.params)
    }

    impl_effect_common!("compressor", "Compressor");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::generate_test_tone;

    fn peak(buffer: &AudioBuffer, from: usize) -> f32 {
        buffer.samples[0][from..].iter().fold(0.0_f32, |m, s| m.max(s.abs()))
    }

    #[test]
    fn test_presets_are_valid() {
        assert!(CompressorParams::light().validate().is_ok());
        assert!(CompressorParams::heavy().validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_ratio() {
        let params = CompressorParams {
            ratio: 0.5,
            ..CompressorParams::light()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_loud_signal_is_reduced() {
        let mut comp = Compressor::with_params(CompressorParams {
            makeup_gain_db: 0.0,
            ..CompressorParams::heavy()
        });
        comp.prepare(48000, 512);
        let mut buffer = generate_test_tone(200.0, 0.5, 48000);
        comp.process(&mut buffer);

        assert!(peak(&buffer, 12000) < 0.5);
        assert!(comp.gain_reduction_db() < -3.0);
    }

    #[test]
    fn test_quiet_signal_untouched() {
        let mut comp = Compressor::with_params(CompressorParams {
            makeup_gain_db: 0.0,
            ..CompressorParams::light()
        });
        let mut buffer = generate_test_tone(200.0, 0.1, 48000);
        buffer.apply_gain(0.05);
        let before = buffer.clone();
        comp.process(&mut buffer);
        assert_eq!(buffer, before);
    }

    #[test]
    fn test_heavy_reduces_more_than_light() {
        let mut light = Compressor::with_params(CompressorParams { makeup_gain_db: 0.0, ..CompressorParams::light() });
        let mut heavy = Compressor::with_params(CompressorParams { makeup_gain_db: 0.0, ..CompressorParams::heavy() });
        let mut a = generate_test_tone(200.0, 0.5, 48000);
        let mut b = a.clone();
        light.process(&mut a);
        heavy.process(&mut b);
        assert!(peak(&b, 12000) < peak(&a, 12000));
    }
}
