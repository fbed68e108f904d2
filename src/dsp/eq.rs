//! Tonal-correction EQ
//!
//! Two cascaded shelving biquads that pull back the brightness a large
//! upward shift adds (or restore top end after a large downward shift).

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::f64::consts::PI;

use super::{Effect, EffectParams};
use crate::engine::AudioBuffer;
use crate::impl_effect_common;

const LOW_SHELF_HZ: f32 = 200.0;
const HIGH_SHELF_HZ: f32 = 4000.0;
const SHELF_Q: f32 = 0.707;
const MAX_HIGH_CORRECTION_DB: f32 = 6.0;
const MAX_LOW_CORRECTION_DB: f32 = 3.0;

/// Shelf filter type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShelfType {
    LowShelf,
    HighShelf,
}

/// Biquad filter coefficients, normalized by a0
#[derive(Debug, Clone, Copy, Default)]
struct BiquadCoeffs {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl BiquadCoeffs {
    /// Audio EQ Cookbook shelf coefficients
    fn shelf(shelf: ShelfType, sample_rate: f64, frequency: f64, gain_db: f64, q: f64) -> Self {
        let freq = frequency.clamp(20.0, sample_rate / 2.0 - 1.0);
        let w0 = 2.0 * PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * q);
        let a = 10.0_f64.powf(gain_db / 40.0);
        let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

        let (b0, b1, b2, a0, a1, a2) = match shelf {
            ShelfType::LowShelf => (
                a * ((a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha),
                2.0 * a * ((a - 1.0) - (a + 1.0) * cos_w0),
                a * ((a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha),
                (a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha,
                -2.0 * ((a - 1.0) + (a + 1.0) * cos_w0),
                (a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha,
            ),
            ShelfType::HighShelf => (
                a * ((a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha),
                -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0),
                a * ((a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha),
                (a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha,
                2.0 * ((a - 1.0) - (a + 1.0) * cos_w0),
                (a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha,
            ),
        };

        BiquadCoeffs {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }
}

/// Direct Form I state for one channel
#[derive(Debug, Clone, Copy, Default)]
struct BiquadState {
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl BiquadState {
    fn process(&mut self, input: f64, c: &BiquadCoeffs) -> f64 {
        let output = c.b0 * input + c.b1 * self.x1 + c.b2 * self.x2 - c.a1 * self.y1 - c.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;
        output
    }
}

/// One shelving band
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShelfBand {
    pub shelf: ShelfType,
    pub frequency: f32,
    pub gain_db: f32,
    pub q: f32,
}

/// Low/high shelf pair for tonal correction
#[derive(Debug, Clone)]
pub struct ToneEq {
    common: EffectParams,
    bands: [ShelfBand; 2],
    coeffs: [BiquadCoeffs; 2],
    /// Indexed [channel][band]
    states: Vec<[BiquadState; 2]>,
    sample_rate: u32,
}

impl ToneEq {
    /// Correction curve for a pitch shift in semitones
    ///
    /// Upward shifts get a high-shelf cut and slight low-shelf lift;
    /// downward shifts get the mirror image.
    pub fn for_shift(semitones: f64) -> Self {
        let s = semitones as f32;
        let high = (-0.5 * s).clamp(-MAX_HIGH_CORRECTION_DB, MAX_HIGH_CORRECTION_DB);
        let low = (0.25 * s).clamp(-MAX_LOW_CORRECTION_DB, MAX_LOW_CORRECTION_DB);
        Self::with_gains(low, high)
    }

    /// Build from explicit shelf gains in dB
    pub fn with_gains(low_gain_db: f32, high_gain_db: f32) -> Self {
        let bands = [
            ShelfBand {
                shelf: ShelfType::LowShelf,
                frequency: LOW_SHELF_HZ,
                gain_db: low_gain_db,
                q: SHELF_Q,
            },
            ShelfBand {
                shelf: ShelfType::HighShelf,
                frequency: HIGH_SHELF_HZ,
                gain_db: high_gain_db,
                q: SHELF_Q,
            },
        ];
        let mut eq = Self {
            common: EffectParams::default(),
            bands,
            coeffs: [BiquadCoeffs::default(); 2],
            states: Vec::new(),
            sample_rate: 48000,
        };
        eq.update_coefficients();
        eq
    }

    pub fn bands(&self) -> &[ShelfBand; 2] {
        &self.bands
    }

    fn update_coefficients(&mut self) {
        for (coeffs, band) in self.coeffs.iter_mut().zip(self.bands.iter()) {
            *coeffs = BiquadCoeffs::shelf(
                band.shelf,
                self.sample_rate as f64,
                band.frequency as f64,
                band.gain_db as f64,
                band.q as f64,
            );
        }
    }
}

impl Effect for ToneEq {
    fn process(&mut self, buffer: &mut AudioBuffer) {
        let num_channels = buffer.channels();
        if self.states.len() < num_channels {
            self.states.resize(num_channels, [BiquadState::default(); 2]);
        }

        for (ch, channel) in buffer.samples.iter_mut().enumerate() {
            let states = &mut self.states[ch];
            for sample in channel.iter_mut() {
                let mut value = *sample as f64;
                for (state, coeffs) in states.iter_mut().zip(self.coeffs.iter()) {
                    value = state.process(value, coeffs);
                }
                *sample = value as f32;
            }
        }
    }

    fn prepare(&mut self, sample_rate: u32, _max_block_size: usize) {
        if sample_rate != self.sample_rate {
            self.sample_rate = sample_rate;
            self.update_coefficients();
        }
    }

    fn reset(&mut self) {
        self.states.clear();
    }

    fn get_params(&self) -> serde_json::Value {
        json!({ "bands": self.bands })
    }

    impl_effect_common!("eq", "Tone EQ");
}
