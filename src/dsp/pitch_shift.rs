//! Phase-vocoder pitch shifter
//!
//! Streaming short-time Fourier shifter: each analysis frame is converted to
//! (magnitude, true frequency) pairs per bin, the bins are moved by the pitch
//! ratio and resynthesised with accumulated phase. Duration is unchanged;
//! output lags input by `FFT_SIZE - hop` samples.

use std::f32::consts::PI;
use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use serde_json::json;

use super::{Effect, EffectParams};
use crate::engine::AudioBuffer;
use crate::impl_effect_common;
use crate::mapper::semitones_to_ratio;

/// Analysis frame length
pub const FFT_SIZE: usize = 2048;

/// Frame overlap factor
pub const OVERSAMPLING: usize = 4;

const HOP: usize = FFT_SIZE / OVERSAMPLING;
const LATENCY: usize = FFT_SIZE - HOP;
const HALF: usize = FFT_SIZE / 2;

/// Per-channel streaming state
#[derive(Debug, Clone)]
struct ChannelState {
    in_fifo: Vec<f32>,
    out_fifo: Vec<f32>,
    accum: Vec<f32>,
    last_phase: Vec<f32>,
    sum_phase: Vec<f32>,
    rover: usize,
}

impl ChannelState {
    fn new() -> Self {
        Self {
            in_fifo: vec![0.0; FFT_SIZE],
            out_fifo: vec![0.0; FFT_SIZE],
            accum: vec![0.0; 2 * FFT_SIZE],
            last_phase: vec![0.0; HALF + 1],
            sum_phase: vec![0.0; HALF + 1],
            rover: LATENCY,
        }
    }
}

/// Pitch shift stage for a fixed semitone offset
pub struct PitchShifter {
    common: EffectParams,
    semitones: f64,
    ratio: f32,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    frame: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    ana_magn: Vec<f32>,
    ana_freq: Vec<f32>,
    syn_magn: Vec<f32>,
    syn_freq: Vec<f32>,
    channels: Vec<ChannelState>,
}

impl PitchShifter {
    /// Create a shifter for `semitones` (positive = up)
    pub fn new(semitones: f64) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(FFT_SIZE);
        let inverse = planner.plan_fft_inverse(FFT_SIZE);
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());

        let window = (0..FFT_SIZE)
            .map(|k| 0.5 - 0.5 * (2.0 * PI * k as f32 / FFT_SIZE as f32).cos())
            .collect();

        Self {
            common: EffectParams::default(),
            semitones,
            ratio: semitones_to_ratio(semitones) as f32,
            forward,
            inverse,
            window,
            frame: vec![Complex::new(0.0, 0.0); FFT_SIZE],
            scratch: vec![Complex::new(0.0, 0.0); scratch_len],
            ana_magn: vec![0.0; HALF + 1],
            ana_freq: vec![0.0; HALF + 1],
            syn_magn: vec![0.0; HALF + 1],
            syn_freq: vec![0.0; HALF + 1],
            channels: Vec::new(),
        }
    }

    pub fn semitones(&self) -> f64 {
        self.semitones
    }

    pub fn ratio(&self) -> f32 {
        self.ratio
    }

    fn process_sample(&mut self, ch: usize, input: f32) -> f32 {
        let state = &mut self.channels[ch];
        state.in_fifo[state.rover] = input;
        let output = state.out_fifo[state.rover - LATENCY];
        state.rover += 1;

        if state.rover >= FFT_SIZE {
            state.rover = LATENCY;
            self.process_frame(ch);
        }
        output
    }

    /// Analyse, shift and resynthesise one full frame
    fn process_frame(&mut self, ch: usize) {
        let expected = 2.0 * PI * HOP as f32 / FFT_SIZE as f32;
        let osamp = OVERSAMPLING as f32;

        // Analysis
        {
            let state = &self.channels[ch];
            for (k, slot) in self.frame.iter_mut().enumerate() {
                *slot = Complex::new(state.in_fifo[k] * self.window[k], 0.0);
            }
        }
        self.forward
            .process_with_scratch(&mut self.frame, &mut self.scratch);

        let state = &mut self.channels[ch];
        for k in 0..=HALF {
            let bin = self.frame[k];
            let magn = 2.0 * bin.norm();
            let phase = bin.arg();

            let mut delta = phase - state.last_phase[k];
            state.last_phase[k] = phase;
            delta -= k as f32 * expected;
            delta = wrap_phase(delta);

            // Deviation from the bin centre, in bins
            let deviation = osamp * delta / (2.0 * PI);
            self.ana_magn[k] = magn;
            self.ana_freq[k] = k as f32 + deviation;
        }

        // Shift
        self.syn_magn.fill(0.0);
        self.syn_freq.fill(0.0);
        for k in 0..=HALF {
            let index = (k as f32 * self.ratio).round() as usize;
            if index <= HALF {
                self.syn_magn[index] += self.ana_magn[k];
                self.syn_freq[index] = self.ana_freq[k] * self.ratio;
            }
        }

        // Synthesis
        for k in 0..=HALF {
            let deviation = self.syn_freq[k] - k as f32;
            let advance = 2.0 * PI * deviation / osamp + k as f32 * expected;
            state.sum_phase[k] = wrap_phase(state.sum_phase[k] + advance);
            self.frame[k] = Complex::from_polar(self.syn_magn[k], state.sum_phase[k]);
        }
        for slot in self.frame.iter_mut().skip(HALF + 1) {
            *slot = Complex::new(0.0, 0.0);
        }
        self.inverse
            .process_with_scratch(&mut self.frame, &mut self.scratch);

        let scale = 2.0 / (HALF as f32 * osamp);
        for k in 0..FFT_SIZE {
            state.accum[k] += scale * self.window[k] * self.frame[k].re;
        }
        state.out_fifo[..HOP].copy_from_slice(&state.accum[..HOP]);

        state.accum.copy_within(HOP..HOP + FFT_SIZE, 0);
        for slot in state.accum[FFT_SIZE..].iter_mut() {
            *slot = 0.0;
        }
        state.in_fifo.copy_within(HOP..FFT_SIZE, 0);
    }
}

/// Wrap a phase into [-PI, PI]
fn wrap_phase(phase: f32) -> f32 {
    (phase + PI).rem_euclid(2.0 * PI) - PI
}

impl Effect for PitchShifter {
    fn process(&mut self, buffer: &mut AudioBuffer) {
        let num_channels = buffer.channels();
        while self.channels.len() < num_channels {
            self.channels.push(ChannelState::new());
        }

        for ch in 0..num_channels {
            for i in 0..buffer.len() {
                let input = buffer.samples[ch][i];
                buffer.samples[ch][i] = self.process_sample(ch, input);
            }
        }
    }

    fn prepare(&mut self, _sample_rate: u32, _max_block_size: usize) {
        // Bin math is rate-independent
    }

    fn reset(&mut self) {
        self.channels.clear();
    }

    fn get_params(&self) -> serde_json::Value {
        json!({
            "semitones": self.semitones,
            "ratio": self.ratio,
            "fft_size": FFT_SIZE,
            "oversampling": OVERSAMPLING,
        })
    }

    fn latency_samples(&self) -> usize {
        LATENCY
    }

    impl_effect_common!("pitch_shift", "Pitch Shift");
}
