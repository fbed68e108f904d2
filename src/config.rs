//! Engine configuration
//!
//! All timing defaults, parameter bounds and graph-rebuild thresholds live
//! here so a host can tune them from a JSON file.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SequencerError};

/// Tunable engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Output sample rate in Hz
    pub sample_rate: u32,
    /// Global tempo used by a fresh sequencer
    pub default_bpm: f64,
    /// Steps per quarter note, 16 = sixteenth-note resolution
    pub grid_division: u32,
    /// Number of steps in a fresh pattern
    pub pattern_length: usize,
    /// Lowest accepted tempo (global and per-track)
    pub min_bpm: f64,
    /// Highest accepted tempo (global and per-track)
    pub max_bpm: f64,
    /// Pitch shifts are clamped to +/- this many semitones
    pub max_pitch_shift: f64,
    /// Rebuild a graph when the playback rate moves more than this
    pub rate_epsilon: f64,
    /// Rebuild a graph when the pitch shift moves more than this (semitones)
    pub pitch_epsilon: f64,
    /// Below this |shift| the graph uses plain rate scaling
    pub unison_threshold: f64,
    /// Above this |shift| the graph uses heavy smoothing and tonal correction
    pub heavy_shift_threshold: f64,
    /// Scheduling offset applied to one-shot restarts (seconds)
    pub trigger_offset_secs: f64,
    /// Minimum lifetime of an ephemeral piano-roll voice (seconds)
    pub release_floor_secs: f64,
    /// Frames rendered per block in offline rendering
    pub block_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            default_bpm: 120.0,
            grid_division: 16,
            pattern_length: 16,
            min_bpm: 20.0,
            max_bpm: 300.0,
            max_pitch_shift: 12.0,
            rate_epsilon: 0.001,
            pitch_epsilon: 0.1,
            unison_threshold: 0.1,
            heavy_shift_threshold: 5.0,
            trigger_offset_secs: 0.005,
            release_floor_secs: 0.25,
            block_size: 512,
        }
    }
}

impl EngineConfig {
    /// Load a configuration from a JSON file
    ///
    /// Missing fields fall back to their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate internal consistency
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(config_error("sample_rate must be > 0"));
        }
        if self.grid_division == 0 || self.grid_division % 4 != 0 {
            return Err(config_error("grid_division must be a positive multiple of 4"));
        }
        if self.pattern_length == 0 {
            return Err(config_error("pattern_length must be > 0"));
        }
        if !(self.min_bpm > 0.0 && self.min_bpm < self.max_bpm) {
            return Err(config_error("min_bpm must be > 0 and below max_bpm"));
        }
        if !(self.min_bpm..=self.max_bpm).contains(&self.default_bpm) {
            return Err(config_error("default_bpm must lie within [min_bpm, max_bpm]"));
        }
        if self.max_pitch_shift <= 0.0 {
            return Err(config_error("max_pitch_shift must be > 0"));
        }
        if self.unison_threshold > self.heavy_shift_threshold {
            return Err(config_error(
                "unison_threshold must not exceed heavy_shift_threshold",
            ));
        }
        if self.trigger_offset_secs < 0.0 || self.release_floor_secs < 0.0 {
            return Err(config_error("time offsets must be >= 0"));
        }
        if self.block_size == 0 {
            return Err(config_error("block_size must be > 0"));
        }
        Ok(())
    }

    /// Check a tempo against the configured bounds
    pub fn check_bpm(&self, param: &str, bpm: f64) -> Result<f64> {
        if bpm.is_finite() && (self.min_bpm..=self.max_bpm).contains(&bpm) {
            Ok(bpm)
        } else {
            Err(SequencerError::invalid(
                param,
                bpm,
                format!("{} to {} BPM", self.min_bpm, self.max_bpm),
            ))
        }
    }

    /// Clamp a pitch shift to the configured range
    pub fn clamp_pitch(&self, semitones: f64) -> f64 {
        if semitones.is_nan() {
            return 0.0;
        }
        semitones.clamp(-self.max_pitch_shift, self.max_pitch_shift)
    }
}

fn config_error(reason: &str) -> SequencerError {
    SequencerError::Config {
        reason: reason.to_string(),
    }
}
