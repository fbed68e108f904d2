//! Track model
//!
//! A track carries the tempo and pitch metadata of one audio source plus the
//! flags the UI toggles. Derived values (`playback_rate`, `current_key`) are
//! recomputed whenever their inputs change, so they can never go stale.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{Result, SequencerError};
use crate::mapper::{bpm_to_rate, transpose, Key};

/// Stable track identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackId(Uuid);

impl TrackId {
    /// Generate a fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TrackId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque reference to an audio source, resolved by a `SourceLoader`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceRef(String);

impl SourceRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceRef {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Loop window within a source, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoopWindow {
    pub start: f64,
    pub end: f64,
}

impl LoopWindow {
    /// Build a window, rejecting empty or negative ranges
    pub fn new(start: f64, end: f64) -> Result<Self> {
        if !(start.is_finite() && end.is_finite()) || start < 0.0 || end <= start {
            return Err(SequencerError::invalid(
                "loop_window",
                format!("{}..{}", start, end),
                "0 <= start < end",
            ));
        }
        Ok(Self { start, end })
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Everything the catalogue supplies to create a track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackSpec {
    pub name: String,
    pub source: SourceRef,
    pub original_bpm: f64,
    #[serde(default)]
    pub current_bpm: Option<f64>,
    #[serde(default)]
    pub original_key: Key,
    #[serde(default)]
    pub pitch_shift: f64,
    #[serde(default)]
    pub loop_window: Option<LoopWindow>,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub solo: bool,
    #[serde(default)]
    pub locked: bool,
}

impl TrackSpec {
    /// A one-shot spec at the given tempo with every flag cleared
    pub fn new(name: impl Into<String>, source: impl Into<String>, original_bpm: f64) -> Self {
        Self {
            name: name.into(),
            source: SourceRef::new(source),
            original_bpm,
            current_bpm: None,
            original_key: Key::C,
            pitch_shift: 0.0,
            loop_window: None,
            muted: false,
            solo: false,
            locked: false,
        }
    }

    pub fn with_loop(mut self, start: f64, end: f64) -> Self {
        self.loop_window = Some(LoopWindow { start, end });
        self
    }

    pub fn with_key(mut self, key: Key) -> Self {
        self.original_key = key;
        self
    }

    pub fn with_pitch_shift(mut self, semitones: f64) -> Self {
        self.pitch_shift = semitones;
        self
    }

    pub fn with_current_bpm(mut self, bpm: f64) -> Self {
        self.current_bpm = Some(bpm);
        self
    }
}

/// A sequencer track
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    id: TrackId,
    name: String,
    source: SourceRef,
    original_bpm: f64,
    current_bpm: f64,
    playback_rate: f64,
    original_key: Key,
    current_key: Key,
    pitch_shift: f64,
    loop_window: Option<LoopWindow>,
    muted: bool,
    solo: bool,
    locked: bool,
}

impl Track {
    /// Build a track from a catalogue spec
    ///
    /// Tempos must lie within the configured bounds; the pitch shift is
    /// clamped and the loop window validated.
    pub fn from_spec(spec: TrackSpec, config: &EngineConfig) -> Result<Self> {
        let original_bpm = config.check_bpm("original_bpm", spec.original_bpm)?;
        let current_bpm = config.check_bpm("current_bpm", spec.current_bpm.unwrap_or(original_bpm))?;
        let loop_window = match spec.loop_window {
            Some(w) => Some(LoopWindow::new(w.start, w.end)?),
            None => None,
        };

        let mut track = Self {
            id: TrackId::new(),
            name: spec.name,
            source: spec.source,
            original_bpm,
            current_bpm,
            playback_rate: 1.0,
            original_key: spec.original_key,
            current_key: spec.original_key,
            pitch_shift: config.clamp_pitch(spec.pitch_shift),
            loop_window,
            muted: spec.muted,
            solo: spec.solo,
            locked: spec.locked,
        };
        track.recompute();
        Ok(track)
    }

    fn recompute(&mut self) {
        self.playback_rate = bpm_to_rate(self.current_bpm, self.original_bpm);
        self.current_key = transpose(self.original_key, self.pitch_shift.round() as i32);
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &SourceRef {
        &self.source
    }

    pub fn original_bpm(&self) -> f64 {
        self.original_bpm
    }

    pub fn current_bpm(&self) -> f64 {
        self.current_bpm
    }

    /// `current_bpm / original_bpm`
    pub fn playback_rate(&self) -> f64 {
        self.playback_rate
    }

    pub fn original_key(&self) -> Key {
        self.original_key
    }

    /// Original key transposed by the pitch shift rounded to a semitone
    pub fn current_key(&self) -> Key {
        self.current_key
    }

    pub fn pitch_shift(&self) -> f64 {
        self.pitch_shift
    }

    pub fn loop_window(&self) -> Option<LoopWindow> {
        self.loop_window
    }

    /// Tracks with a loop window loop; the rest are one-shots
    pub fn is_looping(&self) -> bool {
        self.loop_window.is_some()
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn is_solo(&self) -> bool {
        self.solo
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    // ========================================================================
    // Setters
    // ========================================================================

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Set the tempo this track should play at
    pub fn set_current_bpm(&mut self, bpm: f64, config: &EngineConfig) -> Result<()> {
        self.current_bpm = config.check_bpm("current_bpm", bpm)?;
        self.recompute();
        Ok(())
    }

    /// Set the tempo the source was recorded at
    pub fn set_original_bpm(&mut self, bpm: f64, config: &EngineConfig) -> Result<()> {
        self.original_bpm = config.check_bpm("original_bpm", bpm)?;
        self.recompute();
        Ok(())
    }

    pub fn set_original_key(&mut self, key: Key) {
        self.original_key = key;
        self.recompute();
    }

    /// Set the pitch shift, clamped to the configured range
    ///
    /// Returns the value actually stored.
    pub fn set_pitch_shift(&mut self, semitones: f64, config: &EngineConfig) -> f64 {
        let clamped = config.clamp_pitch(semitones);
        if clamped != semitones {
            tracing::debug!(track = %self.id, requested = semitones, clamped, "pitch shift clamped");
        }
        self.pitch_shift = clamped;
        self.recompute();
        clamped
    }

    pub fn set_loop_window(&mut self, window: Option<LoopWindow>) -> Result<()> {
        self.loop_window = match window {
            Some(w) => Some(LoopWindow::new(w.start, w.end)?),
            None => None,
        };
        Ok(())
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    pub fn set_solo(&mut self, solo: bool) {
        self.solo = solo;
    }

    pub fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
    }
}
