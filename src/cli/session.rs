//! Session description for the demo CLI
//!
//! A small JSON document listing tracks, their hits and their notes:
//!
//! ```json
//! {
//!   "bpm": 120,
//!   "pattern_length": 16,
//!   "tracks": [
//!     { "name": "kick", "source": "kick.wav", "original_bpm": 120, "steps": [0, 4, 8, 12] },
//!     { "name": "break", "source": "break.wav", "original_bpm": 90,
//!       "loop_window": { "start": 0.0, "end": 1.5 }, "steps": [0] }
//!   ]
//! }
//! ```
//!
//! Source paths resolve relative to the session file's directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::engine::WavLoader;
use crate::error::{Result, SequencerError};
use crate::pattern::{MutationSource, PianoRollNote};
use crate::sequencer::Sequencer;
use crate::track::{TrackId, TrackSpec};

/// One track of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionTrack {
    #[serde(flatten)]
    pub spec: TrackSpec,
    /// Active step indices
    #[serde(default)]
    pub steps: Vec<usize>,
    #[serde(default)]
    pub notes: Vec<PianoRollNote>,
}

/// A whole session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    pub config: EngineConfig,
    #[serde(default)]
    pub bpm: Option<f64>,
    #[serde(default)]
    pub pattern_length: Option<usize>,
    #[serde(default)]
    pub grid_division: Option<u32>,
    #[serde(default)]
    pub tracks: Vec<SessionTrack>,
}

impl Session {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Directory sources are resolved against
    pub fn root_for(path: &Path) -> PathBuf {
        path.parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Build a sequencer holding this session
    ///
    /// Pattern data goes through the restore entry points, so no resize
    /// shadows are created. Returns the track ids in session order.
    pub fn build(&self, root: &Path) -> Result<(Sequencer, Vec<TrackId>)> {
        let loader = Arc::new(WavLoader::with_root(root));
        let mut seq = Sequencer::new(self.config.clone(), loader)?;

        if let Some(grid) = self.grid_division {
            seq.set_grid_division(grid)?;
        }
        if let Some(length) = self.pattern_length {
            seq.resize_pattern(length, MutationSource::Restore)?;
        }
        if let Some(bpm) = self.bpm {
            seq.set_bpm(bpm)?;
        }

        let length = seq.pattern_length();
        let mut ids = Vec::with_capacity(self.tracks.len());
        for entry in &self.tracks {
            let id = seq.add_track(entry.spec.clone())?;
            let mut row = vec![false; length];
            for &step in &entry.steps {
                let slot = row.get_mut(step).ok_or(SequencerError::StepOutOfRange { index: step, length })?;
                *slot = true;
            }
            seq.set_pattern_wholesale(id, &row)?;
            if !entry.notes.is_empty() {
                seq.set_piano_roll_wholesale(id, entry.notes.clone())?;
            }
            ids.push(id);
        }

        tracing::info!(tracks = ids.len(), length, bpm = seq.bpm(), "session loaded");
        Ok((seq, ids))
    }
}
