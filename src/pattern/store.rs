//! Step pattern storage
//!
//! Every track's step array is kept at exactly the current global length.
//! Shrinking through the editor keeps a shadow copy of the longer array so
//! growing back restores the hits that were cut off. Restores coming from a
//! saved session are tagged `MutationSource::Restore` and never touch shadows
//! except to discard them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SequencerError};
use crate::track::TrackId;

/// Who is mutating the pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutationSource {
    /// Interactive edit: shrinking captures shadows
    Edit,
    /// Session restore: bypasses shadow capture and drops existing shadows
    Restore,
}

/// Per-track step grids at a shared length
#[derive(Debug, Clone)]
pub struct PatternStore {
    length: usize,
    grid_division: u32,
    order: Vec<TrackId>,
    steps: HashMap<TrackId, Vec<bool>>,
    shadows: HashMap<TrackId, Vec<bool>>,
}

impl PatternStore {
    /// Create an empty store
    ///
    /// # Arguments
    /// * `length` - Number of steps per pattern (> 0)
    /// * `grid_division` - Steps per quarter note (positive multiple of 4)
    pub fn new(length: usize, grid_division: u32) -> Result<Self> {
        check_length(length)?;
        check_grid_division(grid_division)?;
        Ok(Self {
            length,
            grid_division,
            order: Vec::new(),
            steps: HashMap::new(),
            shadows: HashMap::new(),
        })
    }

    /// Current global step count
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn grid_division(&self) -> u32 {
        self.grid_division
    }

    pub fn set_grid_division(&mut self, grid_division: u32) -> Result<()> {
        check_grid_division(grid_division)?;
        self.grid_division = grid_division;
        Ok(())
    }

    /// Track ids in insertion order
    pub fn track_ids(&self) -> &[TrackId] {
        &self.order
    }

    // ========================================================================
    // Track management
    // ========================================================================

    /// Register a track with an all-false grid; no-op if already present
    pub fn add_track(&mut self, track: TrackId) {
        if self.steps.contains_key(&track) {
            return;
        }
        self.order.push(track);
        self.steps.insert(track, vec![false; self.length]);
    }

    pub fn remove_track(&mut self, track: TrackId) {
        self.order.retain(|id| *id != track);
        self.steps.remove(&track);
        self.shadows.remove(&track);
    }

    /// Move a track to a new position in the display order
    pub fn move_track(&mut self, track: TrackId, to: usize) -> Result<()> {
        let from = self
            .order
            .iter()
            .position(|id| *id == track)
            .ok_or(SequencerError::TrackNotFound { track })?;
        let id = self.order.remove(from);
        let to = to.min(self.order.len());
        self.order.insert(to, id);
        Ok(())
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Whether `track` has a hit at `step`; out-of-range steps read as false
    pub fn get(&self, track: TrackId, step: usize) -> bool {
        self.steps
            .get(&track)
            .and_then(|row| row.get(step))
            .copied()
            .unwrap_or(false)
    }

    /// Full step array of a track
    pub fn pattern(&self, track: TrackId) -> Option<&[bool]> {
        self.steps.get(&track).map(Vec::as_slice)
    }

    /// Shadow copy of a track, if shrinking captured one
    pub fn shadow(&self, track: TrackId) -> Option<&[bool]> {
        self.shadows.get(&track).map(Vec::as_slice)
    }

    pub fn has_shadows(&self) -> bool {
        !self.shadows.is_empty()
    }

    /// Tracks with a hit at `step mod len()`, in track order
    pub fn active_tracks_at(&self, step: usize) -> impl Iterator<Item = TrackId> + '_ {
        let step = step % self.length;
        self.order
            .iter()
            .copied()
            .filter(move |id| self.get(*id, step))
    }

    /// First step with a hit, if any
    pub fn first_active_step(&self, track: TrackId) -> Option<usize> {
        self.steps.get(&track)?.iter().position(|hit| *hit)
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Change the global step count
    ///
    /// An `Edit` shrink captures each track's full-length array as its shadow
    /// (when it has none, or a shorter one) before truncating; growing fills
    /// new steps from the shadow. A `Restore` resize discards every shadow and
    /// pads with `false`.
    pub fn resize(&mut self, new_length: usize, source: MutationSource) -> Result<()> {
        check_length(new_length)?;
        if new_length == self.length {
            if source == MutationSource::Restore {
                self.shadows.clear();
            }
            return Ok(());
        }

        match source {
            MutationSource::Edit => self.resize_edit(new_length),
            MutationSource::Restore => {
                self.shadows.clear();
                for row in self.steps.values_mut() {
                    row.resize(new_length, false);
                }
            }
        }

        tracing::debug!(from = self.length, to = new_length, ?source, "pattern resized");
        self.length = new_length;
        Ok(())
    }

    fn resize_edit(&mut self, new_length: usize) {
        for (id, row) in self.steps.iter_mut() {
            if new_length < row.len() {
                let capture = self
                    .shadows
                    .get(id)
                    .map_or(true, |shadow| shadow.len() < row.len());
                if capture {
                    self.shadows.insert(*id, row.clone());
                }
                row.truncate(new_length);
            } else {
                let old_len = row.len();
                let shadow = self.shadows.get(id);
                row.extend((old_len..new_length).map(|i| {
                    shadow.and_then(|s| s.get(i)).copied().unwrap_or(false)
                }));
                if shadow.map_or(false, |s| s.len() <= new_length) {
                    self.shadows.remove(id);
                }
            }
        }
    }

    /// Flip one step and return its new value
    pub fn toggle_step(&mut self, track: TrackId, index: usize) -> Result<bool> {
        let value = !self.row(track, index)?[index];
        self.write(track, index, value);
        Ok(value)
    }

    /// Set one step explicitly
    pub fn set_step(&mut self, track: TrackId, index: usize, value: bool) -> Result<()> {
        self.row(track, index)?;
        self.write(track, index, value);
        Ok(())
    }

    /// Clear every step of a track
    pub fn clear(&mut self, track: TrackId) -> Result<()> {
        let len = self.steps.get(&track).ok_or(SequencerError::TrackNotFound { track })?.len();
        for index in 0..len {
            self.write(track, index, false);
        }
        Ok(())
    }

    /// Replace a track's grid wholesale (session restore)
    ///
    /// The data is padded with `false` or truncated to the current length and
    /// any shadow for the track is discarded.
    pub fn set_pattern_wholesale(&mut self, track: TrackId, data: &[bool]) -> Result<()> {
        let length = self.length;
        let row = self
            .steps
            .get_mut(&track)
            .ok_or(SequencerError::TrackNotFound { track })?;
        row.clear();
        row.extend(data.iter().copied().take(length));
        row.resize(length, false);
        self.shadows.remove(&track);
        Ok(())
    }

    fn row(&self, track: TrackId, index: usize) -> Result<&Vec<bool>> {
        let row = self
            .steps
            .get(&track)
            .ok_or(SequencerError::TrackNotFound { track })?;
        if index >= row.len() {
            return Err(SequencerError::StepOutOfRange {
                index,
                length: row.len(),
            });
        }
        Ok(row)
    }

    /// Write a validated step, keeping the shadow in sync
    fn write(&mut self, track: TrackId, index: usize, value: bool) {
        if let Some(row) = self.steps.get_mut(&track) {
            row[index] = value;
        }
        if let Some(slot) = self.shadows.get_mut(&track).and_then(|s| s.get_mut(index)) {
            *slot = value;
        }
    }
}

fn check_length(length: usize) -> Result<()> {
    if length == 0 {
        return Err(SequencerError::invalid("pattern_length", length, "at least 1 step"));
    }
    Ok(())
}

fn check_grid_division(grid_division: u32) -> Result<()> {
    if grid_division == 0 || grid_division % 4 != 0 {
        return Err(SequencerError::invalid(
            "grid_division",
            grid_division,
            "a positive multiple of 4",
        ));
    }
    Ok(())
}
