//! Piano-roll note storage

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, SequencerError};
use crate::track::TrackId;

/// MIDI note that plays the source at its recorded pitch
pub const ROOT_NOTE: u8 = 60;

const MAX_VELOCITY: u8 = 127;
const MAX_NOTE_SHIFT: f64 = 12.0;

/// A single note in a track's piano roll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PianoRollNote {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    /// MIDI note number; 60 plays the source unshifted
    pub pitch: u8,
    /// Absolute step in the extended multi-cycle grid
    pub start_step: usize,
    /// Length in steps
    pub duration: usize,
    pub velocity: u8,
    /// Extra shift on top of `pitch`, in semitones
    #[serde(default)]
    pub pitch_shift: f64,
}

impl PianoRollNote {
    pub fn new(pitch: u8, start_step: usize, duration: usize, velocity: u8) -> Self {
        Self {
            id: Uuid::new_v4(),
            pitch,
            start_step,
            duration,
            velocity,
            pitch_shift: 0.0,
        }
    }

    pub fn with_pitch_shift(mut self, semitones: f64) -> Self {
        self.pitch_shift = semitones;
        self
    }

    /// Total shift applied to the source: `(pitch - 60) + pitch_shift`
    pub fn effective_shift(&self) -> f64 {
        (self.pitch as f64 - ROOT_NOTE as f64) + self.pitch_shift
    }

    /// Linear gain from velocity
    pub fn gain(&self) -> f32 {
        self.velocity as f32 / MAX_VELOCITY as f32
    }

    pub fn validate(&self) -> Result<()> {
        if self.velocity > MAX_VELOCITY {
            return Err(SequencerError::invalid("velocity", self.velocity, "0 to 127"));
        }
        if self.pitch > 127 {
            return Err(SequencerError::invalid("pitch", self.pitch, "0 to 127"));
        }
        if self.duration == 0 {
            return Err(SequencerError::invalid("duration", self.duration, "at least 1 step"));
        }
        if !self.pitch_shift.is_finite() || self.pitch_shift.abs() > MAX_NOTE_SHIFT {
            return Err(SequencerError::invalid(
                "note_pitch_shift",
                self.pitch_shift,
                "-12 to +12 semitones",
            ));
        }
        Ok(())
    }
}

/// Per-track note lists
#[derive(Debug, Clone, Default)]
pub struct PianoRollStore {
    notes: HashMap<TrackId, Vec<PianoRollNote>>,
}

impl PianoRollStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a validated note, keeping the list ordered by start step
    pub fn add_note(&mut self, track: TrackId, note: PianoRollNote) -> Result<Uuid> {
        note.validate()?;
        let id = note.id;
        let list = self.notes.entry(track).or_default();
        let at = list.partition_point(|n| n.start_step <= note.start_step);
        list.insert(at, note);
        Ok(id)
    }

    /// Remove a note by id; returns whether it existed
    pub fn remove_note(&mut self, track: TrackId, note: Uuid) -> bool {
        let Some(list) = self.notes.get_mut(&track) else {
            return false;
        };
        let before = list.len();
        list.retain(|n| n.id != note);
        list.len() != before
    }

    pub fn notes(&self, track: TrackId) -> &[PianoRollNote] {
        self.notes.get(&track).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Notes of `track` whose start step maps onto `step` of the main grid
    pub fn notes_at(
        &self,
        track: TrackId,
        step: usize,
        pattern_length: usize,
    ) -> impl Iterator<Item = &PianoRollNote> + '_ {
        let length = pattern_length.max(1);
        let step = step % length;
        self.notes(track)
            .iter()
            .filter(move |n| n.start_step % length == step)
    }

    /// Replace a track's notes wholesale (session restore)
    ///
    /// All notes are validated before anything is replaced.
    pub fn set_piano_roll_wholesale(&mut self, track: TrackId, notes: Vec<PianoRollNote>) -> Result<()> {
        for note in &notes {
            note.validate()?;
        }
        let mut notes = notes;
        notes.sort_by_key(|n| n.start_step);
        self.notes.insert(track, notes);
        Ok(())
    }

    pub fn remove_track(&mut self, track: TrackId) {
        self.notes.remove(&track);
    }

    pub fn note_count(&self) -> usize {
        self.notes.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_shift() {
        let note = PianoRollNote::new(63, 0, 1, 100).with_pitch_shift(-1.0);
        assert_eq!(note.effective_shift(), 2.0);
        assert_eq!(PianoRollNote::new(48, 0, 1, 100).effective_shift(), -12.0);
    }

    #[test]
    fn test_validation() {
        assert!(PianoRollNote::new(60, 0, 1, 128).validate().is_err());
        assert!(PianoRollNote::new(60, 0, 0, 100).validate().is_err());
        assert!(PianoRollNote::new(60, 0, 1, 100).with_pitch_shift(13.0).validate().is_err());
        assert!(PianoRollNote::new(60, 0, 1, 127).validate().is_ok());
    }

    #[test]
    fn test_notes_at_reduces_modulo_length() {
        let mut store = PianoRollStore::new();
        let track = TrackId::new();
        store.add_note(track, PianoRollNote::new(60, 3, 1, 100)).unwrap();
        store.add_note(track, PianoRollNote::new(62, 19, 1, 100)).unwrap();
        store.add_note(track, PianoRollNote::new(64, 4, 1, 100)).unwrap();

        let at_three: Vec<u8> = store.notes_at(track, 3, 16).map(|n| n.pitch).collect();
        assert_eq!(at_three, vec![60, 62]);
        assert_eq!(store.notes_at(track, 4, 16).count(), 1);
        assert_eq!(store.notes_at(track, 5, 16).count(), 0);
    }

    #[test]
    fn test_remove_note() {
        let mut store = PianoRollStore::new();
        let track = TrackId::new();
        let id = store.add_note(track, PianoRollNote::new(60, 0, 2, 90)).unwrap();
        assert!(store.remove_note(track, id));
        assert!(!store.remove_note(track, id));
        assert!(store.notes(track).is_empty());
    }

    #[test]
    fn test_wholesale_rejects_invalid_batch() {
        let mut store = PianoRollStore::new();
        let track = TrackId::new();
        store.add_note(track, PianoRollNote::new(60, 0, 1, 100)).unwrap();

        let batch = vec![PianoRollNote::new(60, 2, 1, 100), PianoRollNote::new(60, 4, 0, 100)];
        assert!(store.set_piano_roll_wholesale(track, batch).is_err());
        assert_eq!(store.notes(track).len(), 1);

        let batch = vec![PianoRollNote::new(67, 8, 1, 100), PianoRollNote::new(60, 2, 1, 100)];
        store.set_piano_roll_wholesale(track, batch).unwrap();
        assert_eq!(store.notes(track)[0].start_step, 2);
        assert_eq!(store.note_count(), 2);
    }
}
