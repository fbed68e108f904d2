//! Piano-Roll Sub-Player
//!
//! Notes do not touch the track's persistent graph. Each note gets its own
//! disposable handle (source plus its own pitch stage) that fires once and
//! is stopped and dropped after the source's natural duration, or the
//! safety floor if that is longer. Handles are never pooled.

use crate::engine::{AudioBuffer, SourceCache};
use crate::graph::{AudioGraphHandle, GraphFactory};
use crate::pattern::PianoRollNote;
use crate::track::{Track, TrackId};

struct EphemeralVoice {
    handle: AudioGraphHandle,
    /// Transport time after which the voice is released
    release_at: f64,
}

/// Player for ephemeral piano-roll voices
pub struct PianoRollPlayer {
    factory: GraphFactory,
    voices: Vec<EphemeralVoice>,
    trigger_offset_secs: f64,
    release_floor_secs: f64,
}

impl PianoRollPlayer {
    pub fn new(factory: GraphFactory) -> Self {
        let trigger_offset_secs = factory.config().trigger_offset_secs;
        let release_floor_secs = factory.config().release_floor_secs;
        Self {
            factory,
            voices: Vec::new(),
            trigger_offset_secs,
            release_floor_secs,
        }
    }

    /// Fire `notes` for `track` at transport time `now`
    ///
    /// Returns how many voices started. Notes whose source is not ready are
    /// dropped silently for this cycle.
    pub fn fire<'a>(
        &mut self,
        now: f64,
        track: &Track,
        notes: impl IntoIterator<Item = &'a PianoRollNote>,
        sources: &SourceCache,
    ) -> usize {
        let mut started = 0;
        for note in notes {
            let Some(source) = sources.ready(track.source()) else {
                continue;
            };
            let offset = track.loop_window().map_or(0.0, |w| w.start);
            let semitones = self.note_shift(note);
            let transform = self.factory.select(track.playback_rate(), semitones);
            let mut handle = self
                .factory
                .build(track.id(), source, transform, None, note.gain());

            if let Err(e) = handle.start(offset, self.trigger_offset_secs) {
                tracing::warn!(track = %track.id(), note = %note.id, error = %e, "note skipped");
                continue;
            }

            let lifetime = handle.natural_duration_secs().max(self.release_floor_secs);
            tracing::trace!(
                track = %track.id(),
                pitch = note.pitch,
                semitones,
                lifetime,
                "note fired"
            );
            self.voices.push(EphemeralVoice {
                handle,
                release_at: now + lifetime,
            });
            started += 1;
        }
        started
    }

    /// Shift for a note, held to the engine's pitch range
    fn note_shift(&self, note: &PianoRollNote) -> f64 {
        let requested = note.effective_shift();
        let semitones = self.factory.config().clamp_pitch(requested);
        if semitones != requested {
            tracing::debug!(pitch = note.pitch, requested, semitones, "note shift clamped");
        }
        semitones
    }

    /// Stop and drop every voice whose lifetime has elapsed by `now`
    pub fn release_expired(&mut self, now: f64) -> usize {
        let before = self.voices.len();
        self.voices.retain_mut(|voice| {
            if voice.release_at <= now {
                voice.handle.stop();
                false
            } else {
                true
            }
        });
        before - self.voices.len()
    }

    /// Stop and drop every voice of one track
    pub fn release_track(&mut self, track: TrackId) {
        self.voices.retain_mut(|voice| {
            if voice.handle.track() == track {
                voice.handle.stop();
                false
            } else {
                true
            }
        });
    }

    /// Stop and drop every voice
    pub fn stop_all(&mut self) {
        for voice in &mut self.voices {
            voice.handle.stop();
        }
        self.voices.clear();
    }

    /// Voices currently alive
    pub fn active_count(&self) -> usize {
        self.voices.len()
    }

    /// Voices whose handle is still started
    pub fn started_count(&self) -> usize {
        self.voices.iter().filter(|v| v.handle.is_started()).count()
    }

    pub fn render_into(&mut self, bus: &mut AudioBuffer) {
        for voice in &mut self.voices {
            voice.handle.render_into(bus);
        }
    }
}
