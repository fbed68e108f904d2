//! Sequencer
//!
//! The facade the UI talks to. It owns the tracks, pattern data, clock,
//! graphs and players, and exposes two paths:
//!
//! - the control path (setters, edits, transport) which validates and
//!   mutates state
//! - the trigger path (`advance_to`, `render`) which fires due ticks and
//!   only reads pattern data
//!
//! Shared with the runner as `Arc<Mutex<Sequencer>>`; every mutation goes
//! through that one lock.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::engine::{AudioBuffer, ChannelLayout, SourceCache, SourceLoader};
use crate::error::{Result, SequencerError};
use crate::graph::{GraphFactory, TrackGraphManager};
use crate::mapper::Key;
use crate::pattern::{MutationSource, PatternStore, PianoRollNote, PianoRollStore};
use crate::playback::{LoopSyncEngine, PianoRollPlayer, StepContext, TriggerOutcome};
use crate::track::{LoopWindow, Track, TrackId, TrackSpec};
use crate::transport::{LoopRegion, PlayheadReceiver, PlayheadUpdate, TransportClock, TransportState};

/// What one fired tick did
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepEvent {
    pub tick: u64,
    pub step: usize,
    pub cycle: u64,
    /// Transport time the tick was due at
    pub time: f64,
    pub outcomes: Vec<(TrackId, TriggerOutcome)>,
    pub notes_fired: usize,
}

impl StepEvent {
    /// Tracks that began a sound on this tick
    pub fn triggered(&self) -> impl Iterator<Item = TrackId> + '_ {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| outcome.is_trigger())
            .map(|(id, _)| *id)
    }

    pub fn outcome(&self, track: TrackId) -> Option<&TriggerOutcome> {
        self.outcomes
            .iter()
            .find(|(id, _)| *id == track)
            .map(|(_, outcome)| outcome)
    }
}

/// Multi-track step sequencer
pub struct Sequencer {
    config: EngineConfig,
    tracks: HashMap<TrackId, Track>,
    patterns: PatternStore,
    piano_roll: PianoRollStore,
    clock: TransportClock,
    graphs: TrackGraphManager,
    loop_sync: LoopSyncEngine,
    piano: PianoRollPlayer,
    sources: SourceCache,
    playhead: watch::Sender<PlayheadUpdate>,
    rendered_frames: u64,
    /// Latest transport time seen by `advance_to` or `render`
    now: f64,
    /// Transport starts from stopped, so a tick thread can re-base its origin
    starts: u64,
    cycle: u64,
    last_step: Option<usize>,
}

impl Sequencer {
    /// Create an empty sequencer loading sources through `loader`
    pub fn new(config: EngineConfig, loader: Arc<dyn SourceLoader>) -> Result<Self> {
        let sources = SourceCache::new(loader, config.sample_rate);
        Self::with_sources(config, sources)
    }

    /// Create an empty sequencer sharing an existing source cache
    pub fn with_sources(config: EngineConfig, sources: SourceCache) -> Result<Self> {
        config.validate()?;
        if sources.sample_rate() != config.sample_rate {
            return Err(SequencerError::Config {
                reason: format!(
                    "source cache runs at {} Hz but the engine at {} Hz",
                    sources.sample_rate(),
                    config.sample_rate
                ),
            });
        }

        let patterns = PatternStore::new(config.pattern_length, config.grid_division)?;
        let clock = TransportClock::new(config.default_bpm, config.grid_division, config.pattern_length);
        let (playhead, _) = watch::channel(PlayheadUpdate::default());

        Ok(Self {
            graphs: TrackGraphManager::new(&config),
            loop_sync: LoopSyncEngine::new(config.trigger_offset_secs),
            piano: PianoRollPlayer::new(GraphFactory::new(config.clone())),
            piano_roll: PianoRollStore::new(),
            tracks: HashMap::new(),
            patterns,
            clock,
            sources,
            playhead,
            rendered_frames: 0,
            now: 0.0,
            starts: 0,
            cycle: 0,
            last_step: None,
            config,
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sources(&self) -> &SourceCache {
        &self.sources
    }

    pub fn patterns(&self) -> &PatternStore {
        &self.patterns
    }

    pub fn piano_roll(&self) -> &PianoRollStore {
        &self.piano_roll
    }

    pub fn clock(&self) -> &TransportClock {
        &self.clock
    }

    pub fn graphs(&self) -> &TrackGraphManager {
        &self.graphs
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(&id)
    }

    /// Tracks in display order
    pub fn tracks(&self) -> impl Iterator<Item = &Track> + '_ {
        self.patterns
            .track_ids()
            .iter()
            .filter_map(|id| self.tracks.get(id))
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn state(&self) -> TransportState {
        self.clock.state()
    }

    pub fn bpm(&self) -> f64 {
        self.clock.bpm()
    }

    pub fn pattern_length(&self) -> usize {
        self.patterns.len()
    }

    pub fn current_step(&self) -> usize {
        self.clock.current_step()
    }

    /// Subscribe to playhead updates
    pub fn playhead(&self) -> PlayheadReceiver {
        self.playhead.subscribe()
    }

    /// Started handles across every track graph and piano-roll voice
    pub fn started_count(&self) -> usize {
        self.graphs.started_count() + self.piano.started_count()
    }

    /// Live piano-roll voices
    pub fn active_voices(&self) -> usize {
        self.piano.active_count()
    }

    pub fn time_until_next_tick(&self, elapsed: f64) -> Option<f64> {
        self.clock.time_until_next_tick(elapsed)
    }

    /// How many times the transport has started from stopped
    ///
    /// Transport time restarts at zero on every start; a driver measuring
    /// wall-clock time re-bases its origin when this changes.
    pub fn start_count(&self) -> u64 {
        self.starts
    }

    // ========================================================================
    // Tracks
    // ========================================================================

    /// Add a track and start loading its source in the background
    pub fn add_track(&mut self, spec: TrackSpec) -> Result<TrackId> {
        let track = Track::from_spec(spec, &self.config)?;
        let id = track.id();
        self.sources.request(track.source());
        self.patterns.add_track(id);
        tracing::debug!(track = %id, name = track.name(), source = %track.source(), "track added");
        self.tracks.insert(id, track);
        Ok(id)
    }

    /// Load a track's source again if its last attempt failed
    ///
    /// The track stays silent until the new load lands.
    pub fn retry_source(&self, id: TrackId) -> Result<()> {
        let track = self
            .tracks
            .get(&id)
            .ok_or(SequencerError::TrackNotFound { track: id })?;
        self.sources.request(track.source());
        Ok(())
    }

    /// Remove a track, releasing its graph and voices
    pub fn remove_track(&mut self, id: TrackId) -> Result<Track> {
        let track = self
            .tracks
            .remove(&id)
            .ok_or(SequencerError::TrackNotFound { track: id })?;
        self.graphs.release(id);
        self.piano.release_track(id);
        self.patterns.remove_track(id);
        self.piano_roll.remove_track(id);
        tracing::debug!(track = %id, "track removed");
        Ok(track)
    }

    pub fn move_track(&mut self, id: TrackId, to: usize) -> Result<()> {
        self.patterns.move_track(id, to)
    }

    pub fn set_track_name(&mut self, id: TrackId, name: impl Into<String>) -> Result<()> {
        track_mut(&mut self.tracks, id)?.set_name(name);
        Ok(())
    }

    /// Set the tempo a track is played at
    ///
    /// The graph picks up the new rate on its next trigger or boundary.
    pub fn set_track_bpm(&mut self, id: TrackId, bpm: f64) -> Result<()> {
        track_mut(&mut self.tracks, id)?.set_current_bpm(bpm, &self.config)
    }

    pub fn set_original_bpm(&mut self, id: TrackId, bpm: f64) -> Result<()> {
        track_mut(&mut self.tracks, id)?.set_original_bpm(bpm, &self.config)
    }

    pub fn set_original_key(&mut self, id: TrackId, key: Key) -> Result<()> {
        track_mut(&mut self.tracks, id)?.set_original_key(key);
        Ok(())
    }

    /// Set a track's pitch shift and return the clamped value applied
    pub fn set_pitch_shift(&mut self, id: TrackId, semitones: f64) -> Result<f64> {
        Ok(track_mut(&mut self.tracks, id)?.set_pitch_shift(semitones, &self.config))
    }

    pub fn set_loop_window(&mut self, id: TrackId, window: Option<LoopWindow>) -> Result<()> {
        track_mut(&mut self.tracks, id)?.set_loop_window(window)
    }

    /// Mute or unmute a track
    ///
    /// The graph is kept; a sounding loop stops on the next tick.
    pub fn set_muted(&mut self, id: TrackId, muted: bool) -> Result<()> {
        track_mut(&mut self.tracks, id)?.set_muted(muted);
        if muted {
            self.piano.release_track(id);
        }
        Ok(())
    }

    pub fn set_solo(&mut self, id: TrackId, solo: bool) -> Result<()> {
        track_mut(&mut self.tracks, id)?.set_solo(solo);
        Ok(())
    }

    pub fn set_locked(&mut self, id: TrackId, locked: bool) -> Result<()> {
        track_mut(&mut self.tracks, id)?.set_locked(locked);
        Ok(())
    }

    /// Whether a track is heard, taking solo into account
    pub fn is_audible(&self, id: TrackId) -> bool {
        let any_solo = self.tracks.values().any(Track::is_solo);
        self.tracks
            .get(&id)
            .map_or(false, |t| audible(t, any_solo))
    }

    // ========================================================================
    // Global settings
    // ========================================================================

    /// Change the transport tempo without breaking the grid
    ///
    /// Re-anchors at the latest transport time the sequencer has seen.
    pub fn set_bpm(&mut self, bpm: f64) -> Result<()> {
        self.set_bpm_at(bpm, self.now)
    }

    /// Change the tempo at transport time `now`
    pub fn set_bpm_at(&mut self, bpm: f64, now: f64) -> Result<()> {
        let bpm = self.config.check_bpm("bpm", bpm)?;
        self.clock.set_bpm(bpm, now);
        tracing::debug!(bpm, now, "tempo changed");
        Ok(())
    }

    pub fn set_grid_division(&mut self, grid_division: u32) -> Result<()> {
        self.patterns.set_grid_division(grid_division)?;
        self.clock.set_grid_division(grid_division, self.now);
        Ok(())
    }

    /// Change the global step count for every track
    pub fn resize_pattern(&mut self, length: usize, source: MutationSource) -> Result<()> {
        self.patterns.resize(length, source)?;
        self.clock.set_pattern_length(length);
        Ok(())
    }

    pub fn set_loop_region(&mut self, region: Option<LoopRegion>) -> Result<()> {
        self.clock.set_loop_region(region)
    }

    // ========================================================================
    // Pattern edits
    // ========================================================================

    pub fn toggle_step(&mut self, id: TrackId, index: usize) -> Result<bool> {
        self.ensure_editable(id)?;
        self.patterns.toggle_step(id, index)
    }

    pub fn set_step(&mut self, id: TrackId, index: usize, value: bool) -> Result<()> {
        self.ensure_editable(id)?;
        self.patterns.set_step(id, index, value)
    }

    pub fn clear_track(&mut self, id: TrackId) -> Result<()> {
        self.ensure_editable(id)?;
        self.patterns.clear(id)
    }

    /// Replace a track's grid from a saved session
    pub fn set_pattern_wholesale(&mut self, id: TrackId, data: &[bool]) -> Result<()> {
        self.patterns.set_pattern_wholesale(id, data)
    }

    pub fn add_note(&mut self, id: TrackId, note: PianoRollNote) -> Result<Uuid> {
        self.ensure_editable(id)?;
        self.piano_roll.add_note(id, note)
    }

    pub fn remove_note(&mut self, id: TrackId, note: Uuid) -> Result<bool> {
        self.ensure_editable(id)?;
        Ok(self.piano_roll.remove_note(id, note))
    }

    /// Replace a track's notes from a saved session
    pub fn set_piano_roll_wholesale(&mut self, id: TrackId, notes: Vec<PianoRollNote>) -> Result<()> {
        if !self.tracks.contains_key(&id) {
            return Err(SequencerError::TrackNotFound { track: id });
        }
        self.piano_roll.set_piano_roll_wholesale(id, notes)
    }

    /// Write a hit at the playhead while recording
    ///
    /// Returns the step written.
    pub fn record_hit(&mut self, id: TrackId) -> Result<usize> {
        if self.clock.state() != TransportState::Recording {
            return Err(SequencerError::invalid(
                "transport",
                self.clock.state(),
                "Recording",
            ));
        }
        let step = self.clock.current_step();
        self.set_step(id, step, true)?;
        Ok(step)
    }

    fn ensure_editable(&self, id: TrackId) -> Result<()> {
        match self.tracks.get(&id) {
            None => Err(SequencerError::TrackNotFound { track: id }),
            Some(track) if track.is_locked() => Err(SequencerError::TrackLocked { track: id }),
            Some(_) => Ok(()),
        }
    }

    // ========================================================================
    // Transport
    // ========================================================================

    /// Start playing from step 0; no-op if already running
    ///
    /// Transport time restarts at zero: tick 0 is due immediately.
    pub fn play(&mut self) {
        if !self.clock.is_running() {
            self.rewind();
            self.starts += 1;
        }
        self.clock.start(0.0);
        self.publish(None);
    }

    pub fn record(&mut self) {
        if !self.clock.is_running() {
            self.rewind();
            self.starts += 1;
        }
        self.clock.record(0.0);
        self.publish(None);
    }

    /// Halt every sounding resource and rewind to step 0
    pub fn stop(&mut self) {
        self.clock.stop();
        self.graphs.stop_all();
        self.piano.stop_all();
        self.rewind();
        self.publish(None);
    }

    fn rewind(&mut self) {
        self.rendered_frames = 0;
        self.now = 0.0;
        self.cycle = 0;
        self.last_step = None;
    }

    /// Fire the tick due at transport time `elapsed`, if any
    pub fn advance_to(&mut self, elapsed: f64) -> Option<StepEvent> {
        self.now = elapsed;
        let tick = self.clock.poll(elapsed)?;
        let event = self.fire_tick(tick);
        self.publish(Some(&event));
        Some(event)
    }

    fn fire_tick(&mut self, tick: u64) -> StepEvent {
        let time = self.clock.tick_time(tick);
        let step = self.clock.step_for_tick(tick);
        let cycle = self.count_cycle(tick, step);
        let length = self.patterns.len();
        let ctx = StepContext {
            step,
            cycle_start: self.clock.is_cycle_start(tick),
            pattern_duration: self.clock.cycle_duration(),
            patterns: &self.patterns,
            sources: &self.sources,
        };

        let any_solo = self.tracks.values().any(Track::is_solo);
        let mut outcomes = Vec::with_capacity(self.tracks.len());
        let mut notes_fired = 0;

        for id in self.patterns.track_ids() {
            let Some(track) = self.tracks.get(id) else {
                continue;
            };
            let audible = audible(track, any_solo);
            let outcome = self.loop_sync.trigger(&ctx, track, audible, &mut self.graphs);
            if audible {
                let notes = self.piano_roll.notes_at(*id, step, length);
                notes_fired += self.piano.fire(time, track, notes, &self.sources);
            }
            outcomes.push((*id, outcome));
        }

        let released = self.piano.release_expired(time);
        tracing::trace!(tick, step, notes_fired, released, "step fired");

        StepEvent {
            tick,
            step,
            cycle,
            time,
            outcomes,
            notes_fired,
        }
    }

    /// Count cycles as they play, so a resize or region change never
    /// renumbers the ones already heard
    fn count_cycle(&mut self, tick: u64, step: usize) -> u64 {
        if let Some(prev) = self.last_step {
            if self.clock.is_cycle_start(tick) || step <= prev {
                self.cycle += 1;
            }
        }
        self.last_step = Some(step);
        self.cycle
    }

    fn publish(&self, event: Option<&StepEvent>) {
        let update = match event {
            Some(e) => PlayheadUpdate {
                step: e.step,
                tick: e.tick,
                cycle: e.cycle,
                state: self.clock.state(),
            },
            None => PlayheadUpdate {
                step: self.clock.current_step(),
                tick: self.clock.last_tick().unwrap_or(0),
                cycle: self.cycle,
                state: self.clock.state(),
            },
        };
        self.playhead.send_replace(update);
    }

    // ========================================================================
    // Rendering
    // ========================================================================

    /// Render the next `frames` frames of transport time
    ///
    /// Ticks fire on the exact frame they fall due, so triggers are
    /// sample-accurate regardless of block size.
    pub fn render(&mut self, frames: usize) -> AudioBuffer {
        let sample_rate = self.config.sample_rate;
        let mut output = AudioBuffer::new(frames, ChannelLayout::Stereo, sample_rate);
        let mut pos = 0;

        while pos < frames {
            let now = self.rendered_frames as f64 / sample_rate as f64;
            self.advance_to(now);

            let end = match self.clock.time_until_next_tick(now) {
                Some(wait) => {
                    let until = (wait * sample_rate as f64).ceil() as usize;
                    pos + until.clamp(1, frames - pos)
                }
                None => frames,
            };

            let mut segment = AudioBuffer::new(end - pos, ChannelLayout::Stereo, sample_rate);
            self.graphs.render_into(&mut segment);
            self.piano.render_into(&mut segment);
            output.mix_from(&segment, pos);

            self.rendered_frames += (end - pos) as u64;
            pos = end;
        }
        self.now = self.rendered_frames as f64 / sample_rate as f64;
        output
    }

    /// Render `cycles` full pattern cycles from step 0
    ///
    /// Sources are loaded on the calling thread first. The transport is
    /// stopped before and after.
    pub fn render_offline(&mut self, cycles: u32) -> Result<AudioBuffer> {
        if cycles == 0 {
            return Err(SequencerError::invalid("cycles", cycles, "at least 1"));
        }
        for track in self.tracks.values() {
            if let Err(e) = self.sources.load_blocking(track.source()) {
                tracing::warn!(track = %track.id(), error = %e, "source unavailable, track will be silent");
            }
        }

        self.stop();
        self.play();
        let seconds = self.clock.cycle_duration() * cycles as f64;
        let frames = (seconds * self.config.sample_rate as f64).round() as usize;

        let mut output = AudioBuffer::new(frames, ChannelLayout::Stereo, self.config.sample_rate);
        let block = self.config.block_size.max(1);
        let mut pos = 0;
        while pos < frames {
            let len = block.min(frames - pos);
            let chunk = self.render(len);
            output.mix_from(&chunk, pos);
            pos += len;
        }

        self.stop();
        tracing::debug!(cycles, frames, "offline render finished");
        Ok(output)
    }
}

fn audible(track: &Track, any_solo: bool) -> bool {
    !track.is_muted() && (!any_solo || track.is_solo())
}

fn track_mut(tracks: &mut HashMap<TrackId, Track>, id: TrackId) -> Result<&mut Track> {
    tracks
        .get_mut(&id)
        .ok_or(SequencerError::TrackNotFound { track: id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{generate_click, generate_test_tone, WavLoader};
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;

    fn sequencer() -> Sequencer {
        Sequencer::new(EngineConfig::default(), Arc::new(WavLoader::new())).unwrap()
    }

    fn add_ready(seq: &mut Sequencer, spec: TrackSpec, secs: f32) -> TrackId {
        seq.sources()
            .insert_ready(spec.source.clone(), generate_test_tone(220.0, secs, 48000));
        seq.add_track(spec).unwrap()
    }

    fn run_steps(seq: &mut Sequencer, steps: u64) -> Vec<StepEvent> {
        let dur = seq.clock().step_duration();
        (0..steps)
            .filter_map(|i| seq.advance_to(i as f64 * dur))
            .collect()
    }

    #[test]
    fn test_one_shot_fires_on_active_steps() {
        let mut seq = sequencer();
        let kick = add_ready(&mut seq, TrackSpec::new("kick", "kick.wav", 120.0), 0.1);
        seq.set_step(kick, 0, true).unwrap();
        seq.set_step(kick, 8, true).unwrap();
        seq.play();

        let events = run_steps(&mut seq, 16);
        let fired: Vec<usize> = events
            .iter()
            .filter(|e| e.triggered().any(|id| id == kick))
            .map(|e| e.step)
            .collect();
        assert_eq!(fired, vec![0, 8]);
    }

    #[test]
    fn test_stop_leaves_nothing_started() {
        let mut seq = sequencer();
        let lp = add_ready(&mut seq, TrackSpec::new("loop", "loop.wav", 120.0).with_loop(0.0, 1.0), 2.0);
        let keys = add_ready(&mut seq, TrackSpec::new("keys", "keys.wav", 120.0), 1.0);
        seq.set_step(lp, 0, true).unwrap();
        seq.add_note(keys, PianoRollNote::new(64, 0, 1, 100)).unwrap();
        seq.play();
        run_steps(&mut seq, 4);
        assert!(seq.started_count() >= 2);

        seq.stop();
        assert_eq!(seq.started_count(), 0);
        assert_eq!(seq.active_voices(), 0);
        assert_eq!(seq.current_step(), 0);
        assert!(seq.clock().loop_region().is_none());
    }

    #[test]
    fn test_solo_mutes_other_tracks() {
        let mut seq = sequencer();
        let a = add_ready(&mut seq, TrackSpec::new("a", "a.wav", 120.0), 0.1);
        let b = add_ready(&mut seq, TrackSpec::new("b", "b.wav", 120.0), 0.1);
        seq.set_step(a, 0, true).unwrap();
        seq.set_step(b, 0, true).unwrap();
        seq.set_solo(b, true).unwrap();
        seq.play();

        let event = seq.advance_to(0.0).unwrap();
        assert_eq!(event.outcome(a), Some(&TriggerOutcome::Muted));
        assert_eq!(event.outcome(b), Some(&TriggerOutcome::Started));
        assert!(!seq.is_audible(a));
    }

    #[test]
    fn test_locked_track_rejects_edits_but_accepts_restore() {
        let mut seq = sequencer();
        let id = add_ready(&mut seq, TrackSpec::new("a", "a.wav", 120.0), 0.1);
        seq.set_locked(id, true).unwrap();

        assert!(matches!(seq.toggle_step(id, 0), Err(SequencerError::TrackLocked { .. })));
        assert!(matches!(
            seq.add_note(id, PianoRollNote::new(60, 0, 1, 100)),
            Err(SequencerError::TrackLocked { .. })
        ));
        seq.set_pattern_wholesale(id, &[true, false, true]).unwrap();
        assert!(seq.patterns().get(id, 2));
    }

    #[test]
    fn test_unknown_track_errors() {
        let mut seq = sequencer();
        let ghost = TrackId::new();
        assert!(matches!(seq.set_muted(ghost, true), Err(SequencerError::TrackNotFound { .. })));
        assert!(seq.remove_track(ghost).is_err());
    }

    #[test]
    fn test_bpm_bounds_enforced() {
        let mut seq = sequencer();
        assert!(seq.set_bpm(10.0).is_err());
        assert!(seq.set_bpm(400.0).is_err());
        seq.set_bpm(90.0).unwrap();
        assert_relative_eq!(seq.bpm(), 90.0);
    }

    #[test]
    fn test_record_hit_writes_at_playhead() {
        let mut seq = sequencer();
        let id = add_ready(&mut seq, TrackSpec::new("a", "a.wav", 120.0), 0.1);
        assert!(seq.record_hit(id).is_err());

        seq.record();
        run_steps(&mut seq, 4);
        assert_eq!(seq.record_hit(id).unwrap(), 3);
        assert!(seq.patterns().get(id, 3));
    }

    #[test]
    fn test_playhead_published_per_tick() {
        let mut seq = sequencer();
        let mut rx = seq.playhead();
        seq.play();
        run_steps(&mut seq, 18);
        let update = *rx.borrow_and_update();
        assert_eq!(update.step, 1);
        assert_eq!(update.tick, 17);
        assert_eq!(update.cycle, 1);
    }

    #[test]
    fn test_cycle_count_survives_resize() {
        let mut seq = sequencer();
        seq.play();
        let mut cycles: Vec<u64> = run_steps(&mut seq, 10).iter().map(|e| e.cycle).collect();
        assert_eq!(cycles.last(), Some(&0));

        // Tick 10 of a 4-step pattern is step 2; it still belongs to the second cycle
        seq.resize_pattern(4, MutationSource::Edit).unwrap();
        let dur = seq.clock().step_duration();
        for tick in 10..16 {
            cycles.push(seq.advance_to(tick as f64 * dur).unwrap().cycle);
        }
        assert_eq!(&cycles[10..], &[1, 1, 2, 2, 2, 2]);
        assert!(cycles.windows(2).all(|w| w[1] == w[0] || w[1] == w[0] + 1));
    }

    #[test]
    fn test_cycle_count_follows_loop_region() {
        let mut seq = sequencer();
        seq.play();
        run_steps(&mut seq, 20);
        assert_eq!(seq.playhead().borrow().cycle, 1);

        seq.set_loop_region(Some(LoopRegion { start: 0, end: 2 })).unwrap();
        let dur = seq.clock().step_duration();
        let cycles: Vec<u64> = (20..24)
            .map(|tick| seq.advance_to(tick as f64 * dur).unwrap().cycle)
            .collect();
        assert_eq!(cycles, vec![2, 2, 3, 3]);

        seq.stop();
        assert_eq!(seq.playhead().borrow().cycle, 0);
    }

    #[test]
    fn test_tempo_change_uses_latest_transport_time() {
        let mut seq = sequencer();
        seq.play();
        seq.advance_to(0.0);
        // Nothing due yet at 0.1; the 120 BPM step is 80% played
        assert!(seq.advance_to(0.1).is_none());
        seq.set_bpm(240.0).unwrap();
        assert_relative_eq!(seq.time_until_next_tick(0.1).unwrap(), 0.0125, epsilon = 1e-9);
    }

    #[test]
    fn test_every_start_from_stopped_is_counted() {
        let mut seq = sequencer();
        seq.play();
        seq.play();
        assert_eq!(seq.start_count(), 1);
        seq.stop();
        seq.record();
        assert_eq!(seq.start_count(), 2);
    }

    #[test]
    fn test_remove_track_releases_everything() {
        let mut seq = sequencer();
        let id = add_ready(&mut seq, TrackSpec::new("loop", "loop.wav", 120.0).with_loop(0.0, 1.0), 2.0);
        seq.set_step(id, 0, true).unwrap();
        seq.play();
        run_steps(&mut seq, 1);
        assert_eq!(seq.graphs().len(), 1);

        seq.remove_track(id).unwrap();
        assert!(seq.graphs().is_empty());
        assert!(seq.patterns().pattern(id).is_none());
        assert_eq!(seq.track_count(), 0);
    }

    #[test]
    fn test_render_places_hit_on_tick_frame() {
        let mut seq = sequencer();
        let spec = TrackSpec::new("click", "click.wav", 120.0);
        seq.sources()
            .insert_ready(spec.source.clone(), generate_click(1000.0, 0.01, 48000));
        let id = seq.add_track(spec).unwrap();
        seq.set_step(id, 1, true).unwrap();
        seq.play();

        // Step 1 falls at 0.125s = frame 6000, plus the trigger offset
        let out = seq.render(9000);
        let first = out.samples[0].iter().position(|s| s.abs() > 1e-4).unwrap();
        let expected = 6000 + (seq.config().trigger_offset_secs * 48000.0) as usize;
        assert!((first as i64 - expected as i64).abs() <= 2, "first sound at {first}");
    }

    #[test]
    fn test_render_offline_length() {
        let mut seq = sequencer();
        let out = seq.render_offline(2).unwrap();
        assert_eq!(out.len(), 4 * 48000);
        assert_eq!(seq.state(), TransportState::Stopped);
        assert!(seq.render_offline(0).is_err());
    }
}
