//! Track Audio Graph Manager
//!
//! Owns the track -> handle map. A handle is built lazily the first time a
//! track needs to sound and is replaced, never patched, when its governing
//! parameters drift past the configured epsilons.

use std::collections::HashMap;

use super::handle::AudioGraphHandle;
use super::transform::GraphFactory;
use crate::config::EngineConfig;
use crate::engine::{AudioBuffer, SourceCache};
use crate::track::{LoopWindow, Track, TrackId};

/// Parameters a handle was built from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GraphParams {
    pub rate: f64,
    pub pitch_shift: f64,
    pub loop_window: Option<LoopWindow>,
}

impl GraphParams {
    pub fn from_track(track: &Track) -> Self {
        Self {
            rate: track.playback_rate(),
            pitch_shift: track.pitch_shift(),
            loop_window: track.loop_window(),
        }
    }
}

struct GraphEntry {
    handle: AudioGraphHandle,
    params: GraphParams,
}

/// Per-track graph lifecycle
pub struct TrackGraphManager {
    factory: GraphFactory,
    entries: HashMap<TrackId, GraphEntry>,
    rate_epsilon: f64,
    pitch_epsilon: f64,
    rebuilds: u64,
}

impl TrackGraphManager {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            factory: GraphFactory::new(config.clone()),
            entries: HashMap::new(),
            rate_epsilon: config.rate_epsilon,
            pitch_epsilon: config.pitch_epsilon,
            rebuilds: 0,
        }
    }

    pub fn factory(&self) -> &GraphFactory {
        &self.factory
    }

    /// Whether `track` needs a new handle for `params`
    ///
    /// True when no handle exists, the rate or pitch moved past their
    /// epsilons, or the loop window changed at all.
    pub fn needs_reload(&self, track: TrackId, params: &GraphParams) -> bool {
        match self.entries.get(&track) {
            None => true,
            Some(entry) => {
                (entry.params.rate - params.rate).abs() > self.rate_epsilon
                    || (entry.params.pitch_shift - params.pitch_shift).abs() > self.pitch_epsilon
                    || entry.params.loop_window != params.loop_window
            }
        }
    }

    /// Return the track's handle, rebuilding it first if needed
    ///
    /// `None` while the source is not ready (still loading, failed, or the
    /// cache is busy); the caller skips the track this cycle.
    pub fn ensure(&mut self, track: &Track, sources: &SourceCache) -> Option<&mut AudioGraphHandle> {
        let id = track.id();
        let params = GraphParams::from_track(track);

        if self.needs_reload(id, &params) {
            let source = sources.ready(track.source())?;

            // Old graph is fully stopped and dropped before the new one exists
            if let Some(mut old) = self.entries.remove(&id) {
                old.handle.stop();
                drop(old);
            }

            let transform = self.factory.select(params.rate, params.pitch_shift);
            let handle = self
                .factory
                .build(id, source, transform, params.loop_window, 1.0);
            tracing::debug!(
                track = %id,
                handle = %handle.id(),
                transform = transform.label(),
                rate = params.rate,
                semitones = params.pitch_shift,
                "graph rebuilt"
            );
            self.rebuilds += 1;
            self.entries.insert(id, GraphEntry { handle, params });
        }

        self.entries.get_mut(&id).map(|entry| &mut entry.handle)
    }

    pub fn get(&self, track: TrackId) -> Option<&AudioGraphHandle> {
        self.entries.get(&track).map(|entry| &entry.handle)
    }

    pub fn get_mut(&mut self, track: TrackId) -> Option<&mut AudioGraphHandle> {
        self.entries.get_mut(&track).map(|entry| &mut entry.handle)
    }

    /// Stop and drop a track's handle
    pub fn release(&mut self, track: TrackId) -> bool {
        match self.entries.remove(&track) {
            Some(mut entry) => {
                entry.handle.stop();
                tracing::debug!(track = %track, handle = %entry.handle.id(), "graph released");
                true
            }
            None => false,
        }
    }

    /// Stop every handle, keeping them for the next start
    pub fn stop_all(&mut self) {
        for entry in self.entries.values_mut() {
            entry.handle.stop();
        }
    }

    pub fn started_count(&self) -> usize {
        self.entries.values().filter(|e| e.handle.is_started()).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of handles built so far
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds
    }

    /// Render every started handle into `bus`
    pub fn render_into(&mut self, bus: &mut AudioBuffer) {
        for entry in self.entries.values_mut() {
            entry.handle.render_into(bus);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{generate_test_tone, WavLoader};
    use crate::track::TrackSpec;
    use std::sync::Arc;

    fn setup(spec: TrackSpec) -> (TrackGraphManager, SourceCache, Track, EngineConfig) {
        let config = EngineConfig::default();
        let cache = SourceCache::new(Arc::new(WavLoader::new()), config.sample_rate);
        cache.insert_ready(spec.source.clone(), generate_test_tone(220.0, 2.0, config.sample_rate));
        let track = Track::from_spec(spec, &config).unwrap();
        (TrackGraphManager::new(&config), cache, track, config)
    }

    #[test]
    fn test_lazy_build_once() {
        let (mut graphs, cache, track, _) = setup(TrackSpec::new("a", "a.wav", 120.0));
        assert!(graphs.needs_reload(track.id(), &GraphParams::from_track(&track)));

        let first = graphs.ensure(&track, &cache).unwrap().id();
        let second = graphs.ensure(&track, &cache).unwrap().id();
        assert_eq!(first, second);
        assert_eq!(graphs.rebuild_count(), 1);
    }

    #[test]
    fn test_small_changes_do_not_rebuild() {
        let (mut graphs, cache, mut track, config) = setup(TrackSpec::new("a", "a.wav", 120.0));
        let first = graphs.ensure(&track, &cache).unwrap().id();

        track.set_pitch_shift(0.05, &config);
        track.set_current_bpm(120.1, &config).unwrap();
        assert_eq!(graphs.ensure(&track, &cache).unwrap().id(), first);
    }

    #[test]
    fn test_pitch_change_rebuilds_and_stops_old() {
        let (mut graphs, cache, mut track, config) = setup(TrackSpec::new("a", "a.wav", 120.0));
        let old = graphs.ensure(&track, &cache).unwrap();
        old.start(0.0, 0.0).unwrap();
        let old_id = old.id();

        track.set_pitch_shift(3.0, &config);
        let new = graphs.ensure(&track, &cache).unwrap();
        assert_ne!(new.id(), old_id);
        assert!(!new.is_started());
        assert_eq!(new.transform().label(), "shifted-light");
        assert_eq!(graphs.len(), 1);
        assert_eq!(graphs.started_count(), 0);
    }

    #[test]
    fn test_rate_change_rebuilds() {
        let (mut graphs, cache, mut track, config) = setup(TrackSpec::new("a", "a.wav", 120.0));
        let first = graphs.ensure(&track, &cache).unwrap().id();
        track.set_current_bpm(90.0, &config).unwrap();
        assert_ne!(graphs.ensure(&track, &cache).unwrap().id(), first);
    }

    #[test]
    fn test_loop_window_change_rebuilds() {
        let spec = TrackSpec::new("a", "a.wav", 120.0).with_loop(0.0, 1.0);
        let (mut graphs, cache, mut track, _) = setup(spec);
        let first = graphs.ensure(&track, &cache).unwrap().id();
        track.set_loop_window(Some(LoopWindow::new(0.0, 0.5).unwrap())).unwrap();
        assert_ne!(graphs.ensure(&track, &cache).unwrap().id(), first);
    }

    #[test]
    fn test_source_not_ready_skips() {
        let config = EngineConfig::default();
        let cache = SourceCache::new(Arc::new(WavLoader::new()), config.sample_rate);
        let track = Track::from_spec(TrackSpec::new("a", "missing.wav", 120.0), &config).unwrap();
        let mut graphs = TrackGraphManager::new(&config);
        assert!(graphs.ensure(&track, &cache).is_none());
        assert!(graphs.is_empty());
    }

    #[test]
    fn test_release_and_stop_all() {
        let (mut graphs, cache, track, _) = setup(TrackSpec::new("a", "a.wav", 120.0));
        graphs.ensure(&track, &cache).unwrap().start(0.0, 0.0).unwrap();
        assert_eq!(graphs.started_count(), 1);

        graphs.stop_all();
        assert_eq!(graphs.started_count(), 0);
        assert_eq!(graphs.len(), 1);

        assert!(graphs.release(track.id()));
        assert!(!graphs.release(track.id()));
        assert!(graphs.is_empty());
    }
}
