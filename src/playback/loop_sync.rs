//! Loop Synchronization Engine
//!
//! Makes looped material fill the pattern exactly. A loop window of length
//! `L` inside a pattern of duration `D` is extended to
//! `loop_start + L * ceil(D / L)` so the loop restarts on pattern
//! boundaries. Looping tracks sound continuously from their first active
//! step; at each boundary a track whose loop end no longer matches is
//! restarted from its loop start. One-shot tracks restart on every active
//! step, never overlapping themselves.

use serde::Serialize;

use crate::engine::SourceCache;
use crate::graph::TrackGraphManager;
use crate::pattern::PatternStore;
use crate::track::{LoopWindow, Track, TrackId};

/// Tolerance when comparing a live loop end to the computed one (seconds)
pub const LOOP_END_EPSILON: f64 = 1e-6;

/// Number of base-loop repetitions covering a pattern
///
/// Always at least 1.
pub fn repeat_count(pattern_duration: f64, loop_duration: f64) -> u32 {
    if loop_duration <= 0.0 || pattern_duration <= 0.0 {
        return 1;
    }
    // Guard against 4.0 / 2.0 landing a hair above 2
    let ratio = pattern_duration / loop_duration;
    let rounded = ratio.round();
    let count = if (ratio - rounded).abs() < 1e-9 {
        rounded
    } else {
        ratio.ceil()
    };
    (count as u32).max(1)
}

/// Loop end that makes `window` span at least `pattern_duration`
pub fn extended_loop_end(window: &LoopWindow, pattern_duration: f64) -> f64 {
    window.start + window.duration() * repeat_count(pattern_duration, window.duration()) as f64
}

/// What happened to one track on one step
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TriggerOutcome {
    /// Nothing to do on this step
    Idle,
    /// Muted (or solo-muted); any sounding graph was stopped
    Muted,
    /// Source not ready or playback failed; silent this cycle
    Skipped,
    /// Graph started fresh
    Started,
    /// Loop restarted at a pattern boundary
    Restarted,
    /// Loop left running across the boundary
    Continued,
}

impl TriggerOutcome {
    /// Whether a sound began on this step
    pub fn is_trigger(&self) -> bool {
        matches!(self, TriggerOutcome::Started | TriggerOutcome::Restarted)
    }
}

/// Per-step inputs shared by every track
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    /// Step index within the pattern
    pub step: usize,
    /// True on the first step of a cycle
    pub cycle_start: bool,
    /// Seconds covered by one cycle
    pub pattern_duration: f64,
    pub patterns: &'a PatternStore,
    pub sources: &'a SourceCache,
}

/// Step-trigger logic for looping and one-shot tracks
#[derive(Debug, Clone)]
pub struct LoopSyncEngine {
    trigger_offset_secs: f64,
}

impl LoopSyncEngine {
    pub fn new(trigger_offset_secs: f64) -> Self {
        Self {
            trigger_offset_secs,
        }
    }

    /// Run the trigger path for one track on one step
    pub fn trigger(
        &self,
        ctx: &StepContext<'_>,
        track: &Track,
        audible: bool,
        graphs: &mut TrackGraphManager,
    ) -> TriggerOutcome {
        let id = track.id();
        if !audible {
            if let Some(handle) = graphs.get_mut(id) {
                handle.stop();
            }
            return TriggerOutcome::Muted;
        }

        match track.loop_window() {
            Some(window) => self.trigger_loop(ctx, track, window, graphs),
            None => self.trigger_one_shot(ctx, track, graphs),
        }
    }

    fn trigger_loop(
        &self,
        ctx: &StepContext<'_>,
        track: &Track,
        window: LoopWindow,
        graphs: &mut TrackGraphManager,
    ) -> TriggerOutcome {
        let id = track.id();
        let sounding = graphs.get(id).map_or(false, |h| h.is_started());
        let hit = ctx.patterns.get(id, ctx.step);

        // Running loops are only touched at boundaries
        if sounding && !ctx.cycle_start {
            return TriggerOutcome::Idle;
        }
        if !sounding && !hit {
            return TriggerOutcome::Idle;
        }

        let extended = extended_loop_end(&window, ctx.pattern_duration);
        let Some(handle) = graphs.ensure(track, ctx.sources) else {
            return TriggerOutcome::Skipped;
        };

        if handle.is_started() {
            let current = handle.loop_end().unwrap_or(window.end);
            if (current - extended).abs() <= LOOP_END_EPSILON {
                return TriggerOutcome::Continued;
            }
            handle.stop();
        }

        let restarted = sounding;
        let result = handle
            .set_loop_end(extended)
            .and_then(|_| handle.start(window.start, 0.0));
        match result {
            Ok(()) => {
                tracing::trace!(track = %id, step = ctx.step, loop_end = extended, "loop started");
                if restarted {
                    TriggerOutcome::Restarted
                } else {
                    TriggerOutcome::Started
                }
            }
            Err(e) => self.fail(id, graphs, e),
        }
    }

    fn trigger_one_shot(
        &self,
        ctx: &StepContext<'_>,
        track: &Track,
        graphs: &mut TrackGraphManager,
    ) -> TriggerOutcome {
        let id = track.id();
        if !ctx.patterns.get(id, ctx.step) {
            return TriggerOutcome::Idle;
        }
        let Some(handle) = graphs.ensure(track, ctx.sources) else {
            return TriggerOutcome::Skipped;
        };

        handle.stop();
        match handle.start(0.0, self.trigger_offset_secs) {
            Ok(()) => TriggerOutcome::Started,
            Err(e) => self.fail(id, graphs, e),
        }
    }

    /// Clear the handle after a playback failure
    fn fail(
        &self,
        track: TrackId,
        graphs: &mut TrackGraphManager,
        error: crate::error::SequencerError,
    ) -> TriggerOutcome {
        tracing::warn!(track = %track, error = %error, "playback failed, track skipped");
        graphs.release(track);
        TriggerOutcome::Skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::{generate_test_tone, WavLoader};
    use crate::track::TrackSpec;
    use approx::assert_relative_eq;
    use std::sync::Arc;
    use test_case::test_case;

    #[test]
    fn test_extension_scenario() {
        let window = LoopWindow::new(0.0, 1.5).unwrap();
        assert_eq!(repeat_count(4.0, 1.5), 3);
        assert_relative_eq!(extended_loop_end(&window, 4.0), 4.5);
    }

    #[test_case(2.0, 2.0, 1 ; "exact fit")]
    #[test_case(4.0, 2.0, 2 ; "exact multiple")]
    #[test_case(1.0, 2.0, 1 ; "loop longer than pattern")]
    #[test_case(4.1, 2.0, 3 ; "just over")]
    #[test_case(0.0, 2.0, 1 ; "empty pattern")]
    fn test_repeat_count(pattern: f64, loop_dur: f64, expected: u32) {
        assert_eq!(repeat_count(pattern, loop_dur), expected);
    }

    #[test]
    fn test_extension_bounds_hold() {
        for start in [0.0, 0.25, 1.0] {
            for loop_dur in [0.3, 0.75, 1.5, 2.0, 3.7] {
                for pattern in [0.5, 2.0, 4.0, 7.3, 16.0] {
                    let window = LoopWindow::new(start, start + loop_dur).unwrap();
                    let end = extended_loop_end(&window, pattern);
                    let count = repeat_count(pattern, loop_dur) as f64;
                    assert!(end >= start + pattern - 1e-6);
                    assert!(end - start < loop_dur * (count + 1.0));
                }
            }
        }
    }

    struct Fixture {
        config: EngineConfig,
        patterns: PatternStore,
        sources: SourceCache,
        graphs: TrackGraphManager,
        engine: LoopSyncEngine,
    }

    impl Fixture {
        fn new() -> Self {
            let config = EngineConfig::default();
            Self {
                patterns: PatternStore::new(16, 16).unwrap(),
                sources: SourceCache::new(Arc::new(WavLoader::new()), config.sample_rate),
                graphs: TrackGraphManager::new(&config),
                engine: LoopSyncEngine::new(config.trigger_offset_secs),
                config,
            }
        }

        fn track(&mut self, spec: TrackSpec, steps: &[usize]) -> Track {
            self.sources
                .insert_ready(spec.source.clone(), generate_test_tone(110.0, 3.0, self.config.sample_rate));
            let track = Track::from_spec(spec, &self.config).unwrap();
            self.patterns.add_track(track.id());
            for &s in steps {
                self.patterns.set_step(track.id(), s, true).unwrap();
            }
            track
        }

        fn fire(&mut self, track: &Track, step: usize, audible: bool) -> TriggerOutcome {
            let ctx = StepContext {
                step,
                cycle_start: step == 0,
                pattern_duration: 2.0,
                patterns: &self.patterns,
                sources: &self.sources,
            };
            self.engine.trigger(&ctx, track, audible, &mut self.graphs)
        }
    }

    #[test]
    fn test_loop_starts_on_first_active_step_and_continues() {
        let mut fx = Fixture::new();
        let track = fx.track(TrackSpec::new("loop", "loop.wav", 120.0).with_loop(0.0, 1.5), &[4]);

        assert_eq!(fx.fire(&track, 0, true), TriggerOutcome::Idle);
        assert_eq!(fx.fire(&track, 4, true), TriggerOutcome::Started);
        let handle = fx.graphs.get(track.id()).unwrap();
        assert_relative_eq!(handle.loop_end().unwrap(), 3.0);

        for step in 5..16 {
            assert_eq!(fx.fire(&track, step, true), TriggerOutcome::Idle);
        }
        assert_eq!(fx.fire(&track, 0, true), TriggerOutcome::Continued);
        assert_eq!(fx.fire(&track, 4, true), TriggerOutcome::Idle);
        assert!(fx.graphs.get(track.id()).unwrap().is_started());
    }

    #[test]
    fn test_boundary_restart_after_parameter_change() {
        let mut fx = Fixture::new();
        let mut track = fx.track(TrackSpec::new("loop", "loop.wav", 120.0).with_loop(0.0, 1.5), &[0]);
        assert_eq!(fx.fire(&track, 0, true), TriggerOutcome::Started);
        let first = fx.graphs.get(track.id()).unwrap().id();

        track.set_loop_window(Some(LoopWindow::new(0.0, 0.75).unwrap())).unwrap();
        assert_eq!(fx.fire(&track, 5, true), TriggerOutcome::Idle);
        assert_eq!(fx.fire(&track, 0, true), TriggerOutcome::Restarted);

        let handle = fx.graphs.get(track.id()).unwrap();
        assert_ne!(handle.id(), first);
        assert_relative_eq!(handle.loop_end().unwrap(), 2.25);
        assert_eq!(fx.graphs.started_count(), 1);
    }

    #[test]
    fn test_one_shot_never_overlaps() {
        let mut fx = Fixture::new();
        let track = fx.track(TrackSpec::new("kick", "kick.wav", 120.0), &[0, 4, 8, 12]);

        for step in 0..16 {
            let outcome = fx.fire(&track, step, true);
            if step % 4 == 0 {
                assert_eq!(outcome, TriggerOutcome::Started);
            } else {
                assert_eq!(outcome, TriggerOutcome::Idle);
            }
            assert!(fx.graphs.started_count() <= 1);
        }
        assert_eq!(fx.graphs.rebuild_count(), 1);
    }

    #[test]
    fn test_mute_stops_but_keeps_handle() {
        let mut fx = Fixture::new();
        let track = fx.track(TrackSpec::new("loop", "loop.wav", 120.0).with_loop(0.0, 1.0), &[0]);
        fx.fire(&track, 0, true);
        assert_eq!(fx.graphs.started_count(), 1);

        assert_eq!(fx.fire(&track, 1, false), TriggerOutcome::Muted);
        assert_eq!(fx.graphs.started_count(), 0);
        assert_eq!(fx.graphs.len(), 1);
    }

    #[test]
    fn test_loading_source_is_skipped() {
        let mut fx = Fixture::new();
        let track = Track::from_spec(TrackSpec::new("pending", "pending.wav", 120.0), &fx.config).unwrap();
        fx.patterns.add_track(track.id());
        fx.patterns.set_step(track.id(), 0, true).unwrap();

        assert_eq!(fx.fire(&track, 0, true), TriggerOutcome::Skipped);
        assert!(fx.graphs.is_empty());
    }

    #[test]
    fn test_window_outside_source_clears_handle() {
        let mut fx = Fixture::new();
        let track = fx.track(TrackSpec::new("loop", "loop.wav", 120.0).with_loop(5.0, 6.0), &[0]);
        assert_eq!(fx.fire(&track, 0, true), TriggerOutcome::Skipped);
        assert!(fx.graphs.get(track.id()).is_none());
    }
}
