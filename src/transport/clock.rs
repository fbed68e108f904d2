//! Transport Clock
//!
//! The single source of step timing. The tick index is derived from elapsed
//! transport time against an anchor `(anchor_secs, anchor_pos)`, so rounding
//! never accumulates: tick `n` is always due at
//! `anchor_secs + (n - anchor_pos) * step_duration`. Tempo and grid changes
//! re-anchor at the caller's current time, keeping the fraction of the step
//! already played, so the grid stays continuous and the next deadline never
//! lands in the past.

use std::fmt;

use serde::Serialize;

use crate::error::{Result, SequencerError};
use crate::mapper::step_duration;

/// Absorbs float error when elapsed time lands exactly on a tick
const TICK_EPSILON: f64 = 1e-9;

/// Transport states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum TransportState {
    #[default]
    Stopped,
    Playing,
    Recording,
}

impl TransportState {
    pub fn is_running(&self) -> bool {
        !matches!(self, TransportState::Stopped)
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportState::Stopped => write!(f, "Stopped"),
            TransportState::Playing => write!(f, "Playing"),
            TransportState::Recording => write!(f, "Recording"),
        }
    }
}

/// Master loop region `[start, end)` in steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoopRegion {
    pub start: usize,
    pub end: usize,
}

impl LoopRegion {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Step clock driven by elapsed transport seconds
#[derive(Debug, Clone)]
pub struct TransportClock {
    state: TransportState,
    bpm: f64,
    grid_division: u32,
    pattern_length: usize,
    anchor_secs: f64,
    /// Fractional tick position at `anchor_secs`
    anchor_pos: f64,
    last_fired: Option<u64>,
    loop_region: Option<LoopRegion>,
}

impl TransportClock {
    pub fn new(bpm: f64, grid_division: u32, pattern_length: usize) -> Self {
        Self {
            state: TransportState::Stopped,
            bpm,
            grid_division,
            pattern_length: pattern_length.max(1),
            anchor_secs: 0.0,
            anchor_pos: 0.0,
            last_fired: None,
            loop_region: None,
        }
    }

    // ========================================================================
    // State
    // ========================================================================

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn grid_division(&self) -> u32 {
        self.grid_division
    }

    pub fn pattern_length(&self) -> usize {
        self.pattern_length
    }

    pub fn loop_region(&self) -> Option<LoopRegion> {
        self.loop_region
    }

    /// Seconds per step at the current tempo
    pub fn step_duration(&self) -> f64 {
        step_duration(self.bpm, self.grid_division)
    }

    /// Steps in one cycle (loop region length when one is set)
    pub fn cycle_length(&self) -> usize {
        self.loop_region.map_or(self.pattern_length, |r| r.len())
    }

    /// Seconds in one cycle
    pub fn cycle_duration(&self) -> f64 {
        self.step_duration() * self.cycle_length() as f64
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Start playing with tick 0 due at `now`
    ///
    /// No-op if already running.
    pub fn start(&mut self, now: f64) {
        if self.is_running() {
            return;
        }
        self.anchor_secs = now;
        self.anchor_pos = 0.0;
        self.last_fired = None;
        self.state = TransportState::Playing;
        tracing::debug!(bpm = self.bpm, "transport started");
    }

    /// Switch to recording, starting the clock if needed
    pub fn record(&mut self, now: f64) {
        self.start(now);
        self.state = TransportState::Recording;
        tracing::debug!("transport recording");
    }

    /// Stop: cancel pending ticks, reset to step 0 and drop the loop region
    pub fn stop(&mut self) {
        if self.is_running() {
            tracing::debug!("transport stopped");
        }
        self.state = TransportState::Stopped;
        self.anchor_secs = 0.0;
        self.anchor_pos = 0.0;
        self.last_fired = None;
        self.loop_region = None;
    }

    /// Change tempo at transport time `now`, keeping the grid continuous
    pub fn set_bpm(&mut self, bpm: f64, now: f64) {
        self.reanchor(now);
        self.bpm = bpm;
    }

    pub fn set_grid_division(&mut self, grid_division: u32, now: f64) {
        self.reanchor(now);
        self.grid_division = grid_division;
    }

    pub fn set_pattern_length(&mut self, length: usize) {
        self.pattern_length = length.max(1);
        if let Some(region) = self.loop_region {
            if region.end > self.pattern_length {
                self.loop_region = None;
            }
        }
    }

    /// Restrict playback to `[start, end)`; `None` clears the region
    pub fn set_loop_region(&mut self, region: Option<LoopRegion>) -> Result<()> {
        if let Some(r) = region {
            if r.is_empty() || r.end > self.pattern_length {
                return Err(SequencerError::invalid(
                    "loop_region",
                    format!("{}..{}", r.start, r.end),
                    format!("a non-empty range within 0..{}", self.pattern_length),
                ));
            }
        }
        self.loop_region = region;
        Ok(())
    }

    /// Move the anchor to `now`, at the current tempo
    ///
    /// `now` is never taken earlier than the last fired tick. Before the
    /// first tick fires the anchor stays where `start` put it.
    fn reanchor(&mut self, now: f64) {
        let Some(last) = self.last_fired else {
            return;
        };
        let now = now.max(self.tick_time(last));
        self.anchor_pos += (now - self.anchor_secs) / self.step_duration();
        self.anchor_secs = now;
    }

    // ========================================================================
    // Timing
    // ========================================================================

    /// Tick in progress at `elapsed` seconds
    pub fn tick_at(&self, elapsed: f64) -> u64 {
        let steps = (elapsed - self.anchor_secs).max(0.0) / self.step_duration();
        (self.anchor_pos + steps + TICK_EPSILON).floor() as u64
    }

    /// Time at which `tick` is due
    pub fn tick_time(&self, tick: u64) -> f64 {
        let offset = tick as f64 - self.anchor_pos;
        self.anchor_secs + offset * self.step_duration()
    }

    /// The next tick that will fire
    pub fn next_tick(&self) -> u64 {
        self.last_fired.map_or(0, |t| t + 1)
    }

    /// Seconds until the next tick is due (zero if already late)
    pub fn time_until_next_tick(&self, elapsed: f64) -> Option<f64> {
        if !self.is_running() {
            return None;
        }
        Some((self.tick_time(self.next_tick()) - elapsed).max(0.0))
    }

    /// Claim the tick due at `elapsed`, if one is pending
    ///
    /// When several deadlines have passed only the latest fires.
    pub fn poll(&mut self, elapsed: f64) -> Option<u64> {
        if !self.is_running() {
            return None;
        }
        let next = self.next_tick();
        if elapsed + TICK_EPSILON < self.tick_time(next) {
            return None;
        }
        let due = self.tick_at(elapsed).max(next);
        if due > next {
            tracing::trace!(skipped = due - next, "late ticks coalesced");
        }
        self.last_fired = Some(due);
        Some(due)
    }

    /// Pattern step for a tick, taken modulo the current length
    pub fn step_for_tick(&self, tick: u64) -> usize {
        match self.loop_region {
            Some(r) => r.start + (tick % r.len() as u64) as usize,
            None => (tick % self.pattern_length as u64) as usize,
        }
    }

    /// Whether `tick` starts a new cycle
    pub fn is_cycle_start(&self, tick: u64) -> bool {
        let first = self.loop_region.map_or(0, |r| r.start);
        self.step_for_tick(tick) == first
    }

    /// Step of the most recently fired tick (0 when stopped)
    pub fn current_step(&self) -> usize {
        self.last_fired.map_or(0, |t| self.step_for_tick(t))
    }

    pub fn last_tick(&self) -> Option<u64> {
        self.last_fired
    }
}
