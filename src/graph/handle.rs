//! Live signal graph for one track
//!
//! A handle pairs a shared source buffer with an immutable transform and
//! effect chain. The only things that change after construction are the
//! playback cursor and the programmable loop end.

use std::sync::Arc;

use uuid::Uuid;

use super::transform::TransformChain;
use crate::dsp::EffectChain;
use crate::engine::{AudioBuffer, ChannelLayout};
use crate::error::{Result, SequencerError};
use crate::track::{LoopWindow, TrackId};

/// Read cursor of a started handle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cursor {
    /// Position in source frames
    pub position: f64,
    /// Output frames of silence before playback begins
    pub delay_frames: usize,
    /// Output frames left to flush the chain after a one-shot ends
    pub tail_frames: usize,
}

/// Playback state of a handle
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlaybackState {
    Stopped,
    Started(Cursor),
}

/// The single live signal chain of a track
pub struct AudioGraphHandle {
    id: Uuid,
    track: TrackId,
    source: Arc<AudioBuffer>,
    transform: TransformChain,
    chain: EffectChain,
    window: Option<LoopWindow>,
    loop_end: Option<f64>,
    gain: f32,
    output_rate: u32,
    state: PlaybackState,
    scratch: AudioBuffer,
}

impl std::fmt::Debug for AudioGraphHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioGraphHandle")
            .field("id", &self.id)
            .field("track", &self.track)
            .field("transform", &self.transform)
            .field("loop_end", &self.loop_end)
            .field("state", &self.state)
            .finish()
    }
}

impl AudioGraphHandle {
    pub(crate) fn new(
        track: TrackId,
        source: Arc<AudioBuffer>,
        transform: TransformChain,
        chain: EffectChain,
        window: Option<LoopWindow>,
        gain: f32,
        output_rate: u32,
    ) -> Self {
        let layout = ChannelLayout::from_count(source.channels()).unwrap_or(ChannelLayout::Stereo);
        Self {
            id: Uuid::new_v4(),
            track,
            source,
            transform,
            chain,
            window,
            loop_end: window.map(|w| w.end),
            gain,
            output_rate,
            state: PlaybackState::Stopped,
            scratch: AudioBuffer::new(0, layout, output_rate),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn track(&self) -> TrackId {
        self.track
    }

    pub fn transform(&self) -> &TransformChain {
        &self.transform
    }

    pub fn chain(&self) -> &EffectChain {
        &self.chain
    }

    /// Base loop window the handle was built with
    pub fn loop_window(&self) -> Option<LoopWindow> {
        self.window
    }

    /// Current (possibly extended) loop end in source seconds
    pub fn loop_end(&self) -> Option<f64> {
        self.loop_end
    }

    pub fn is_looping(&self) -> bool {
        self.window.is_some()
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_started(&self) -> bool {
        matches!(self.state, PlaybackState::Started(_))
    }

    /// Read position in source seconds, when started
    pub fn position_secs(&self) -> Option<f64> {
        match self.state {
            PlaybackState::Started(cursor) => Some(cursor.position / self.source.sample_rate as f64),
            PlaybackState::Stopped => None,
        }
    }

    /// How long the whole source lasts at this handle's playback rate
    pub fn natural_duration_secs(&self) -> f64 {
        self.source.duration_secs() / self.transform.rate()
    }

    // ========================================================================
    // Playback control
    // ========================================================================

    /// Start playback at `offset_secs` into the source after `delay_secs`
    ///
    /// # Errors
    /// `TransientPlayback` when already started, when the source is empty, or
    /// when the offset or loop window lies outside the source.
    pub fn start(&mut self, offset_secs: f64, delay_secs: f64) -> Result<()> {
        if self.is_started() {
            return Err(self.transient("already started"));
        }
        if self.source.is_empty() {
            return Err(self.transient("source has no audio"));
        }
        let duration = self.source.duration_secs();
        if !(0.0..duration).contains(&offset_secs) {
            return Err(self.transient(&format!(
                "offset {:.3}s outside source of {:.3}s",
                offset_secs, duration
            )));
        }
        if let Some(window) = self.window {
            if window.start >= duration {
                return Err(self.transient(&format!(
                    "loop start {:.3}s outside source of {:.3}s",
                    window.start, duration
                )));
            }
        }

        self.chain.reset();
        let latency = self.chain.latency_samples();
        self.state = PlaybackState::Started(Cursor {
            position: offset_secs * self.source.sample_rate as f64,
            delay_frames: (delay_secs.max(0.0) * self.output_rate as f64).round() as usize,
            tail_frames: latency,
        });
        self.preroll(latency);
        tracing::trace!(track = %self.track, handle = %self.id, offset_secs, latency, "graph started");
        Ok(())
    }

    /// Push `frames` of source through the chain and throw the output away
    ///
    /// Afterwards the chain's next output frame is the cursor's start frame,
    /// so a latent chain sounds on the same frame as a rate-only one.
    fn preroll(&mut self, frames: usize) {
        if frames == 0 {
            return;
        }
        let finished = self.fill_scratch(frames);
        self.chain.process(&mut self.scratch);
        if finished {
            self.state = PlaybackState::Stopped;
        }
    }

    /// Stop playback; stopping a stopped handle is a no-op
    pub fn stop(&mut self) {
        if self.is_started() {
            tracing::trace!(track = %self.track, handle = %self.id, "graph stopped");
        }
        self.state = PlaybackState::Stopped;
    }

    /// Reprogram the loop end (source seconds)
    ///
    /// Ignored for one-shot handles.
    pub fn set_loop_end(&mut self, end: f64) -> Result<()> {
        let Some(window) = self.window else {
            return Ok(());
        };
        if !end.is_finite() || end <= window.start {
            return Err(self.transient(&format!(
                "loop end {:.3}s not after loop start {:.3}s",
                end, window.start
            )));
        }
        self.loop_end = Some(end);
        Ok(())
    }

    fn transient(&self, reason: &str) -> SequencerError {
        SequencerError::TransientPlayback {
            track: self.track,
            reason: reason.to_string(),
        }
    }

    // ========================================================================
    // Rendering
    // ========================================================================

    /// Render `bus.len()` frames and sum them into `bus`
    ///
    /// The source is read with linear interpolation at the playback rate. A
    /// looping handle wraps at its loop end back to the loop start; reads
    /// inside the extended region tile the base window. A one-shot stops
    /// itself once the source and the chain's tail are exhausted.
    pub fn render_into(&mut self, bus: &mut AudioBuffer) {
        let frames = bus.len();
        let lead = match &mut self.state {
            PlaybackState::Started(cursor) if frames > 0 => {
                let lead = cursor.delay_frames.min(frames);
                cursor.delay_frames -= lead;
                lead
            }
            _ => return,
        };
        // The chain only ever sees source frames, never the leading delay
        if lead == frames {
            return;
        }

        let finished = self.fill_scratch(frames - lead);
        self.chain.process(&mut self.scratch);
        self.scratch.apply_gain(self.gain);
        bus.mix_from(&self.scratch, lead);

        if finished {
            self.state = PlaybackState::Stopped;
        }
    }

    /// Read the next `frames` output frames from the source into `scratch`
    ///
    /// Returns true once a one-shot has run out of source and tail.
    fn fill_scratch(&mut self, frames: usize) -> bool {
        if self.scratch.len() != frames {
            self.scratch = AudioBuffer::new(
                frames,
                ChannelLayout::from_count(self.source.channels()).unwrap_or(ChannelLayout::Stereo),
                self.output_rate,
            );
        } else {
            self.scratch.clear();
        }

        let src_rate = self.source.sample_rate as f64;
        let increment = self.transform.rate() * src_rate / self.output_rate as f64;
        let src_len = self.source.len() as f64;
        let looping = match (self.window, self.loop_end) {
            (Some(w), Some(end)) => Some((w.start * src_rate, w.duration() * src_rate, end * src_rate)),
            _ => None,
        };

        let PlaybackState::Started(cursor) = &mut self.state else {
            return false;
        };
        for i in 0..frames {
            let read = match looping {
                Some((start, base_len, end)) => {
                    let read = if cursor.position < start {
                        cursor.position
                    } else {
                        start + (cursor.position - start) % base_len
                    };
                    cursor.position += increment;
                    if cursor.position >= end {
                        cursor.position = start + (cursor.position - end);
                    }
                    Some(read)
                }
                None if cursor.position < src_len => {
                    let read = cursor.position;
                    cursor.position += increment;
                    Some(read)
                }
                None => {
                    if cursor.tail_frames == 0 {
                        return true;
                    }
                    cursor.tail_frames -= 1;
                    None
                }
            };

            if let Some(read) = read {
                for (ch, channel) in self.scratch.samples.iter_mut().enumerate() {
                    channel[i] = self.source.sample_at(ch, read);
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::graph::GraphFactory;
    use approx::assert_relative_eq;

    const SR: u32 = 1000;

    /// Ramp source: sample i == i / len
    fn ramp(len: usize) -> Arc<AudioBuffer> {
        let data = (0..len).map(|i| i as f32 / len as f32).collect();
        Arc::new(AudioBuffer::from_channels(vec![data], SR).unwrap())
    }

    fn factory() -> GraphFactory {
        GraphFactory::new(EngineConfig {
            sample_rate: SR,
            ..EngineConfig::default()
        })
    }

    fn handle(rate: f64, window: Option<LoopWindow>, len: usize) -> AudioGraphHandle {
        let f = factory();
        f.build(TrackId::new(), ramp(len), f.select(rate, 0.0), window, 1.0)
    }

    fn bus(frames: usize) -> AudioBuffer {
        AudioBuffer::new(frames, ChannelLayout::Mono, SR)
    }

    #[test]
    fn test_starts_stopped_with_base_loop_end() {
        let h = handle(1.0, Some(LoopWindow::new(0.0, 0.5).unwrap()), 1000);
        assert!(!h.is_started());
        assert_eq!(h.loop_end(), Some(0.5));
    }

    #[test]
    fn test_double_start_is_transient_error() {
        let mut h = handle(1.0, None, 1000);
        h.start(0.0, 0.0).unwrap();
        let err = h.start(0.0, 0.0).unwrap_err();
        assert_eq!(err.error_code(), "TRANSIENT_PLAYBACK");
        h.stop();
        assert!(h.start(0.0, 0.0).is_ok());
    }

    #[test]
    fn test_offset_outside_source_rejected() {
        let mut h = handle(1.0, None, 1000);
        assert!(h.start(2.0, 0.0).is_err());
        assert!(!h.is_started());
    }

    #[test]
    fn test_loop_window_outside_source_rejected() {
        let mut h = handle(1.0, Some(LoopWindow::new(3.0, 4.0).unwrap()), 1000);
        assert!(h.start(0.0, 0.0).is_err());
    }

    #[test]
    fn test_one_shot_reads_at_rate_and_stops() {
        let mut h = handle(2.0, None, 100);
        h.start(0.0, 0.0).unwrap();
        let mut out = bus(80);
        h.render_into(&mut out);

        assert_relative_eq!(out.samples[0][10], 0.2, epsilon = 1e-6);
        assert!(out.samples[0][60..].iter().all(|s| *s == 0.0));
        assert!(!h.is_started());
    }

    #[test]
    fn test_start_prerolls_latent_chain() {
        let f = factory();
        let mut h = f.build(TrackId::new(), ramp(4000), f.select(1.0, 5.0), None, 1.0);
        let latency = h.chain().latency_samples();
        assert!(latency > 0);

        h.start(0.0, 0.0).unwrap();
        assert_relative_eq!(h.position_secs().unwrap(), latency as f64 / SR as f64, epsilon = 1e-9);
        assert!(h.is_started());
    }

    #[test]
    fn test_delay_inserts_silence() {
        let mut h = handle(1.0, None, 100);
        h.start(0.0, 0.005).unwrap();
        let mut out = bus(10);
        h.render_into(&mut out);
        assert!(out.samples[0][..5].iter().all(|s| *s == 0.0));
        assert_relative_eq!(out.samples[0][6], 0.01, epsilon = 1e-6);
    }

    #[test]
    fn test_loop_wraps_at_loop_end() {
        let mut h = handle(1.0, Some(LoopWindow::new(0.0, 0.1).unwrap()), 1000);
        h.start(0.0, 0.0).unwrap();
        let mut out = bus(250);
        h.render_into(&mut out);

        assert_relative_eq!(out.samples[0][99], 0.099, epsilon = 1e-6);
        assert_relative_eq!(out.samples[0][100], 0.0, epsilon = 1e-6);
        assert_relative_eq!(out.samples[0][205], 0.005, epsilon = 1e-6);
        assert!(h.is_started());
    }

    #[test]
    fn test_extended_loop_tiles_base_window() {
        let mut h = handle(1.0, Some(LoopWindow::new(0.2, 0.3).unwrap()), 1000);
        h.set_loop_end(0.5).unwrap();
        h.start(0.2, 0.0).unwrap();
        let mut out = bus(400);
        h.render_into(&mut out);

        // Base window is 100 frames starting at 0.2; extended end at 300 frames
        assert_relative_eq!(out.samples[0][0], 0.2, epsilon = 1e-6);
        assert_relative_eq!(out.samples[0][150], 0.25, epsilon = 1e-6);
        assert_relative_eq!(out.samples[0][250], 0.25, epsilon = 1e-6);
        assert_relative_eq!(out.samples[0][305], 0.205, epsilon = 1e-6);
    }

    #[test]
    fn test_set_loop_end_validation() {
        let mut h = handle(1.0, Some(LoopWindow::new(0.5, 1.0).unwrap()), 2000);
        assert!(h.set_loop_end(0.4).is_err());
        assert_eq!(h.loop_end(), Some(1.0));

        let mut one_shot = handle(1.0, None, 100);
        assert!(one_shot.set_loop_end(3.0).is_ok());
        assert_eq!(one_shot.loop_end(), None);
    }

    #[test]
    fn test_natural_duration_follows_rate() {
        let h = handle(2.0, None, 1000);
        assert_relative_eq!(h.natural_duration_secs(), 0.5);
    }

    #[test]
    fn test_stopped_handle_renders_nothing() {
        let mut h = handle(1.0, None, 100);
        let mut out = bus(10);
        h.render_into(&mut out);
        assert!(out.samples[0].iter().all(|s| *s == 0.0));
    }
}
