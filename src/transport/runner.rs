//! Transport Runner
//!
//! Drives the trigger path from a dedicated OS thread. The thread sleeps on
//! a cancellation channel until the next tick deadline, fires the step under
//! the sequencer lock, and leaves the playhead on a `watch` channel for
//! whoever draws it. Nothing on the UI side can hold the tick thread up.
//!
//! Transport time restarts at zero whenever the sequencer starts from
//! stopped, so the thread re-bases its wall-clock origin each time it sees
//! a new start.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::watch;

use super::clock::TransportState;
use crate::error::{Result, SequencerError};
use crate::sequencer::Sequencer;

/// Upper bound on a single sleep so tempo changes are picked up promptly
const MAX_WAIT: Duration = Duration::from_millis(10);

/// Name of the tick thread
pub const RUNNER_THREAD_NAME: &str = "stepgrid-transport";

/// Latest playhead position, published after every fired tick
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct PlayheadUpdate {
    /// Step within the pattern
    pub step: usize,
    /// Ticks since the transport started
    pub tick: u64,
    /// Completed cycles
    pub cycle: u64,
    pub state: TransportState,
}

/// Receiving end of the playhead channel
pub type PlayheadReceiver = watch::Receiver<PlayheadUpdate>;

/// Lock the shared sequencer, recovering from a poisoned lock
pub fn lock_sequencer(sequencer: &Mutex<Sequencer>) -> MutexGuard<'_, Sequencer> {
    sequencer.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to the running tick thread
pub struct TransportRunner {
    sequencer: Arc<Mutex<Sequencer>>,
    stop_tx: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl TransportRunner {
    /// Start the transport and spawn the tick thread
    ///
    /// Transport time zero is the moment this is called, and again every
    /// time the sequencer is stopped and played while the thread runs.
    pub fn spawn(sequencer: Arc<Mutex<Sequencer>>) -> Result<Self> {
        let starts = {
            let mut seq = lock_sequencer(&sequencer);
            seq.play();
            seq.start_count()
        };

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let shared = Arc::clone(&sequencer);
        let epoch = Epoch {
            origin: Instant::now(),
            starts,
        };

        let thread = thread::Builder::new()
            .name(RUNNER_THREAD_NAME.to_string())
            .spawn(move || run(shared, stop_rx, epoch))
            .map_err(SequencerError::Io)?;

        tracing::debug!("transport runner spawned");
        Ok(Self {
            sequencer,
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        })
    }

    /// Whether the tick thread is still alive
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().map_or(false, |t| !t.is_finished())
    }

    pub fn sequencer(&self) -> &Arc<Mutex<Sequencer>> {
        &self.sequencer
    }

    /// Wake and join the tick thread, then stop the sequencer
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(stop_tx) = self.stop_tx.take() else {
            return;
        };
        // A send error means the thread is already gone
        let _ = stop_tx.send(());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("transport thread panicked");
            }
        }
        lock_sequencer(&self.sequencer).stop();
        tracing::debug!("transport runner stopped");
    }
}

impl Drop for TransportRunner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Wall-clock instant of transport time zero, for one run of the transport
struct Epoch {
    origin: Instant,
    starts: u64,
}

impl Epoch {
    /// Transport seconds now, re-basing first if the sequencer restarted
    fn elapsed(&mut self, seq: &Sequencer) -> f64 {
        if seq.start_count() != self.starts {
            self.starts = seq.start_count();
            self.origin = Instant::now();
            tracing::debug!(starts = self.starts, "transport restarted, origin re-based");
        }
        self.origin.elapsed().as_secs_f64()
    }
}

fn run(sequencer: Arc<Mutex<Sequencer>>, stop_rx: mpsc::Receiver<()>, mut epoch: Epoch) {
    loop {
        let wait = {
            let seq = lock_sequencer(&sequencer);
            let elapsed = epoch.elapsed(&seq);
            seq.time_until_next_tick(elapsed)
        };
        let wait = wait.map_or(MAX_WAIT, |secs| Duration::from_secs_f64(secs).min(MAX_WAIT));

        match stop_rx.recv_timeout(wait) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        let mut seq = lock_sequencer(&sequencer);
        let elapsed = epoch.elapsed(&seq);
        if let Some(event) = seq.advance_to(elapsed) {
            tracing::trace!(tick = event.tick, step = event.step, late = elapsed - event.time, "tick");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::{generate_test_tone, WavLoader};
    use crate::track::{SourceRef, TrackSpec};

    fn shared() -> Arc<Mutex<Sequencer>> {
        let config = EngineConfig {
            default_bpm: 300.0,
            ..EngineConfig::default()
        };
        let seq = Sequencer::new(config, Arc::new(WavLoader::new())).unwrap();
        Arc::new(Mutex::new(seq))
    }

    #[test]
    fn test_runner_advances_playhead() {
        let seq = shared();
        let mut playhead = lock_sequencer(&seq).playhead();
        let runner = TransportRunner::spawn(Arc::clone(&seq)).unwrap();
        assert!(runner.is_running());

        // 300 BPM sixteenths are 50ms apart
        thread::sleep(Duration::from_millis(180));
        assert!(playhead.has_changed().unwrap());
        let update = *playhead.borrow_and_update();
        assert!(update.tick >= 1);
        assert_eq!(update.state, TransportState::Playing);

        runner.stop();
        assert_eq!(lock_sequencer(&seq).state(), TransportState::Stopped);
    }

    #[test]
    fn test_stop_wakes_thread_immediately() {
        let seq = shared();
        let runner = TransportRunner::spawn(Arc::clone(&seq)).unwrap();
        let started = Instant::now();
        runner.stop();
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(lock_sequencer(&seq).current_step(), 0);
    }

    #[test]
    fn test_restart_under_live_thread_begins_at_step_zero() {
        let seq = shared();
        let kick = {
            let mut guard = lock_sequencer(&seq);
            guard
                .sources()
                .insert_ready(SourceRef::new("kick.wav"), generate_test_tone(100.0, 0.02, 48000));
            let id = guard.add_track(TrackSpec::new("kick", "kick.wav", 120.0)).unwrap();
            guard.set_step(id, 0, true).unwrap();
            id
        };
        let mut playhead = lock_sequencer(&seq).playhead();
        let runner = TransportRunner::spawn(Arc::clone(&seq)).unwrap();
        thread::sleep(Duration::from_millis(420));
        assert!(playhead.borrow_and_update().tick >= 5);

        {
            let mut guard = lock_sequencer(&seq);
            guard.stop();
            guard.play();
            assert_eq!(guard.graphs().started_count(), 0);
        }
        // Well inside the first 50ms step after the restart
        thread::sleep(Duration::from_millis(25));
        {
            let guard = lock_sequencer(&seq);
            let update = *playhead.borrow_and_update();
            assert_eq!(update.tick, 0);
            assert_eq!(update.step, 0);
            assert_eq!(update.state, TransportState::Playing);
            assert!(guard.graphs().get(kick).unwrap().is_started());
        }
        runner.stop();
    }

    #[test]
    fn test_drop_stops_transport() {
        let seq = shared();
        {
            let _runner = TransportRunner::spawn(Arc::clone(&seq)).unwrap();
            thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(lock_sequencer(&seq).state(), TransportState::Stopped);
    }
}
