//! Audio source resolution
//!
//! A `SourceRef` is resolved into a shared `AudioBuffer` on a background
//! thread. The trigger path only ever peeks at the cache with `try_lock`, so
//! a source that is still loading (or a cache that is momentarily busy) just
//! means the track stays silent this cycle.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread;

use crate::engine::buffer::AudioBuffer;
use crate::engine::io::import_wav;
use crate::error::{Result, SequencerError};
use crate::track::SourceRef;

/// Load state of one source
#[derive(Debug, Clone)]
pub enum SourceState {
    Loading,
    Ready(Arc<AudioBuffer>),
    Failed(String),
}

impl SourceState {
    pub fn is_ready(&self) -> bool {
        matches!(self, SourceState::Ready(_))
    }
}

/// Decodes a source reference into audio at the engine sample rate
pub trait SourceLoader: Send + Sync {
    fn load(&self, source: &SourceRef, sample_rate: u32) -> Result<AudioBuffer>;
}

/// Resolves source references as WAV file paths
#[derive(Debug, Clone, Default)]
pub struct WavLoader {
    root: Option<PathBuf>,
}

impl WavLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative references against `root`
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    pub fn resolve(&self, source: &SourceRef) -> PathBuf {
        let path = PathBuf::from(source.as_str());
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path,
        }
    }
}

impl SourceLoader for WavLoader {
    fn load(&self, source: &SourceRef, sample_rate: u32) -> Result<AudioBuffer> {
        import_wav(&self.resolve(source), sample_rate)
    }
}

/// Shared, thread-safe cache of decoded sources
#[derive(Clone)]
pub struct SourceCache {
    loader: Arc<dyn SourceLoader>,
    sample_rate: u32,
    entries: Arc<Mutex<HashMap<SourceRef, SourceState>>>,
}

impl std::fmt::Debug for SourceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceCache")
            .field("sample_rate", &self.sample_rate)
            .finish_non_exhaustive()
    }
}

impl SourceCache {
    pub fn new(loader: Arc<dyn SourceLoader>, sample_rate: u32) -> Self {
        Self {
            loader,
            sample_rate,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SourceRef, SourceState>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start loading `source` on a background thread
    ///
    /// Sources already loading or ready are left alone; a failed source is
    /// loaded again.
    pub fn request(&self, source: &SourceRef) {
        {
            let mut entries = self.lock();
            match entries.get(source) {
                Some(SourceState::Loading | SourceState::Ready(_)) => return,
                Some(SourceState::Failed(reason)) => {
                    tracing::debug!(source = %source, reason = %reason, "retrying failed source");
                }
                None => {}
            }
            entries.insert(source.clone(), SourceState::Loading);
        }

        let loader = Arc::clone(&self.loader);
        let entries = Arc::clone(&self.entries);
        let sample_rate = self.sample_rate;
        let source = source.clone();
        let spawned = thread::Builder::new()
            .name("stepgrid-loader".to_string())
            .spawn({
                let source = source.clone();
                let entries = Arc::clone(&entries);
                move || {
                    let state = resolve(loader.as_ref(), &source, sample_rate);
                    entries
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(source, state);
                }
            });

        if let Err(e) = spawned {
            tracing::warn!(source = %source, error = %e, "could not spawn loader thread");
            entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(source, SourceState::Failed(e.to_string()));
        }
    }

    /// Decode `source` on the calling thread and cache the result
    pub fn load_blocking(&self, source: &SourceRef) -> Result<Arc<AudioBuffer>> {
        let state = resolve(self.loader.as_ref(), source, self.sample_rate);
        self.lock().insert(source.clone(), state.clone());
        match state {
            SourceState::Ready(buffer) => Ok(buffer),
            SourceState::Failed(reason) => Err(SequencerError::LoadFailure {
                source_ref: source.to_string(),
                reason,
            }),
            SourceState::Loading => Err(SequencerError::LoadFailure {
                source_ref: source.to_string(),
                reason: "still loading".to_string(),
            }),
        }
    }

    /// Register an already decoded buffer
    pub fn insert_ready(&self, source: SourceRef, buffer: AudioBuffer) {
        self.lock().insert(source, SourceState::Ready(Arc::new(buffer)));
    }

    /// Non-blocking lookup; `None` when unknown or the cache is busy
    pub fn try_state(&self, source: &SourceRef) -> Option<SourceState> {
        let entries = match self.entries.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(p)) => p.into_inner(),
            Err(TryLockError::WouldBlock) => return None,
        };
        entries.get(source).cloned()
    }

    /// Non-blocking lookup of a decoded buffer
    pub fn ready(&self, source: &SourceRef) -> Option<Arc<AudioBuffer>> {
        match self.try_state(source)? {
            SourceState::Ready(buffer) => Some(buffer),
            _ => None,
        }
    }

    /// Blocking lookup, for the control path
    pub fn state(&self, source: &SourceRef) -> Option<SourceState> {
        self.lock().get(source).cloned()
    }

    pub fn evict(&self, source: &SourceRef) {
        self.lock().remove(source);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn resolve(loader: &dyn SourceLoader, source: &SourceRef, sample_rate: u32) -> SourceState {
    match loader.load(source, sample_rate) {
        Ok(buffer) if buffer.is_empty() => {
            tracing::warn!(source = %source, "source decoded to zero frames");
            SourceState::Failed("no audio frames".to_string())
        }
        Ok(buffer) => {
            tracing::debug!(source = %source, secs = buffer.duration_secs(), "source ready");
            SourceState::Ready(Arc::new(buffer))
        }
        Err(e) => {
            tracing::warn!(source = %source, error = %e, "source failed to load");
            SourceState::Failed(e.to_string())
        }
    }
}
