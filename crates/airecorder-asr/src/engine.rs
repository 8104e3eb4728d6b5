//! Inference engine contracts and their lock-guarded handles
//!
//! The wrapped engines are not reentrant. Every trait method takes `&mut self`
//! and the only way to reach an engine is through a handle that owns it behind
//! a mutex, so at most one call per engine instance is ever in flight.

use crate::error::{AsrError, AsrResult};
use crate::types::EngineStats;
use airecorder_core::DiarizationSegment;
use parking_lot::Mutex;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Offline speech recognizer
pub trait SpeechRecognizer: Send {
    /// Convert a block of samples to text
    fn recognize(&mut self, samples: &[f32], sample_rate: u32) -> AsrResult<String>;
}

/// Speaker diarization engine
pub trait SpeakerDiarizer: Send {
    /// Sample rate the engine requires
    fn sample_rate(&self) -> u32;

    /// Split audio into raw `(start, end, speaker)` segments
    fn diarize(&mut self, samples: &[f32]) -> AsrResult<Vec<DiarizationSegment>>;
}

/// Punctuation restoration engine
pub trait Punctuator: Send {
    /// Return `text` with punctuation added
    fn add_punctuation(&mut self, text: &str) -> AsrResult<String>;
}

#[derive(Debug, Default)]
struct EngineCounters {
    total_requests: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
}

/// Shared, serialized access to a [`SpeechRecognizer`]
///
/// Cloning a handle shares the same engine and the same lock.
#[derive(Clone)]
pub struct RecognizerHandle {
    engine: Arc<Mutex<Box<dyn SpeechRecognizer>>>,
    punctuation: PunctuationHandle,
    counters: Arc<EngineCounters>,
}

impl RecognizerHandle {
    /// Wrap a recognizer
    pub fn new(recognizer: impl SpeechRecognizer + 'static) -> Self {
        Self::from_boxed(Box::new(recognizer))
    }

    /// Wrap an already boxed recognizer
    pub fn from_boxed(recognizer: Box<dyn SpeechRecognizer>) -> Self {
        Self {
            engine: Arc::new(Mutex::new(recognizer)),
            punctuation: PunctuationHandle::disabled(),
            counters: Arc::new(EngineCounters::default()),
        }
    }

    /// Punctuate every recognized text with `punctuation`
    pub fn with_punctuation(mut self, punctuation: PunctuationHandle) -> Self {
        self.punctuation = punctuation;
        self
    }

    /// Recognize `samples` on the calling thread
    ///
    /// Blocks while another call holds the engine lock. The lock is released
    /// before punctuation runs.
    pub fn recognize(&self, samples: &[f32], sample_rate: u32) -> AsrResult<String> {
        self.counters.total_requests.fetch_add(1, Ordering::Relaxed);

        let result = {
            let mut engine = self.engine.lock();
            engine.recognize(samples, sample_rate)
        };

        match result {
            Ok(text) => {
                self.counters.success_count.fetch_add(1, Ordering::Relaxed);
                Ok(self.punctuation.apply(&text))
            }
            Err(e) => {
                self.counters.failure_count.fetch_add(1, Ordering::Relaxed);
                debug!(error = %e, samples = samples.len(), "Recognizer call failed");
                Err(e)
            }
        }
    }

    /// Recognize `samples[range]` on Tokio's blocking pool
    ///
    /// A panic inside the engine is reported as [`AsrError::Worker`].
    pub async fn recognize_range(
        &self,
        samples: Arc<[f32]>,
        range: Range<usize>,
        sample_rate: u32,
    ) -> AsrResult<String> {
        let handle = self.clone();
        tokio::task::spawn_blocking(move || {
            let Some(slice) = samples.get(range.clone()) else {
                return Err(AsrError::validation(format!(
                    "sample range {range:?} out of bounds for {} samples",
                    samples.len()
                )));
            };
            handle.recognize(slice, sample_rate)
        })
        .await
        .map_err(|e| AsrError::worker(format!("recognition task failed: {e}")))?
    }

    /// Request counters
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            total_requests: self.counters.total_requests.load(Ordering::Relaxed),
            success_count: self.counters.success_count.load(Ordering::Relaxed),
            failure_count: self.counters.failure_count.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for RecognizerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecognizerHandle")
            .field("punctuation", &self.punctuation)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Shared, serialized access to a [`SpeakerDiarizer`]
#[derive(Clone)]
pub struct DiarizerHandle {
    engine: Arc<Mutex<Box<dyn SpeakerDiarizer>>>,
    sample_rate: u32,
}

impl DiarizerHandle {
    /// Wrap a diarizer
    pub fn new(diarizer: impl SpeakerDiarizer + 'static) -> Self {
        Self::from_boxed(Box::new(diarizer))
    }

    /// Wrap an already boxed diarizer
    pub fn from_boxed(diarizer: Box<dyn SpeakerDiarizer>) -> Self {
        let sample_rate = diarizer.sample_rate();
        Self {
            engine: Arc::new(Mutex::new(diarizer)),
            sample_rate,
        }
    }

    /// Sample rate the diarizer requires
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Diarize `samples`
    ///
    /// Fails with [`AsrError::SampleRateMismatch`] without touching the
    /// engine when `sample_rate` differs from the required rate.
    pub fn diarize(
        &self,
        samples: &[f32],
        sample_rate: u32,
    ) -> AsrResult<Vec<DiarizationSegment>> {
        if sample_rate != self.sample_rate {
            return Err(AsrError::sample_rate_mismatch(self.sample_rate, sample_rate));
        }

        let mut engine = self.engine.lock();
        engine.diarize(samples)
    }
}

impl fmt::Debug for DiarizerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiarizerHandle")
            .field("sample_rate", &self.sample_rate)
            .finish_non_exhaustive()
    }
}

/// Optional punctuation step
///
/// A disabled handle is the identity function.
#[derive(Clone, Default)]
pub struct PunctuationHandle {
    engine: Option<Arc<Mutex<Box<dyn Punctuator>>>>,
}

impl PunctuationHandle {
    /// Identity punctuation
    pub const fn disabled() -> Self {
        Self { engine: None }
    }

    /// Wrap a punctuator
    pub fn new(punctuator: impl Punctuator + 'static) -> Self {
        Self::from_boxed(Box::new(punctuator))
    }

    /// Wrap an already boxed punctuator
    pub fn from_boxed(punctuator: Box<dyn Punctuator>) -> Self {
        Self {
            engine: Some(Arc::new(Mutex::new(punctuator))),
        }
    }

    /// Whether a punctuator is attached
    pub const fn is_enabled(&self) -> bool {
        self.engine.is_some()
    }

    /// Punctuate `text`
    ///
    /// Empty text is returned untouched. On engine failure the original text
    /// is returned.
    pub fn apply(&self, text: &str) -> String {
        let Some(engine) = &self.engine else {
            return text.to_string();
        };
        if text.is_empty() {
            return String::new();
        }

        let result = engine.lock().add_punctuation(text);
        match result {
            Ok(punctuated) => punctuated,
            Err(e) => {
                warn!(error = %e, "Punctuation failed, keeping original text");
                text.to_string()
            }
        }
    }
}

impl fmt::Debug for PunctuationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PunctuationHandle")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
