//! Mock inference engines for testing
//!
//! Deterministic stand-ins for the recognizer, diarizer, punctuator and
//! online recognizer. Used by the unit and integration tests and the
//! benchmarks.

use crate::engine::{Punctuator, SpeakerDiarizer, SpeechRecognizer};
use crate::error::{AsrError, AsrResult};
use crate::streaming::{DecoderStream, OnlineRecognizer};
use airecorder_core::DiarizationSegment;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

type Responder = Box<dyn FnMut(&[f32], u32) -> AsrResult<String> + Send>;

/// Shared call counters for a [`MockRecognizer`]
///
/// Tracks how many calls overlapped so tests can prove engine access is
/// serialized.
#[derive(Debug, Clone, Default)]
pub struct CallProbe {
    calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl CallProbe {
    /// Calls started so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous calls observed
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Mock offline recognizer
pub struct MockRecognizer {
    /// Produces the text for one call
    responder: Responder,

    /// Simulated inference time
    delay: Duration,

    /// Call tracking
    probe: CallProbe,
}

impl MockRecognizer {
    /// Recognizer driven by a closure
    pub fn from_fn<F>(responder: F) -> Self
    where
        F: FnMut(&[f32], u32) -> AsrResult<String> + Send + 'static,
    {
        Self {
            responder: Box::new(responder),
            delay: Duration::ZERO,
            probe: CallProbe::default(),
        }
    }

    /// Recognizer that always returns `text`
    pub fn fixed(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::from_fn(move |_, _| Ok(text.clone()))
    }

    /// Recognizer that always fails with `message`
    pub fn failing(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::from_fn(move |_, _| Err(AsrError::adapter("recognizer", message.clone())))
    }

    /// Recognizer that reads a label from the first sample
    ///
    /// Returns `"{prefix}{n}"` where `n` is the first sample truncated to an
    /// integer. Tests fill each region of the audio with its own marker value
    /// to see which region a call covered.
    pub fn marker(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self::from_fn(move |samples, _| {
            let marker = samples.first().copied().unwrap_or_default() as i64;
            Ok(format!("{prefix}{marker}"))
        })
    }

    /// Set simulated inference time
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Handle to this recognizer's call counters
    pub fn probe(&self) -> CallProbe {
        self.probe.clone()
    }
}

impl SpeechRecognizer for MockRecognizer {
    fn recognize(&mut self, samples: &[f32], sample_rate: u32) -> AsrResult<String> {
        self.probe.enter();
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let result = (self.responder)(samples, sample_rate);
        self.probe.leave();
        result
    }
}

impl fmt::Debug for MockRecognizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockRecognizer")
            .field("delay", &self.delay)
            .field("probe", &self.probe)
            .finish_non_exhaustive()
    }
}

/// Mock diarizer returning a fixed segment list
#[derive(Debug, Clone)]
pub struct MockDiarizer {
    /// Required sample rate
    sample_rate: u32,

    /// Segments returned on every call
    segments: Vec<DiarizationSegment>,

    /// Failure message, if the diarizer should fail
    failure: Option<String>,

    /// Number of `diarize` calls
    calls: Arc<AtomicUsize>,
}

impl MockDiarizer {
    /// Create a diarizer returning `segments`
    pub fn new(sample_rate: u32, segments: Vec<DiarizationSegment>) -> Self {
        Self {
            sample_rate,
            segments,
            failure: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Configure to fail
    pub fn with_failure(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Shared call counter
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl SpeakerDiarizer for MockDiarizer {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn diarize(&mut self, _samples: &[f32]) -> AsrResult<Vec<DiarizationSegment>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.failure {
            Some(message) => Err(AsrError::adapter("diarizer", message.clone())),
            None => Ok(self.segments.clone()),
        }
    }
}

/// Mock punctuator that terminates text with a period
#[derive(Debug, Clone, Default)]
pub struct MockPunctuator {
    fail: bool,
}

impl MockPunctuator {
    /// Create a working punctuator
    pub const fn new() -> Self {
        Self { fail: false }
    }

    /// Create a punctuator that always fails
    pub const fn failing() -> Self {
        Self { fail: true }
    }
}

impl Punctuator for MockPunctuator {
    fn add_punctuation(&mut self, text: &str) -> AsrResult<String> {
        if self.fail {
            return Err(AsrError::adapter("punctuator", "model not loaded"));
        }
        if text.ends_with(['.', '?', '!']) {
            Ok(text.to_string())
        } else {
            Ok(format!("{text}."))
        }
    }
}

/// Mock online recognizer
///
/// Each 10 ms of accepted audio becomes one decode step, and every
/// `steps_per_word` decoded steps emit the next word from a fixed vocabulary.
/// A frame whose samples are all silent ends the utterance once some text
/// exists.
#[derive(Debug, Clone)]
pub struct MockOnlineRecognizer {
    sample_rate: u32,
    words: Vec<String>,
    steps_per_word: usize,
    fail_streams: bool,
}

impl MockOnlineRecognizer {
    /// Create a recognizer emitting `words` in a cycle
    pub fn new(sample_rate: u32, words: &[&str]) -> Self {
        Self {
            sample_rate,
            words: words.iter().map(ToString::to_string).collect(),
            steps_per_word: 10,
            fail_streams: false,
        }
    }

    /// Set how many decode steps produce one word
    pub fn with_steps_per_word(mut self, steps: usize) -> Self {
        self.steps_per_word = steps.max(1);
        self
    }

    /// Make `create_stream` fail
    pub const fn with_stream_failure(mut self) -> Self {
        self.fail_streams = true;
        self
    }
}

impl OnlineRecognizer for MockOnlineRecognizer {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn create_stream(&self) -> AsrResult<Box<dyn DecoderStream>> {
        if self.fail_streams {
            return Err(AsrError::adapter("online recognizer", "stream allocation failed"));
        }
        Ok(Box::new(MockDecoderStream {
            words: self.words.clone(),
            steps_per_word: self.steps_per_word,
            pending_steps: 0,
            decoded_steps: 0,
            emitted: Vec::new(),
            last_frame_silent: false,
        }))
    }
}

#[derive(Debug)]
struct MockDecoderStream {
    words: Vec<String>,
    steps_per_word: usize,
    pending_steps: usize,
    decoded_steps: usize,
    emitted: Vec<String>,
    last_frame_silent: bool,
}

impl DecoderStream for MockDecoderStream {
    fn accept_waveform(&mut self, sample_rate: u32, samples: &[f32]) {
        let step = (sample_rate as usize / 100).max(1);
        self.pending_steps += samples.len().div_ceil(step);
        self.last_frame_silent = samples.iter().all(|s| s.abs() < 1e-3);
    }

    fn is_ready(&self) -> bool {
        self.pending_steps > 0
    }

    fn decode(&mut self) {
        if self.pending_steps == 0 {
            return;
        }
        self.pending_steps -= 1;
        if self.last_frame_silent {
            return;
        }
        self.decoded_steps += 1;
        if self.decoded_steps % self.steps_per_word == 0 && !self.words.is_empty() {
            let word = &self.words[self.emitted.len() % self.words.len()];
            self.emitted.push(word.clone());
        }
    }

    fn text(&self) -> String {
        self.emitted.join(" ")
    }

    fn is_endpoint(&self) -> bool {
        self.last_frame_silent && !self.emitted.is_empty()
    }

    fn reset(&mut self) {
        self.pending_steps = 0;
        self.decoded_steps = 0;
        self.emitted.clear();
        self.last_frame_silent = false;
    }
}
