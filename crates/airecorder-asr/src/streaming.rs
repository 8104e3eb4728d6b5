//! Live streaming recognition sessions
//!
//! Sessions are admission controlled: past capacity, creation fails at once
//! instead of queueing. Each session owns one decoder stream behind its own
//! lock, so frames for one session are processed strictly one at a time while
//! different sessions proceed in parallel.

use crate::engine::PunctuationHandle;
use crate::error::{AsrError, AsrResult};
use crate::types::{FrameResult, SessionStats};
use airecorder_core::{ConcurrencyConfig, StreamingConfig};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Online (streaming) recognizer
pub trait OnlineRecognizer: Send + Sync {
    /// Sample rate the model was trained on
    fn sample_rate(&self) -> u32;

    /// Allocate decoder state for a new session
    fn create_stream(&self) -> AsrResult<Box<dyn DecoderStream>>;
}

/// Per-session decoder state
pub trait DecoderStream: Send {
    /// Feed audio
    fn accept_waveform(&mut self, sample_rate: u32, samples: &[f32]);

    /// Whether enough audio is buffered for another decode step
    fn is_ready(&self) -> bool;

    /// Run one decode step
    fn decode(&mut self);

    /// Text decoded so far for the current utterance
    fn text(&self) -> String;

    /// Whether an utterance boundary was detected
    fn is_endpoint(&self) -> bool;

    /// Clear state for the next utterance
    fn reset(&mut self);
}

/// Runtime settings for streaming sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Maximum concurrent sessions
    pub capacity: usize,

    /// Sample rate of incoming frames
    pub sample_rate: u32,
}

impl SessionSettings {
    /// Convert the configuration sections
    pub const fn from_config(concurrency: &ConcurrencyConfig, streaming: &StreamingConfig) -> Self {
        Self {
            capacity: concurrency.max_streaming_sessions,
            sample_rate: streaming.sample_rate,
        }
    }
}

/// One live session
pub struct StreamingSession {
    id: Uuid,
    created_at: DateTime<Utc>,
    stream: Mutex<Box<dyn DecoderStream>>,
    frames: AtomicU64,
}

impl StreamingSession {
    fn new(stream: Box<dyn DecoderStream>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            stream: Mutex::new(stream),
            frames: AtomicU64::new(0),
        }
    }

    /// Session identifier
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Creation time
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Frames processed by this session
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    fn process_frame(
        &self,
        samples: &[f32],
        sample_rate: u32,
        punctuation: &PunctuationHandle,
    ) -> FrameResult {
        let mut stream = self.stream.lock();
        stream.accept_waveform(sample_rate, samples);

        let mut steps = 0usize;
        while stream.is_ready() {
            stream.decode();
            steps += 1;
        }

        let text = stream.text();
        let text = if text.is_empty() {
            text
        } else {
            punctuation.apply(&text)
        };
        let is_endpoint = stream.is_endpoint();
        self.frames.fetch_add(1, Ordering::Relaxed);

        debug!(session_id = %self.id, steps, is_endpoint, "Frame decoded");
        FrameResult { text, is_endpoint }
    }

    fn reset(&self) {
        self.stream.lock().reset();
    }
}

impl fmt::Debug for StreamingSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingSession")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("frames", &self.frames())
            .finish_non_exhaustive()
    }
}

/// Admission-controlled registry of live sessions
pub struct SessionManager {
    recognizer: Arc<dyn OnlineRecognizer>,
    punctuation: PunctuationHandle,
    settings: SessionSettings,
    sessions: DashMap<Uuid, Arc<StreamingSession>>,
    active: AtomicUsize,
    total_sessions: AtomicU64,
    total_frames: AtomicU64,
}

impl SessionManager {
    /// Create a manager
    pub fn new(
        recognizer: Arc<dyn OnlineRecognizer>,
        punctuation: PunctuationHandle,
        settings: SessionSettings,
    ) -> Self {
        if recognizer.sample_rate() != settings.sample_rate {
            warn!(
                model_rate = recognizer.sample_rate(),
                frame_rate = settings.sample_rate,
                "Streaming frames will be resampled by the engine"
            );
        }

        Self {
            recognizer,
            punctuation,
            settings,
            sessions: DashMap::new(),
            active: AtomicUsize::new(0),
            total_sessions: AtomicU64::new(0),
            total_frames: AtomicU64::new(0),
        }
    }

    /// Open a session
    ///
    /// Fails immediately with [`AsrError::SessionCapacityExceeded`] when all
    /// slots are taken.
    pub fn create_session(&self) -> AsrResult<Uuid> {
        let capacity = self.settings.capacity;
        if self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < capacity).then_some(n + 1)
            })
            .is_err()
        {
            counter!("asr_sessions_rejected_total").increment(1);
            warn!(capacity, "Streaming session capacity exceeded");
            return Err(AsrError::session_capacity(capacity));
        }

        let stream = match self.recognizer.create_stream() {
            Ok(stream) => stream,
            Err(e) => {
                self.active.fetch_sub(1, Ordering::SeqCst);
                return Err(e);
            }
        };

        let session = Arc::new(StreamingSession::new(stream));
        let id = session.id();
        self.sessions.insert(id, session);
        self.total_sessions.fetch_add(1, Ordering::Relaxed);
        gauge!("asr_streaming_sessions_active").set(self.active.load(Ordering::SeqCst) as f64);

        info!(session_id = %id, "Streaming session created");
        Ok(id)
    }

    /// Decode one frame of audio
    ///
    /// Decodes until the engine has nothing ready. The session is not reset
    /// on an endpoint; that is the caller's call.
    pub fn process_frame(&self, session_id: Uuid, samples: &[f32]) -> AsrResult<FrameResult> {
        let session = self.session(session_id)?;
        let result = session.process_frame(samples, self.settings.sample_rate, &self.punctuation);
        self.total_frames.fetch_add(1, Ordering::Relaxed);
        Ok(result)
    }

    /// Clear a session's decoder state
    pub fn reset_session(&self, session_id: Uuid) -> AsrResult<()> {
        self.session(session_id)?.reset();
        debug!(session_id = %session_id, "Streaming session reset");
        Ok(())
    }

    /// Close a session and free its slot
    pub fn close_session(&self, session_id: Uuid) -> AsrResult<()> {
        let Some((_, session)) = self.sessions.remove(&session_id) else {
            return Err(AsrError::session_not_found(session_id));
        };
        self.active.fetch_sub(1, Ordering::SeqCst);
        gauge!("asr_streaming_sessions_active").set(self.active.load(Ordering::SeqCst) as f64);

        info!(session_id = %session_id, frames = session.frames(), "Streaming session closed");
        Ok(())
    }

    /// Close every open session
    pub fn close_all(&self) {
        let ids: Vec<Uuid> = self.sessions.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            // A concurrent close may have won already
            let _ = self.close_session(id);
        }
    }

    /// Open sessions
    pub fn active_sessions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Session statistics
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            active_sessions: self.active_sessions(),
            total_sessions: self.total_sessions.load(Ordering::Relaxed),
            total_audio_frames: self.total_frames.load(Ordering::Relaxed),
            capacity: self.settings.capacity,
        }
    }

    fn session(&self, session_id: Uuid) -> AsrResult<Arc<StreamingSession>> {
        self.sessions
            .get(&session_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| AsrError::session_not_found(session_id))
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("settings", &self.settings)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
