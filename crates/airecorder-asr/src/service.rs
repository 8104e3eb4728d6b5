//! Service facade tying the recognition components together
//!
//! This is the surface a transport layer talks to: offline tasks, standalone
//! diarization, streaming sessions, statistics and shutdown.

use crate::chunked::{ChunkedRecognizer, ChunkingSettings};
use crate::diarization::DiarizationPipeline;
use crate::engine::{
    DiarizerHandle, PunctuationHandle, Punctuator, RecognizerHandle, SpeakerDiarizer,
    SpeechRecognizer,
};
use crate::error::{AsrError, AsrResult};
use crate::queue::{QueueSettings, RecognitionProcessor, TaskQueue};
use crate::segments::SegmentPostProcessor;
use crate::streaming::{OnlineRecognizer, SessionManager, SessionSettings};
use crate::task::{Task, TaskHandle};
use crate::types::{FrameResult, QueueStats, ServiceHealth, ServiceStats, TaskResult};
use airecorder_core::{Config, DiarizationSegment};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Inference engines handed to the service
pub struct Engines {
    /// Offline recognizer
    pub recognizer: Box<dyn SpeechRecognizer>,

    /// Speaker diarizer
    pub diarizer: Option<Box<dyn SpeakerDiarizer>>,

    /// Punctuation model
    pub punctuator: Option<Box<dyn Punctuator>>,

    /// Streaming recognizer
    pub online: Option<Arc<dyn OnlineRecognizer>>,
}

impl Engines {
    /// Engines with only an offline recognizer
    pub fn new(recognizer: impl SpeechRecognizer + 'static) -> Self {
        Self {
            recognizer: Box::new(recognizer),
            diarizer: None,
            punctuator: None,
            online: None,
        }
    }

    /// Add a diarizer
    pub fn with_diarizer(mut self, diarizer: impl SpeakerDiarizer + 'static) -> Self {
        self.diarizer = Some(Box::new(diarizer));
        self
    }

    /// Add a punctuator
    pub fn with_punctuator(mut self, punctuator: impl Punctuator + 'static) -> Self {
        self.punctuator = Some(Box::new(punctuator));
        self
    }

    /// Add a streaming recognizer
    pub fn with_online(mut self, online: impl OnlineRecognizer + 'static) -> Self {
        self.online = Some(Arc::new(online));
        self
    }
}

impl fmt::Debug for Engines {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engines")
            .field("diarizer", &self.diarizer.is_some())
            .field("punctuator", &self.punctuator.is_some())
            .field("online", &self.online.is_some())
            .finish_non_exhaustive()
    }
}

/// Speech recognition service
#[derive(Debug)]
pub struct AsrService {
    /// Recognizer shared by every offline path
    recognizer: RecognizerHandle,

    /// Inline and queued task execution
    processor: RecognitionProcessor,

    /// Diarization pipeline, when a diarizer is configured
    pipeline: Option<DiarizationPipeline>,

    /// Offline task queue
    queue: TaskQueue,

    /// Streaming sessions, when streaming is configured
    sessions: Option<Arc<SessionManager>>,

    /// Audio longer than this goes through the queue
    queue_threshold: Duration,

    /// Caller wait bound for queued transcriptions
    task_timeout: Duration,
}

impl AsrService {
    /// Wire the engines and start the task queue workers
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(config: &Config, engines: Engines) -> AsrResult<Self> {
        config.ensure_valid()?;

        let punctuation = match (config.punctuation.enabled, engines.punctuator) {
            (true, Some(punctuator)) => PunctuationHandle::from_boxed(punctuator),
            (true, None) => {
                warn!("Punctuation enabled but no punctuator supplied");
                PunctuationHandle::disabled()
            }
            (false, _) => PunctuationHandle::disabled(),
        };

        let recognizer =
            RecognizerHandle::from_boxed(engines.recognizer).with_punctuation(punctuation.clone());

        let pipeline = match (config.diarization.enabled, engines.diarizer) {
            (true, Some(diarizer)) => {
                let diarizer = DiarizerHandle::from_boxed(diarizer);
                if diarizer.sample_rate() != config.diarization.sample_rate {
                    return Err(AsrError::configuration(format!(
                        "diarizer requires {} Hz but {} Hz is configured",
                        diarizer.sample_rate(),
                        config.diarization.sample_rate
                    )));
                }
                Some(DiarizationPipeline::new(
                    diarizer,
                    recognizer.clone(),
                    SegmentPostProcessor::from_config(&config.diarization),
                ))
            }
            _ => None,
        };

        let chunked = ChunkedRecognizer::new(
            recognizer.clone(),
            ChunkingSettings::from_config(&config.offline),
        );
        let processor = RecognitionProcessor::new(chunked, pipeline.clone());

        let queue_settings = QueueSettings::from_config(&config.concurrency);
        let queue = TaskQueue::new(queue_settings, Arc::new(processor.clone()));
        queue.start()?;

        let sessions = match (config.streaming.enabled, engines.online) {
            (true, Some(online)) => Some(Arc::new(SessionManager::new(
                online,
                punctuation,
                SessionSettings::from_config(&config.concurrency, &config.streaming),
            ))),
            _ => None,
        };

        info!(
            diarization = pipeline.is_some(),
            streaming = sessions.is_some(),
            workers = queue_settings.workers,
            "Speech recognition service started"
        );

        Ok(Self {
            recognizer,
            processor,
            pipeline,
            queue,
            sessions,
            queue_threshold: Duration::from_secs(config.offline.queue_threshold_secs),
            task_timeout: queue_settings.task_timeout,
        })
    }

    /// Queue audio for transcription
    pub async fn submit_task(
        &self,
        samples: impl Into<Arc<[f32]>>,
        sample_rate: u32,
        enable_diarization: bool,
    ) -> AsrResult<TaskHandle> {
        self.queue
            .submit(samples, sample_rate, enable_diarization)
            .await
    }

    /// Wait for a queued task
    ///
    /// A failed task is returned as a result carrying its error; only a
    /// timeout is an `Err`.
    pub async fn wait_for_result(&self, task: &Task, timeout: Duration) -> AsrResult<TaskResult> {
        task.wait(timeout).await
    }

    /// Transcribe audio and return the finished result
    ///
    /// Audio up to the queue threshold is processed right away; longer audio
    /// is queued and awaited.
    #[instrument(skip(self, samples))]
    pub async fn transcribe(
        &self,
        samples: impl Into<Arc<[f32]>>,
        sample_rate: u32,
        enable_diarization: bool,
    ) -> AsrResult<TaskResult> {
        let samples: Arc<[f32]> = samples.into();
        if samples.is_empty() {
            return Err(AsrError::validation("audio is empty"));
        }
        if sample_rate == 0 {
            return Err(AsrError::validation("sample rate must be positive"));
        }

        let duration_secs = samples.len() as f64 / f64::from(sample_rate);
        if duration_secs <= self.queue_threshold.as_secs_f64() {
            return self
                .processor
                .run(samples, sample_rate, enable_diarization)
                .await;
        }

        info!(duration_secs, "Long audio, routing through the task queue");
        let task = self
            .queue
            .submit(samples, sample_rate, enable_diarization)
            .await?;
        let result = task.wait(self.task_timeout).await?;
        match result.error {
            Some(e) => Err(e),
            None => Ok(result),
        }
    }

    /// Speaker segments without recognition
    pub async fn diarize(
        &self,
        samples: impl Into<Arc<[f32]>>,
        sample_rate: u32,
    ) -> AsrResult<Vec<DiarizationSegment>> {
        let Some(pipeline) = self.pipeline.clone() else {
            return Err(AsrError::configuration("diarization is not available"));
        };
        let samples: Arc<[f32]> = samples.into();

        tokio::task::spawn_blocking(move || pipeline.segments(&samples, sample_rate))
            .await
            .map_err(|e| AsrError::worker(format!("diarization task failed: {e}")))?
    }

    /// Task queue statistics
    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Open a streaming session
    pub fn create_streaming_session(&self) -> AsrResult<Uuid> {
        self.session_manager()?.create_session()
    }

    /// Decode one frame of a streaming session
    pub async fn process_frame(&self, session_id: Uuid, samples: Vec<f32>) -> AsrResult<FrameResult> {
        let sessions = Arc::clone(self.session_manager()?);
        tokio::task::spawn_blocking(move || sessions.process_frame(session_id, &samples))
            .await
            .map_err(|e| AsrError::worker(format!("frame decoding failed: {e}")))?
    }

    /// Reset a streaming session after an endpoint
    pub fn reset_session(&self, session_id: Uuid) -> AsrResult<()> {
        self.session_manager()?.reset_session(session_id)
    }

    /// Close a streaming session
    pub fn close_session(&self, session_id: Uuid) -> AsrResult<()> {
        self.session_manager()?.close_session(session_id)
    }

    /// Combined statistics
    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            queue: self.queue.stats(),
            recognizer: self.recognizer.stats(),
            streaming: self.sessions.as_ref().map(|s| s.stats()),
        }
    }

    /// Health summary
    pub fn health(&self) -> ServiceHealth {
        let stats = self.queue.stats();
        let healthy = !self.queue.is_closed();
        let status = if healthy { "ok" } else { "shutting down" };
        ServiceHealth {
            healthy,
            status: status.to_string(),
            queue_depth: stats.queue_length,
            active_workers: stats.processing,
            diarization_available: self.pipeline.is_some(),
            streaming_available: self.sessions.is_some(),
            checked_at: chrono::Utc::now(),
        }
    }

    /// Stop the queue, wait for running tasks and close all sessions
    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
        if let Some(sessions) = &self.sessions {
            sessions.close_all();
        }
        info!("Speech recognition service stopped");
    }

    fn session_manager(&self) -> AsrResult<&Arc<SessionManager>> {
        self.sessions
            .as_ref()
            .ok_or_else(|| AsrError::configuration("streaming recognition is not available"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockDiarizer, MockOnlineRecognizer, MockRecognizer};

    #[test]
    fn test_start_outside_runtime_fails() {
        let result = AsrService::start(&Config::default(), Engines::new(MockRecognizer::fixed("x")));
        assert!(matches!(result, Err(AsrError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let mut config = Config::default();
        config.concurrency.worker_pool_size = 0;

        let result = AsrService::start(&config, Engines::new(MockRecognizer::fixed("x")));
        assert!(matches!(result, Err(AsrError::Core(_))));
    }

    #[tokio::test]
    async fn test_start_rejects_diarizer_rate_mismatch() {
        let engines = Engines::new(MockRecognizer::fixed("x"))
            .with_diarizer(MockDiarizer::new(8_000, Vec::new()));

        let result = AsrService::start(&Config::default(), engines);
        assert!(matches!(result, Err(AsrError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_streaming_disabled_in_config() {
        let mut config = Config::default();
        config.streaming.enabled = false;
        let engines = Engines::new(MockRecognizer::fixed("x"))
            .with_online(MockOnlineRecognizer::new(16_000, &["a"]));

        let service = AsrService::start(&config, engines).unwrap();
        assert!(!service.health().streaming_available);
        assert!(service.stats().streaming.is_none());

        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_huge_processing_timeouts_do_not_panic() {
        let mut config = Config::default();
        config.offline.base_timeout_mins = u64::MAX / 60;
        config.offline.max_processing_timeout_mins = u64::MAX / 60;
        let service = AsrService::start(&config, Engines::new(MockRecognizer::fixed("x"))).unwrap();

        // 61 s stays inline but needs two chunks
        let result = service
            .transcribe(vec![0.1; 61 * 16_000], 16_000, false)
            .await
            .unwrap();
        assert_eq!(result.text, "x x");

        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_health_after_shutdown() {
        let service =
            AsrService::start(&Config::default(), Engines::new(MockRecognizer::fixed("x"))).unwrap();
        assert!(service.health().healthy);

        service.shutdown().await;
        let health = service.health();
        assert!(!health.healthy);
        assert_eq!(health.status, "shutting down");
    }
}
