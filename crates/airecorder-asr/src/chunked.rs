//! Chunked recognition of long audio
//!
//! Audio longer than one window is cut into contiguous windows that are
//! recognized by a small pool of concurrent workers under one processing
//! deadline. Results are reassembled by chunk index, never by arrival order.
//! The call succeeds with partial text as long as some chunk produced text.

use crate::engine::RecognizerHandle;
use crate::error::{AsrError, AsrResult};
use airecorder_core::OfflineAsrConfig;
use metrics::counter;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Runtime settings for chunked recognition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingSettings {
    /// Window length
    pub chunk_duration: Duration,

    /// Concurrent chunk workers per call
    pub max_concurrency: usize,

    /// Fixed part of the processing budget
    pub base_timeout: Duration,

    /// Upper bound on the processing budget
    pub max_timeout: Duration,
}

impl ChunkingSettings {
    /// Convert the offline configuration section
    pub const fn from_config(config: &OfflineAsrConfig) -> Self {
        Self {
            chunk_duration: Duration::from_secs(config.chunk_duration_secs as u64),
            max_concurrency: config.max_concurrency,
            base_timeout: Duration::from_secs(config.base_timeout_mins.saturating_mul(60)),
            max_timeout: Duration::from_secs(config.max_processing_timeout_mins.saturating_mul(60)),
        }
    }

    /// Processing budget for `audio_secs` of audio
    ///
    /// `base + 3 * audio_secs`, capped at the maximum.
    pub fn deadline_budget(&self, audio_secs: f64) -> Duration {
        let scaled = Duration::try_from_secs_f64(3.0 * audio_secs.max(0.0))
            .unwrap_or(self.max_timeout);
        self.base_timeout.saturating_add(scaled).min(self.max_timeout)
    }
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self::from_config(&OfflineAsrConfig::default())
    }
}

/// Partition of a sample buffer into fixed-size windows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    total_samples: usize,
    chunk_samples: usize,
}

impl ChunkPlan {
    /// Plan windows of `chunk_duration` over `total_samples` samples
    pub fn new(total_samples: usize, sample_rate: u32, chunk_duration: Duration) -> Self {
        let chunk_samples = (f64::from(sample_rate) * chunk_duration.as_secs_f64()) as usize;
        Self {
            total_samples,
            chunk_samples: chunk_samples.max(1),
        }
    }

    /// Samples per full window
    pub const fn chunk_samples(&self) -> usize {
        self.chunk_samples
    }

    /// Number of windows, the last one possibly shorter
    pub const fn chunk_count(&self) -> usize {
        self.total_samples.div_ceil(self.chunk_samples)
    }

    /// Sample range of window `index`
    pub fn range(&self, index: usize) -> Option<Range<usize>> {
        if index >= self.chunk_count() {
            return None;
        }
        let start = index * self.chunk_samples;
        let end = (start + self.chunk_samples).min(self.total_samples);
        Some(start..end)
    }
}

/// Result of recognizing one chunk
#[derive(Debug, Clone)]
pub struct ChunkOutcome {
    /// Chunk index
    pub index: usize,

    /// Recognized text or the chunk's failure
    pub result: AsrResult<String>,
}

/// Collector that assembles chunk outcomes in index order
#[derive(Debug)]
pub struct ChunkOutcomes {
    slots: Vec<Option<AsrResult<String>>>,
}

impl ChunkOutcomes {
    /// Collector for `count` chunks
    pub fn new(count: usize) -> Self {
        Self {
            slots: vec![None; count],
        }
    }

    /// Record one outcome, in any order
    pub fn record(&mut self, outcome: ChunkOutcome) {
        match self.slots.get_mut(outcome.index) {
            Some(slot) => *slot = Some(outcome.result),
            None => warn!(chunk = outcome.index, "Ignoring outcome for unknown chunk"),
        }
    }

    /// Join chunk texts in index order
    ///
    /// Empty texts are skipped and failed or missing chunks contribute
    /// nothing. Fails with [`AsrError::AllChunksFailed`] when some chunk
    /// failed and no text at all was produced.
    pub fn assemble(self) -> AsrResult<String> {
        let chunks = self.slots.len();
        let mut texts = Vec::with_capacity(chunks);
        let mut failures = 0usize;
        let mut first_error = None;

        for (index, slot) in self.slots.into_iter().enumerate() {
            let error = match slot {
                Some(Ok(text)) => {
                    if !text.is_empty() {
                        texts.push(text);
                    }
                    continue;
                }
                Some(Err(e)) => e,
                None => AsrError::chunk_failed(index, "chunk was never processed"),
            };

            warn!(chunk = index, error = %error, "Chunk failed");
            failures += 1;
            if first_error.is_none() {
                first_error = Some(error.to_string());
            }
        }

        if failures > 0 {
            counter!("asr_chunks_failed_total").increment(failures as u64);
        }

        match first_error {
            Some(first_error) if texts.is_empty() => {
                Err(AsrError::all_chunks_failed(chunks, first_error))
            }
            _ => Ok(texts.join(" ")),
        }
    }
}

/// Recognizes long audio in concurrently processed windows
#[derive(Debug, Clone)]
pub struct ChunkedRecognizer {
    recognizer: RecognizerHandle,
    settings: ChunkingSettings,
}

impl ChunkedRecognizer {
    /// Create an orchestrator over `recognizer`
    pub const fn new(recognizer: RecognizerHandle, settings: ChunkingSettings) -> Self {
        Self {
            recognizer,
            settings,
        }
    }

    /// Runtime settings
    pub const fn settings(&self) -> &ChunkingSettings {
        &self.settings
    }

    /// Recognize `samples`
    ///
    /// Audio no longer than one window goes to the recognizer in a single
    /// call.
    #[instrument(skip(self, samples), fields(samples = samples.len()))]
    pub async fn recognize(&self, samples: Arc<[f32]>, sample_rate: u32) -> AsrResult<String> {
        if sample_rate == 0 {
            return Err(AsrError::validation("sample rate must be positive"));
        }

        let plan = ChunkPlan::new(samples.len(), sample_rate, self.settings.chunk_duration);
        if plan.chunk_count() <= 1 {
            let len = samples.len();
            return self.recognizer.recognize_range(samples, 0..len, sample_rate).await;
        }

        let audio_secs = samples.len() as f64 / f64::from(sample_rate);
        let budget = self.settings.deadline_budget(audio_secs);
        info!(
            chunks = plan.chunk_count(),
            audio_secs,
            budget_secs = budget.as_secs(),
            "Starting chunked recognition"
        );

        // A budget too large to represent as an instant means no deadline
        let deadline = Instant::now().checked_add(budget);
        self.recognize_chunks(samples, sample_rate, plan, deadline).await
    }

    async fn recognize_chunks(
        &self,
        samples: Arc<[f32]>,
        sample_rate: u32,
        plan: ChunkPlan,
        deadline: Option<Instant>,
    ) -> AsrResult<String> {
        let count = plan.chunk_count();
        let (work_tx, work_rx) = async_channel::bounded(count);
        for index in 0..count {
            work_tx
                .try_send(index)
                .map_err(|e| AsrError::worker(format!("failed to queue chunk: {e}")))?;
        }
        work_tx.close();

        let (result_tx, result_rx) = async_channel::bounded(count);
        let workers = self.settings.max_concurrency.clamp(1, count);
        let mut set = JoinSet::new();

        for worker_id in 0..workers {
            let work_rx = work_rx.clone();
            let result_tx = result_tx.clone();
            let recognizer = self.recognizer.clone();
            let samples = Arc::clone(&samples);

            set.spawn(async move {
                while let Ok(index) = work_rx.recv().await {
                    if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                        warn!(worker_id, chunk = index, "Processing deadline exceeded");
                        let outcome = ChunkOutcome {
                            index,
                            result: Err(AsrError::chunk_failed(
                                index,
                                "processing deadline exceeded",
                            )),
                        };
                        if let Err(e) = result_tx.send(outcome).await {
                            debug!(worker_id, error = %e, "Result channel closed");
                        }
                        break;
                    }

                    let Some(range) = plan.range(index) else {
                        continue;
                    };
                    let result = recognizer
                        .recognize_range(Arc::clone(&samples), range, sample_rate)
                        .await
                        .map_err(|e| AsrError::chunk_failed(index, e.to_string()));
                    debug!(worker_id, chunk = index, ok = result.is_ok(), "Chunk finished");

                    if result_tx.send(ChunkOutcome { index, result }).await.is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);

        let mut outcomes = ChunkOutcomes::new(count);
        while let Ok(outcome) = result_rx.recv().await {
            outcomes.record(outcome);
        }

        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Chunk worker failed");
            }
        }

        outcomes.assemble()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRecognizer;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    const RATE: u32 = 100;

    fn settings(chunk_secs: u64) -> ChunkingSettings {
        ChunkingSettings {
            chunk_duration: Duration::from_secs(chunk_secs),
            max_concurrency: 4,
            base_timeout: Duration::from_secs(60),
            max_timeout: Duration::from_secs(600),
        }
    }

    /// `chunks` windows of `chunk_secs` where window `n` holds the value `n`
    fn marked_audio(chunk_secs: usize, chunks: usize, tail_secs: usize) -> Arc<[f32]> {
        let per_chunk = chunk_secs * RATE as usize;
        let mut samples: Vec<f32> = (0..chunks)
            .flat_map(|n| std::iter::repeat_n(n as f32, per_chunk))
            .collect();
        samples.extend(std::iter::repeat_n(chunks as f32, tail_secs * RATE as usize));
        samples.into()
    }

    #[rstest]
    #[case(0, 0)]
    #[case(1, 1)]
    #[case(6_000, 1)]
    #[case(6_001, 2)]
    #[case(15_000, 3)]
    #[case(18_000, 3)]
    fn test_chunk_count(#[case] samples: usize, #[case] expected: usize) {
        let plan = ChunkPlan::new(samples, RATE, Duration::from_secs(60));
        assert_eq!(plan.chunk_count(), expected);
    }

    #[test]
    fn test_chunk_ranges_cover_audio() {
        let plan = ChunkPlan::new(15_000, RATE, Duration::from_secs(60));
        assert_eq!(plan.range(0), Some(0..6_000));
        assert_eq!(plan.range(1), Some(6_000..12_000));
        assert_eq!(plan.range(2), Some(12_000..15_000));
        assert_eq!(plan.range(3), None);
    }

    #[rstest]
    #[case(0.0, 30 * 60)]
    #[case(150.0, 30 * 60 + 450)]
    #[case(1_200.0, 90 * 60)]
    #[case(3_600.0, 120 * 60)]
    #[case(100_000.0, 120 * 60)]
    fn test_deadline_budget(#[case] audio_secs: f64, #[case] expected_secs: u64) {
        let settings = ChunkingSettings::default();
        assert_eq!(
            settings.deadline_budget(audio_secs),
            Duration::from_secs(expected_secs)
        );
    }

    #[test]
    fn test_outcomes_assemble_by_index() {
        let mut outcomes = ChunkOutcomes::new(4);
        for index in (0..4).rev() {
            outcomes.record(ChunkOutcome {
                index,
                result: Ok(format!("part{index}")),
            });
        }
        assert_eq!(outcomes.assemble().unwrap(), "part0 part1 part2 part3");
    }

    #[test]
    fn test_outcomes_skip_empty_and_failed() {
        let mut outcomes = ChunkOutcomes::new(4);
        outcomes.record(ChunkOutcome {
            index: 2,
            result: Ok("c".to_string()),
        });
        outcomes.record(ChunkOutcome {
            index: 1,
            result: Err(AsrError::chunk_failed(1, "boom")),
        });
        outcomes.record(ChunkOutcome {
            index: 0,
            result: Ok("a".to_string()),
        });
        outcomes.record(ChunkOutcome {
            index: 3,
            result: Ok(String::new()),
        });
        assert_eq!(outcomes.assemble().unwrap(), "a c");
    }

    #[test]
    fn test_outcomes_missing_chunks_count_as_failed() {
        let outcomes = ChunkOutcomes::new(2);
        let result = outcomes.assemble();
        assert!(matches!(result, Err(AsrError::AllChunksFailed { chunks: 2, .. })));
    }

    #[test]
    fn test_outcomes_all_empty_text_is_success() {
        let mut outcomes = ChunkOutcomes::new(2);
        for index in 0..2 {
            outcomes.record(ChunkOutcome {
                index,
                result: Ok(String::new()),
            });
        }
        assert_eq!(outcomes.assemble().unwrap(), "");
    }

    #[tokio::test]
    async fn test_short_audio_single_call() {
        let recognizer = MockRecognizer::fixed("short");
        let probe = recognizer.probe();
        let chunked = ChunkedRecognizer::new(RecognizerHandle::new(recognizer), settings(60));

        let text = chunked.recognize(marked_audio(30, 1, 0), RATE).await.unwrap();

        assert_eq!(text, "short");
        assert_eq!(probe.calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_chunk_workers_join_text_by_index() {
        // Engine calls are serialized by the handle, so arrival order follows
        // lock acquisition; reverse arrival is covered on `ChunkOutcomes`
        let recognizer = MockRecognizer::marker("chunk").with_delay(Duration::from_millis(10));
        let probe = recognizer.probe();
        let chunked = ChunkedRecognizer::new(RecognizerHandle::new(recognizer), settings(60));

        let text = chunked.recognize(marked_audio(60, 4, 0), RATE).await.unwrap();

        assert_eq!(text, "chunk0 chunk1 chunk2 chunk3");
        assert_eq!(probe.calls(), 4);
        assert_eq!(probe.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_unrepresentable_deadline_means_no_deadline() {
        let config = OfflineAsrConfig {
            base_timeout_mins: u64::MAX / 60,
            max_processing_timeout_mins: u64::MAX / 60,
            ..OfflineAsrConfig::default()
        };
        let settings = ChunkingSettings {
            chunk_duration: Duration::from_secs(60),
            ..ChunkingSettings::from_config(&config)
        };
        let chunked =
            ChunkedRecognizer::new(RecognizerHandle::new(MockRecognizer::marker("chunk")), settings);

        let text = chunked.recognize(marked_audio(60, 1, 1), RATE).await.unwrap();

        assert_eq!(text, "chunk0 chunk1");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_partial_failure_keeps_other_chunks() {
        let recognizer = MockRecognizer::from_fn(|samples, _| {
            let index = samples.first().copied().unwrap_or_default() as i64;
            if index == 1 {
                Err(AsrError::adapter("recognizer", "corrupt chunk"))
            } else {
                Ok(format!("chunk{index}"))
            }
        });
        let chunked = ChunkedRecognizer::new(RecognizerHandle::new(recognizer), settings(60));

        let text = chunked.recognize(marked_audio(60, 3, 30), RATE).await.unwrap();

        assert_eq!(text, "chunk0 chunk2 chunk3");
    }

    #[tokio::test]
    async fn test_all_chunks_failed() {
        let chunked = ChunkedRecognizer::new(
            RecognizerHandle::new(MockRecognizer::failing("engine offline")),
            settings(60),
        );

        let result = chunked.recognize(marked_audio(60, 3, 0), RATE).await;

        assert!(matches!(result, Err(AsrError::AllChunksFailed { chunks: 3, .. })));
    }

    #[tokio::test]
    async fn test_expired_deadline_starts_no_work() {
        let recognizer = MockRecognizer::fixed("late");
        let probe = recognizer.probe();
        let settings = ChunkingSettings {
            base_timeout: Duration::ZERO,
            max_timeout: Duration::ZERO,
            ..settings(60)
        };
        let chunked = ChunkedRecognizer::new(RecognizerHandle::new(recognizer), settings);

        let result = chunked.recognize(marked_audio(60, 3, 0), RATE).await;

        assert!(matches!(result, Err(AsrError::AllChunksFailed { .. })));
        assert_eq!(probe.calls(), 0);
    }

    #[tokio::test]
    async fn test_150_seconds_three_chunks() {
        let recognizer = MockRecognizer::from_fn(|samples, _| {
            let index = samples.first().copied().unwrap_or_default() as i64;
            Ok(format!("chunk{index}:{}", samples.len()))
        });
        let probe = recognizer.probe();
        let chunked = ChunkedRecognizer::new(RecognizerHandle::new(recognizer), settings(60));

        let text = chunked.recognize(marked_audio(60, 2, 30), RATE).await.unwrap();

        assert_eq!(text, "chunk0:6000 chunk1:6000 chunk2:3000");
        assert_eq!(probe.calls(), 3);
    }

    #[tokio::test]
    async fn test_zero_sample_rate_rejected() {
        let chunked =
            ChunkedRecognizer::new(RecognizerHandle::new(MockRecognizer::fixed("x")), settings(60));
        let result = chunked.recognize(marked_audio(1, 1, 0), 0).await;
        assert!(matches!(result, Err(AsrError::Validation { .. })));
    }
}
