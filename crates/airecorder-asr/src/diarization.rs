//! Diarization followed by per-segment recognition

use crate::engine::{DiarizerHandle, RecognizerHandle};
use crate::error::AsrResult;
use crate::segments::SegmentPostProcessor;
use crate::types::TaskResult;
use airecorder_core::DiarizationSegment;
use std::ops::Range;
use tracing::{debug, instrument, warn};

/// Sample range covered by `segment`, clamped to `len` samples
///
/// Uses `[floor(start * rate), floor(end * rate))`.
pub fn sample_range(segment: &DiarizationSegment, sample_rate: u32, len: usize) -> Range<usize> {
    let rate = f64::from(sample_rate);
    let start = ((segment.start * rate).floor() as usize).min(len);
    let end = ((segment.end * rate).floor() as usize).min(len);
    start..end.max(start)
}

/// Diarizer, post-processor and recognizer wired together
#[derive(Debug, Clone)]
pub struct DiarizationPipeline {
    diarizer: DiarizerHandle,
    recognizer: RecognizerHandle,
    post_processor: SegmentPostProcessor,
}

impl DiarizationPipeline {
    /// Create a pipeline
    pub const fn new(
        diarizer: DiarizerHandle,
        recognizer: RecognizerHandle,
        post_processor: SegmentPostProcessor,
    ) -> Self {
        Self {
            diarizer,
            recognizer,
            post_processor,
        }
    }

    /// Sample rate the diarizer requires
    pub const fn sample_rate(&self) -> u32 {
        self.diarizer.sample_rate()
    }

    /// Diarize and post-process, without recognition
    #[instrument(skip(self, samples), fields(samples = samples.len()))]
    pub fn segments(&self, samples: &[f32], sample_rate: u32) -> AsrResult<Vec<DiarizationSegment>> {
        let raw = self.diarizer.diarize(samples, sample_rate)?;
        let raw_count = raw.len();
        let segments = self.post_processor.process(raw);
        debug!(
            raw_segments = raw_count,
            segments = segments.len(),
            "Diarization post-processed"
        );
        Ok(segments)
    }

    /// Diarize, then recognize each segment
    ///
    /// A segment whose recognition fails keeps empty text. The full text joins
    /// the non-empty segment texts with single spaces.
    #[instrument(skip(self, samples), fields(samples = samples.len()))]
    pub fn transcribe(&self, samples: &[f32], sample_rate: u32) -> AsrResult<TaskResult> {
        let mut segments = self.segments(samples, sample_rate)?;

        for (index, segment) in segments.iter_mut().enumerate() {
            let range = sample_range(segment, sample_rate, samples.len());
            let Some(slice) = samples.get(range).filter(|s| !s.is_empty()) else {
                continue;
            };

            match self.recognizer.recognize(slice, sample_rate) {
                Ok(text) => segment.text = text,
                Err(e) => {
                    warn!(
                        segment = index,
                        speaker = segment.speaker,
                        error = %e,
                        "Segment recognition failed"
                    );
                }
            }
        }

        let text = segments
            .iter()
            .map(|s| s.text.as_str())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        let duration_secs = samples.len() as f64 / f64::from(sample_rate);
        Ok(TaskResult::success(text, segments, duration_secs))
    }
}
