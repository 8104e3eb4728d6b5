//! Result and statistics types produced by the recognition layer

use crate::error::AsrError;
use airecorder_core::DiarizationSegment;
use serde::{Serialize, Serializer};

/// Outcome of one offline transcription task
///
/// A result carries either recognized text or an error, never a panic. The
/// segment list is empty unless diarization was requested.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskResult {
    /// Full recognized text
    pub text: String,

    /// Speaker-attributed segments ordered by start time
    pub segments: Vec<DiarizationSegment>,

    /// Audio duration in seconds
    pub duration_secs: f64,

    /// Failure, if the task did not succeed
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<AsrError>,
}

impl TaskResult {
    /// Create a successful result
    pub fn success(
        text: impl Into<String>,
        segments: Vec<DiarizationSegment>,
        duration_secs: f64,
    ) -> Self {
        Self {
            text: text.into(),
            segments,
            duration_secs,
            error: None,
        }
    }

    /// Create a failed result
    pub fn failure(error: AsrError, duration_secs: f64) -> Self {
        Self {
            text: String::new(),
            segments: Vec::new(),
            duration_secs,
            error: Some(error),
        }
    }

    /// Whether the task succeeded
    pub const fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Number of distinct speakers in the segment list
    pub fn speaker_count(&self) -> usize {
        let mut speakers: Vec<u32> = self.segments.iter().map(|s| s.speaker).collect();
        speakers.sort_unstable();
        speakers.dedup();
        speakers.len()
    }
}

fn serialize_error<S>(error: &Option<AsrError>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match error {
        Some(err) => serializer.serialize_some(&err.to_string()),
        None => serializer.serialize_none(),
    }
}

/// Task queue statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueStats {
    /// Tasks admitted into the queue
    pub accepted: u64,

    /// Submissions rejected because the queue stayed full
    pub rejected: u64,

    /// Tasks waiting for a worker
    pub queued: u64,

    /// Tasks currently executing
    pub processing: u64,

    /// Tasks finished successfully
    pub completed: u64,

    /// Tasks finished with an error
    pub failed: u64,

    /// Current channel length
    pub queue_length: usize,

    /// Number of workers
    pub max_workers: usize,

    /// Queue capacity
    pub max_queue_size: usize,

    /// Average time between submission and pickup
    pub avg_wait_time_ms: f64,

    /// Average execution time
    pub avg_exec_time_ms: f64,
}

/// Request counters for an engine handle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    /// Calls made through the handle
    pub total_requests: u64,

    /// Calls that returned text
    pub success_count: u64,

    /// Calls that failed
    pub failure_count: u64,
}

/// Streaming session statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// Open sessions
    pub active_sessions: usize,

    /// Sessions ever created
    pub total_sessions: u64,

    /// Frames processed across all sessions
    pub total_audio_frames: u64,

    /// Session capacity
    pub capacity: usize,
}

/// Text produced by one streaming frame
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FrameResult {
    /// Current partial or final text
    pub text: String,

    /// The engine detected an utterance boundary
    pub is_endpoint: bool,
}

/// Combined service statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct ServiceStats {
    /// Task queue statistics
    pub queue: QueueStats,

    /// Offline recognizer counters
    pub recognizer: EngineStats,

    /// Streaming statistics, when streaming is enabled
    pub streaming: Option<SessionStats>,
}

/// Service health status
#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealth {
    /// Whether the service accepts work
    pub healthy: bool,

    /// Status message
    pub status: String,

    /// Current queue depth
    pub queue_depth: usize,

    /// Tasks currently executing
    pub active_workers: u64,

    /// Diarization is available
    pub diarization_available: bool,

    /// Streaming is available
    pub streaming_available: bool,

    /// Last health check timestamp
    pub checked_at: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_task_result_success() {
        let result = TaskResult::success(
            "hello world",
            vec![
                DiarizationSegment::new(0.0, 1.0, 0),
                DiarizationSegment::new(1.0, 2.0, 1),
                DiarizationSegment::new(2.5, 3.0, 0),
            ],
            3.0,
        );

        assert!(result.is_success());
        assert_eq!(result.speaker_count(), 2);
    }

    #[test]
    fn test_task_result_serializes_error_message() {
        let result = TaskResult::failure(AsrError::queue_full(3), 1.5);
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["error"], "Task queue is full (max: 3)");
        assert_eq!(json["duration_secs"], 1.5);
        assert_eq!(json["text"], "");
    }

    #[test]
    fn test_task_result_serializes_no_error_as_null() {
        let result = TaskResult::success("ok", Vec::new(), 0.5);
        let json = serde_json::to_value(&result).unwrap();
        assert!(json["error"].is_null());
    }

    #[test]
    fn test_stats_default() {
        let stats = QueueStats::default();
        assert_eq!(stats.completed, 0);
        assert_eq!(stats.avg_exec_time_ms, 0.0);

        let engine = EngineStats::default();
        assert_eq!(engine.total_requests, 0);
    }
}
