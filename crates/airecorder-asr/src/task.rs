//! Offline transcription tasks

use crate::error::{AsrError, AsrResult};
use crate::types::TaskResult;
use airecorder_core::TaskStatus;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

/// Shared handle to a submitted task
pub type TaskHandle = Arc<Task>;

#[derive(Debug, Default)]
struct TaskState {
    status: TaskStatus,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    result: Option<TaskResult>,
}

/// One unit of offline transcription work
///
/// The result is published once through a single-slot channel. The first
/// caller to wait owns the receiving end; if it gives up, the result is not
/// delivered to anyone else.
#[derive(Debug)]
pub struct Task {
    id: Uuid,
    samples: Arc<[f32]>,
    sample_rate: u32,
    enable_diarization: bool,
    submitted_at: DateTime<Utc>,
    submitted: Instant,
    deadline: Instant,
    state: Mutex<TaskState>,
    result_tx: Mutex<Option<oneshot::Sender<TaskResult>>>,
    result_rx: Mutex<Option<oneshot::Receiver<TaskResult>>>,
}

impl Task {
    pub(crate) fn new(
        samples: Arc<[f32]>,
        sample_rate: u32,
        enable_diarization: bool,
        timeout: Duration,
    ) -> Self {
        let (tx, rx) = oneshot::channel();
        let submitted = Instant::now();
        Self {
            id: Uuid::new_v4(),
            samples,
            sample_rate,
            enable_diarization,
            submitted_at: Utc::now(),
            submitted,
            deadline: submitted
                .checked_add(timeout)
                .unwrap_or_else(|| submitted + Duration::from_secs(86_400)),
            state: Mutex::new(TaskState::default()),
            result_tx: Mutex::new(Some(tx)),
            result_rx: Mutex::new(Some(rx)),
        }
    }

    /// Task identifier
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Audio samples
    pub fn samples(&self) -> Arc<[f32]> {
        Arc::clone(&self.samples)
    }

    /// Audio sample rate
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Whether speaker diarization was requested
    pub const fn enable_diarization(&self) -> bool {
        self.enable_diarization
    }

    /// Audio duration in seconds
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }

    /// Submission time
    pub const fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    /// Current lifecycle state
    pub fn status(&self) -> TaskStatus {
        self.state.lock().status
    }

    /// Time a worker picked the task up
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().started_at
    }

    /// Time the task reached a terminal state
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().completed_at
    }

    /// Recorded result, once terminal
    pub fn result(&self) -> Option<TaskResult> {
        self.state.lock().result.clone()
    }

    pub(crate) fn queued_for(&self) -> Duration {
        self.submitted.elapsed()
    }

    pub(crate) fn deadline_passed(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// `Pending -> Processing`; false if the task was not pending
    pub(crate) fn mark_processing(&self) -> bool {
        let mut state = self.state.lock();
        if !state.status.can_transition_to(TaskStatus::Processing) {
            return false;
        }
        state.status = TaskStatus::Processing;
        state.started_at = Some(Utc::now());
        true
    }

    /// Record the result and wake the waiter
    ///
    /// Returns false, leaving the task untouched, unless it was processing.
    pub(crate) fn complete(&self, result: TaskResult) -> bool {
        let status = if result.is_success() {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };

        {
            let mut state = self.state.lock();
            if !state.status.can_transition_to(status) {
                return false;
            }
            state.status = status;
            state.completed_at = Some(Utc::now());
            state.result = Some(result.clone());
        }

        if let Some(tx) = self.result_tx.lock().take() {
            // The waiter may have given up already
            let _ = tx.send(result);
        }
        true
    }

    /// Wait for the result
    ///
    /// Gives up after `timeout` or at the task's own deadline, whichever
    /// comes first, with [`AsrError::TaskTimeout`]. Giving up does not change
    /// the task's status. Only the first caller can receive the result; any
    /// later caller gets a timeout immediately.
    pub async fn wait(&self, timeout: Duration) -> AsrResult<TaskResult> {
        let started = Instant::now();
        let Some(mut rx) = self.result_rx.lock().take() else {
            return Err(AsrError::task_timeout(self.id, Duration::ZERO));
        };

        let until = started
            .checked_add(timeout)
            .map_or(self.deadline, |limit| limit.min(self.deadline));

        match tokio::time::timeout_at(until, &mut rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(AsrError::worker(format!(
                "task {} was dropped before completing",
                self.id
            ))),
            Err(_) => Err(AsrError::task_timeout(self.id, started.elapsed())),
        }
    }
}
