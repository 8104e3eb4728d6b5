//! Bounded task queue served by a fixed pool of workers

use crate::chunked::ChunkedRecognizer;
use crate::diarization::DiarizationPipeline;
use crate::error::{AsrError, AsrResult};
use crate::task::{Task, TaskHandle};
use crate::types::{QueueStats, TaskResult};
use airecorder_core::ConcurrencyConfig;
use async_channel::{Receiver, Sender};
use futures::FutureExt;
use futures::future::BoxFuture;
use metrics::{counter, gauge, histogram};
use parking_lot::Mutex;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Runtime settings for the task queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSettings {
    /// Number of workers
    pub workers: usize,

    /// Queue capacity
    pub capacity: usize,

    /// How long `submit` waits for a free slot
    pub admission_wait: Duration,

    /// Per-task deadline, measured from submission
    pub task_timeout: Duration,
}

impl QueueSettings {
    /// Convert the concurrency configuration section
    pub const fn from_config(config: &ConcurrencyConfig) -> Self {
        Self {
            workers: config.worker_pool_size,
            capacity: config.queue_size,
            admission_wait: Duration::from_secs(config.admission_wait_secs),
            task_timeout: Duration::from_secs(config.task_timeout_mins.saturating_mul(60)),
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self::from_config(&ConcurrencyConfig::default())
    }
}

/// Counters owned by one queue and shared with its workers
#[derive(Debug, Default)]
pub struct QueueCounters {
    accepted: AtomicU64,
    rejected: AtomicU64,
    dequeued: AtomicU64,
    processing: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    total_wait_ms: AtomicU64,
    total_exec_ms: AtomicU64,
}

impl QueueCounters {
    /// Tasks ever taken off the queue by a worker
    pub fn dequeued(&self) -> u64 {
        self.dequeued.load(Ordering::SeqCst)
    }

    fn snapshot(&self, queue_length: usize, settings: &QueueSettings) -> QueueStats {
        let accepted = self.accepted.load(Ordering::SeqCst);
        // A worker can dequeue a task before its submitter counts it as accepted
        let queued = accepted.saturating_sub(self.dequeued.load(Ordering::SeqCst));
        let completed = self.completed.load(Ordering::SeqCst);
        let failed = self.failed.load(Ordering::SeqCst);
        let finished = completed + failed;
        let average = |total: &AtomicU64| {
            if finished == 0 {
                0.0
            } else {
                total.load(Ordering::SeqCst) as f64 / finished as f64
            }
        };

        QueueStats {
            accepted,
            rejected: self.rejected.load(Ordering::SeqCst),
            queued,
            processing: self.processing.load(Ordering::SeqCst),
            completed,
            failed,
            queue_length,
            max_workers: settings.workers,
            max_queue_size: settings.capacity,
            avg_wait_time_ms: average(&self.total_wait_ms),
            avg_exec_time_ms: average(&self.total_exec_ms),
        }
    }
}

/// Executes one task on behalf of a worker
pub trait TaskProcessor: Send + Sync + 'static {
    /// Produce the task's result
    ///
    /// Errors are recorded in the task result; they never stop the worker.
    fn process(&self, task: TaskHandle) -> BoxFuture<'static, AsrResult<TaskResult>>;
}

/// Standard processor: diarization pipeline or chunked recognition
#[derive(Debug, Clone)]
pub struct RecognitionProcessor {
    chunked: ChunkedRecognizer,
    pipeline: Option<DiarizationPipeline>,
}

impl RecognitionProcessor {
    /// Create a processor
    pub const fn new(chunked: ChunkedRecognizer, pipeline: Option<DiarizationPipeline>) -> Self {
        Self { chunked, pipeline }
    }

    /// Transcribe `samples`, with speaker segments if requested and available
    ///
    /// Diarization requests fall back to plain recognition when no pipeline
    /// is configured.
    pub async fn run(
        &self,
        samples: Arc<[f32]>,
        sample_rate: u32,
        enable_diarization: bool,
    ) -> AsrResult<TaskResult> {
        let duration_secs = samples.len() as f64 / f64::from(sample_rate.max(1));

        if enable_diarization {
            if let Some(pipeline) = self.pipeline.clone() {
                return tokio::task::spawn_blocking(move || {
                    pipeline.transcribe(&samples, sample_rate)
                })
                .await
                .map_err(|e| AsrError::worker(format!("diarization task failed: {e}")))?;
            }
            warn!("Diarization requested but not available, using plain recognition");
        }

        let text = self.chunked.recognize(samples, sample_rate).await?;
        Ok(TaskResult::success(text, Vec::new(), duration_secs))
    }
}

impl TaskProcessor for RecognitionProcessor {
    fn process(&self, task: TaskHandle) -> BoxFuture<'static, AsrResult<TaskResult>> {
        let processor = self.clone();
        async move {
            processor
                .run(task.samples(), task.sample_rate(), task.enable_diarization())
                .await
        }
        .boxed()
    }
}

/// Bounded FIFO of tasks and the workers that drain it
pub struct TaskQueue {
    /// Runtime settings
    settings: QueueSettings,

    /// Task sender
    sender: Sender<TaskHandle>,

    /// Task receiver, cloned into each worker
    receiver: Receiver<TaskHandle>,

    /// Task executor
    processor: Arc<dyn TaskProcessor>,

    /// Counters shared with workers
    counters: Arc<QueueCounters>,

    /// Stops workers from picking up new tasks
    shutdown: CancellationToken,

    /// Submissions are refused once set
    closed: AtomicBool,

    /// Worker handles
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskQueue {
    /// Create a queue; workers are not running until [`Self::start`]
    pub fn new(settings: QueueSettings, processor: Arc<dyn TaskProcessor>) -> Self {
        let (sender, receiver) = async_channel::bounded(settings.capacity.max(1));
        Self {
            settings,
            sender,
            receiver,
            processor,
            counters: Arc::new(QueueCounters::default()),
            shutdown: CancellationToken::new(),
            closed: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the workers on the current Tokio runtime
    pub fn start(&self) -> AsrResult<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            AsrError::configuration(format!("task queue needs a Tokio runtime: {e}"))
        })?;

        if self.closed.load(Ordering::SeqCst) {
            return Err(AsrError::QueueClosed);
        }

        let mut workers = self.workers.lock();
        if !workers.is_empty() {
            return Err(AsrError::worker("task queue already started"));
        }

        info!(
            workers = self.settings.workers,
            capacity = self.settings.capacity,
            "Starting task queue"
        );

        for worker_id in 0..self.settings.workers {
            workers.push(runtime.spawn(run_worker(
                worker_id,
                self.receiver.clone(),
                Arc::clone(&self.processor),
                Arc::clone(&self.counters),
                self.shutdown.clone(),
            )));
        }

        Ok(())
    }

    /// Submit audio for transcription
    ///
    /// Waits up to the admission wait for a free slot and then fails with
    /// [`AsrError::QueueFull`].
    #[instrument(skip(self, samples))]
    pub async fn submit(
        &self,
        samples: impl Into<Arc<[f32]>>,
        sample_rate: u32,
        enable_diarization: bool,
    ) -> AsrResult<TaskHandle> {
        let samples = samples.into();
        if samples.is_empty() {
            return Err(AsrError::validation("audio is empty"));
        }
        if sample_rate == 0 {
            return Err(AsrError::validation("sample rate must be positive"));
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(AsrError::QueueClosed);
        }

        let task = Arc::new(Task::new(
            samples,
            sample_rate,
            enable_diarization,
            self.settings.task_timeout,
        ));

        let sent = tokio::time::timeout(
            self.settings.admission_wait,
            self.sender.send(Arc::clone(&task)),
        )
        .await;

        match sent {
            Ok(Ok(())) => {
                self.counters.accepted.fetch_add(1, Ordering::SeqCst);
                counter!("asr_tasks_submitted_total").increment(1);
                gauge!("asr_queue_length").set(self.sender.len() as f64);
                debug!(task_id = %task.id(), "Task queued");
                Ok(task)
            }
            Ok(Err(_)) => Err(AsrError::QueueClosed),
            Err(_) => {
                self.counters.rejected.fetch_add(1, Ordering::SeqCst);
                counter!("asr_tasks_rejected_total").increment(1);
                warn!(
                    capacity = self.settings.capacity,
                    wait_ms = self.settings.admission_wait.as_millis() as u64,
                    "Task queue full"
                );
                Err(AsrError::queue_full(self.settings.capacity))
            }
        }
    }

    /// Snapshot of the queue counters
    pub fn stats(&self) -> QueueStats {
        self.counters.snapshot(self.sender.len(), &self.settings)
    }

    /// Shared counters
    pub fn counters(&self) -> Arc<QueueCounters> {
        Arc::clone(&self.counters)
    }

    /// Tasks waiting for a worker
    pub fn len(&self) -> usize {
        self.sender.len()
    }

    /// Whether no task is waiting
    pub fn is_empty(&self) -> bool {
        self.sender.is_empty()
    }

    /// Queue capacity
    pub const fn capacity(&self) -> usize {
        self.settings.capacity
    }

    /// Whether shutdown has begun
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop accepting work, let running tasks finish and join the workers
    ///
    /// Tasks still queued are never processed; their waiters time out.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down task queue");

        self.shutdown.cancel();
        self.sender.close();

        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        for (worker_id, worker) in workers.into_iter().enumerate() {
            if let Err(e) = worker.await {
                warn!(worker_id, error = %e, "Worker failed to shut down cleanly");
            }
        }

        info!(abandoned = self.sender.len(), "Task queue shut down");
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("settings", &self.settings)
            .field("queue_length", &self.sender.len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

async fn run_worker(
    worker_id: usize,
    receiver: Receiver<TaskHandle>,
    processor: Arc<dyn TaskProcessor>,
    counters: Arc<QueueCounters>,
    shutdown: CancellationToken,
) {
    info!(worker_id, "Task worker started");

    loop {
        let task = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            received = receiver.recv() => match received {
                Ok(task) => task,
                Err(_) => break,
            },
        };

        counters.dequeued.fetch_add(1, Ordering::SeqCst);
        execute_task(worker_id, &task, processor.as_ref(), &counters).await;
    }

    info!(worker_id, "Task worker stopped");
}

async fn execute_task(
    worker_id: usize,
    task: &TaskHandle,
    processor: &dyn TaskProcessor,
    counters: &QueueCounters,
) {
    let waited = task.queued_for();
    counters
        .total_wait_ms
        .fetch_add(millis(waited), Ordering::SeqCst);

    if !task.mark_processing() {
        warn!(worker_id, task_id = %task.id(), status = %task.status(), "Skipping task that is not pending");
        return;
    }
    counters.processing.fetch_add(1, Ordering::SeqCst);
    debug!(worker_id, task_id = %task.id(), wait_ms = millis(waited), "Task started");

    let started = Instant::now();
    let result = if task.deadline_passed() {
        TaskResult::failure(
            AsrError::task_timeout(task.id(), waited),
            task.duration_secs(),
        )
    } else {
        match AssertUnwindSafe(processor.process(Arc::clone(task)))
            .catch_unwind()
            .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => TaskResult::failure(e, task.duration_secs()),
            Err(panic) => TaskResult::failure(
                AsrError::worker(format!("task panicked: {}", panic_message(&*panic))),
                task.duration_secs(),
            ),
        }
    };
    let elapsed = started.elapsed();

    counters
        .total_exec_ms
        .fetch_add(millis(elapsed), Ordering::SeqCst);
    counters.processing.fetch_sub(1, Ordering::SeqCst);
    histogram!("asr_task_duration_seconds").record(elapsed.as_secs_f64());

    match &result.error {
        None => {
            counters.completed.fetch_add(1, Ordering::SeqCst);
            counter!("asr_tasks_completed_total").increment(1);
            info!(
                worker_id,
                task_id = %task.id(),
                exec_ms = millis(elapsed),
                segments = result.segments.len(),
                "Task completed"
            );
        }
        Some(e) => {
            counters.failed.fetch_add(1, Ordering::SeqCst);
            counter!("asr_tasks_failed_total").increment(1);
            error!(worker_id, task_id = %task.id(), error = %e, "Task failed");
        }
    }

    task.complete(result);
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunked::ChunkingSettings;
    use crate::engine::RecognizerHandle;
    use crate::mock::MockRecognizer;
    use airecorder_core::TaskStatus;
    use pretty_assertions::assert_eq;

    struct SleepProcessor {
        delay: Duration,
    }

    impl TaskProcessor for SleepProcessor {
        fn process(&self, task: TaskHandle) -> BoxFuture<'static, AsrResult<TaskResult>> {
            let delay = self.delay;
            async move {
                tokio::time::sleep(delay).await;
                Ok(TaskResult::success("slept", Vec::new(), task.duration_secs()))
            }
            .boxed()
        }
    }

    struct PanickingProcessor;

    impl TaskProcessor for PanickingProcessor {
        fn process(&self, task: TaskHandle) -> BoxFuture<'static, AsrResult<TaskResult>> {
            async move {
                if task.sample_rate() == 1 {
                    panic!("processor blew up");
                }
                Ok(TaskResult::success("fine", Vec::new(), task.duration_secs()))
            }
            .boxed()
        }
    }

    fn settings(workers: usize, capacity: usize, admission_wait: Duration) -> QueueSettings {
        QueueSettings {
            workers,
            capacity,
            admission_wait,
            task_timeout: Duration::from_secs(60),
        }
    }

    fn recognition_queue(workers: usize, capacity: usize) -> TaskQueue {
        let chunked = ChunkedRecognizer::new(
            RecognizerHandle::new(MockRecognizer::fixed("hello")),
            ChunkingSettings::default(),
        );
        TaskQueue::new(
            settings(workers, capacity, Duration::from_millis(200)),
            Arc::new(RecognitionProcessor::new(chunked, None)),
        )
    }

    #[test]
    fn test_settings_from_config() {
        let settings = QueueSettings::default();
        assert_eq!(settings.workers, 2);
        assert_eq!(settings.capacity, 100);
        assert_eq!(settings.admission_wait, Duration::from_secs(5));
        assert_eq!(settings.task_timeout, Duration::from_secs(30 * 60));
    }

    #[test]
    fn test_start_requires_runtime() {
        let queue = recognition_queue(1, 1);
        assert!(matches!(
            queue.start(),
            Err(AsrError::Configuration { .. })
        ));
    }

    #[tokio::test]
    async fn test_submit_and_wait() {
        let queue = recognition_queue(2, 10);
        queue.start().unwrap();

        let task = queue.submit(vec![0.1; 1_600], 16_000, false).await.unwrap();
        let result = task.wait(Duration::from_secs(5)).await.unwrap();

        assert_eq!(result.text, "hello");
        assert_eq!(result.duration_secs, 0.1);
        assert!(result.segments.is_empty());
        assert_eq!(task.status(), TaskStatus::Completed);

        let stats = queue.stats();
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.queued, 0);
        assert_eq!(stats.processing, 0);
        assert_eq!(stats.max_workers, 2);

        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_submit_rejects_invalid_input() {
        let queue = recognition_queue(1, 1);
        assert!(matches!(
            queue.submit(Vec::<f32>::new(), 16_000, false).await,
            Err(AsrError::Validation { .. })
        ));
        assert!(matches!(
            queue.submit(vec![0.0; 10], 0, false).await,
            Err(AsrError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_queue_full_after_admission_wait() {
        // Workers not started, so nothing drains the queue
        let queue = TaskQueue::new(
            settings(1, 1, Duration::from_millis(100)),
            Arc::new(SleepProcessor {
                delay: Duration::ZERO,
            }),
        );

        queue.submit(vec![0.0; 10], 16_000, false).await.unwrap();

        let started = Instant::now();
        let result = queue.submit(vec![0.0; 10], 16_000, false).await;

        assert!(matches!(result, Err(AsrError::QueueFull { max_size: 1 })));
        assert!(started.elapsed() >= Duration::from_millis(90));

        let stats = queue.stats();
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.queued, 1);
    }

    #[tokio::test]
    async fn test_blocked_submitter_is_not_counted_as_queued() {
        let queue = TaskQueue::new(
            settings(1, 1, Duration::from_millis(200)),
            Arc::new(SleepProcessor {
                delay: Duration::ZERO,
            }),
        );
        queue.submit(vec![0.0; 10], 16_000, false).await.unwrap();

        let (blocked, queued_while_blocked) = tokio::join!(
            queue.submit(vec![0.0; 10], 16_000, false),
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                queue.stats().queued
            }
        );

        assert_eq!(queued_while_blocked, 1);
        assert!(matches!(blocked, Err(AsrError::QueueFull { .. })));
        assert_eq!(queue.stats().queued, 1);
    }

    #[tokio::test]
    async fn test_slot_freed_within_admission_wait() {
        let queue = TaskQueue::new(
            settings(1, 1, Duration::from_millis(500)),
            Arc::new(SleepProcessor {
                delay: Duration::ZERO,
            }),
        );
        queue.submit(vec![0.0; 10], 16_000, false).await.unwrap();

        let receiver = queue.receiver.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = receiver.recv().await;
        });

        let result = queue.submit(vec![0.0; 10], 16_000, false).await;
        assert!(result.is_ok());
        assert_eq!(queue.stats().rejected, 0);
    }

    #[tokio::test]
    async fn test_wait_timeout_does_not_change_status() {
        let queue = TaskQueue::new(
            settings(1, 4, Duration::from_millis(100)),
            Arc::new(SleepProcessor {
                delay: Duration::from_millis(300),
            }),
        );
        queue.start().unwrap();

        let task = queue.submit(vec![0.0; 10], 16_000, false).await.unwrap();
        let result = task.wait(Duration::from_millis(50)).await;

        assert!(matches!(result, Err(AsrError::TaskTimeout { .. })));
        assert!(!task.status().is_terminal());

        queue.shutdown().await;
        // Shutdown drains the in-flight task
        assert_eq!(task.status(), TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_panic_is_captured_and_pool_keeps_serving() {
        let queue = TaskQueue::new(
            settings(1, 4, Duration::from_millis(100)),
            Arc::new(PanickingProcessor),
        );
        queue.start().unwrap();

        let bad = queue.submit(vec![0.0; 10], 1, false).await.unwrap();
        let result = bad.wait(Duration::from_secs(5)).await.unwrap();
        assert!(matches!(result.error, Some(AsrError::Worker { .. })));
        assert_eq!(bad.status(), TaskStatus::Failed);

        let good = queue.submit(vec![0.0; 10], 16_000, false).await.unwrap();
        let result = good.wait(Duration::from_secs(5)).await.unwrap();
        assert_eq!(result.text, "fine");

        let stats = queue.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.completed, 1);

        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_expired_task_is_not_processed() {
        let queue = TaskQueue::new(
            QueueSettings {
                task_timeout: Duration::from_millis(10),
                ..settings(1, 4, Duration::from_millis(100))
            },
            Arc::new(SleepProcessor {
                delay: Duration::ZERO,
            }),
        );

        let task = queue.submit(vec![0.0; 10], 16_000, false).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        queue.start().unwrap();

        while !task.status().is_terminal() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let recorded = task.result().unwrap();
        assert!(matches!(recorded.error, Some(AsrError::TaskTimeout { .. })));

        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_refuses_new_work_and_abandons_queued() {
        let queue = TaskQueue::new(
            settings(1, 8, Duration::from_millis(100)),
            Arc::new(SleepProcessor {
                delay: Duration::from_millis(100),
            }),
        );
        queue.start().unwrap();

        let first = queue.submit(vec![0.0; 10], 16_000, false).await.unwrap();
        // Let the single worker pick up the first task
        tokio::time::sleep(Duration::from_millis(30)).await;
        let second = queue.submit(vec![0.0; 10], 16_000, false).await.unwrap();

        queue.shutdown().await;

        assert_eq!(first.status(), TaskStatus::Completed);
        assert_eq!(second.status(), TaskStatus::Pending);
        assert!(matches!(
            queue.submit(vec![0.0; 10], 16_000, false).await,
            Err(AsrError::QueueClosed)
        ));

        // Accepted tasks are either dequeued or still counted as queued
        let stats = queue.stats();
        assert_eq!(queue.counters().dequeued() + stats.queued, stats.accepted);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_workers_run_tasks_in_parallel() {
        let queue = TaskQueue::new(
            settings(4, 16, Duration::from_millis(100)),
            Arc::new(SleepProcessor {
                delay: Duration::from_millis(150),
            }),
        );
        queue.start().unwrap();

        let started = Instant::now();
        let mut tasks = Vec::new();
        for _ in 0..4 {
            tasks.push(queue.submit(vec![0.0; 10], 16_000, false).await.unwrap());
        }
        for task in &tasks {
            task.wait(Duration::from_secs(5)).await.unwrap();
        }

        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(queue.stats().avg_exec_time_ms >= 100.0);

        queue.shutdown().await;
    }
}
