//! Error types for the speech recognition orchestration layer

use thiserror::Error;

/// Result type alias for recognition operations
pub type AsrResult<T> = Result<T, AsrError>;

/// Errors that can occur while scheduling or running recognition work
///
/// Values are `Clone` so a failure can be stored in a [`crate::TaskResult`]
/// and handed to whoever waits on the task.
#[derive(Error, Debug, Clone)]
pub enum AsrError {
    /// The queue stayed at capacity for the whole admission wait
    #[error("Task queue is full (max: {max_size})")]
    QueueFull {
        /// Queue capacity
        max_size: usize,
    },

    /// The caller's wait deadline elapsed
    #[error("Task {task_id} did not finish within {waited_ms} ms")]
    TaskTimeout {
        /// Task identifier
        task_id: String,
        /// How long the caller waited
        waited_ms: u64,
    },

    /// One chunk of a chunked recognition call failed
    #[error("Chunk {index} failed: {reason}")]
    ChunkFailed {
        /// Chunk index
        index: usize,
        /// Failure reason
        reason: String,
    },

    /// Every chunk of a chunked recognition call failed
    #[error("All {chunks} chunks failed; first error: {first_error}")]
    AllChunksFailed {
        /// Number of chunks
        chunks: usize,
        /// Message of the lowest-index failure
        first_error: String,
    },

    /// Audio sample rate does not match what the engine requires
    #[error("Sample rate mismatch: expected {expected} Hz, got {actual} Hz")]
    SampleRateMismatch {
        /// Required rate
        expected: u32,
        /// Supplied rate
        actual: u32,
    },

    /// The inference engine reported a failure
    #[error("{engine} failed: {message}")]
    Adapter {
        /// Engine name (recognizer, diarizer, punctuator, ...)
        engine: String,
        /// Error message
        message: String,
    },

    /// No free streaming session slot
    #[error("Streaming session capacity exceeded (max: {capacity})")]
    SessionCapacityExceeded {
        /// Session capacity
        capacity: usize,
    },

    /// Unknown streaming session
    #[error("Streaming session not found: {session_id}")]
    SessionNotFound {
        /// Session identifier
        session_id: String,
    },

    /// The queue no longer accepts work
    #[error("Task queue is shut down")]
    QueueClosed,

    /// Invalid input
    #[error("Validation error: {message}")]
    Validation {
        /// Error message
        message: String,
    },

    /// Invalid or missing configuration
    #[error("Invalid configuration: {message}")]
    Configuration {
        /// Error message
        message: String,
    },

    /// A worker failed outside of the engine call (panic, join failure)
    #[error("Worker error: {message}")]
    Worker {
        /// Error message
        message: String,
    },

    /// Error from the core crate
    #[error(transparent)]
    Core(std::sync::Arc<airecorder_core::Error>),
}

impl AsrError {
    /// Create a queue full error
    pub const fn queue_full(max_size: usize) -> Self {
        Self::QueueFull { max_size }
    }

    /// Create a task timeout error
    pub fn task_timeout(task_id: impl ToString, waited: std::time::Duration) -> Self {
        Self::TaskTimeout {
            task_id: task_id.to_string(),
            waited_ms: u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Create a chunk failure
    pub fn chunk_failed(index: usize, reason: impl Into<String>) -> Self {
        Self::ChunkFailed {
            index,
            reason: reason.into(),
        }
    }

    /// Create an all-chunks-failed error
    pub fn all_chunks_failed(chunks: usize, first_error: impl Into<String>) -> Self {
        Self::AllChunksFailed {
            chunks,
            first_error: first_error.into(),
        }
    }

    /// Create a sample rate mismatch error
    pub const fn sample_rate_mismatch(expected: u32, actual: u32) -> Self {
        Self::SampleRateMismatch { expected, actual }
    }

    /// Create an engine failure
    pub fn adapter(engine: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Adapter {
            engine: engine.into(),
            message: message.into(),
        }
    }

    /// Create a session capacity error
    pub const fn session_capacity(capacity: usize) -> Self {
        Self::SessionCapacityExceeded { capacity }
    }

    /// Create a session not found error
    pub fn session_not_found(session_id: impl ToString) -> Self {
        Self::SessionNotFound {
            session_id: session_id.to_string(),
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a worker error
    pub fn worker(message: impl Into<String>) -> Self {
        Self::Worker {
            message: message.into(),
        }
    }

    /// Check if the caller may reasonably retry later
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::QueueFull { .. }
                | Self::TaskTimeout { .. }
                | Self::SessionCapacityExceeded { .. }
        )
    }

    /// Get error severity level for logging
    pub const fn severity(&self) -> ErrorSeverity {
        match self {
            Self::QueueFull { .. }
            | Self::TaskTimeout { .. }
            | Self::SessionCapacityExceeded { .. }
            | Self::ChunkFailed { .. } => ErrorSeverity::Warning,
            Self::SampleRateMismatch { .. }
            | Self::SessionNotFound { .. }
            | Self::Validation { .. } => ErrorSeverity::Info,
            Self::AllChunksFailed { .. } | Self::Adapter { .. } | Self::QueueClosed => {
                ErrorSeverity::Error
            }
            Self::Configuration { .. } | Self::Worker { .. } | Self::Core(_) => {
                ErrorSeverity::Critical
            }
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Informational - caller mistake, not a service problem
    Info,
    /// Warning - load or partial failure, should be watched
    Warning,
    /// Error - operation failed but the service continues
    Error,
    /// Critical - service health impacted
    Critical,
}

impl From<airecorder_core::Error> for AsrError {
    fn from(err: airecorder_core::Error) -> Self {
        Self::Core(std::sync::Arc::new(err))
    }
}
