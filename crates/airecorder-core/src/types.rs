//! Core data types shared across the airecorder crates

use serde::{Deserialize, Serialize};

/// Lifecycle state of an offline transcription task
///
/// Tasks move `Pending -> Processing -> {Completed, Failed}`. Terminal states
/// are final.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in the queue
    #[default]
    Pending,
    /// Picked up by a worker
    Processing,
    /// Finished with a result
    Completed,
    /// Finished with an error
    Failed,
}

impl TaskStatus {
    /// Whether no further transition is possible
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether moving from `self` to `next` is a legal lifecycle step
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Completed | Self::Failed)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A speaker-attributed time interval
///
/// `text` stays empty until the segment has been run through the recognizer.
/// Speaker ids are local to one task's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiarizationSegment {
    /// Start time in seconds
    pub start: f64,

    /// End time in seconds
    pub end: f64,

    /// Speaker identifier
    pub speaker: u32,

    /// Recognized text
    #[serde(default)]
    pub text: String,
}

impl DiarizationSegment {
    /// Create a segment without text
    #[must_use]
    pub const fn new(start: f64, end: f64, speaker: u32) -> Self {
        Self {
            start,
            end,
            speaker,
            text: String::new(),
        }
    }

    /// Attach recognized text
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Length of the segment in seconds
    #[must_use]
    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }
}
