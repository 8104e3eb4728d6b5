//! Orchestration layer for speech transcription and speaker diarization
//!
//! The inference engines themselves are black boxes that can only do one
//! piece of work at a time. This crate turns arbitrarily long, possibly
//! multi-speaker audio into bounded, fault-tolerant jobs around them:
//!
//! - a bounded task queue with admission backpressure served by a fixed
//!   worker pool ([`TaskQueue`])
//! - chunked recognition of long audio under a processing deadline
//!   ([`ChunkedRecognizer`])
//! - diarization post-processing that merges segments and caps the speaker
//!   count ([`SegmentPostProcessor`])
//! - admission-controlled live streaming sessions ([`SessionManager`])
//!
//! [`AsrService`] wires them together for a transport layer.

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::float_cmp,
    clippy::return_self_not_must_use,
    clippy::significant_drop_tightening,
    clippy::option_if_let_else
)]

pub mod chunked;
pub mod diarization;
pub mod engine;
pub mod error;
pub mod mock;
pub mod queue;
pub mod segments;
pub mod service;
pub mod streaming;
pub mod task;
pub mod types;

pub use chunked::{ChunkOutcome, ChunkOutcomes, ChunkPlan, ChunkedRecognizer, ChunkingSettings};
pub use diarization::DiarizationPipeline;
pub use engine::{
    DiarizerHandle, PunctuationHandle, Punctuator, RecognizerHandle, SpeakerDiarizer,
    SpeechRecognizer,
};
pub use error::{AsrError, AsrResult, ErrorSeverity};
pub use queue::{QueueCounters, QueueSettings, RecognitionProcessor, TaskProcessor, TaskQueue};
pub use segments::{SegmentPostProcessor, SpeakerStats};
pub use service::{AsrService, Engines};
pub use streaming::{
    DecoderStream, OnlineRecognizer, SessionManager, SessionSettings, StreamingSession,
};
pub use task::{Task, TaskHandle};
pub use types::{
    EngineStats, FrameResult, QueueStats, ServiceHealth, ServiceStats, SessionStats, TaskResult,
};

// Re-export commonly used items
pub use airecorder_core::{Config, DiarizationSegment, TaskStatus};
