//! Configuration management for the airecorder speech service

use serde::{Deserialize, Serialize};
use std::path::Path;
use validator::Validate;

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "AIRECORDER";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct Config {
    /// Offline (file) recognition configuration
    #[serde(default)]
    #[validate(nested)]
    pub offline: OfflineAsrConfig,

    /// Speaker diarization configuration
    #[serde(default)]
    #[validate(nested)]
    pub diarization: DiarizationConfig,

    /// Streaming recognition configuration
    #[serde(default)]
    #[validate(nested)]
    pub streaming: StreamingConfig,

    /// Punctuation configuration
    #[serde(default)]
    pub punctuation: PunctuationConfig,

    /// Queue, worker and session limits
    #[serde(default)]
    #[validate(nested)]
    pub concurrency: ConcurrencyConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Offline recognition configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct OfflineAsrConfig {
    /// Expected sample rate of offline audio
    #[serde(default = "default_sample_rate")]
    #[validate(range(min = 1))]
    pub sample_rate: u32,

    /// Window size used when splitting long audio
    #[serde(default = "default_chunk_duration_secs")]
    #[validate(range(min = 1))]
    pub chunk_duration_secs: u32,

    /// Concurrent chunk workers per recognition call
    #[serde(default = "default_max_concurrency")]
    #[validate(range(min = 1))]
    pub max_concurrency: usize,

    /// Fixed part of the chunked processing budget
    #[serde(default = "default_base_timeout_mins")]
    pub base_timeout_mins: u64,

    /// Upper bound on the chunked processing budget
    #[serde(default = "default_max_processing_timeout_mins")]
    #[validate(range(min = 1))]
    pub max_processing_timeout_mins: u64,

    /// Audio longer than this goes through the task queue
    #[serde(default = "default_queue_threshold_secs")]
    pub queue_threshold_secs: u64,
}

/// Speaker diarization configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DiarizationConfig {
    /// Enable diarization
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Sample rate the diarizer requires
    #[serde(default = "default_sample_rate")]
    #[validate(range(min = 1))]
    pub sample_rate: u32,

    /// Cap on distinct speakers in a result (None for unlimited)
    #[serde(default)]
    #[validate(range(min = 1))]
    pub max_speakers: Option<usize>,

    /// Same-speaker segments closer than this are merged
    #[serde(default = "default_merge_gap_secs")]
    #[validate(range(min = 0.0))]
    pub merge_gap_secs: f64,
}

/// Streaming recognition configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StreamingConfig {
    /// Enable live sessions
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Sample rate of live audio frames
    #[serde(default = "default_sample_rate")]
    #[validate(range(min = 1))]
    pub sample_rate: u32,
}

/// Punctuation configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PunctuationConfig {
    /// Run recognized text through the punctuator
    #[serde(default)]
    pub enabled: bool,
}

/// Queue, worker and session limits
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ConcurrencyConfig {
    /// Number of task queue workers
    #[serde(default = "default_worker_pool_size")]
    #[validate(range(min = 1))]
    pub worker_pool_size: usize,

    /// Task queue capacity
    #[serde(default = "default_queue_size")]
    #[validate(range(min = 1))]
    pub queue_size: usize,

    /// How long `submit` waits for a free queue slot
    #[serde(default = "default_admission_wait_secs")]
    pub admission_wait_secs: u64,

    /// Per-task deadline, measured from submission
    #[serde(default = "default_task_timeout_mins")]
    #[validate(range(min = 1))]
    pub task_timeout_mins: u64,

    /// Maximum concurrent live sessions
    #[serde(default = "default_max_streaming_sessions")]
    #[validate(range(min = 1))]
    pub max_streaming_sessions: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json or text)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
const fn default_true() -> bool {
    true
}

const fn default_sample_rate() -> u32 {
    16_000
}

const fn default_chunk_duration_secs() -> u32 {
    60
}

const fn default_max_concurrency() -> usize {
    4
}

const fn default_base_timeout_mins() -> u64 {
    30
}

const fn default_max_processing_timeout_mins() -> u64 {
    120
}

const fn default_queue_threshold_secs() -> u64 {
    120
}

const fn default_merge_gap_secs() -> f64 {
    0.5
}

const fn default_worker_pool_size() -> usize {
    2
}

const fn default_queue_size() -> usize {
    100
}

const fn default_admission_wait_secs() -> u64 {
    5
}

const fn default_task_timeout_mins() -> u64 {
    30
}

const fn default_max_streaming_sessions() -> usize {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for OfflineAsrConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            chunk_duration_secs: default_chunk_duration_secs(),
            max_concurrency: default_max_concurrency(),
            base_timeout_mins: default_base_timeout_mins(),
            max_processing_timeout_mins: default_max_processing_timeout_mins(),
            queue_threshold_secs: default_queue_threshold_secs(),
        }
    }
}

impl Default for DiarizationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_rate: default_sample_rate(),
            max_speakers: None,
            merge_gap_secs: default_merge_gap_secs(),
        }
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_rate: default_sample_rate(),
        }
    }
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: default_worker_pool_size(),
            queue_size: default_queue_size(),
            admission_wait_secs: default_admission_wait_secs(),
            task_timeout_mins: default_task_timeout_mins(),
            max_streaming_sessions: default_max_streaming_sessions(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from an optional `airecorder.*` file and the environment
    ///
    /// Environment overrides use double underscores between path segments,
    /// e.g. `AIRECORDER__CONCURRENCY__QUEUE_SIZE=200`.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded, parsed or validated.
    pub fn load() -> crate::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("airecorder").required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate a configuration assembled in code
    ///
    /// # Errors
    ///
    /// Returns a validation error naming the offending sections.
    pub fn ensure_valid(&self) -> crate::Result<()> {
        self.validate()?;
        Ok(())
    }

    /// Load configuration from one explicit file
    ///
    /// The format is inferred from the file extension.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, malformed or fails validation.
    pub fn from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let config = config::Config::builder()
            .add_source(config::File::from(path).required(true))
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_config_default() {
        let config = Config::default();

        assert_eq!(config.offline.sample_rate, 16_000);
        assert_eq!(config.offline.chunk_duration_secs, 60);
        assert_eq!(config.offline.max_concurrency, 4);
        assert_eq!(config.offline.base_timeout_mins, 30);
        assert_eq!(config.offline.max_processing_timeout_mins, 120);
        assert_eq!(config.offline.queue_threshold_secs, 120);

        assert!(config.diarization.enabled);
        assert_eq!(config.diarization.max_speakers, None);
        assert!((config.diarization.merge_gap_secs - 0.5).abs() < f64::EPSILON);

        assert!(config.streaming.enabled);
        assert!(!config.punctuation.enabled);

        assert_eq!(config.concurrency.worker_pool_size, 2);
        assert_eq!(config.concurrency.queue_size, 100);
        assert_eq!(config.concurrency.admission_wait_secs, 5);
        assert_eq!(config.concurrency.task_timeout_mins, 30);
        assert_eq!(config.concurrency.max_streaming_sessions, 10);

        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = Config::default();
        config.concurrency.worker_pool_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ensure_valid_names_section() {
        let mut config = Config::default();
        config.offline.max_concurrency = 0;

        match config.ensure_valid() {
            Err(crate::Error::Validation { field, .. }) => assert_eq!(field, "offline"),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_zero_max_speakers_rejected() {
        let mut config = Config::default();
        config.diarization.max_speakers = Some(0);
        assert!(config.validate().is_err());

        config.diarization.max_speakers = Some(3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();

        let serialized = serde_json::to_string(&config).unwrap();
        let deserialized: Config = serde_json::from_str(&serialized).unwrap();

        assert_eq!(
            deserialized.concurrency.queue_size,
            config.concurrency.queue_size
        );
        assert_eq!(
            deserialized.offline.chunk_duration_secs,
            config.offline.chunk_duration_secs
        );
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"concurrency": {"queue_size": 7}}"#).unwrap();

        assert_eq!(config.concurrency.queue_size, 7);
        assert_eq!(config.concurrency.worker_pool_size, 2);
        assert_eq!(config.offline.chunk_duration_secs, 60);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[offline]
chunk_duration_secs = 30
max_concurrency = 2

[diarization]
max_speakers = 3

[concurrency]
worker_pool_size = 4
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.offline.chunk_duration_secs, 30);
        assert_eq!(config.offline.max_concurrency, 2);
        assert_eq!(config.diarization.max_speakers, Some(3));
        assert_eq!(config.concurrency.worker_pool_size, 4);
        assert_eq!(config.concurrency.queue_size, 100);
    }

    #[test]
    fn test_from_file_rejects_invalid_values() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[concurrency]\nqueue_size = 0").unwrap();

        let result = Config::from_file(file.path());
        assert!(matches!(result, Err(crate::Error::Validation { .. })));
    }

    #[test]
    fn test_from_missing_file() {
        let result = Config::from_file("/definitely/not/here/airecorder.toml");
        assert!(matches!(result, Err(crate::Error::Configuration { .. })));
    }
}
