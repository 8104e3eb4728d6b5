//! Common test utilities for integration tests

use airecorder_asr::Config;
use std::sync::Once;

static INIT_LOGGER: Once = Once::new();

/// Low sample rate keeps the synthetic audio small
pub const RATE: u32 = 100;

/// Initialize test logging (call once per test process)
pub fn init_test_logging() {
    INIT_LOGGER.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("debug")
            .with_test_writer()
            .try_init();
    });
}

/// `seconds` of audio at [`RATE`] where second `n` holds `marker(n)`
pub fn marked_audio(seconds: usize, marker: impl Fn(usize) -> f32) -> Vec<f32> {
    (0..seconds)
        .flat_map(|second| std::iter::repeat_n(marker(second), RATE as usize))
        .collect()
}

/// Default configuration adjusted to the test sample rate
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.diarization.sample_rate = RATE;
    config.streaming.sample_rate = 16_000;
    config.concurrency.worker_pool_size = 2;
    config.concurrency.queue_size = 8;
    config
}
