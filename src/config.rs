use std::time::Duration;

const DEFAULT_SUBMIT_TIMEOUT_MS: u64 = 5000;
const DEFAULT_QUEUE_TIMEOUT_MS: u64 = 5000;
const DEFAULT_REWARD_TIMEOUT_MS: u64 = 250;
const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 3;

/// Operational bounds for the scheduler. All store round-trips run under
/// these deadlines; a timed-out submission leaves no partial write.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub submit_timeout: Duration,
    pub queue_timeout: Duration,
    pub reward_timeout: Duration,
    pub max_conflict_retries: u32,
    pub log_level: String,
}

impl SchedulerConfig {
    pub fn from_env() -> Self {
        let submit_timeout = env_ms("SRS_SUBMIT_TIMEOUT_MS", DEFAULT_SUBMIT_TIMEOUT_MS);
        let queue_timeout = env_ms("SRS_QUEUE_TIMEOUT_MS", DEFAULT_QUEUE_TIMEOUT_MS);
        let reward_timeout = env_ms("SRS_REWARD_TIMEOUT_MS", DEFAULT_REWARD_TIMEOUT_MS);

        let max_conflict_retries = std::env::var("SRS_MAX_CONFLICT_RETRIES")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(DEFAULT_MAX_CONFLICT_RETRIES);

        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Self {
            submit_timeout,
            queue_timeout,
            reward_timeout,
            max_conflict_retries,
            log_level,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            submit_timeout: Duration::from_millis(DEFAULT_SUBMIT_TIMEOUT_MS),
            queue_timeout: Duration::from_millis(DEFAULT_QUEUE_TIMEOUT_MS),
            reward_timeout: Duration::from_millis(DEFAULT_REWARD_TIMEOUT_MS),
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
            log_level: "info".to_string(),
        }
    }
}

fn env_ms(key: &str, default_ms: u64) -> Duration {
    let ms = std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default_ms);
    Duration::from_millis(ms)
}
