use std::time::Duration;

/// Interval between two planning cycles.
pub fn get_poll_interval(configured: Duration) -> Duration {
    get_duration_from_env("CELLSCALE_POLL_INTERVAL_MS").unwrap_or(configured)
}

/// Number of hosts created or deleted concurrently within one batch.
pub fn get_parallelism(configured: usize) -> usize {
    std::env::var("CELLSCALE_PARALLELISM")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|&value| value > 0)
        .unwrap_or(configured)
}

fn get_duration_from_env(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_millis)
}

/// Delay levels between creation batches of a partition after failures.
/// See [`super::limiter::RateLimiter`].
pub const BATCH_FAILURE_DELAYS: [Duration; 5] = [
    Duration::ZERO,
    Duration::from_secs(60),
    Duration::from_secs(5 * 60),
    Duration::from_secs(15 * 60),
    Duration::from_secs(30 * 60),
];
