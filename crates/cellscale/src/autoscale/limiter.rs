use std::time::{Duration, Instant};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RateLimiterStatus {
    Ok,
    Wait,
}

/// Postpones host creation in a partition after failed batches.
///
/// Every failed batch moves to the next (longer) delay; a successful batch resets it.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    delays: Vec<Duration>,
    /// Index into `delays`.
    current_delay: usize,
    last_failure: Option<Instant>,
    /// How many batches have failed in a row.
    batch_fails: usize,
}

impl RateLimiter {
    pub fn new(delays: Vec<Duration>) -> Self {
        assert!(!delays.is_empty());
        Self {
            delays,
            current_delay: 0,
            last_failure: None,
            batch_fails: 0,
        }
    }

    pub fn on_batch_success(&mut self) {
        self.batch_fails = 0;
        self.current_delay = 0;
        self.last_failure = None;
    }

    pub fn on_batch_fail(&mut self) {
        self.batch_fails += 1;
        self.last_failure = Some(Instant::now());
        self.increase_delay();
    }

    pub fn batch_fails(&self) -> usize {
        self.batch_fails
    }

    pub fn current_delay(&self) -> Duration {
        self.delays[self.current_delay]
    }

    pub fn status(&self) -> RateLimiterStatus {
        match self.last_failure {
            Some(time) if time.elapsed() < self.current_delay() => RateLimiterStatus::Wait,
            _ => RateLimiterStatus::Ok,
        }
    }

    fn increase_delay(&mut self) {
        if self.current_delay < self.delays.len() - 1 {
            self.current_delay += 1;
        }
    }
}
