//! Bounded retry policy shared by both loops.

use std::time::Duration;

/// Fixed-backoff retry budget.
///
/// Replaces the ad hoc retry-once-then-give-up logic that would otherwise be
/// duplicated at every enqueue and upload site. Callers iterate attempts
/// themselves (the operations involved borrow mutably, which rules out a
/// closure-taking runner) and pause between attempts with [`RetryPolicy::pause`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Publisher default: the original attempt plus one retry after a drain.
    pub fn retry_once(backoff: Duration) -> Self {
        RetryPolicy::new(2, backoff)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// True if `attempt` (zero-based) leaves budget for another try.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts
    }

    pub async fn pause(&self) {
        tokio::time::sleep(self.backoff).await;
    }
}
