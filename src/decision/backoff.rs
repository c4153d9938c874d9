use std::time::Duration;

use async_trait::async_trait;

use crate::llm::BackendError;

/// Waits between decision attempts. Swapped out in tests to record delays.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Wait before the next attempt after `error` on zero-based `attempt`.
///
/// `None` means the error is not retryable at all.
pub fn retry_delay(error: &BackendError, attempt: u32) -> Option<Duration> {
    let factor = 2u64.saturating_pow(attempt);
    match error {
        BackendError::RateLimited => Some(Duration::from_secs(5u64.saturating_mul(factor))),
        BackendError::ConnectionFailed(_) => {
            Some(Duration::from_secs(2u64.saturating_mul(factor)))
        }
        BackendError::Api { .. } => Some(Duration::from_secs(2)),
        BackendError::Other(_) => None,
    }
}
