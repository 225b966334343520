//! Bounded automatic retry for transient transport failures.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::TransportFailure;

/// How often and how patiently a call is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Total attempts including the first one
  pub max_attempts: u32,
  /// Pause between attempts
  pub backoff: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 2,
      backoff: Duration::from_millis(1000),
    }
  }
}

impl RetryPolicy {
  /// A policy that makes exactly one attempt.
  pub fn once() -> Self {
    Self {
      max_attempts: 1,
      backoff: Duration::ZERO,
    }
  }
}

/// Run `operation`, retrying server errors and missing responses while
/// attempts remain. Client errors are returned immediately.
///
/// Holds no state between invocations.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, mut operation: F) -> Result<T, TransportFailure>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T, TransportFailure>>,
{
  let max_attempts = policy.max_attempts.max(1);
  let mut attempt = 1;

  loop {
    match operation().await {
      Ok(value) => return Ok(value),
      Err(failure) if failure.is_retryable() && attempt < max_attempts => {
        warn!(attempt, max_attempts, error = %failure, "transient failure, retrying");
        tokio::time::sleep(policy.backoff).await;
        attempt += 1;
      }
      Err(failure) => return Err(failure),
    }
  }
}
