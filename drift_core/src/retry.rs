use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use crate::error::CoreError;

/// Exponential backoff retry with a budget, generalized from a
/// publish-specific retry helper into a `CoreError`-generic one reusable by
/// any resilience-wrapped external call (config hash fetch, distributed
/// cache RPC, ...).
#[derive(Debug, Clone)]
pub struct ExponentialBackoffRetry {
  pub base_delay_ms: u64,
  pub max_retries: u32,
  pub backoff_multiplier: f64,
  pub max_delay_ms: u64,
}

impl Default for ExponentialBackoffRetry {
  fn default() -> Self {
    Self {
      base_delay_ms: 200,
      max_retries: 3,
      backoff_multiplier: 2.0,
      max_delay_ms: 5_000,
    }
  }
}

impl ExponentialBackoffRetry {
  pub fn new(base_delay_ms: u64, max_retries: u32) -> Self {
    Self {
      base_delay_ms,
      max_retries,
      ..Default::default()
    }
  }

  fn calculate_delay(&self, attempt: u32) -> Duration {
    let delay_ms = (self.base_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32)) as u64;
    Duration::from_millis(delay_ms.min(self.max_delay_ms))
  }

  /// Runs `operation` up to `max_retries + 1` times, stopping early on a
  /// non-retryable error (`CoreError::is_retryable`).
  pub async fn retry<F, Fut, T>(&self, operation: F) -> Result<T, CoreError>
  where
    F: Fn() -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<T, CoreError>> + Send,
    T: Send,
  {
    let mut last_error: Option<CoreError> = None;

    for attempt in 0..=self.max_retries {
      match operation().await {
        Ok(result) => return Ok(result),
        Err(error) => {
          if !error.is_retryable() {
            return Err(error);
          }
          last_error = Some(error.clone());
          if attempt == self.max_retries {
            return Err(error);
          }
          let delay = self.calculate_delay(attempt);
          warn!(attempt = attempt + 1, %error, ?delay, "retrying after transient failure");
          sleep(delay).await;
        }
      }
    }

    Err(last_error.unwrap_or_else(|| CoreError::InternalError("max retries exceeded".into())))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Arc;

  #[tokio::test]
  async fn succeeds_after_transient_failures() {
    let retry = ExponentialBackoffRetry::new(1, 3);
    let counter = Arc::new(AtomicU32::new(0));
    let c = counter.clone();

    let result: Result<&str, CoreError> = retry
      .retry(|| {
        let c = c.clone();
        async move {
          if c.fetch_add(1, Ordering::SeqCst) < 2 {
            Err(CoreError::ExternalUnavailable("down".into()))
          } else {
            Ok("ok")
          }
        }
      })
      .await;

    assert_eq!(result.unwrap(), "ok");
    assert_eq!(counter.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn non_retryable_error_stops_immediately() {
    let retry = ExponentialBackoffRetry::new(1, 3);
    let counter = Arc::new(AtomicU32::new(0));
    let c = counter.clone();

    let result: Result<&str, CoreError> = retry
      .retry(|| {
        let c = c.clone();
        async move {
          c.fetch_add(1, Ordering::SeqCst);
          Err(CoreError::InvalidInput("bad".into()))
        }
      })
      .await;

    assert!(result.is_err());
    assert_eq!(counter.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn delay_calculation_matches_exponential_growth() {
    let retry = ExponentialBackoffRetry::new(1000, 5);
    assert_eq!(retry.calculate_delay(0), Duration::from_millis(1000));
    assert_eq!(retry.calculate_delay(1), Duration::from_millis(2000));
    assert_eq!(retry.calculate_delay(2), Duration::from_millis(4000));
  }
}
