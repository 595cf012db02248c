use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::timeout;

use drift_core::CoreError;

/// Bounded-concurrency gate for a named workload class (spec §5: notification,
/// rpc-startup, default, config-hash-fetch pools), paired with a time limiter.
pub struct Bulkhead {
  semaphore: Arc<Semaphore>,
  call_timeout: Duration,
}

impl Bulkhead {
  pub fn new(max_concurrency: usize, call_timeout: Duration) -> Self {
    Self {
      semaphore: Arc::new(Semaphore::new(max_concurrency)),
      call_timeout,
    }
  }

  /// Acquires a permit then runs `f` under the configured time limit.
  /// Overflow policy is caller-runs: the caller waits for a permit rather
  /// than failing immediately, matching spec §5 for the default/notification
  /// pools. RPC-startup callers that need abort-on-overflow should use
  /// `try_call` instead.
  pub async fn call<F, Fut, T>(&self, f: F) -> Result<T, CoreError>
  where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, CoreError>>,
  {
    let _permit = self
      .semaphore
      .acquire()
      .await
      .map_err(|_| CoreError::InternalError("bulkhead semaphore closed".into()))?;

    match timeout(self.call_timeout, f()).await {
      Ok(result) => result,
      Err(_) => Err(CoreError::Timeout("call exceeded time limit".into())),
    }
  }

  /// Fails fast with `CircuitOpen` if no permit is immediately available
  /// (abort overflow policy, used by the rpc-startup pool).
  pub async fn try_call<F, Fut, T>(&self, f: F) -> Result<T, CoreError>
  where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, CoreError>>,
  {
    let _permit = self.semaphore.try_acquire().map_err(|_| {
      CoreError::ExternalUnavailable("bulkhead at capacity, aborting".into())
    })?;

    match timeout(self.call_timeout, f()).await {
      Ok(result) => result,
      Err(_) => Err(CoreError::Timeout("call exceeded time limit".into())),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn call_respects_time_limit() {
    let bulkhead = Bulkhead::new(4, Duration::from_millis(20));
    let result = bulkhead
      .call(|| async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok::<_, CoreError>(())
      })
      .await;
    assert!(matches!(result, Err(CoreError::Timeout(_))));
  }

  #[tokio::test]
  async fn try_call_aborts_when_no_permit_available() {
    let bulkhead = Arc::new(Bulkhead::new(1, Duration::from_secs(1)));
    let b2 = bulkhead.clone();

    let holder = tokio::spawn(async move {
      b2.call(|| async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok::<_, CoreError>(())
      })
      .await
    });

    tokio::time::sleep(Duration::from_millis(10)).await;
    let result = bulkhead.try_call(|| async { Ok::<_, CoreError>(1) }).await;
    assert!(matches!(result, Err(CoreError::ExternalUnavailable(_))));

    holder.await.unwrap().unwrap();
  }
}
