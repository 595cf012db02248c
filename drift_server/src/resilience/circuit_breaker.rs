use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, warn};

use drift_core::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
  Closed,
  Open,
  HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
  pub failure_threshold: u32,
  pub success_threshold: u32,
  pub open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
  fn default() -> Self {
    Self {
      failure_threshold: 5,
      success_threshold: 2,
      open_timeout: Duration::from_secs(10),
    }
  }
}

/// Closed/open/half-open breaker guarding an external call, generalized from
/// a publish-only breaker into one usable around any `Future`-returning
/// closure via [`CircuitBreaker::call`].
pub struct CircuitBreaker {
  state: RwLock<CircuitState>,
  failure_count: AtomicU32,
  success_count: AtomicU32,
  last_failure_time: RwLock<Option<Instant>>,
  config: CircuitBreakerConfig,
}

impl CircuitBreaker {
  pub fn new(config: CircuitBreakerConfig) -> Self {
    Self {
      state: RwLock::new(CircuitState::Closed),
      failure_count: AtomicU32::new(0),
      success_count: AtomicU32::new(0),
      last_failure_time: RwLock::new(None),
      config,
    }
  }

  pub async fn state(&self) -> CircuitState {
    *self.state.read().await
  }

  async fn is_request_allowed(&self) -> bool {
    let state = *self.state.read().await;
    match state {
      CircuitState::Closed => true,
      CircuitState::HalfOpen => true,
      CircuitState::Open => {
        let last_failure = *self.last_failure_time.read().await;
        match last_failure {
          Some(t) if t.elapsed() >= self.config.open_timeout => {
            let mut state = self.state.write().await;
            if *state == CircuitState::Open {
              *state = CircuitState::HalfOpen;
              self.success_count.store(0, Ordering::SeqCst);
              debug!("circuit breaker: open -> half-open");
            }
            true
          }
          _ => false,
        }
      }
    }
  }

  async fn record_success(&self) {
    let state = *self.state.read().await;
    match state {
      CircuitState::HalfOpen => {
        let successes = self.success_count.fetch_add(1, Ordering::SeqCst) + 1;
        if successes >= self.config.success_threshold {
          let mut state = self.state.write().await;
          *state = CircuitState::Closed;
          self.failure_count.store(0, Ordering::SeqCst);
          debug!("circuit breaker: half-open -> closed");
        }
      }
      CircuitState::Closed => {
        self.failure_count.store(0, Ordering::SeqCst);
      }
      CircuitState::Open => {}
    }
  }

  async fn record_failure(&self) {
    let mut last_failure = self.last_failure_time.write().await;
    *last_failure = Some(Instant::now());
    drop(last_failure);

    let state = *self.state.read().await;
    match state {
      CircuitState::HalfOpen => {
        let mut state = self.state.write().await;
        *state = CircuitState::Open;
        warn!("circuit breaker: half-open -> open (probe failed)");
      }
      CircuitState::Closed => {
        let failures = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.config.failure_threshold {
          let mut state = self.state.write().await;
          *state = CircuitState::Open;
          warn!(failures, "circuit breaker: closed -> open");
        }
      }
      CircuitState::Open => {}
    }
  }

  /// Runs `f` if the breaker allows it, recording the outcome. Fails fast
  /// with `CircuitOpen` without invoking `f` when the breaker is tripped.
  pub async fn call<F, Fut, T>(&self, f: F) -> Result<T, CoreError>
  where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, CoreError>>,
  {
    if !self.is_request_allowed().await {
      return Err(CoreError::CircuitOpen("circuit is open".into()));
    }

    match f().await {
      Ok(value) => {
        self.record_success().await;
        Ok(value)
      }
      Err(err) => {
        self.record_failure().await;
        Err(err)
      }
    }
  }
}

pub type SharedCircuitBreaker = Arc<CircuitBreaker>;

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn opens_after_failure_threshold() {
    let breaker = CircuitBreaker::new(CircuitBreakerConfig {
      failure_threshold: 2,
      success_threshold: 1,
      open_timeout: Duration::from_millis(50),
    });

    for _ in 0..2 {
      let _ = breaker
        .call(|| async { Err::<(), _>(CoreError::ExternalUnavailable("down".into())) })
        .await;
    }

    assert_eq!(breaker.state().await, CircuitState::Open);

    let result = breaker.call(|| async { Ok::<_, CoreError>(1) }).await;
    assert!(matches!(result, Err(CoreError::CircuitOpen(_))));
  }

  #[tokio::test]
  async fn half_open_recovers_to_closed_after_success_threshold() {
    let breaker = CircuitBreaker::new(CircuitBreakerConfig {
      failure_threshold: 1,
      success_threshold: 1,
      open_timeout: Duration::from_millis(10),
    });

    let _ = breaker
      .call(|| async { Err::<(), _>(CoreError::ExternalUnavailable("down".into())) })
      .await;
    assert_eq!(breaker.state().await, CircuitState::Open);

    tokio::time::sleep(Duration::from_millis(20)).await;

    let result = breaker.call(|| async { Ok::<_, CoreError>(42) }).await;
    assert_eq!(result.unwrap(), 42);
    assert_eq!(breaker.state().await, CircuitState::Closed);
  }
}
