use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use redis::AsyncCommands;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{error, warn};

use drift_core::CoreError;

use crate::cache::local::LocalCache;
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig};

/// Remote store with per-key TTL, guarded by a circuit breaker. When the
/// breaker is open and `fallback_enabled`, reads degrade to the Local
/// provider and writes are dropped (logged), per spec §4.3.
pub struct DistributedCache {
  client: redis::Client,
  conn: RwLock<redis::aio::MultiplexedConnection>,
  prefix: String,
  breaker: Arc<CircuitBreaker>,
  fallback: Option<Arc<LocalCache>>,
  fallback_enabled: bool,
}

impl DistributedCache {
  pub async fn connect(
    redis_url: &str,
    prefix: String,
    breaker_config: CircuitBreakerConfig,
    fallback: Option<Arc<LocalCache>>,
    fallback_enabled: bool,
  ) -> Result<Self, CoreError> {
    let client = redis::Client::open(redis_url)
      .map_err(|e| CoreError::CacheUnavailable(e.to_string()))?;
    let conn = client
      .get_multiplexed_async_connection()
      .await
      .map_err(|e| CoreError::CacheUnavailable(e.to_string()))?;

    Ok(Self {
      client,
      conn: RwLock::new(conn),
      prefix,
      breaker: Arc::new(CircuitBreaker::new(breaker_config)),
      fallback,
      fallback_enabled,
    })
  }

  fn make_key(&self, cache_name: &str, key: &str) -> String {
    format!("{}::{}::{}", self.prefix, cache_name, key)
  }

  async fn reconnect(&self) -> Result<(), CoreError> {
    let new_conn = self
      .client
      .get_multiplexed_async_connection()
      .await
      .map_err(|e| CoreError::CacheUnavailable(e.to_string()))?;
    *self.conn.write().await = new_conn;
    Ok(())
  }

  pub async fn get(&self, cache_name: &str, key: &str) -> Result<Option<Value>, CoreError> {
    let full_key = self.make_key(cache_name, key);
    let breaker = self.breaker.clone();
    let result = breaker
      .call(|| async {
        let mut conn = self.conn.write().await;
        let raw: Option<String> = conn
          .get(&full_key)
          .await
          .map_err(|e| CoreError::CacheUnavailable(e.to_string()))?;
        match raw {
          Some(s) => serde_json::from_str(&s)
            .map(Some)
            .map_err(|e| CoreError::SerializationFailure(e.to_string())),
          None => Ok(None),
        }
      })
      .await;

    match result {
      Ok(value) => Ok(value),
      Err(CoreError::CircuitOpen(_)) if self.fallback_enabled => {
        warn!(cache_name, "distributed cache circuit open, degrading to local fallback");
        Ok(self.fallback.as_ref().and_then(|l| l.get(&full_key)))
      }
      Err(e) => {
        error!(cache_name, error = %e, "distributed cache read failed");
        if self.fallback_enabled {
          let _ = self.reconnect().await;
        }
        Err(e)
      }
    }
  }

  pub async fn put(&self, cache_name: &str, key: &str, value: &Value, ttl: Duration) -> Result<(), CoreError> {
    let full_key = self.make_key(cache_name, key);
    let serialized = serde_json::to_string(value)?;
    let breaker = self.breaker.clone();

    let result = breaker
      .call(|| async {
        let mut conn = self.conn.write().await;
        conn
          .set_ex::<_, _, ()>(&full_key, serialized, ttl.as_secs().max(1))
          .await
          .map_err(|e| CoreError::CacheUnavailable(e.to_string()))
      })
      .await;

    match result {
      Ok(()) => Ok(()),
      Err(CoreError::CircuitOpen(_)) => {
        warn!(cache_name, "distributed cache circuit open, dropping write");
        Ok(())
      }
      Err(e) => {
        error!(cache_name, error = %e, "distributed cache write failed");
        Err(e)
      }
    }
  }

  pub async fn delete(&self, cache_name: &str, key: &str) -> Result<(), CoreError> {
    let full_key = self.make_key(cache_name, key);
    let mut conn = self.conn.write().await;
    let _: i64 = conn
      .del(&full_key)
      .await
      .map_err(|e| CoreError::CacheUnavailable(e.to_string()))?;
    Ok(())
  }

  /// SCAN-based pattern delete, matching the teacher's non-blocking
  /// `del_pattern` (no `KEYS *`, which would stall the Redis event loop).
  pub async fn delete_matching(&self, cache_name: &str, pattern: &str) -> Result<(), CoreError> {
    let full_pattern = self.make_key(cache_name, pattern);
    let mut conn = self.conn.write().await;
    let keys: Vec<String> = conn
      .scan_match(&full_pattern)
      .await
      .map_err(|e| CoreError::CacheUnavailable(e.to_string()))?
      .collect()
      .await;
    if !keys.is_empty() {
      let _: i64 = conn
        .del(keys)
        .await
        .map_err(|e| CoreError::CacheUnavailable(e.to_string()))?;
    }
    Ok(())
  }
}
