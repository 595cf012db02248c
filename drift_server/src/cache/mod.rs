pub mod delegating;
pub mod distributed;
pub mod invalidation;
pub mod local;
pub mod noop;
pub mod provider;
pub mod two_level;

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use drift_core::CoreError;

pub use delegating::DelegatingCacheManager;
pub use provider::CacheProvider;

/// Per-named-cache policy (spec §6: `cache.caches.<name>.{ttl,maximumSize,
/// allowNullValues,providerOverride}`).
#[derive(Debug, Clone)]
pub struct NamedCacheConfig {
  pub ttl: Duration,
  pub allow_null_values: bool,
}

impl Default for NamedCacheConfig {
  fn default() -> Self {
    Self {
      ttl: Duration::from_secs(300),
      allow_null_values: false,
    }
  }
}

/// Top-level facade: `get_or_load`/`put`/`invalidate`/`invalidate_pattern`/
/// `clear`, as specified in §4.3. Named caches each carry their own TTL and
/// null-caching policy; the active provider is resolved once per call
/// through the delegating manager so a mid-flight provider switch never
/// tears an in-progress call (S6).
pub struct CacheTier {
  manager: DelegatingCacheManager,
  named: HashMap<String, NamedCacheConfig>,
  default_config: NamedCacheConfig,
}

/// Sentinel stored when a named cache allows caching the absence of a value,
/// so a confirmed miss is not re-fetched from the loader on every call.
const NULL_MARKER: &str = "__drift_cache_null__";

impl CacheTier {
  pub fn new(manager: DelegatingCacheManager, named: HashMap<String, NamedCacheConfig>) -> Self {
    Self {
      manager,
      named,
      default_config: NamedCacheConfig::default(),
    }
  }

  pub fn manager(&self) -> &DelegatingCacheManager {
    &self.manager
  }

  /// Returns the active two-level provider, if that is what is currently
  /// configured. Used at startup to decide whether an invalidation
  /// subscriber task is needed.
  pub fn two_level(&self) -> Option<std::sync::Arc<two_level::TwoLevelCache>> {
    match &*self.manager.current() {
      CacheProvider::TwoLevel(tl) => Some(tl.clone()),
      _ => None,
    }
  }

  fn config_for(&self, cache_name: &str) -> &NamedCacheConfig {
    self.named.get(cache_name).unwrap_or(&self.default_config)
  }

  /// `Cache.getOrLoad(key, loader)`: replaces annotation-driven caching with
  /// a first-class method returning a result sum type (spec §9). `loader`
  /// returning `Ok(None)` means "confirmed absent", not "error" — a
  /// `CoreError` from `loader` propagates to the caller unchanged so it can
  /// decide between `UNKNOWN` and a hard failure.
  pub async fn get_or_load<T, F, Fut>(
    &self,
    cache_name: &str,
    key: &str,
    loader: F,
  ) -> Result<Option<T>, CoreError>
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Option<T>, CoreError>>,
  {
    let provider = self.manager.current();
    let config = self.config_for(cache_name);

    match provider.get(cache_name, key).await {
      Ok(Some(raw)) => {
        crate::observability::metrics::collectors::CacheMetrics::hit(cache_name);
        if config.allow_null_values && raw == serde_json::Value::String(NULL_MARKER.to_string()) {
          return Ok(None);
        }
        return serde_json::from_value(raw)
          .map(Some)
          .map_err(|e| CoreError::SerializationFailure(e.to_string()));
      }
      Ok(None) => {
        crate::observability::metrics::collectors::CacheMetrics::miss(cache_name);
      }
      Err(e) => {
        crate::observability::metrics::collectors::CacheMetrics::miss(cache_name);
        debug!(cache_name, key, error = %e, "cache read failed, falling through to loader");
      }
    }

    let loaded = loader().await?;
    match &loaded {
      Some(value) => {
        let raw = serde_json::to_value(value)?;
        let _ = provider.put(cache_name, key, &raw, config.ttl).await;
      }
      None if config.allow_null_values => {
        let raw = serde_json::Value::String(NULL_MARKER.to_string());
        let _ = provider.put(cache_name, key, &raw, config.ttl).await;
      }
      None => {}
    }

    Ok(loaded)
  }

  pub async fn put<T: Serialize>(&self, cache_name: &str, key: &str, value: &T) -> Result<(), CoreError> {
    let config = self.config_for(cache_name);
    let raw = serde_json::to_value(value)?;
    self.manager.current().put(cache_name, key, &raw, config.ttl).await
  }

  pub async fn invalidate(&self, cache_name: &str, key: &str) -> Result<(), CoreError> {
    self.manager.current().invalidate(cache_name, key).await
  }

  pub async fn invalidate_pattern(&self, cache_name: &str, pattern: &str) -> Result<(), CoreError> {
    self.manager.current().invalidate_pattern(cache_name, pattern).await
  }

  pub async fn clear(&self, cache_name: &str) -> Result<(), CoreError> {
    self.manager.current().clear(cache_name).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::local::LocalCache;
  use std::sync::Arc;

  fn tier() -> CacheTier {
    let manager = DelegatingCacheManager::new(CacheProvider::Local(Arc::new(LocalCache::new(
      Duration::from_secs(60),
      Duration::from_secs(60),
      100,
    ))));
    CacheTier::new(manager, HashMap::new())
  }

  #[tokio::test]
  async fn get_or_load_calls_loader_only_on_miss() {
    let tier = tier();
    let calls = std::sync::atomic::AtomicU32::new(0);

    for _ in 0..3 {
      let value = tier
        .get_or_load::<String, _, _>("hashes", "svc-a:prod", || async {
          calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
          Ok(Some("aa".to_string()))
        })
        .await
        .unwrap();
      assert_eq!(value.as_deref(), Some("aa"));
    }

    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn invalidate_forces_reload() {
    let tier = tier();
    let _ = tier
      .get_or_load::<String, _, _>("hashes", "k", || async { Ok(Some("v1".to_string())) })
      .await
      .unwrap();

    tier.invalidate("hashes", "k").await.unwrap();

    let value = tier
      .get_or_load::<String, _, _>("hashes", "k", || async { Ok(Some("v2".to_string())) })
      .await
      .unwrap();
    assert_eq!(value.as_deref(), Some("v2"));
  }
}
