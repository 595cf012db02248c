use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use drift_core::CoreError;

use crate::cache::distributed::DistributedCache;
use crate::cache::local::LocalCache;
use crate::cache::noop::NoopCache;
use crate::cache::two_level::TwoLevelCache;

/// Closed tagged variant dispatched by the delegating manager, replacing
/// polymorphic cache-provider inheritance (spec §9).
pub enum CacheProvider {
  Local(Arc<LocalCache>),
  Distributed(Arc<DistributedCache>),
  TwoLevel(Arc<TwoLevelCache>),
  Noop(NoopCache),
}

impl CacheProvider {
  pub async fn get(&self, cache_name: &str, key: &str) -> Result<Option<Value>, CoreError> {
    match self {
      CacheProvider::Local(l) => Ok(l.get(&format!("{cache_name}::{key}"))),
      CacheProvider::Distributed(d) => d.get(cache_name, key).await,
      CacheProvider::TwoLevel(tl) => tl.get(cache_name, key).await,
      CacheProvider::Noop(n) => Ok(n.get(cache_name, key)),
    }
  }

  pub async fn put(
    &self,
    cache_name: &str,
    key: &str,
    value: &Value,
    ttl: Duration,
  ) -> Result<(), CoreError> {
    match self {
      CacheProvider::Local(l) => {
        l.put(format!("{cache_name}::{key}"), value.clone());
        Ok(())
      }
      CacheProvider::Distributed(d) => d.put(cache_name, key, value, ttl).await,
      CacheProvider::TwoLevel(tl) => tl.put(cache_name, key, value, ttl).await,
      CacheProvider::Noop(n) => {
        n.put(cache_name, key, value);
        Ok(())
      }
    }
  }

  pub async fn invalidate(&self, cache_name: &str, key: &str) -> Result<(), CoreError> {
    match self {
      CacheProvider::Local(l) => {
        l.delete(&format!("{cache_name}::{key}"));
        Ok(())
      }
      CacheProvider::Distributed(d) => d.delete(cache_name, key).await,
      CacheProvider::TwoLevel(tl) => tl.delete(cache_name, key).await,
      CacheProvider::Noop(n) => {
        n.delete(cache_name, key);
        Ok(())
      }
    }
  }

  pub async fn invalidate_pattern(&self, cache_name: &str, pattern: &str) -> Result<(), CoreError> {
    match self {
      CacheProvider::Local(l) => {
        l.delete_matching(&format!("{cache_name}::{pattern}"));
        Ok(())
      }
      CacheProvider::Distributed(d) => d.delete_matching(cache_name, pattern).await,
      CacheProvider::TwoLevel(tl) => {
        tl.l1.delete_matching(&format!("{cache_name}::{pattern}"));
        tl.l2.delete_matching(cache_name, pattern).await
      }
      CacheProvider::Noop(_) => Ok(()),
    }
  }

  pub async fn clear(&self, cache_name: &str) -> Result<(), CoreError> {
    self.invalidate_pattern(cache_name, "*").await
  }
}
