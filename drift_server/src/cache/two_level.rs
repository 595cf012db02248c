use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use drift_core::CoreError;

use crate::cache::distributed::DistributedCache;
use crate::cache::invalidation::InvalidationMessage;
use crate::cache::local::LocalCache;

/// Publishes an invalidation message to every peer node. Implemented over
/// the NATS connection the heartbeat bus already uses.
#[async_trait]
pub trait InvalidationPublisher: Send + Sync {
  async fn publish(&self, message: InvalidationMessage) -> Result<(), CoreError>;
}

/// L1 = Local, L2 = Distributed. Read path: L1 hit returns immediately; L1
/// miss falls through to L2; L2 miss invokes the caller's loader and writes
/// through L2 then L1. `invalidate_l1_on_l2_update` drops the node's own L1
/// entry and publishes an invalidation so peers drop theirs too (spec §4.3).
pub struct TwoLevelCache {
  pub l1: Arc<LocalCache>,
  pub l2: Arc<DistributedCache>,
  pub invalidation: Option<Arc<dyn InvalidationPublisher>>,
  pub node_id: String,
  pub write_through: bool,
  pub invalidate_l1_on_l2_update: bool,
}

impl TwoLevelCache {
  pub async fn get(&self, cache_name: &str, key: &str) -> Result<Option<Value>, CoreError> {
    let full_key = format!("{cache_name}::{key}");
    if let Some(v) = self.l1.get(&full_key) {
      return Ok(Some(v));
    }

    match self.l2.get(cache_name, key).await {
      Ok(Some(v)) => {
        self.l1.put(full_key, v.clone());
        Ok(Some(v))
      }
      Ok(None) => Ok(None),
      Err(e) => Err(e),
    }
  }

  pub async fn put(&self, cache_name: &str, key: &str, value: &Value, ttl: Duration) -> Result<(), CoreError> {
    let full_key = format!("{cache_name}::{key}");

    if self.write_through {
      self.l2.put(cache_name, key, value, ttl).await?;
    }

    if self.invalidate_l1_on_l2_update {
      self.l1.delete(&full_key);
      if let Some(publisher) = &self.invalidation {
        let message = InvalidationMessage {
          cache_name: cache_name.to_string(),
          key: Some(key.to_string()),
          pattern: None,
          clear_all: false,
          origin: self.node_id.clone(),
        };
        if let Err(e) = publisher.publish(message).await {
          warn!(error = %e, "cache invalidation publish failed, continuing");
        }
      }
    } else {
      self.l1.put(full_key, value.clone());
    }

    Ok(())
  }

  pub async fn delete(&self, cache_name: &str, key: &str) -> Result<(), CoreError> {
    let full_key = format!("{cache_name}::{key}");
    self.l1.delete(&full_key);
    self.l2.delete(cache_name, key).await?;

    if let Some(publisher) = &self.invalidation {
      let message = InvalidationMessage {
        cache_name: cache_name.to_string(),
        key: Some(key.to_string()),
        pattern: None,
        clear_all: false,
        origin: self.node_id.clone(),
      };
      if let Err(e) = publisher.publish(message).await {
        warn!(error = %e, "cache invalidation publish failed, continuing");
      }
    }
    Ok(())
  }

  /// Applies an invalidation message received from a peer node. No-ops for
  /// self-originated messages (the local write already updated L1).
  pub fn apply_invalidation(&self, message: &InvalidationMessage) {
    if message.origin == self.node_id {
      return;
    }
    if message.clear_all {
      self.l1.clear();
      return;
    }
    if let Some(key) = &message.key {
      self.l1.delete(&format!("{}::{}", message.cache_name, key));
    }
    if let Some(pattern) = &message.pattern {
      self.l1.delete_matching(&format!("{}::{}", message.cache_name, pattern));
    }
  }
}
