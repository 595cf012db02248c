use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;

struct Entry {
  value: Value,
  written_at: Instant,
  last_accessed_at: Instant,
}

/// Bounded in-memory map with size-based eviction and two independent
/// eviction clocks (`expire_after_write`, `expire_after_access`), generalized
/// from the chat-specific in-memory fallback adapter into a standalone
/// single-process cache provider.
pub struct LocalCache {
  entries: DashMap<String, Entry>,
  expire_after_write: Duration,
  expire_after_access: Duration,
  max_size: usize,
}

impl LocalCache {
  pub fn new(expire_after_write: Duration, expire_after_access: Duration, max_size: usize) -> Self {
    Self {
      entries: DashMap::new(),
      expire_after_write,
      expire_after_access,
      max_size,
    }
  }

  pub fn get(&self, key: &str) -> Option<Value> {
    let mut expired = false;
    let result = self.entries.get_mut(key).and_then(|mut entry| {
      let now = Instant::now();
      if now.duration_since(entry.written_at) > self.expire_after_write
        || now.duration_since(entry.last_accessed_at) > self.expire_after_access
      {
        expired = true;
        None
      } else {
        entry.last_accessed_at = now;
        Some(entry.value.clone())
      }
    });

    if expired {
      self.entries.remove(key);
    }
    result
  }

  pub fn put(&self, key: String, value: Value) {
    if self.entries.len() >= self.max_size && !self.entries.contains_key(&key) {
      self.evict_one();
    }
    let now = Instant::now();
    self.entries.insert(
      key,
      Entry {
        value,
        written_at: now,
        last_accessed_at: now,
      },
    );
  }

  pub fn delete(&self, key: &str) {
    self.entries.remove(key);
  }

  pub fn clear(&self) {
    self.entries.clear();
  }

  /// `pattern` is treated as a prefix; a trailing `*` (glob-style, matching
  /// the distributed tier's `SCAN MATCH` semantics) is stripped before
  /// comparison so `"foo::*"` clears everything under `"foo::"`.
  pub fn delete_matching(&self, pattern: &str) {
    let prefix = pattern.strip_suffix('*').unwrap_or(pattern);
    self.entries.retain(|k, _| !k.starts_with(prefix));
  }

  /// Evicts the single oldest-written entry. Amortized O(1) relative to a
  /// full LRU, acceptable since eviction only triggers at capacity.
  fn evict_one(&self) {
    if let Some(oldest_key) = self
      .entries
      .iter()
      .min_by_key(|e| e.written_at)
      .map(|e| e.key().clone())
    {
      self.entries.remove(&oldest_key);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn put_then_get_roundtrips() {
    let cache = LocalCache::new(Duration::from_secs(60), Duration::from_secs(60), 10);
    cache.put("k1".into(), json!({"a": 1}));
    assert_eq!(cache.get("k1"), Some(json!({"a": 1})));
  }

  #[test]
  fn expire_after_write_evicts_stale_entries() {
    let cache = LocalCache::new(Duration::from_millis(1), Duration::from_secs(60), 10);
    cache.put("k1".into(), json!("v"));
    std::thread::sleep(Duration::from_millis(10));
    assert_eq!(cache.get("k1"), None);
  }

  #[test]
  fn evicts_when_over_capacity() {
    let cache = LocalCache::new(Duration::from_secs(60), Duration::from_secs(60), 2);
    cache.put("k1".into(), json!(1));
    std::thread::sleep(Duration::from_millis(2));
    cache.put("k2".into(), json!(2));
    std::thread::sleep(Duration::from_millis(2));
    cache.put("k3".into(), json!(3));
    assert_eq!(cache.entries.len(), 2);
    assert_eq!(cache.get("k1"), None);
  }
}
