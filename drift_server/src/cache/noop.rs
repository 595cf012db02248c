use serde_json::Value;

/// Always invokes the loader; nothing is stored. Used for test/no-cache
/// environments, mirroring the teacher's `NoopRedisCacheService`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

impl NoopCache {
  pub fn get(&self, _cache_name: &str, _key: &str) -> Option<Value> {
    None
  }

  pub fn put(&self, _cache_name: &str, _key: &str, _value: &Value) {}

  pub fn delete(&self, _cache_name: &str, _key: &str) {}

  pub fn clear(&self, _cache_name: &str) {}
}
