use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::cache::provider::CacheProvider;

/// Holds the active cache provider behind an atomic reference. `switch`
/// swaps it in one step; in-flight calls that already captured the old
/// `Arc` via `current()` continue running against it undisturbed (spec §4.3,
/// testable property S6). The tier never reconciles state across providers —
/// callers orchestrate warmup/migration externally.
pub struct DelegatingCacheManager {
  active: ArcSwap<CacheProvider>,
}

impl DelegatingCacheManager {
  pub fn new(initial: CacheProvider) -> Self {
    Self {
      active: ArcSwap::from_pointee(initial),
    }
  }

  pub fn current(&self) -> Arc<CacheProvider> {
    self.active.load_full()
  }

  pub fn switch(&self, provider: CacheProvider) {
    self.active.store(Arc::new(provider));
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::local::LocalCache;
  use crate::cache::noop::NoopCache;
  use std::time::Duration;

  #[tokio::test]
  async fn switch_does_not_affect_in_flight_reference() {
    let local = LocalCache::new(Duration::from_secs(60), Duration::from_secs(60), 10);
    local.put("ns::k".into(), serde_json::json!("v"));
    let manager = DelegatingCacheManager::new(CacheProvider::Local(Arc::new(local)));

    let captured = manager.current();
    manager.switch(CacheProvider::Noop(NoopCache));

    // The reference captured before the switch still resolves against Local.
    let value = captured.get("ns", "k").await.unwrap();
    assert_eq!(value, Some(serde_json::json!("v")));

    // A fresh lookup observes the newly switched-in provider.
    let value = manager.current().get("ns", "k").await.unwrap();
    assert_eq!(value, None);
  }
}
