use dashmap::DashMap;

use drift_core::BackoffEntry;

/// In-memory per-instance retry counters and backoff exponents, keyed
/// `serviceName:instanceId` (spec §3). Owned by the Batch Processor for the
/// lifetime of the process; per-key atomic updates via `DashMap::entry`, no
/// coarse lock (spec §5).
#[derive(Default)]
pub struct BackoffTable {
  entries: DashMap<String, BackoffEntry>,
}

impl BackoffTable {
  pub fn new() -> Self {
    Self {
      entries: DashMap::new(),
    }
  }

  pub fn key(service_name: &str, instance_id: &str) -> String {
    format!("{service_name}:{instance_id}")
  }

  pub fn get(&self, key: &str) -> Option<BackoffEntry> {
    self.entries.get(key).map(|e| *e)
  }

  pub fn set(&self, key: String, entry: BackoffEntry) {
    self.entries.insert(key, entry);
  }

  pub fn clear(&self, key: &str) {
    self.entries.remove(key);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn set_then_get_roundtrips() {
    let table = BackoffTable::new();
    let key = BackoffTable::key("svc-a", "i1");
    table.set(key.clone(), BackoffEntry::on_new_drift());
    assert_eq!(table.get(&key), Some(BackoffEntry::on_new_drift()));
  }

  #[test]
  fn clear_removes_entry() {
    let table = BackoffTable::new();
    let key = BackoffTable::key("svc-a", "i1");
    table.set(key.clone(), BackoffEntry::on_new_drift());
    table.clear(&key);
    assert_eq!(table.get(&key), None);
  }
}
