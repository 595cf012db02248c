//! Integration test for the full batch cycle (spec §4.2): ingestion →
//! orphan service creation → expected-hash resolution through the Cache
//! Tier → drift classification → commit → refresh dispatch. Exercises
//! `BatchProcessor` against hand-rolled fakes for every port, following the
//! teacher's `#[cfg_attr(test, automock)]`-adjacent fake-over-mock style
//! generalized to async trait ports that `mockall::automock` cannot derive
//! directly (it only supports sync trait methods without extra plumbing).

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use drift_core::ids::{InstanceId, ServiceId};
use drift_core::model::{ApplicationService, DriftEvent, HeartbeatPayload, ServiceInstance};
use drift_core::{
  ConfigHashSource, ConfigSourceHealth, CoreError, DriftLog, InstanceStore, RefreshDispatcher,
  ServiceRegistry, UpsertOutcome,
};

use drift_server::backoff_table::BackoffTable;
use drift_server::batch::BatchProcessor;
use drift_server::cache::delegating::DelegatingCacheManager;
use drift_server::cache::provider::CacheProvider;
use drift_server::cache::CacheTier;

#[derive(Default)]
struct FakeInstanceStore {
  rows: Mutex<HashMap<InstanceId, ServiceInstance>>,
}

#[async_trait]
impl InstanceStore for FakeInstanceStore {
  async fn bulk_upsert(&self, instances: &[ServiceInstance]) -> Result<UpsertOutcome, CoreError> {
    let mut rows = self.rows.lock().unwrap();
    let mut inserted = 0;
    let mut modified = 0;
    for instance in instances {
      if rows.contains_key(&instance.instance_id) {
        modified += 1;
      } else {
        inserted += 1;
      }
      rows.insert(instance.instance_id.clone(), instance.clone());
    }
    Ok(UpsertOutcome { inserted, modified })
  }

  async fn find_by_ids(
    &self,
    ids: &HashSet<InstanceId>,
  ) -> Result<HashMap<InstanceId, ServiceInstance>, CoreError> {
    let rows = self.rows.lock().unwrap();
    Ok(
      ids.iter()
        .filter_map(|id| rows.get(id).map(|v| (id.clone(), v.clone())))
        .collect(),
    )
  }
}

#[derive(Default)]
struct FakeServiceRegistry {
  rows: Mutex<HashMap<String, ApplicationService>>,
  next_id: Mutex<i64>,
}

#[async_trait]
impl ServiceRegistry for FakeServiceRegistry {
  async fn find_by_display_names(
    &self,
    names: &HashSet<String>,
  ) -> Result<HashMap<String, ApplicationService>, CoreError> {
    let rows = self.rows.lock().unwrap();
    Ok(
      names.iter()
        .filter_map(|n| rows.get(n).map(|v| (n.clone(), v.clone())))
        .collect(),
    )
  }

  async fn save(&self, service: &ApplicationService) -> Result<ApplicationService, CoreError> {
    let mut rows = self.rows.lock().unwrap();
    let mut saved = service.clone();
    if let Some(existing) = rows.get(&service.display_name) {
      saved.id = existing.id;
    } else {
      let mut next_id = self.next_id.lock().unwrap();
      *next_id += 1;
      saved.id = ServiceId(*next_id);
    }
    rows.insert(saved.display_name.clone(), saved.clone());
    Ok(saved)
  }
}

#[derive(Default)]
struct FakeDriftLog {
  events: Mutex<Vec<DriftEvent>>,
}

#[async_trait]
impl DriftLog for FakeDriftLog {
  async fn save(&self, event: &DriftEvent) -> Result<(), CoreError> {
    let mut events = self.events.lock().unwrap();
    if events.iter().any(|e| e.dedup_key() == event.dedup_key()) {
      return Ok(());
    }
    events.push(event.clone());
    Ok(())
  }
}

struct FakeConfigHashSource {
  hashes: HashMap<(String, String), Option<String>>,
}

#[async_trait]
impl ConfigHashSource for FakeConfigHashSource {
  async fn get_expected_hash(&self, service_name: &str, environment: &str) -> Result<Option<String>, CoreError> {
    Ok(
      self
        .hashes
        .get(&(service_name.to_string(), environment.to_string()))
        .cloned()
        .flatten(),
    )
  }

  async fn health_check(&self) -> ConfigSourceHealth {
    ConfigSourceHealth {
      service: "config-source".to_string(),
      url: "http://fake-config-source.test".to_string(),
      status: "UP".to_string(),
      response_code: None,
      error: None,
    }
  }
}

#[derive(Default)]
struct FakeRefreshDispatcher {
  destinations: Mutex<Vec<String>>,
}

#[async_trait]
impl RefreshDispatcher for FakeRefreshDispatcher {
  async fn trigger_refresh(&self, destination: &str) -> Result<(), CoreError> {
    self.destinations.lock().unwrap().push(destination.to_string());
    Ok(())
  }
}

fn heartbeat(instance_id: &str, service_name: &str, environment: &str, config_hash: Option<&str>) -> HeartbeatPayload {
  HeartbeatPayload {
    instance_id: InstanceId::from(instance_id),
    service_name: service_name.to_string(),
    environment: environment.to_string(),
    host: Some("10.0.0.5".to_string()),
    port: Some(9000),
    version: Some("1.2.3".to_string()),
    config_hash: config_hash.map(|s| s.to_string()),
    metadata: HashMap::new(),
    sent_at: Utc::now(),
  }
}

fn noop_cache() -> Arc<CacheTier> {
  let manager = DelegatingCacheManager::new(CacheProvider::Noop(drift_server::cache::noop::NoopCache));
  Arc::new(CacheTier::new(manager, HashMap::new()))
}

/// S5 — two heartbeats for an unknown service in one batch create exactly
/// one orphan `ApplicationService`, and both instances reference its id.
#[tokio::test]
async fn orphan_service_created_once_per_batch() {
  let instance_store = Arc::new(FakeInstanceStore::default());
  let service_registry = Arc::new(FakeServiceRegistry::default());
  let drift_log = Arc::new(FakeDriftLog::default());
  let config_hash_source = Arc::new(FakeConfigHashSource { hashes: HashMap::new() });
  let refresh_dispatcher = Arc::new(FakeRefreshDispatcher::default());

  let processor = BatchProcessor::new(
    instance_store.clone(),
    service_registry.clone(),
    drift_log,
    noop_cache(),
    config_hash_source,
    refresh_dispatcher,
    Arc::new(BackoffTable::new()),
  );

  let batch = vec![
    heartbeat("i1", "new-svc", "prod", None),
    heartbeat("i2", "new-svc", "prod", None),
  ];

  let outcome = processor.process_batch(batch).await.unwrap();
  assert_eq!(outcome.instances_committed, 2);

  let services = service_registry.rows.lock().unwrap();
  assert_eq!(services.len(), 1);
  let svc = services.get("new-svc").unwrap();
  assert!(svc.owner_team_id.is_none());

  let instances = instance_store.rows.lock().unwrap();
  assert_eq!(instances.get(&InstanceId::from("i1")).unwrap().service_id, svc.id);
  assert_eq!(instances.get(&InstanceId::from("i2")).unwrap().service_id, svc.id);
}

/// S1 — a single drifting heartbeat for a brand-new instance produces one
/// DriftEvent and exactly one refresh dispatch, end to end through the
/// batch processor (not just the state machine in isolation).
#[tokio::test]
async fn new_drift_emits_event_and_triggers_refresh() {
  let instance_store = Arc::new(FakeInstanceStore::default());
  let service_registry = Arc::new(FakeServiceRegistry::default());
  let drift_log = Arc::new(FakeDriftLog::default());
  let mut hashes = HashMap::new();
  hashes.insert(("svc-a".to_string(), "prod".to_string()), Some("aa".to_string()));
  let config_hash_source = Arc::new(FakeConfigHashSource { hashes });
  let refresh_dispatcher = Arc::new(FakeRefreshDispatcher::default());

  let processor = BatchProcessor::new(
    instance_store.clone(),
    service_registry,
    drift_log.clone(),
    noop_cache(),
    config_hash_source,
    refresh_dispatcher.clone(),
    Arc::new(BackoffTable::new()),
  );

  let outcome = processor
    .process_batch(vec![heartbeat("i1", "svc-a", "prod", Some("bb"))])
    .await
    .unwrap();

  assert_eq!(outcome.drift_events, 1);
  assert_eq!(outcome.refreshes_triggered, 1);

  let instances = instance_store.rows.lock().unwrap();
  let instance = instances.get(&InstanceId::from("i1")).unwrap();
  assert!(instance.has_drift);
  assert_eq!(instance.expected_hash.as_deref(), Some("aa"));

  let events = drift_log.events.lock().unwrap();
  assert_eq!(events.len(), 1);

  let dispatched = refresh_dispatcher.destinations.lock().unwrap();
  assert_eq!(dispatched.as_slice(), ["svc-a:i1"]);
}

/// S3, exercised within a single batch: several drifting heartbeats for the
/// same instance arriving in one batch must still follow the 1,2,4 forced
/// refresh cadence, not fire on every heartbeat. This only holds if backoff
/// state is threaded across the batch instead of re-read from the shared
/// table (which is only written after commit).
#[tokio::test]
async fn persistent_drift_burst_within_one_batch_follows_backoff_cadence() {
  let instance_store = Arc::new(FakeInstanceStore::default());
  let service_registry = Arc::new(FakeServiceRegistry::default());
  let drift_log = Arc::new(FakeDriftLog::default());
  let mut hashes = HashMap::new();
  hashes.insert(("svc-a".to_string(), "prod".to_string()), Some("aa".to_string()));
  let config_hash_source = Arc::new(FakeConfigHashSource { hashes });
  let refresh_dispatcher = Arc::new(FakeRefreshDispatcher::default());

  let processor = BatchProcessor::new(
    instance_store.clone(),
    service_registry,
    drift_log.clone(),
    noop_cache(),
    config_hash_source,
    refresh_dispatcher.clone(),
    Arc::new(BackoffTable::new()),
  );

  // Four consecutive drifting heartbeats for the same instance, all in one
  // batch: expected refreshes at indices 1, 2, 4 (the 3rd is suppressed).
  let batch = (0..4)
    .map(|_| heartbeat("i1", "svc-a", "prod", Some("bb")))
    .collect();

  let outcome = processor.process_batch(batch).await.unwrap();

  assert_eq!(outcome.drift_events, 1);
  assert_eq!(outcome.refreshes_triggered, 3);

  let dispatched = refresh_dispatcher.destinations.lock().unwrap();
  assert_eq!(dispatched.as_slice(), ["svc-a:i1", "svc-a:i1", "svc-a:i1"]);
}

/// S4 — an unreachable config source (no cached hash for this service/env)
/// must classify the instance UNKNOWN, never DRIFT, and never dispatch a
/// refresh, across the full batch cycle.
#[tokio::test]
async fn missing_expected_hash_yields_unknown_not_drift() {
  let instance_store = Arc::new(FakeInstanceStore::default());
  let service_registry = Arc::new(FakeServiceRegistry::default());
  let drift_log = Arc::new(FakeDriftLog::default());
  let config_hash_source = Arc::new(FakeConfigHashSource { hashes: HashMap::new() });
  let refresh_dispatcher = Arc::new(FakeRefreshDispatcher::default());

  let processor = BatchProcessor::new(
    instance_store.clone(),
    service_registry,
    drift_log.clone(),
    noop_cache(),
    config_hash_source,
    refresh_dispatcher.clone(),
    Arc::new(BackoffTable::new()),
  );

  let outcome = processor
    .process_batch(vec![heartbeat("i1", "svc-b", "prod", Some("bb"))])
    .await
    .unwrap();

  assert_eq!(outcome.drift_events, 0);
  assert_eq!(outcome.refreshes_triggered, 0);

  let instances = instance_store.rows.lock().unwrap();
  let instance = instances.get(&InstanceId::from("i1")).unwrap();
  assert!(!instance.has_drift);
  assert_eq!(instance.status, drift_core::InstanceStatus::Unknown);
  assert!(drift_log.events.lock().unwrap().is_empty());
  assert!(refresh_dispatcher.destinations.lock().unwrap().is_empty());
}

/// Invalid heartbeats in a batch are skipped and counted, not allowed to
/// abort the whole cycle.
#[tokio::test]
async fn invalid_heartbeat_is_skipped_not_fatal() {
  let instance_store = Arc::new(FakeInstanceStore::default());
  let service_registry = Arc::new(FakeServiceRegistry::default());
  let drift_log = Arc::new(FakeDriftLog::default());
  let config_hash_source = Arc::new(FakeConfigHashSource { hashes: HashMap::new() });
  let refresh_dispatcher = Arc::new(FakeRefreshDispatcher::default());

  let processor = BatchProcessor::new(
    instance_store,
    service_registry,
    drift_log,
    noop_cache(),
    config_hash_source,
    refresh_dispatcher,
    Arc::new(BackoffTable::new()),
  );

  let mut invalid = heartbeat("i1", "svc-c", "prod", Some("bb"));
  invalid.instance_id = InstanceId::from("");
  let valid = heartbeat("i2", "svc-c", "prod", Some("bb"));

  let outcome = processor.process_batch(vec![invalid, valid]).await.unwrap();

  assert_eq!(outcome.heartbeats_skipped, 1);
  assert_eq!(outcome.instances_committed, 1);
}
