use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::{counter, histogram};
use tracing::{debug, error, info, warn};

use drift_core::ids::{InstanceId, ServiceId};
use drift_core::model::{ApplicationService, HeartbeatPayload, ServiceInstance};
use drift_core::{
  apply_heartbeat, BackoffEntry, ConfigHashSource, CoreError, DriftLog, InstanceStore,
  RefreshDispatcher, ServiceRegistry,
};

use crate::backoff_table::BackoffTable;
use crate::cache::CacheTier;

#[derive(Debug, Clone, Copy, Default)]
pub struct BatchOutcome {
  pub heartbeats_received: usize,
  pub heartbeats_skipped: usize,
  pub instances_committed: usize,
  pub drift_events: usize,
  pub refreshes_triggered: usize,
  pub refreshes_failed: usize,
}

const EXPECTED_HASH_CACHE: &str = "expected-config-hash";

/// Consumer of the bus; gathers heartbeats in bounded groups and runs the
/// full drift-decision algorithm as one transactional cycle (spec §4.2): an
/// explicit `UnitOfWork` (open → bulk-read → compute → bulk-write → commit →
/// post-commit), replacing an annotation-driven transactional method.
pub struct BatchProcessor {
  instance_store: Arc<dyn InstanceStore>,
  service_registry: Arc<dyn ServiceRegistry>,
  drift_log: Arc<dyn DriftLog>,
  cache: Arc<CacheTier>,
  config_hash_source: Arc<dyn ConfigHashSource>,
  refresh_dispatcher: Arc<dyn RefreshDispatcher>,
  backoff_table: Arc<BackoffTable>,
}

impl BatchProcessor {
  pub fn new(
    instance_store: Arc<dyn InstanceStore>,
    service_registry: Arc<dyn ServiceRegistry>,
    drift_log: Arc<dyn DriftLog>,
    cache: Arc<CacheTier>,
    config_hash_source: Arc<dyn ConfigHashSource>,
    refresh_dispatcher: Arc<dyn RefreshDispatcher>,
    backoff_table: Arc<BackoffTable>,
  ) -> Self {
    Self {
      instance_store,
      service_registry,
      drift_log,
      cache,
      config_hash_source,
      refresh_dispatcher,
      backoff_table,
    }
  }

  /// Runs one batch cycle. Persistence failures during commit (step 5)
  /// propagate so the caller does not acknowledge the bus message and it is
  /// redelivered; everything before commit degrades per-record instead of
  /// aborting the whole batch.
  pub async fn process_batch(&self, payloads: Vec<HeartbeatPayload>) -> Result<BatchOutcome, CoreError> {
    let started = std::time::Instant::now();
    let mut outcome = BatchOutcome {
      heartbeats_received: payloads.len(),
      ..Default::default()
    };
    histogram!("drift_batch_size").record(payloads.len() as f64);

    let valid: Vec<HeartbeatPayload> = payloads
      .into_iter()
      .filter(|p| match p.validate() {
        Ok(()) => true,
        Err(e) => {
          warn!(error = %e, "dropping invalid heartbeat");
          outcome.heartbeats_skipped += 1;
          false
        }
      })
      .collect();

    // Step 1: bulk-read instances.
    let instance_ids: HashSet<InstanceId> = valid.iter().map(|p| p.instance_id.clone()).collect();
    let mut instances = self.instance_store.find_by_ids(&instance_ids).await?;

    // Step 2: bulk-read services, synthesizing orphans for unknown names.
    let service_names: HashSet<String> = valid.iter().map(|p| p.service_name.clone()).collect();
    let mut services = self.service_registry.find_by_display_names(&service_names).await?;
    let mut unresolvable_services = HashSet::new();

    for name in &service_names {
      if services.contains_key(name) {
        continue;
      }
      let orphan = ApplicationService::orphan(name.clone(), Utc::now());
      match self.service_registry.save(&orphan).await {
        Ok(saved) => {
          info!(service_name = name, service_id = saved.id.0, "created orphan service");
          services.insert(name.clone(), saved);
        }
        Err(e) => {
          // Failure to persist one orphan does not abort the batch; the
          // offending payloads are skipped and counted (spec §4.2 step 2).
          error!(service_name = name, error = %e, "failed to create orphan service, skipping its heartbeats");
          unresolvable_services.insert(name.clone());
        }
      }
    }

    // Step 3: bulk-resolve expected hashes, grouped by (serviceName, environment).
    let mut expected_hashes: HashMap<(String, String), Option<String>> = HashMap::new();
    let groups: HashSet<(String, String)> = valid
      .iter()
      .filter(|p| !unresolvable_services.contains(&p.service_name))
      .map(|p| (p.service_name.clone(), p.environment.clone()))
      .collect();

    for (service_name, environment) in groups {
      let cache_key = format!("{service_name}:{environment}");
      let config_hash_source = self.config_hash_source.clone();
      let service_name_for_loader = service_name.clone();
      let environment_for_loader = environment.clone();

      let hash = self
        .cache
        .get_or_load::<String, _, _>(EXPECTED_HASH_CACHE, &cache_key, || async move {
          config_hash_source
            .get_expected_hash(&service_name_for_loader, &environment_for_loader)
            .await
        })
        .await
        .unwrap_or_else(|e| {
          // Cache/config-source errors never propagate as drift; the
          // instance is classified UNKNOWN for this heartbeat instead.
          debug!(service_name, environment, error = %e, "expected hash unresolved this cycle");
          None
        });

      expected_hashes.insert((service_name, environment), hash);
    }

    // Step 4: per-heartbeat update, in memory only.
    let mut modified_instances: HashMap<InstanceId, ServiceInstance> = HashMap::new();
    let mut touched_services: HashMap<String, ApplicationService> = HashMap::new();
    let mut drift_events = Vec::new();
    let mut refresh_targets: Vec<(String, InstanceId)> = Vec::new();
    // Seeded lazily from the shared table and threaded across the whole
    // batch, the same way `modified_instances` threads instance state: a
    // burst of several heartbeats for the same (service, instance) in one
    // batch must see each other's backoff updates, not the stale pre-batch
    // entry, or persistent drift refreshes every heartbeat instead of at
    // the 1,2,4,8,16 cadence.
    let mut backoff_updates: HashMap<String, Option<BackoffEntry>> = HashMap::new();

    for payload in &valid {
      if unresolvable_services.contains(&payload.service_name) {
        outcome.heartbeats_skipped += 1;
        continue;
      }
      let Some(service) = services.get(&payload.service_name) else {
        outcome.heartbeats_skipped += 1;
        continue;
      };

      let now = Utc::now();
      let mut instance = instances
        .remove(&payload.instance_id)
        .or_else(|| modified_instances.remove(&payload.instance_id))
        .unwrap_or_else(|| ServiceInstance::fresh(payload.instance_id.clone(), service.id, now));
      instance.service_id = service.id;
      instance.team_id = service.owner_team_id;

      let backoff_key = BackoffTable::key(&payload.service_name, &payload.instance_id.0);
      let current_backoff = match backoff_updates.get(&backoff_key) {
        Some(entry) => *entry,
        None => self.backoff_table.get(&backoff_key),
      };
      let expected = expected_hashes
        .get(&(payload.service_name.clone(), payload.environment.clone()))
        .and_then(|h| h.as_deref());

      let transition = apply_heartbeat(&mut instance, payload, expected, current_backoff, now);

      if let Some(event) = transition.drift_event {
        drift_events.push(event);
      }
      if transition.needs_refresh {
        refresh_targets.push((payload.service_name.clone(), payload.instance_id.clone()));
      }
      backoff_updates.insert(backoff_key, transition.backoff);

      // Environment merge is persisted in the same cycle, resolving the
      // "merge mutates in-memory only" gap noted against the source.
      let mut service_entry = touched_services
        .remove(&payload.service_name)
        .unwrap_or_else(|| service.clone());
      if service_entry.merge_environment(&payload.environment) {
        service_entry.updated_at = now;
      }
      touched_services.insert(payload.service_name.clone(), service_entry);

      modified_instances.insert(payload.instance_id.clone(), instance);
    }

    // Step 5: commit. A persistence failure here aborts the batch so the
    // bus redelivers; the state machine is deterministic given the same
    // inputs, and DriftEvent writes are dedup-keyed, so redelivery is safe.
    let instances_to_commit: Vec<ServiceInstance> = modified_instances.into_values().collect();
    let drifting_in_batch = instances_to_commit.iter().filter(|i| i.has_drift).count();
    let upsert_outcome = self.instance_store.bulk_upsert(&instances_to_commit).await?;
    outcome.instances_committed = instances_to_commit.len();
    crate::observability::metrics::collectors::DriftGauge::set_drifting_instances(drifting_in_batch);

    self.drift_log.save_all(&drift_events).await?;
    outcome.drift_events = drift_events.len();

    for service in touched_services.into_values() {
      if let Err(e) = self.service_registry.save(&service).await {
        warn!(service_name = service.display_name, error = %e, "failed to persist merged environment set");
      }
    }

    for (key, backoff) in backoff_updates {
      match backoff {
        Some(entry) => self.backoff_table.set(key, entry),
        None => self.backoff_table.clear(&key),
      }
    }

    // Step 6: post-commit side effects, outside the transaction.
    for (service_name, instance_id) in refresh_targets {
      let destination = format!("{service_name}:{instance_id}");
      match self.refresh_dispatcher.trigger_refresh(&destination).await {
        Ok(()) => outcome.refreshes_triggered += 1,
        Err(e) => {
          warn!(destination, error = %e, "refresh dispatch failed, will retry on next persistent-drift cycle");
          outcome.refreshes_failed += 1;
        }
      }
    }

    counter!("drift_heartbeats_received_total").increment(outcome.heartbeats_received as u64);
    counter!("drift_heartbeats_skipped_total").increment(outcome.heartbeats_skipped as u64);
    counter!("drift_events_total").increment(outcome.drift_events as u64);
    counter!("drift_refreshes_triggered_total").increment(outcome.refreshes_triggered as u64);
    histogram!("drift_batch_cycle_duration_seconds").record(started.elapsed().as_secs_f64());

    info!(
      received = outcome.heartbeats_received,
      skipped = outcome.heartbeats_skipped,
      committed = outcome.instances_committed,
      inserted = upsert_outcome.inserted,
      drift_events = outcome.drift_events,
      refreshes = outcome.refreshes_triggered,
      elapsed_ms = started.elapsed().as_millis() as u64,
      "batch cycle complete"
    );

    Ok(outcome)
  }
}

/// Groups an incoming stream of heartbeats into bounded batches, closing a
/// group when either `max_batch_size` or `max_batch_wait` is reached (spec
/// §4.2). Timers for batch close-out are cooperative, not busy-waiting.
pub struct BatchCollector {
  max_batch_size: usize,
  max_batch_wait: Duration,
}

impl BatchCollector {
  pub fn new(max_batch_size: usize, max_batch_wait: Duration) -> Self {
    Self {
      max_batch_size,
      max_batch_wait,
    }
  }

  /// Drains up to `max_batch_size` items from `rx`, waiting at most
  /// `max_batch_wait` for the first item and then topping up the group
  /// until either bound is hit.
  pub async fn collect(
    &self,
    rx: &mut tokio::sync::mpsc::Receiver<HeartbeatPayload>,
  ) -> Option<Vec<HeartbeatPayload>> {
    let first = rx.recv().await?;
    let mut batch = Vec::with_capacity(self.max_batch_size);
    batch.push(first);

    let deadline = tokio::time::Instant::now() + self.max_batch_wait;
    while batch.len() < self.max_batch_size {
      match tokio::time::timeout_at(deadline, rx.recv()).await {
        Ok(Some(item)) => batch.push(item),
        Ok(None) => break,
        Err(_) => break,
      }
    }
    Some(batch)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn collector_closes_on_max_size() {
    let (tx, mut rx) = tokio::sync::mpsc::channel(16);
    for i in 0..5 {
      tx.send(sample_payload(&format!("i{i}"))).await.unwrap();
    }
    let collector = BatchCollector::new(3, Duration::from_secs(5));
    let batch = collector.collect(&mut rx).await.unwrap();
    assert_eq!(batch.len(), 3);
  }

  #[tokio::test]
  async fn collector_closes_on_max_wait() {
    let (tx, mut rx) = tokio::sync::mpsc::channel(16);
    tx.send(sample_payload("i0")).await.unwrap();
    let collector = BatchCollector::new(100, Duration::from_millis(20));
    let batch = collector.collect(&mut rx).await.unwrap();
    assert_eq!(batch.len(), 1);
  }

  fn sample_payload(instance_id: &str) -> HeartbeatPayload {
    HeartbeatPayload {
      instance_id: InstanceId::from(instance_id),
      service_name: "svc-a".to_string(),
      environment: "prod".to_string(),
      host: None,
      port: None,
      version: None,
      config_hash: Some("aa".to_string()),
      metadata: Default::default(),
      sent_at: Utc::now(),
    }
  }
}
