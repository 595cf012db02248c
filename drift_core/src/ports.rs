use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde::Serialize;

use crate::error::CoreError;
use crate::ids::InstanceId;
use crate::model::{ApplicationService, DriftEvent, ServiceInstance};

/// Outcome of a bulk upsert, used for metrics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
  pub inserted: u64,
  pub modified: u64,
}

/// Persistent registry of service instances. Exclusively owns
/// `ServiceInstance` records (spec §3 Ownership).
#[async_trait]
pub trait InstanceStore: Send + Sync {
  async fn bulk_upsert(&self, instances: &[ServiceInstance]) -> Result<UpsertOutcome, CoreError>;
  async fn find_by_ids(
    &self,
    ids: &HashSet<InstanceId>,
  ) -> Result<HashMap<InstanceId, ServiceInstance>, CoreError>;
}

/// Append-only drift event log.
#[async_trait]
pub trait DriftLog: Send + Sync {
  /// Idempotent on `DriftEvent::dedup_key` when the implementation can
  /// enforce it (e.g. a unique index), so bus redelivery after an aborted
  /// batch never double-writes the same transition.
  async fn save(&self, event: &DriftEvent) -> Result<(), CoreError>;
  async fn save_all(&self, events: &[DriftEvent]) -> Result<(), CoreError> {
    for event in events {
      self.save(event).await?;
    }
    Ok(())
  }
}

/// Persistent map of logical application services to owning team.
/// Exclusively owns `ApplicationService` records.
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
  async fn find_by_display_names(
    &self,
    names: &HashSet<String>,
  ) -> Result<HashMap<String, ApplicationService>, CoreError>;

  /// Creates the record when it does not already exist (orphan creation),
  /// or persists an update (e.g. a merged environment set) otherwise.
  /// Idempotent on `display_name`.
  async fn save(&self, service: &ApplicationService) -> Result<ApplicationService, CoreError>;
}

/// Snapshot of the external configuration source's reachability, surfaced
/// through the `/health` contract (spec §6): `UP` / `DOWN` plus
/// `{service, url, status, responseCode, error?}`.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigSourceHealth {
  pub service: String,
  pub url: String,
  pub status: String,
  #[serde(rename = "responseCode", skip_serializing_if = "Option::is_none")]
  pub response_code: Option<u16>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl ConfigSourceHealth {
  pub fn is_up(&self) -> bool {
    self.status == "UP"
  }
}

/// Resilient client to the external configuration source (spec §4.4).
#[async_trait]
pub trait ConfigHashSource: Send + Sync {
  /// Returns `None` on a cache miss / unreachable source after all
  /// resilience layers and the cached-payload fallback are exhausted. The
  /// caller must treat `None` as `UNKNOWN`, never as drift.
  async fn get_expected_hash(
    &self,
    service_name: &str,
    environment: &str,
  ) -> Result<Option<String>, CoreError>;

  /// Direct reachability probe of the configuration source, independent of
  /// the retry/circuit-breaker/cache chain `get_expected_hash` runs through.
  async fn health_check(&self) -> ConfigSourceHealth;
}

/// Calls the external source's broadcast-refresh endpoint (spec §4.5).
#[async_trait]
pub trait RefreshDispatcher: Send + Sync {
  async fn trigger_refresh(&self, destination: &str) -> Result<(), CoreError>;
}

/// Accepts a heartbeat payload already serialized to bytes, partitioned by
/// `partition_key` (spec §4.1, §5 — `serviceName` guarantees per-service
/// ordering downstream).
#[async_trait]
pub trait HeartbeatProducer: Send + Sync {
  async fn send(&self, partition_key: &str, payload: &[u8]) -> Result<(), CoreError>;
}
