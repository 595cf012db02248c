use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{DriftEventId, InstanceId, ServiceId, TeamId};

/// Immutable input emitted by a running instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatPayload {
  pub instance_id: InstanceId,
  pub service_name: String,
  #[serde(default = "default_environment")]
  pub environment: String,
  pub host: Option<String>,
  pub port: Option<u16>,
  pub version: Option<String>,
  /// The digest currently applied by the instance; absent until the
  /// instance has loaded and hashed its own configuration.
  pub config_hash: Option<String>,
  #[serde(default)]
  pub metadata: HashMap<String, String>,
  pub sent_at: DateTime<Utc>,
}

fn default_environment() -> String {
  "default".to_string()
}

impl HeartbeatPayload {
  pub fn validate(&self) -> Result<(), crate::error::CoreError> {
    if self.instance_id.0.trim().is_empty() {
      return Err(crate::error::CoreError::InvalidInput(
        "instanceId must not be empty".into(),
      ));
    }
    if self.service_name.trim().is_empty() {
      return Err(crate::error::CoreError::InvalidInput(
        "serviceName must not be empty".into(),
      ));
    }
    Ok(())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
  Healthy,
  Drift,
  Unknown,
  Unhealthy,
}

/// Mutable registry record, keyed by `instanceId`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInstance {
  pub instance_id: InstanceId,
  pub service_id: ServiceId,
  pub team_id: Option<TeamId>,

  pub host: Option<String>,
  pub port: Option<u16>,
  pub environment: String,
  pub version: Option<String>,
  pub metadata: HashMap<String, String>,
  pub last_applied_hash: Option<String>,
  pub last_seen_at: DateTime<Utc>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,

  pub status: InstanceStatus,
  pub has_drift: bool,
  pub drift_detected_at: Option<DateTime<Utc>>,
  pub expected_hash: Option<String>,
  pub config_hash: Option<String>,
}

impl ServiceInstance {
  /// A fresh shell for an instance never seen before: healthy, no drift, no
  /// history. The state machine mutates this in place on first heartbeat.
  pub fn fresh(instance_id: InstanceId, service_id: ServiceId, now: DateTime<Utc>) -> Self {
    Self {
      instance_id,
      service_id,
      team_id: None,
      host: None,
      port: None,
      environment: default_environment(),
      version: None,
      metadata: HashMap::new(),
      last_applied_hash: None,
      last_seen_at: now,
      created_at: now,
      updated_at: now,
      status: InstanceStatus::Healthy,
      has_drift: false,
      drift_detected_at: None,
      expected_hash: None,
      config_hash: None,
    }
  }

  /// Invariant 1 (spec §8): `hasDrift ⇔ status=DRIFT ⇔ driftDetectedAt≠null`.
  pub fn invariants_hold(&self) -> bool {
    let drift_consistent = self.has_drift == (self.status == InstanceStatus::Drift);
    let detected_at_consistent = self.has_drift == self.drift_detected_at.is_some();
    let unknown_consistent = (self.status == InstanceStatus::Unknown)
      == (self.expected_hash.is_none() || self.last_applied_hash.is_none());
    let timeline_consistent = self.created_at <= self.updated_at && self.updated_at <= self.last_seen_at;
    drift_consistent && detected_at_consistent && unknown_consistent && timeline_consistent
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceLifecycle {
  Active,
  Deprecated,
  Retired,
}

/// Logical application service: the owning unit heartbeats are grouped by.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationService {
  pub id: ServiceId,
  pub display_name: String,
  pub owner_team_id: Option<TeamId>,
  pub environments: Vec<String>,
  pub lifecycle: ServiceLifecycle,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  pub created_by: Option<String>,
}

impl ApplicationService {
  /// Orphan record created on demand when a heartbeat references a service
  /// unknown to the registry. `ownerTeamId` stays null until a human claims it.
  pub fn orphan(display_name: String, now: DateTime<Utc>) -> Self {
    Self {
      id: ServiceId(0),
      display_name,
      owner_team_id: None,
      environments: vec!["dev".into(), "staging".into(), "prod".into()],
      lifecycle: ServiceLifecycle::Active,
      created_at: now,
      updated_at: now,
      created_by: None,
    }
  }

  /// Merges `environment` into the owned set, sorted and deduped.
  /// Returns whether the set changed (callers use this to decide if the
  /// record needs to be persisted this cycle).
  pub fn merge_environment(&mut self, environment: &str) -> bool {
    if self.environments.iter().any(|e| e == environment) {
      return false;
    }
    self.environments.push(environment.to_string());
    self.environments.sort();
    self.environments.dedup();
    true
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriftSeverity {
  Low,
  Medium,
  High,
}

impl Default for DriftSeverity {
  fn default() -> Self {
    DriftSeverity::Medium
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriftEventStatus {
  Detected,
  Resolved,
  Ack,
}

/// Append-only record: one event is written per transition *into* DRIFT,
/// never per drifting heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftEvent {
  pub id: Option<DriftEventId>,
  pub service_name: String,
  pub instance_id: InstanceId,
  pub service_id: ServiceId,
  pub team_id: Option<TeamId>,
  pub environment: String,
  pub expected_hash: String,
  pub applied_hash: String,
  pub severity: DriftSeverity,
  pub status: DriftEventStatus,
  pub detected_at: DateTime<Utc>,
  pub detected_by: String,
  pub notes: Option<String>,
}

impl DriftEvent {
  /// Dedup key recommended by spec §4.2.2 so redelivery after an aborted
  /// batch does not double-write the same transition.
  pub fn dedup_key(&self) -> String {
    format!(
      "{}:{}:{}:{}",
      self.instance_id, self.expected_hash, self.applied_hash, self.detected_at.timestamp_micros()
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fresh_instance_is_an_unclassified_shell() {
    // `fresh` predates the state machine's first classification: it is a
    // placeholder for "no heartbeat processed yet", not a persisted record,
    // so `invariants_hold` (which governs persisted Healthy/Drift/Unknown
    // records) does not apply to it until `apply_heartbeat` has run once.
    let now = Utc::now();
    let inst = ServiceInstance::fresh(InstanceId::from("i1"), ServiceId(1), now);
    assert_eq!(inst.status, InstanceStatus::Healthy);
    assert!(!inst.has_drift);
    assert!(inst.expected_hash.is_none());
    assert!(inst.last_applied_hash.is_none());
  }

  #[test]
  fn merge_environment_dedupes_and_sorts() {
    let mut svc = ApplicationService::orphan("svc-a".into(), Utc::now());
    assert_eq!(svc.environments, vec!["dev", "staging", "prod"]);
    assert!(!svc.merge_environment("prod"));
    assert!(svc.merge_environment("canary"));
    assert_eq!(svc.environments, vec!["canary", "dev", "prod", "staging"]);
  }
}
