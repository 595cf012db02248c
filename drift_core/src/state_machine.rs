use chrono::{DateTime, Utc};

use crate::backoff::BackoffEntry;
use crate::model::{DriftEvent, DriftEventStatus, DriftSeverity, HeartbeatPayload, InstanceStatus, ServiceInstance};

/// Outcome of applying one heartbeat to one instance: the mutated instance
/// stays in place (caller owns it), everything else is surfaced here so the
/// batch processor can decide what to persist/dispatch without re-deriving it.
#[derive(Debug, Clone, Default)]
pub struct Transition {
  pub drift_event: Option<DriftEvent>,
  pub needs_refresh: bool,
  /// `None` means "clear the backoff entry for this instance".
  pub backoff: Option<BackoffEntry>,
}

/// Applies one heartbeat to `instance` in place per spec §4.2.1, given the
/// previously resolved `expected_hash` (`None` on cache miss / config-source
/// outage) and the instance's current backoff entry, if any.
///
/// Bookkeeping fields are updated unconditionally; only the drift
/// classification depends on the expected/applied/prev-drift triple.
pub fn apply_heartbeat(
  instance: &mut ServiceInstance,
  payload: &HeartbeatPayload,
  expected_hash: Option<&str>,
  current_backoff: Option<BackoffEntry>,
  now: DateTime<Utc>,
) -> Transition {
  let applied = payload.config_hash.as_deref();
  let prev_has_drift = instance.has_drift;

  instance.host = payload.host.clone();
  instance.port = payload.port;
  instance.environment = payload.environment.clone();
  instance.version = payload.version.clone();
  instance.last_applied_hash = payload.config_hash.clone();
  instance.metadata = payload.metadata.clone();
  instance.last_seen_at = now;
  instance.updated_at = now;

  let has_drift_now = match (expected_hash, applied) {
    (Some(e), Some(a)) => e != a,
    _ => false,
  };

  let mut transition = Transition::default();

  match (expected_hash, applied) {
    (None, _) | (_, None) => {
      // Unknown: either side absent. Never claim drift on an unreachable
      // config source or an instance that hasn't reported a hash yet.
      instance.status = InstanceStatus::Unknown;
      instance.has_drift = false;
      instance.drift_detected_at = None;
      transition.backoff = None;
    }
    (Some(expected), Some(_applied)) if has_drift_now && !prev_has_drift => {
      // Case A: new drift.
      instance.has_drift = true;
      instance.drift_detected_at = Some(now);
      instance.expected_hash = Some(expected.to_string());
      instance.config_hash = Some(expected.to_string());
      instance.status = InstanceStatus::Drift;

      let entry = BackoffEntry::on_new_drift();
      transition.backoff = Some(entry);
      transition.needs_refresh = true;
      transition.drift_event = Some(DriftEvent {
        id: None,
        service_name: payload.service_name.clone(),
        instance_id: payload.instance_id.clone(),
        service_id: instance.service_id,
        team_id: instance.team_id,
        environment: payload.environment.clone(),
        expected_hash: expected.to_string(),
        applied_hash: payload.config_hash.clone().unwrap_or_default(),
        severity: DriftSeverity::Medium,
        status: DriftEventStatus::Detected,
        detected_at: now,
        detected_by: "heartbeat-batch".to_string(),
        notes: None,
      });
    }
    (Some(expected), Some(_applied)) if !has_drift_now && prev_has_drift => {
      // Case B: drift resolved.
      instance.has_drift = false;
      instance.drift_detected_at = None;
      instance.status = InstanceStatus::Healthy;
      instance.expected_hash = Some(expected.to_string());
      transition.backoff = None;
    }
    (Some(expected), Some(_applied)) if !has_drift_now => {
      // Case C: steady healthy.
      instance.status = InstanceStatus::Healthy;
      instance.expected_hash = Some(expected.to_string());
      transition.backoff = None;
    }
    (Some(_expected), Some(_applied)) => {
      // Case D: persistent drift.
      let mut entry = current_backoff.unwrap_or_default();
      let fire = entry.on_persistent_drift();
      transition.needs_refresh = fire;
      transition.backoff = Some(entry);
      // status/has_drift/drift_detected_at/expectedHash remain as already set.
    }
  }

  transition
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ids::{InstanceId, ServiceId};
  use std::collections::HashMap;

  fn payload(instance_id: &str, service: &str, config_hash: Option<&str>) -> HeartbeatPayload {
    HeartbeatPayload {
      instance_id: InstanceId::from(instance_id),
      service_name: service.to_string(),
      environment: "prod".to_string(),
      host: Some("10.0.0.1".to_string()),
      port: Some(8080),
      version: Some("1.0.0".to_string()),
      config_hash: config_hash.map(|s| s.to_string()),
      metadata: HashMap::new(),
      sent_at: Utc::now(),
    }
  }

  /// S1 — New drift.
  #[test]
  fn s1_new_drift() {
    let now = Utc::now();
    let mut instance = ServiceInstance::fresh(InstanceId::from("i1"), ServiceId(1), now);
    let hb = payload("i1", "svc-A", Some("bb"));

    let t = apply_heartbeat(&mut instance, &hb, Some("aa"), None, now);

    assert_eq!(instance.status, InstanceStatus::Drift);
    assert!(instance.has_drift);
    assert_eq!(instance.drift_detected_at, Some(now));
    assert_eq!(instance.expected_hash.as_deref(), Some("aa"));
    assert_eq!(instance.config_hash.as_deref(), Some("aa"));
    assert_eq!(instance.last_applied_hash.as_deref(), Some("bb"));
    assert!(t.drift_event.is_some());
    assert!(t.needs_refresh);
    assert_eq!(t.backoff, Some(BackoffEntry { retry_count: 1, backoff_pow: 0 }));
    assert!(instance.invariants_hold());
  }

  /// S2 — Drift resolved.
  #[test]
  fn s2_drift_resolved() {
    let now = Utc::now();
    let mut instance = ServiceInstance::fresh(InstanceId::from("i1"), ServiceId(1), now);
    let hb1 = payload("i1", "svc-A", Some("bb"));
    apply_heartbeat(&mut instance, &hb1, Some("aa"), None, now);

    let hb2 = payload("i1", "svc-A", Some("aa"));
    let t = apply_heartbeat(&mut instance, &hb2, Some("aa"), None, now);

    assert_eq!(instance.status, InstanceStatus::Healthy);
    assert!(!instance.has_drift);
    assert!(instance.drift_detected_at.is_none());
    assert_eq!(instance.expected_hash.as_deref(), Some("aa"));
    assert!(t.drift_event.is_none());
    assert!(!t.needs_refresh);
    assert_eq!(t.backoff, None);
    assert!(instance.invariants_hold());
  }

  /// S3 — Persistent drift with backoff: repeat the S1 heartbeat 20 times,
  /// refreshes fire at indices 1, 2, 4, 8, 16; exactly one DriftEvent total.
  #[test]
  fn s3_persistent_drift_backoff_sequence() {
    let now = Utc::now();
    let mut instance = ServiceInstance::fresh(InstanceId::from("i1"), ServiceId(1), now);
    let hb = payload("i1", "svc-A", Some("bb"));

    let mut refresh_indices = Vec::new();
    let mut drift_event_count = 0;
    let mut backoff: Option<BackoffEntry> = None;

    for i in 1..=20u32 {
      let t = apply_heartbeat(&mut instance, &hb, Some("aa"), backoff, now);
      if t.drift_event.is_some() {
        drift_event_count += 1;
      }
      if t.needs_refresh {
        refresh_indices.push(i);
      }
      backoff = t.backoff;
    }

    assert_eq!(drift_event_count, 1);
    assert_eq!(refresh_indices, vec![1, 2, 4, 8, 16]);
  }

  /// S4 — Unknown state: expected hash missing, no drift, no event, backoff cleared.
  #[test]
  fn s4_unknown_state() {
    let now = Utc::now();
    let mut instance = ServiceInstance::fresh(InstanceId::from("i1"), ServiceId(1), now);
    let hb = payload("i1", "svc-A", Some("anything"));

    let t = apply_heartbeat(
      &mut instance,
      &hb,
      None,
      Some(BackoffEntry { retry_count: 3, backoff_pow: 1 }),
      now,
    );

    assert_eq!(instance.status, InstanceStatus::Unknown);
    assert!(!instance.has_drift);
    assert!(t.drift_event.is_none());
    assert!(!t.needs_refresh);
    assert_eq!(t.backoff, None);
  }

  #[test]
  fn applied_hash_absent_is_unknown_not_drift() {
    let now = Utc::now();
    let mut instance = ServiceInstance::fresh(InstanceId::from("i1"), ServiceId(1), now);
    let hb = payload("i1", "svc-A", None);

    let t = apply_heartbeat(&mut instance, &hb, Some("aa"), None, now);

    assert_eq!(instance.status, InstanceStatus::Unknown);
    assert!(!instance.has_drift);
    assert!(t.drift_event.is_none());
  }
}
