use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use sqlx::{PgPool, QueryBuilder};

use drift_core::ids::{InstanceId, ServiceId, TeamId};
use drift_core::model::{
  ApplicationService, DriftEvent, DriftEventStatus, DriftSeverity, InstanceStatus, ServiceInstance,
};
use drift_core::{CoreError, DriftLog, InstanceStore, ServiceRegistry, UpsertOutcome};

/// sqlx-backed implementations of the `drift_core` persistence ports,
/// grounded on the teacher's trait-per-aggregate repository contracts: no
/// ORM, explicit `Result<_, CoreError>` returns, one statement per operation.
pub struct PostgresStore {
  pool: PgPool,
}

impl PostgresStore {
  pub fn new(pool: PgPool) -> Self {
    Self { pool }
  }
}

fn status_str(status: InstanceStatus) -> &'static str {
  match status {
    InstanceStatus::Healthy => "HEALTHY",
    InstanceStatus::Drift => "DRIFT",
    InstanceStatus::Unknown => "UNKNOWN",
    InstanceStatus::Unhealthy => "UNHEALTHY",
  }
}

fn status_from_str(s: &str) -> InstanceStatus {
  match s {
    "DRIFT" => InstanceStatus::Drift,
    "UNKNOWN" => InstanceStatus::Unknown,
    "UNHEALTHY" => InstanceStatus::Unhealthy,
    _ => InstanceStatus::Healthy,
  }
}

#[async_trait]
impl InstanceStore for PostgresStore {
  /// One `INSERT ... ON CONFLICT (instance_id) DO UPDATE` built for the
  /// whole batch via `QueryBuilder`: per-record atomicity and, because it is
  /// a single statement, atomicity across the batch too (spec §4.6).
  async fn bulk_upsert(&self, instances: &[ServiceInstance]) -> Result<UpsertOutcome, CoreError> {
    if instances.is_empty() {
      return Ok(UpsertOutcome::default());
    }

    let mut builder: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(
      "INSERT INTO service_instances (instance_id, service_id, team_id, host, port, environment, \
       version, metadata, last_applied_hash, last_seen_at, created_at, updated_at, status, \
       has_drift, drift_detected_at, expected_hash, config_hash) ",
    );

    builder.push_values(instances, |mut row, instance| {
      let metadata = serde_json::to_value(&instance.metadata).unwrap_or(serde_json::Value::Null);
      row.push_bind(instance.instance_id.0.clone())
        .push_bind(instance.service_id.0)
        .push_bind(instance.team_id.map(|t| t.0))
        .push_bind(instance.host.clone())
        .push_bind(instance.port.map(|p| p as i32))
        .push_bind(instance.environment.clone())
        .push_bind(instance.version.clone())
        .push_bind(metadata)
        .push_bind(instance.last_applied_hash.clone())
        .push_bind(instance.last_seen_at)
        .push_bind(instance.created_at)
        .push_bind(instance.updated_at)
        .push_bind(status_str(instance.status))
        .push_bind(instance.has_drift)
        .push_bind(instance.drift_detected_at)
        .push_bind(instance.expected_hash.clone())
        .push_bind(instance.config_hash.clone());
    });

    builder.push(
      " ON CONFLICT (instance_id) DO UPDATE SET \
       service_id = EXCLUDED.service_id, team_id = EXCLUDED.team_id, host = EXCLUDED.host, \
       port = EXCLUDED.port, environment = EXCLUDED.environment, version = EXCLUDED.version, \
       metadata = EXCLUDED.metadata, last_applied_hash = EXCLUDED.last_applied_hash, \
       last_seen_at = EXCLUDED.last_seen_at, updated_at = EXCLUDED.updated_at, \
       status = EXCLUDED.status, has_drift = EXCLUDED.has_drift, \
       drift_detected_at = EXCLUDED.drift_detected_at, expected_hash = EXCLUDED.expected_hash, \
       config_hash = EXCLUDED.config_hash \
       RETURNING (xmax = 0) AS inserted",
    );

    let rows = builder
      .build()
      .fetch_all(&self.pool)
      .await
      .map_err(|e| CoreError::PersistenceFailure(e.to_string()))?;

    let inserted = rows
      .iter()
      .filter(|row| {
        use sqlx::Row;
        row.try_get::<bool, _>("inserted").unwrap_or(false)
      })
      .count() as u64;

    Ok(UpsertOutcome {
      inserted,
      modified: rows.len() as u64 - inserted,
    })
  }

  async fn find_by_ids(
    &self,
    ids: &HashSet<InstanceId>,
  ) -> Result<HashMap<InstanceId, ServiceInstance>, CoreError> {
    if ids.is_empty() {
      return Ok(HashMap::new());
    }
    let id_strings: Vec<String> = ids.iter().map(|id| id.0.clone()).collect();

    let rows = sqlx::query!(
      r#"
      SELECT instance_id, service_id, team_id, host, port, environment, version,
             metadata, last_applied_hash, last_seen_at, created_at, updated_at,
             status, has_drift, drift_detected_at, expected_hash, config_hash
      FROM service_instances
      WHERE instance_id = ANY($1)
      "#,
      &id_strings
    )
    .fetch_all(&self.pool)
    .await
    .map_err(|e| CoreError::PersistenceFailure(e.to_string()))?;

    let mut out = HashMap::with_capacity(rows.len());
    for row in rows {
      let metadata: HashMap<String, String> = row
        .metadata
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();

      let instance = ServiceInstance {
        instance_id: InstanceId(row.instance_id.clone()),
        service_id: ServiceId(row.service_id),
        team_id: row.team_id.map(TeamId),
        host: row.host,
        port: row.port.map(|p| p as u16),
        environment: row.environment,
        version: row.version,
        metadata,
        last_applied_hash: row.last_applied_hash,
        last_seen_at: row.last_seen_at,
        created_at: row.created_at,
        updated_at: row.updated_at,
        status: status_from_str(&row.status),
        has_drift: row.has_drift,
        drift_detected_at: row.drift_detected_at,
        expected_hash: row.expected_hash,
        config_hash: row.config_hash,
      };
      out.insert(InstanceId(row.instance_id), instance);
    }
    Ok(out)
  }
}

#[async_trait]
impl ServiceRegistry for PostgresStore {
  async fn find_by_display_names(
    &self,
    names: &HashSet<String>,
  ) -> Result<HashMap<String, ApplicationService>, CoreError> {
    if names.is_empty() {
      return Ok(HashMap::new());
    }
    let name_vec: Vec<String> = names.iter().cloned().collect();

    let rows = sqlx::query!(
      r#"
      SELECT id, display_name, owner_team_id, environments, lifecycle, created_at, updated_at, created_by
      FROM application_services
      WHERE display_name = ANY($1)
      "#,
      &name_vec
    )
    .fetch_all(&self.pool)
    .await
    .map_err(|e| CoreError::PersistenceFailure(e.to_string()))?;

    let mut out = HashMap::with_capacity(rows.len());
    for row in rows {
      let service = ApplicationService {
        id: ServiceId(row.id),
        display_name: row.display_name.clone(),
        owner_team_id: row.owner_team_id.map(TeamId),
        environments: row.environments,
        lifecycle: match row.lifecycle.as_str() {
          "DEPRECATED" => drift_core::model::ServiceLifecycle::Deprecated,
          "RETIRED" => drift_core::model::ServiceLifecycle::Retired,
          _ => drift_core::model::ServiceLifecycle::Active,
        },
        created_at: row.created_at,
        updated_at: row.updated_at,
        created_by: row.created_by,
      };
      out.insert(row.display_name, service);
    }
    Ok(out)
  }

  /// Idempotent on `display_name`: `ON CONFLICT ... DO UPDATE` so concurrent
  /// orphan creation for the same unknown service (spec §9's non-atomicity
  /// observation) never races into two rows.
  async fn save(&self, service: &ApplicationService) -> Result<ApplicationService, CoreError> {
    let lifecycle = match service.lifecycle {
      drift_core::model::ServiceLifecycle::Active => "ACTIVE",
      drift_core::model::ServiceLifecycle::Deprecated => "DEPRECATED",
      drift_core::model::ServiceLifecycle::Retired => "RETIRED",
    };

    let row = sqlx::query!(
      r#"
      INSERT INTO application_services
        (display_name, owner_team_id, environments, lifecycle, created_at, updated_at, created_by)
      VALUES ($1, $2, $3, $4, $5, $6, $7)
      ON CONFLICT (display_name) DO UPDATE SET
        environments = EXCLUDED.environments,
        updated_at = EXCLUDED.updated_at
      RETURNING id, display_name, owner_team_id, environments, lifecycle, created_at, updated_at, created_by
      "#,
      service.display_name,
      service.owner_team_id.map(|t| t.0),
      &service.environments,
      lifecycle,
      service.created_at,
      service.updated_at,
      service.created_by,
    )
    .fetch_one(&self.pool)
    .await
    .map_err(|e| CoreError::PersistenceFailure(e.to_string()))?;

    Ok(ApplicationService {
      id: ServiceId(row.id),
      display_name: row.display_name,
      owner_team_id: row.owner_team_id.map(TeamId),
      environments: row.environments,
      lifecycle: service.lifecycle,
      created_at: row.created_at,
      updated_at: row.updated_at,
      created_by: row.created_by,
    })
  }
}

#[async_trait]
impl DriftLog for PostgresStore {
  /// `ON CONFLICT (dedup_key) DO NOTHING` makes redelivery after an aborted
  /// batch (spec §4.2.2) safe: the same transition is never logged twice.
  async fn save(&self, event: &DriftEvent) -> Result<(), CoreError> {
    let severity = match event.severity {
      DriftSeverity::Low => "LOW",
      DriftSeverity::Medium => "MEDIUM",
      DriftSeverity::High => "HIGH",
    };
    let status = match event.status {
      DriftEventStatus::Detected => "DETECTED",
      DriftEventStatus::Resolved => "RESOLVED",
      DriftEventStatus::Ack => "ACK",
    };

    sqlx::query!(
      r#"
      INSERT INTO drift_events
        (dedup_key, service_name, instance_id, service_id, team_id, environment,
         expected_hash, applied_hash, severity, status, detected_at, detected_by, notes)
      VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
      ON CONFLICT (dedup_key) DO NOTHING
      "#,
      event.dedup_key(),
      event.service_name,
      event.instance_id.0,
      event.service_id.0,
      event.team_id.map(|t| t.0),
      event.environment,
      event.expected_hash,
      event.applied_hash,
      severity,
      status,
      event.detected_at,
      event.detected_by,
      event.notes,
    )
    .execute(&self.pool)
    .await
    .map_err(|e| CoreError::PersistenceFailure(e.to_string()))?;

    Ok(())
  }
}
