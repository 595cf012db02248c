use std::collections::HashSet;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use drift_core::ids::InstanceId;

use crate::state::AppState;

/// Liveness check: the process is up and serving requests. Also surfaces the
/// configuration source's reachability per spec §6's `/health` contract
/// (`UP` / `DOWN` with `{service, url, status, responseCode, error?}`).
/// Process liveness does not depend on the config source: an unreachable
/// source degrades drift detection to `UNKNOWN`, it does not make this
/// process unhealthy.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
  let config_source = state.config_hash_source().health_check().await;

  Json(json!({
    "status": "healthy",
    "service": "drift_server",
    "version": env!("CARGO_PKG_VERSION"),
    "timestamp": chrono::Utc::now().to_rfc3339(),
    "configSource": config_source,
  }))
}

/// Readiness check: a trivial instance-store lookup must succeed, proving
/// the database connection is live. Unlike liveness, a failing database
/// here should pull the instance out of a load balancer's rotation.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
  let mut probe = HashSet::new();
  probe.insert(InstanceId::from("__readiness_probe__"));

  let db_ready = state.instance_store().find_by_ids(&probe).await.is_ok();

  let status = if db_ready { "ready" } else { "not_ready" };
  Json(json!({
    "status": status,
    "service": "drift_server",
    "dependencies": {
      "database": if db_ready { "connected" } else { "unavailable" },
    },
  }))
}
