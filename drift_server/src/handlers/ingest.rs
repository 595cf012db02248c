use axum::extract::State;
use axum::response::IntoResponse;
use axum::{http::StatusCode, Json};

use drift_core::HeartbeatPayload;

use crate::error::AppError;
use crate::ingestion::IngestionGateway;
use crate::state::AppState;

/// `POST /v1/heartbeats`: accepts one heartbeat payload and hands it to the
/// ingestion gateway. Returns `202 Accepted` on a successful enqueue — the
/// heartbeat is not yet applied, only durably queued for the batch processor.
pub async fn ingest_heartbeat(
  State(state): State<AppState>,
  Json(payload): Json<HeartbeatPayload>,
) -> Result<impl IntoResponse, AppError> {
  let gateway = IngestionGateway::new(state.heartbeat_producer());
  gateway.enqueue(payload).await?;
  Ok(StatusCode::ACCEPTED)
}
