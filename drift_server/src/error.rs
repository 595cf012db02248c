use axum::{
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use drift_core::{CoreError, ErrorMapper};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
  #[error(transparent)]
  Core(#[from] CoreError),

  #[error("database error: {0}")]
  Sqlx(#[from] sqlx::Error),

  #[error("bus error: {0}")]
  Nats(String),

  #[error("http client error: {0}")]
  Reqwest(#[from] reqwest::Error),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("configuration error: {0}")]
  Config(String),

  #[error("internal error: {0}")]
  Internal(String),
}

impl IntoResponse for AppError {
  fn into_response(self) -> Response {
    let (status, message) = match &self {
      AppError::Core(CoreError::InvalidInput(msg)) => (StatusCode::BAD_REQUEST, msg.clone()),
      AppError::Core(CoreError::NotFound(msg)) => (StatusCode::NOT_FOUND, msg.clone()),
      AppError::Core(CoreError::ExternalUnavailable(msg)) => {
        (StatusCode::SERVICE_UNAVAILABLE, msg.clone())
      }
      AppError::Core(CoreError::BusUnavailable(msg)) => {
        (StatusCode::SERVICE_UNAVAILABLE, msg.clone())
      }
      AppError::Core(CoreError::Timeout(msg)) => (StatusCode::GATEWAY_TIMEOUT, msg.clone()),
      AppError::Core(CoreError::CircuitOpen(msg)) => {
        (StatusCode::SERVICE_UNAVAILABLE, msg.clone())
      }
      AppError::Core(other) => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
      AppError::Sqlx(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
      AppError::Nats(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
      AppError::Reqwest(err) => (StatusCode::BAD_GATEWAY, err.to_string()),
      AppError::Serialization(err) => (StatusCode::BAD_REQUEST, err.to_string()),
      AppError::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
      AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
    };

    let body = Json(json!({
        "error": message,
        "status": status.as_u16(),
    }));

    (status, body).into_response()
  }
}

impl ErrorMapper for AppError {
  type Error = AppError;

  fn map_error(error: CoreError) -> Self::Error {
    AppError::Core(error)
  }
}
