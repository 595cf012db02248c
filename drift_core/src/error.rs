use thiserror::Error;

/// Domain error kinds for the drift-control pipeline.
///
/// These are kinds, not wire types: adapters (HTTP, bus, cache, store) map
/// their own technical errors onto this enum at the boundary.
#[derive(Error, Debug, Clone)]
pub enum CoreError {
  #[error("invalid input: {0}")]
  InvalidInput(String),

  #[error("not found: {0}")]
  NotFound(String),

  #[error("external service unavailable: {0}")]
  ExternalUnavailable(String),

  #[error("operation timed out: {0}")]
  Timeout(String),

  #[error("circuit open: {0}")]
  CircuitOpen(String),

  #[error("cache unavailable: {0}")]
  CacheUnavailable(String),

  #[error("persistence failure: {0}")]
  PersistenceFailure(String),

  #[error("serialization failure: {0}")]
  SerializationFailure(String),

  #[error("bus unavailable: {0}")]
  BusUnavailable(String),

  #[error("internal error: {0}")]
  InternalError(String),
}

impl CoreError {
  /// Whether a failed operation is worth retrying under a backoff policy.
  pub fn is_retryable(&self) -> bool {
    matches!(
      self,
      CoreError::ExternalUnavailable(_)
        | CoreError::Timeout(_)
        | CoreError::BusUnavailable(_)
        | CoreError::CacheUnavailable(_)
    )
  }

  /// Whether the caller should fall back to `UNKNOWN` rather than raise an
  /// error further up the stack. A cache or config-source outage must never
  /// be mistaken for drift.
  pub fn is_unknown_state(&self) -> bool {
    matches!(
      self,
      CoreError::CacheUnavailable(_)
        | CoreError::ExternalUnavailable(_)
        | CoreError::Timeout(_)
        | CoreError::CircuitOpen(_)
    )
  }
}

impl From<serde_json::Error> for CoreError {
  fn from(e: serde_json::Error) -> Self {
    CoreError::SerializationFailure(e.to_string())
  }
}

/// Translates a shared `CoreError` into a collaborator's own error type.
/// Each crate at the boundary (HTTP, bus consumer, ...) implements this once.
pub trait ErrorMapper {
  type Error;
  fn map_error(error: CoreError) -> Self::Error;
}
