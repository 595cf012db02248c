use serde::{Deserialize, Serialize};

pub const INVALIDATION_SUBJECT: &str = "cache.invalidation";

/// Wire schema for the cross-node invalidation channel (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationMessage {
  pub cache_name: String,
  #[serde(default)]
  pub key: Option<String>,
  #[serde(default)]
  pub pattern: Option<String>,
  #[serde(default)]
  pub clear_all: bool,
  pub origin: String,
}
