use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! surrogate_id {
  ($name:ident) => {
    #[derive(
      Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
    )]
    #[serde(transparent)]
    pub struct $name(pub i64);

    impl fmt::Display for $name {
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
      }
    }

    impl From<i64> for $name {
      fn from(v: i64) -> Self {
        Self(v)
      }
    }
  };
}

surrogate_id!(ServiceId);
surrogate_id!(TeamId);
surrogate_id!(DriftEventId);

/// Wire identity reported by the instance itself, not a surrogate key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub String);

impl fmt::Display for InstanceId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl From<String> for InstanceId {
  fn from(v: String) -> Self {
    Self(v)
  }
}

impl From<&str> for InstanceId {
  fn from(v: &str) -> Self {
    Self(v.to_string())
  }
}
