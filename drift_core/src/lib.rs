pub mod backoff;
pub mod canonical;
pub mod error;
pub mod ids;
pub mod model;
pub mod ports;
pub mod retry;
pub mod state_machine;

pub use backoff::BackoffEntry;
pub use error::{CoreError, ErrorMapper};
pub use ids::{DriftEventId, InstanceId, ServiceId, TeamId};
pub use model::{
  ApplicationService, DriftEvent, DriftEventStatus, DriftSeverity, HeartbeatPayload,
  InstanceStatus, ServiceInstance, ServiceLifecycle,
};
pub use ports::{
  ConfigHashSource, ConfigSourceHealth, DriftLog, HeartbeatProducer, InstanceStore,
  RefreshDispatcher, ServiceRegistry, UpsertOutcome,
};
pub use state_machine::{apply_heartbeat, Transition};
