pub mod health;
pub mod ingest;

pub use health::{health_check, readiness_check};
pub use ingest::ingest_heartbeat;
