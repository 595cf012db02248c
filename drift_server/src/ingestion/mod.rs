use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tracing::warn;

use drift_core::{CoreError, HeartbeatPayload, HeartbeatProducer};

/// Entry point for `POST /v1/heartbeats` (spec §4.1). Validates the payload,
/// partitions it onto its service's subject, and hands it to the bus
/// producer. Never blocks on broker acknowledgment beyond the producer's own
/// resilience budget: exhausting retries/breaker/bulkhead there surfaces as
/// `BusUnavailable` here, not as an indefinite hang.
pub struct IngestionGateway {
  producer: Arc<dyn HeartbeatProducer>,
}

impl IngestionGateway {
  pub fn new(producer: Arc<dyn HeartbeatProducer>) -> Self {
    Self { producer }
  }

  pub async fn enqueue(&self, payload: HeartbeatPayload) -> Result<(), CoreError> {
    payload.validate()?;

    let started = Instant::now();
    let partition_key = payload.service_name.clone();
    let bytes = serde_json::to_vec(&payload)?;

    let result = self.producer.send(&partition_key, &bytes).await;

    histogram!("drift_ingestion_latency_seconds").record(started.elapsed().as_secs_f64());
    match &result {
      Ok(()) => {
        counter!("drift_heartbeats_accepted_total").increment(1);
      }
      Err(e) => {
        warn!(service_name = partition_key, error = %e, "heartbeat ingestion failed");
        counter!("drift_heartbeats_rejected_total").increment(1);
      }
    }
    result
  }
}
