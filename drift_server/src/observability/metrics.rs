use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

use crate::error::AppError;

/// Starts the Prometheus exporter on its own port, separate from the main
/// HTTP listener, mirroring the teacher's out-of-band metrics server.
pub async fn init_metrics(port: u16) -> Result<(), AppError> {
  let builder = PrometheusBuilder::new();
  register_drift_metrics();

  let bind_address: std::net::SocketAddr = format!("0.0.0.0:{port}")
    .parse()
    .map_err(|e| AppError::Internal(format!("invalid metrics bind address: {e}")))?;

  builder
    .with_http_listener(bind_address)
    .install()
    .map_err(|e| AppError::Internal(format!("failed to install Prometheus exporter: {e}")))?;

  info!(%bind_address, "metrics server started");
  Ok(())
}

fn register_drift_metrics() {
  counter!("drift_heartbeats_received_total").absolute(0);
  counter!("drift_heartbeats_accepted_total").absolute(0);
  counter!("drift_heartbeats_rejected_total").absolute(0);
  counter!("drift_heartbeats_skipped_total").absolute(0);
  histogram!("drift_batch_size").record(0.0);
  histogram!("drift_batch_cycle_duration_seconds").record(0.0);
  histogram!("drift_ingestion_latency_seconds").record(0.0);
  counter!("drift_events_total").absolute(0);
  counter!("drift_refreshes_triggered_total").absolute(0);
  gauge!("drift_instances_drift_gauge").set(0.0);
  counter!("drift_cache_hit_total", "cache" => "expected-config-hash").absolute(0);
  counter!("drift_cache_miss_total", "cache" => "expected-config-hash").absolute(0);
  histogram!("drift_config_hash_fetch_duration_seconds").record(0.0);
  counter!("drift_config_hash_fetch_failures_total").absolute(0);

  info!("drift_server metrics registered");
}

pub mod collectors {
  use super::*;
  use std::time::Duration;

  pub struct CacheMetrics;

  impl CacheMetrics {
    pub fn hit(cache_name: &str) {
      counter!("drift_cache_hit_total", "cache" => cache_name.to_string()).increment(1);
    }

    pub fn miss(cache_name: &str) {
      counter!("drift_cache_miss_total", "cache" => cache_name.to_string()).increment(1);
    }
  }

  pub struct ConfigHashMetrics;

  impl ConfigHashMetrics {
    pub fn fetch_completed(duration: Duration, success: bool) {
      histogram!("drift_config_hash_fetch_duration_seconds").record(duration.as_secs_f64());
      if !success {
        counter!("drift_config_hash_fetch_failures_total").increment(1);
      }
    }
  }

  pub struct DriftGauge;

  impl DriftGauge {
    pub fn set_drifting_instances(count: usize) {
      gauge!("drift_instances_drift_gauge").set(count as f64);
    }
  }
}
