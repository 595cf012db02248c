pub mod metrics;

use crate::error::AppError;

pub async fn init_observability(metrics_port: u16) -> Result<(), AppError> {
  metrics::init_metrics(metrics_port).await?;
  tracing::info!("observability initialized for drift_server");
  Ok(())
}
