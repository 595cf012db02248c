pub mod backoff_table;
pub mod batch;
pub mod bus;
pub mod cache;
pub mod config;
pub mod config_hash_client;
pub mod error;
pub mod handlers;
pub mod ingestion;
pub mod observability;
pub mod refresh_dispatcher;
pub mod resilience;
pub mod state;
pub mod store;

pub use config::AppConfig;
pub use error::AppError;
pub use state::AppState;

use anyhow::Result;
use axum::routing::{get, post};
use axum::Router;

/// Builds the application router: wires up `AppState`, mounts the public
/// HTTP surface, and spawns the background bus consumer (and, when the
/// configured cache provider needs it, the cross-node invalidation
/// subscriber) before handing the caller a router ready to serve.
pub async fn get_router(config: AppConfig) -> Result<Router> {
  let state = AppState::try_new(config).await?;

  if let Some(two_level) = state.cache().two_level() {
    let client = state.nats_client();
    bus::invalidation_subscriber::spawn_invalidation_subscriber(client, two_level).await;
  }

  spawn_batch_consumer(state.clone()).await?;

  let public_routes = Router::new()
    .route("/health", get(handlers::health_check))
    .route("/ready", get(handlers::readiness_check));

  let api_routes = Router::new().route("/v1/heartbeats", post(handlers::ingest_heartbeat));

  let app = Router::new()
    .merge(public_routes)
    .merge(api_routes)
    .with_state(state);

  Ok(app)
}

/// Spawns the JetStream pull-consumer loop on a background task. Each
/// fetched group is handed to the batch processor as one unit of work; the
/// consumer only acks messages the processor actually committed.
async fn spawn_batch_consumer(state: AppState) -> Result<()> {
  let config = state.config().clone();
  let jetstream = async_nats::jetstream::new(state.nats_client());
  let consumer = bus::get_or_create_consumer(&jetstream, &config.messaging.nats).await?;

  let processor = std::sync::Arc::new(batch::BatchProcessor::new(
    state.instance_store(),
    state.service_registry(),
    state.drift_log(),
    state.cache(),
    state.config_hash_source(),
    state.refresh_dispatcher(),
    state.backoff_table(),
  ));

  let max_batch_size = config.heartbeat.max_batch_size;
  let max_batch_wait = std::time::Duration::from_millis(config.heartbeat.max_batch_wait_ms);

  tokio::spawn(async move {
    let result = bus::run_consumer_loop(consumer, max_batch_size, max_batch_wait, move |payloads| {
      let processor = processor.clone();
      Box::pin(async move { processor.process_batch(payloads).await.map(|_| ()) })
    })
    .await;

    if let Err(e) = result {
      tracing::error!(error = %e, "batch consumer loop exited");
    }
  });

  Ok(())
}
