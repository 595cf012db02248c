use anyhow::Result;

use drift_server::{get_router, observability, AppConfig};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
  let config = match AppConfig::load() {
    Ok(config) => config,
    Err(e) => {
      eprintln!("failed to load configuration: {e}");
      eprintln!("tried ./drift.yml, /etc/config/drift.yml, $DRIFT_CONFIG");
      std::process::exit(1);
    }
  };

  let filter = EnvFilter::try_new(&config.log.level).unwrap_or_else(|_| EnvFilter::new("info"));
  tracing_subscriber::registry()
    .with(filter)
    .with(tracing_subscriber::fmt::layer())
    .init();

  if let Err(e) = observability::init_observability(config.observability.metrics_port).await {
    eprintln!("failed to initialize observability: {e}");
    std::process::exit(1);
  }

  let addr = format!("0.0.0.0:{}", config.server.port);
  let app = get_router(config).await?;

  let listener = TcpListener::bind(&addr).await?;
  info!(%addr, "drift_server listening");

  axum::serve(listener, app.into_make_service()).await?;

  Ok(())
}
