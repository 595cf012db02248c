use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use sqlx::postgres::PgPoolOptions;

use drift_core::{ConfigHashSource, DriftLog, HeartbeatProducer, InstanceStore, RefreshDispatcher, ServiceRegistry};

use crate::backoff_table::BackoffTable;
use crate::bus::NatsHeartbeatProducer;
use crate::bus::invalidation_subscriber::NatsInvalidationPublisher;
use crate::cache::delegating::DelegatingCacheManager;
use crate::cache::distributed::DistributedCache;
use crate::cache::local::LocalCache;
use crate::cache::noop::NoopCache;
use crate::cache::provider::CacheProvider;
use crate::cache::two_level::TwoLevelCache;
use crate::cache::{CacheTier, NamedCacheConfig};
use crate::config::AppConfig;
use crate::config_hash_client::ConfigHashClient;
use crate::error::AppError;
use crate::refresh_dispatcher::HttpRefreshDispatcher;
use crate::store::PostgresStore;

/// Root application state, shared across handlers and the batch consumer
/// task behind one `Arc` (spec §5), following the teacher's
/// `Arc<Inner>`-wrapped, `Clone`-cheap state shape.
#[derive(Clone)]
pub struct AppState {
  inner: Arc<AppStateInner>,
}

struct AppStateInner {
  config: AppConfig,
  instance_store: Arc<dyn InstanceStore>,
  service_registry: Arc<dyn ServiceRegistry>,
  drift_log: Arc<dyn DriftLog>,
  cache: Arc<CacheTier>,
  config_hash_source: Arc<dyn ConfigHashSource>,
  refresh_dispatcher: Arc<dyn RefreshDispatcher>,
  heartbeat_producer: Arc<dyn HeartbeatProducer>,
  backoff_table: Arc<BackoffTable>,
  nats_client: async_nats::Client,
}

impl AppState {
  pub async fn try_new(config: AppConfig) -> Result<Self, AppError> {
    let pool = PgPoolOptions::new()
      .max_connections(config.database.max_connections)
      .connect(&config.database.url)
      .await?;
    sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| AppError::Internal(e.to_string()))?;

    let store = Arc::new(PostgresStore::new(pool));

    let (nats_client, jetstream) = crate::bus::connect_jetstream(&config.messaging.nats)
      .await
      .map_err(|e| AppError::Nats(e.to_string()))?;

    let heartbeat_producer: Arc<dyn HeartbeatProducer> = Arc::new(NatsHeartbeatProducer::new(
      jetstream.clone(),
      config.messaging.nats.topic_prefix.clone(),
    ));

    let cache_manager = build_cache_provider(&config, nats_client.clone()).await?;
    let mut named = HashMap::new();
    named.insert(
      "expected-config-hash".to_string(),
      NamedCacheConfig {
        ttl: Duration::from_secs(config.cache.default_ttl_seconds),
        allow_null_values: true,
      },
    );
    let cache = Arc::new(CacheTier::new(cache_manager, named));

    let http = Client::new();
    let config_hash_source: Arc<dyn ConfigHashSource> = Arc::new(ConfigHashClient::new(
      http.clone(),
      config.config_source.clone(),
      config.config_proxy.mock_mode.clone(),
      &config.resilience.config_hash_fetch,
    ));

    let refresh_dispatcher: Arc<dyn RefreshDispatcher> = Arc::new(HttpRefreshDispatcher::new(
      http,
      config.config_source.url.clone(),
      Duration::from_millis(config.resilience.config_hash_fetch.time_limiter_ms),
    ));

    Ok(Self {
      inner: Arc::new(AppStateInner {
        config,
        instance_store: store.clone(),
        service_registry: store.clone(),
        drift_log: store,
        cache,
        config_hash_source,
        refresh_dispatcher,
        heartbeat_producer,
        backoff_table: Arc::new(BackoffTable::new()),
        nats_client,
      }),
    })
  }

  pub fn config(&self) -> &AppConfig {
    &self.inner.config
  }

  pub fn instance_store(&self) -> Arc<dyn InstanceStore> {
    self.inner.instance_store.clone()
  }

  pub fn service_registry(&self) -> Arc<dyn ServiceRegistry> {
    self.inner.service_registry.clone()
  }

  pub fn drift_log(&self) -> Arc<dyn DriftLog> {
    self.inner.drift_log.clone()
  }

  pub fn cache(&self) -> Arc<CacheTier> {
    self.inner.cache.clone()
  }

  pub fn config_hash_source(&self) -> Arc<dyn ConfigHashSource> {
    self.inner.config_hash_source.clone()
  }

  pub fn refresh_dispatcher(&self) -> Arc<dyn RefreshDispatcher> {
    self.inner.refresh_dispatcher.clone()
  }

  pub fn heartbeat_producer(&self) -> Arc<dyn HeartbeatProducer> {
    self.inner.heartbeat_producer.clone()
  }

  pub fn backoff_table(&self) -> Arc<BackoffTable> {
    self.inner.backoff_table.clone()
  }

  pub fn nats_client(&self) -> async_nats::Client {
    self.inner.nats_client.clone()
  }
}

fn invalidation_publisher(client: async_nats::Client) -> Arc<NatsInvalidationPublisher> {
  Arc::new(NatsInvalidationPublisher::new(client))
}

/// Builds the configured cache provider. `TWO_LEVEL` wires L1+L2 together
/// with the NATS-backed invalidation publisher; any other provider skips
/// cross-node coherence entirely since there is only ever one tier to be
/// coherent with.
async fn build_cache_provider(
  config: &AppConfig,
  nats_client: async_nats::Client,
) -> Result<DelegatingCacheManager, AppError> {
  let local = Arc::new(LocalCache::new(
    Duration::from_secs(config.cache.default_ttl_seconds),
    Duration::from_secs(config.cache.default_ttl_seconds * 2),
    config.cache.max_size,
  ));

  let provider = match config.cache.provider.as_str() {
    "DISTRIBUTED" => {
      let redis_url = config
        .cache
        .redis_url
        .clone()
        .ok_or_else(|| AppError::Config("cache.redis_url required for DISTRIBUTED provider".into()))?;
      let distributed = DistributedCache::connect(
        &redis_url,
        "drift".to_string(),
        crate::resilience::CircuitBreakerConfig::default(),
        Some(local),
        config.cache.fallback_enabled,
      )
      .await
      .map_err(|e| AppError::Internal(e.to_string()))?;
      CacheProvider::Distributed(Arc::new(distributed))
    }
    "TWO_LEVEL" => {
      let redis_url = config
        .cache
        .redis_url
        .clone()
        .ok_or_else(|| AppError::Config("cache.redis_url required for TWO_LEVEL provider".into()))?;
      let distributed = DistributedCache::connect(
        &redis_url,
        "drift".to_string(),
        crate::resilience::CircuitBreakerConfig::default(),
        None,
        false,
      )
      .await
      .map_err(|e| AppError::Internal(e.to_string()))?;

      CacheProvider::TwoLevel(Arc::new(TwoLevelCache {
        l1: local,
        l2: Arc::new(distributed),
        invalidation: Some(invalidation_publisher(nats_client)),
        node_id: uuid::Uuid::new_v4().to_string(),
        write_through: true,
        invalidate_l1_on_l2_update: true,
      }))
    }
    "NOOP" => CacheProvider::Noop(NoopCache),
    _ => CacheProvider::Local(local),
  };

  Ok(DelegatingCacheManager::new(provider))
}
