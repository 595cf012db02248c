use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Client;
use tracing::{info, warn};

use drift_core::canonical::canonical_hash;
use drift_core::{ConfigHashSource, ConfigSourceHealth, CoreError};

use crate::config::{ConfigSourceConfig, MockModeConfig, MockStrategy, ResilienceProfile};
use crate::resilience::{Bulkhead, CircuitBreaker, CircuitBreakerConfig};

/// Last successfully fetched raw JSON payload per `(service, environment)`,
/// used as the terminal fallback when every resilience layer is exhausted.
/// Kept independent of the Cache Tier so a fallback survives even when the
/// Cache Tier's own distributed provider is what just failed.
struct PayloadCache {
  entries: DashMap<(String, String), serde_json::Value>,
}

impl PayloadCache {
  fn new() -> Self {
    Self {
      entries: DashMap::new(),
    }
  }

  fn remember(&self, service: &str, environment: &str, payload: serde_json::Value) {
    self.entries.insert((service.to_string(), environment.to_string()), payload);
  }

  fn recall(&self, service: &str, environment: &str) -> Option<serde_json::Value> {
    self
      .entries
      .get(&(service.to_string(), environment.to_string()))
      .map(|e| e.clone())
  }
}

/// Resilient client to the external configuration source (spec §4.4),
/// grounded directly on the retry → circuit-breaker → cached-fallback chain
/// of a high-availability auth lookup, generalized to config-hash fetch.
pub struct ConfigHashClient {
  http: Client,
  config: ConfigSourceConfig,
  mock: MockModeConfig,
  retry: drift_core::retry::ExponentialBackoffRetry,
  breaker: Arc<CircuitBreaker>,
  bulkhead: Bulkhead,
  timeout: Duration,
  payload_cache: PayloadCache,
}

impl ConfigHashClient {
  pub fn new(http: Client, config: ConfigSourceConfig, mock: MockModeConfig, resilience: &ResilienceProfile) -> Self {
    Self {
      http,
      config,
      mock,
      retry: drift_core::retry::ExponentialBackoffRetry::new(
        resilience.retry_base_delay_ms,
        resilience.retry_max_attempts,
      ),
      breaker: Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
        failure_threshold: resilience.circuit_breaker_failure_threshold,
        success_threshold: resilience.circuit_breaker_success_threshold,
        open_timeout: Duration::from_millis(resilience.circuit_breaker_open_timeout_ms),
      })),
      bulkhead: Bulkhead::new(
        resilience.bulkhead_max_concurrency,
        Duration::from_millis(resilience.time_limiter_ms),
      ),
      timeout: Duration::from_millis(resilience.time_limiter_ms),
      payload_cache: PayloadCache::new(),
    }
  }

  fn mock_hash(&self, service_name: &str, environment: &str) -> String {
    match self.mock.strategy {
      MockStrategy::Deterministic => {
        drift_core::canonical::hash_str(&format!("mock-{service_name}:{environment}"))
      }
      MockStrategy::Random => drift_core::canonical::hash_str(&format!(
        "mock-{service_name}:{environment}:{}",
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0)
      )),
      MockStrategy::Static => self
        .mock
        .static_hash
        .clone()
        .unwrap_or_else(|| drift_core::canonical::hash_str("mock-static")),
    }
  }

  fn is_mocked(&self, service_name: &str) -> bool {
    self.mock.enabled && !self.mock.whitelist.iter().any(|s| s == service_name)
  }

  /// Resolves the base URL for `service_name` via service discovery when
  /// enabled, falling back to the configured direct URL on zero instances,
  /// discovery error, or when discovery is disabled altogether.
  async fn resolve_base_url(&self, service_name: &str) -> Result<String, CoreError> {
    if !self.config.service_discovery.enabled {
      return Ok(self.config.url.clone());
    }

    let discovery_name = self
      .config
      .service_discovery
      .service_name
      .clone()
      .unwrap_or_else(|| service_name.to_string());

    match self.discover_instances(&discovery_name).await {
      Ok(instances) if !instances.is_empty() => Ok(instances[0].clone()),
      _ if self.config.service_discovery.fallback_to_url => Ok(self.config.url.clone()),
      _ => Err(CoreError::ExternalUnavailable(format!(
        "no instances discovered for {discovery_name} and fallback disabled"
      ))),
    }
  }

  /// Placeholder discovery lookup: a real deployment would consult a
  /// registry client here. Returns empty so callers always exercise the
  /// direct-URL fallback path unless a registry integration replaces this.
  async fn discover_instances(&self, _discovery_name: &str) -> Result<Vec<String>, CoreError> {
    Ok(Vec::new())
  }

  async fn fetch_document(&self, service_name: &str, environment: &str) -> Result<serde_json::Value, CoreError> {
    let base_url = self.resolve_base_url(service_name).await?;
    let url = format!("{base_url}/{service_name}/{environment}");
    let http = self.http.clone();

    self
      .bulkhead
      .call(|| {
        let breaker = self.breaker.clone();
        let retry = &self.retry;
        let http = http.clone();
        let url = url.clone();
        async move {
          retry
            .retry(|| {
              let http = http.clone();
              let url = url.clone();
              let breaker = breaker.clone();
              async move {
                breaker
                  .call(|| async {
                    let response = http
                      .get(&url)
                      .send()
                      .await
                      .map_err(|e| CoreError::ExternalUnavailable(e.to_string()))?;
                    if !response.status().is_success() {
                      return Err(CoreError::ExternalUnavailable(format!(
                        "config source returned {}",
                        response.status()
                      )));
                    }
                    response
                      .json::<serde_json::Value>()
                      .await
                      .map_err(|e| CoreError::SerializationFailure(e.to_string()))
                  })
                  .await
              }
            })
            .await
        }
      })
      .await
  }
}

#[async_trait]
impl ConfigHashSource for ConfigHashClient {
  async fn get_expected_hash(&self, service_name: &str, environment: &str) -> Result<Option<String>, CoreError> {
    if self.is_mocked(service_name) {
      return Ok(Some(self.mock_hash(service_name, environment)));
    }

    let started = std::time::Instant::now();
    let outcome = tokio::time::timeout(self.timeout, self.fetch_document(service_name, environment)).await;
    use crate::observability::metrics::collectors::ConfigHashMetrics;

    match outcome {
      Ok(Ok(document)) => {
        ConfigHashMetrics::fetch_completed(started.elapsed(), true);
        self.payload_cache.remember(service_name, environment, document.clone());
        Ok(Some(canonical_hash(&document)?))
      }
      Ok(Err(e)) => {
        ConfigHashMetrics::fetch_completed(started.elapsed(), false);
        warn!(service_name, environment, error = %e, "config hash fetch exhausted resilience chain, trying cached fallback");
        self.fallback(service_name, environment)
      }
      Err(_) => {
        ConfigHashMetrics::fetch_completed(started.elapsed(), false);
        warn!(service_name, environment, "config hash fetch timed out, trying cached fallback");
        self.fallback(service_name, environment)
      }
    }
  }

  /// Direct GET against the configured base URL, bypassing retry/breaker so
  /// the `/health` endpoint reports the source's live reachability rather
  /// than a state the resilience chain may have cached or suppressed.
  async fn health_check(&self) -> ConfigSourceHealth {
    let url = self.config.url.clone();

    if self.mock.enabled {
      return ConfigSourceHealth {
        service: "config-source".to_string(),
        url,
        status: "UP".to_string(),
        response_code: None,
        error: None,
      };
    }

    match tokio::time::timeout(self.timeout, self.http.get(&url).send()).await {
      Ok(Ok(response)) => {
        let code = response.status().as_u16();
        let status = if response.status().is_success() { "UP" } else { "DOWN" };
        ConfigSourceHealth {
          service: "config-source".to_string(),
          url,
          status: status.to_string(),
          response_code: Some(code),
          error: None,
        }
      }
      Ok(Err(e)) => ConfigSourceHealth {
        service: "config-source".to_string(),
        url,
        status: "DOWN".to_string(),
        response_code: None,
        error: Some(e.to_string()),
      },
      Err(_) => ConfigSourceHealth {
        service: "config-source".to_string(),
        url,
        status: "DOWN".to_string(),
        response_code: None,
        error: Some("timed out".to_string()),
      },
    }
  }
}

impl ConfigHashClient {
  fn fallback(&self, service_name: &str, environment: &str) -> Result<Option<String>, CoreError> {
    match self.payload_cache.recall(service_name, environment) {
      Some(document) => {
        info!(service_name, environment, "using cached fallback payload");
        Ok(Some(canonical_hash(&document)?))
      }
      None => Ok(None),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::ServiceDiscoveryConfig;

  fn base_config() -> ConfigSourceConfig {
    ConfigSourceConfig {
      url: "http://config-source.internal".to_string(),
      service_discovery: ServiceDiscoveryConfig {
        enabled: false,
        service_name: None,
        fallback_to_url: true,
      },
    }
  }

  #[tokio::test]
  async fn mock_deterministic_strategy_is_stable() {
    let client = ConfigHashClient::new(
      Client::new(),
      base_config(),
      MockModeConfig {
        enabled: true,
        strategy: MockStrategy::Deterministic,
        static_hash: None,
        whitelist: vec![],
      },
      &ResilienceProfile::default(),
    );

    let h1 = client.get_expected_hash("svc-a", "prod").await.unwrap();
    let h2 = client.get_expected_hash("svc-a", "prod").await.unwrap();
    assert_eq!(h1, h2);
    assert!(h1.is_some());
  }

  #[tokio::test]
  async fn whitelisted_service_skips_mock_mode() {
    let client = ConfigHashClient::new(
      Client::new(),
      base_config(),
      MockModeConfig {
        enabled: true,
        strategy: MockStrategy::Deterministic,
        static_hash: None,
        whitelist: vec!["svc-real".to_string()],
      },
      &ResilienceProfile::default(),
    );

    assert!(!client.is_mocked("svc-real"));
    assert!(client.is_mocked("svc-other"));
  }

  #[tokio::test]
  async fn no_cached_fallback_returns_none_not_error() {
    let client = ConfigHashClient::new(
      Client::new(),
      base_config(),
      MockModeConfig::default(),
      &ResilienceProfile::default(),
    );
    let result = client.fallback("unseen-svc", "prod").unwrap();
    assert_eq!(result, None);
  }
}
