use std::env;
use std::fs::File;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
  pub server: ServerConfig,
  pub database: DatabaseConfig,
  pub messaging: MessagingConfig,
  pub cache: CacheConfig,
  pub heartbeat: HeartbeatConfig,
  pub config_source: ConfigSourceConfig,
  pub config_proxy: ConfigProxyConfig,
  #[serde(default)]
  pub resilience: ResilienceConfig,
  #[serde(default)]
  pub observability: ObservabilityConfig,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
  pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatabaseConfig {
  pub url: String,
  #[serde(default = "default_pool_size")]
  pub max_connections: u32,
}

fn default_pool_size() -> u32 {
  10
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MessagingConfig {
  pub nats: NatsConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NatsConfig {
  pub url: String,
  pub jetstream: JetStreamConfig,
  #[serde(default = "default_heartbeat_topic")]
  pub topic_prefix: String,
  #[serde(default = "default_partition_count")]
  pub partition_count: u32,
}

fn default_heartbeat_topic() -> String {
  "drift.heartbeats".to_string()
}

fn default_partition_count() -> u32 {
  4
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JetStreamConfig {
  pub stream: String,
  #[serde(default = "default_storage")]
  pub storage: String,
  #[serde(default = "default_max_bytes")]
  pub max_bytes: u64,
  #[serde(default = "default_max_age_hours")]
  pub max_age_hours: u64,
  pub consumer_name: String,
  #[serde(default = "default_max_deliver")]
  pub max_deliver: i64,
}

fn default_storage() -> String {
  "file".to_string()
}

fn default_max_bytes() -> u64 {
  1024 * 1024 * 1024
}

fn default_max_age_hours() -> u64 {
  24
}

fn default_max_deliver() -> i64 {
  5
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CacheConfig {
  #[serde(default = "default_cache_provider")]
  pub provider: String, // LOCAL | DISTRIBUTED | TWO_LEVEL | NOOP
  #[serde(default)]
  pub redis_url: Option<String>,
  #[serde(default = "default_ttl_seconds")]
  pub default_ttl_seconds: u64,
  #[serde(default = "default_max_size")]
  pub max_size: usize,
  #[serde(default)]
  pub fallback_enabled: bool,
}

fn default_cache_provider() -> String {
  "LOCAL".to_string()
}

fn default_ttl_seconds() -> u64 {
  300
}

fn default_max_size() -> usize {
  10_000
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HeartbeatConfig {
  #[serde(default = "default_batch_max_size")]
  pub max_batch_size: usize,
  #[serde(default = "default_batch_max_wait_ms")]
  pub max_batch_wait_ms: u64,
}

fn default_batch_max_size() -> usize {
  200
}

fn default_batch_max_wait_ms() -> u64 {
  500
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ConfigSourceConfig {
  pub url: String,
  #[serde(default)]
  pub service_discovery: ServiceDiscoveryConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ServiceDiscoveryConfig {
  #[serde(default)]
  pub enabled: bool,
  #[serde(default)]
  pub service_name: Option<String>,
  #[serde(default = "default_true")]
  pub fallback_to_url: bool,
}

fn default_true() -> bool {
  true
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ConfigProxyConfig {
  #[serde(default)]
  pub mock_mode: MockModeConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct MockModeConfig {
  #[serde(default)]
  pub enabled: bool,
  #[serde(default)]
  pub strategy: MockStrategy,
  #[serde(default)]
  pub static_hash: Option<String>,
  #[serde(default)]
  pub whitelist: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum MockStrategy {
  #[default]
  Deterministic,
  Random,
  Static,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ResilienceConfig {
  #[serde(default)]
  pub config_hash_fetch: ResilienceProfile,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResilienceProfile {
  #[serde(default = "default_retry_max")]
  pub retry_max_attempts: u32,
  #[serde(default = "default_retry_base_ms")]
  pub retry_base_delay_ms: u64,
  #[serde(default = "default_breaker_failure_threshold")]
  pub circuit_breaker_failure_threshold: u32,
  #[serde(default = "default_breaker_success_threshold")]
  pub circuit_breaker_success_threshold: u32,
  #[serde(default = "default_breaker_timeout_ms")]
  pub circuit_breaker_open_timeout_ms: u64,
  #[serde(default = "default_bulkhead_permits")]
  pub bulkhead_max_concurrency: usize,
  #[serde(default = "default_timeout_ms")]
  pub time_limiter_ms: u64,
}

impl Default for ResilienceProfile {
  fn default() -> Self {
    Self {
      retry_max_attempts: default_retry_max(),
      retry_base_delay_ms: default_retry_base_ms(),
      circuit_breaker_failure_threshold: default_breaker_failure_threshold(),
      circuit_breaker_success_threshold: default_breaker_success_threshold(),
      circuit_breaker_open_timeout_ms: default_breaker_timeout_ms(),
      bulkhead_max_concurrency: default_bulkhead_permits(),
      time_limiter_ms: default_timeout_ms(),
    }
  }
}

fn default_retry_max() -> u32 {
  3
}
fn default_retry_base_ms() -> u64 {
  200
}
fn default_breaker_failure_threshold() -> u32 {
  5
}
fn default_breaker_success_threshold() -> u32 {
  2
}
fn default_breaker_timeout_ms() -> u64 {
  10_000
}
fn default_bulkhead_permits() -> usize {
  16
}
fn default_timeout_ms() -> u64 {
  2_000
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ObservabilityConfig {
  #[serde(default = "default_metrics_port")]
  pub metrics_port: u16,
}

impl Default for ObservabilityConfig {
  fn default() -> Self {
    Self {
      metrics_port: default_metrics_port(),
    }
  }
}

fn default_metrics_port() -> u16 {
  9091
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LogConfig {
  #[serde(default = "default_log_level")]
  pub level: String,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
    }
  }
}

fn default_log_level() -> String {
  "info".to_string()
}

impl AppConfig {
  /// Tries `./drift.yml`, then `/etc/config/drift.yml`, then `$DRIFT_CONFIG`.
  pub fn load() -> Result<Self> {
    let ret: std::result::Result<AppConfig, serde_yaml::Error> = match (
      File::open("drift.yml"),
      File::open("/etc/config/drift.yml"),
      env::var("DRIFT_CONFIG"),
    ) {
      (Ok(reader), _, _) => serde_yaml::from_reader(reader),
      (_, Ok(reader), _) => serde_yaml::from_reader(reader),
      (_, _, Ok(path)) => serde_yaml::from_reader(File::open(path)?),
      _ => bail!("Config file not found: tried ./drift.yml, /etc/config/drift.yml, $DRIFT_CONFIG"),
    };

    Ok(ret?)
  }
}
