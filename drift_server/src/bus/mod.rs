use std::sync::Arc;
use std::time::Duration;

use async_nats::jetstream;
use async_nats::jetstream::consumer::pull::Config as PullConfig;
use async_nats::jetstream::consumer::AckPolicy;
use async_nats::jetstream::stream::{Config as StreamConfig, StorageType};
use async_trait::async_trait;
use tokio_stream::StreamExt;
use tracing::{error, info, warn};

use drift_core::{CoreError, HeartbeatProducer};

use crate::config::NatsConfig;
use crate::resilience::{Bulkhead, CircuitBreaker, CircuitBreakerConfig};

pub mod invalidation_subscriber;

/// Connects to NATS and gets or creates the heartbeat stream. Subjects are
/// `<prefix>.>` so every per-service subject `<prefix>.<serviceName>` (spec
/// §5 partitioning) lands in the same stream without registering one subject
/// per service. Returns the raw client alongside the JetStream context so
/// callers can also open core NATS pub/sub (e.g. cache invalidation) over
/// the same connection.
pub async fn connect_jetstream(config: &NatsConfig) -> anyhow::Result<(async_nats::Client, jetstream::Context)> {
  let client = async_nats::connect(&config.url).await?;
  let jetstream = jetstream::new(client.clone());

  let stream_name = &config.jetstream.stream;
  match jetstream.get_stream(stream_name).await {
    Ok(_) => info!(stream = stream_name, "using existing JetStream stream"),
    Err(_) => {
      info!(stream = stream_name, "creating JetStream stream");
      jetstream
        .create_stream(StreamConfig {
          name: stream_name.clone(),
          subjects: vec![format!("{}.>", config.topic_prefix)],
          storage: match config.jetstream.storage.as_str() {
            "memory" => StorageType::Memory,
            _ => StorageType::File,
          },
          max_bytes: config.jetstream.max_bytes as i64,
          max_age: Duration::from_secs(config.jetstream.max_age_hours * 3600),
          ..Default::default()
        })
        .await?;
    }
  }

  Ok((client, jetstream))
}

pub async fn get_or_create_consumer(
  jetstream: &jetstream::Context,
  config: &NatsConfig,
) -> anyhow::Result<jetstream::consumer::Consumer<PullConfig>> {
  let stream = jetstream.get_stream(&config.jetstream.stream).await?;
  let consumer_name = &config.jetstream.consumer_name;

  match stream.get_consumer(consumer_name).await {
    Ok(consumer) => {
      info!(consumer = consumer_name, "using existing consumer");
      Ok(consumer)
    }
    Err(_) => {
      info!(consumer = consumer_name, "creating consumer");
      let consumer = stream
        .create_consumer(PullConfig {
          name: Some(consumer_name.clone()),
          filter_subjects: vec![format!("{}.>", config.topic_prefix)],
          ack_policy: AckPolicy::Explicit,
          max_deliver: config.jetstream.max_deliver,
          ..Default::default()
        })
        .await?;
      Ok(consumer)
    }
  }
}

/// Outbound side of the Ingestion Gateway: publishes the already-validated,
/// serialized heartbeat onto its per-service subject. Wrapped in the same
/// breaker+bulkhead shape as the config hash client (spec §4.1/§4.4) so a
/// broker outage degrades to `BusUnavailable` instead of blocking ingestion.
pub struct NatsHeartbeatProducer {
  jetstream: jetstream::Context,
  topic_prefix: String,
  breaker: Arc<CircuitBreaker>,
  bulkhead: Bulkhead,
}

impl NatsHeartbeatProducer {
  pub fn new(jetstream: jetstream::Context, topic_prefix: String) -> Self {
    Self {
      jetstream,
      topic_prefix,
      breaker: Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default())),
      bulkhead: Bulkhead::new(32, Duration::from_secs(2)),
    }
  }
}

#[async_trait]
impl HeartbeatProducer for NatsHeartbeatProducer {
  async fn send(&self, partition_key: &str, payload: &[u8]) -> Result<(), CoreError> {
    let subject = format!("{}.{}", self.topic_prefix, partition_key);
    let jetstream = self.jetstream.clone();
    let payload = bytes::Bytes::copy_from_slice(payload);
    let breaker = self.breaker.clone();

    self
      .bulkhead
      .call(move || async move {
        breaker
          .call(move || async move {
            jetstream
              .publish(subject, payload)
              .await
              .map_err(|e| CoreError::BusUnavailable(e.to_string()))?
              .await
              .map_err(|e| CoreError::BusUnavailable(e.to_string()))?;
            Ok(())
          })
          .await
      })
      .await
  }
}

/// Pulls heartbeats off the stream and runs each pulled group through the
/// batch processor as one unit of work, acking only on success so a batch
/// aborted by a persistence failure is redelivered in full (spec §4.2.2).
pub async fn run_consumer_loop(
  consumer: jetstream::consumer::Consumer<PullConfig>,
  max_batch_size: usize,
  max_batch_wait: Duration,
  mut on_batch: impl FnMut(Vec<drift_core::HeartbeatPayload>) -> futures::future::BoxFuture<'static, Result<(), CoreError>>,
) -> anyhow::Result<()> {
  loop {
    let mut messages = consumer
      .fetch()
      .max_messages(max_batch_size)
      .expires(max_batch_wait)
      .messages()
      .await?;

    let mut payloads = Vec::with_capacity(max_batch_size);
    let mut handles = Vec::with_capacity(max_batch_size);

    while let Some(next) = messages.next().await {
      match next {
        Ok(msg) => match serde_json::from_slice::<drift_core::HeartbeatPayload>(&msg.payload) {
          Ok(payload) => {
            payloads.push(payload);
            handles.push(msg);
          }
          Err(e) => {
            warn!(error = %e, "dropping undecodable heartbeat message");
            if let Err(e) = msg.ack().await {
              error!(error = %e, "failed to ack undecodable message");
            }
          }
        },
        Err(e) => {
          error!(error = %e, "JetStream pull error");
          break;
        }
      }
    }

    if payloads.is_empty() {
      continue;
    }

    match on_batch(payloads).await {
      Ok(()) => {
        for msg in handles {
          if let Err(e) = msg.ack().await {
            error!(error = %e, "failed to ack processed message");
          }
        }
      }
      Err(e) => {
        error!(error = %e, "batch cycle failed, leaving messages unacked for redelivery");
      }
    }
  }
}
