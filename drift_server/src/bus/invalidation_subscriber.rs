use std::sync::Arc;

use async_trait::async_trait;
use tokio_stream::StreamExt;
use tracing::{error, info, warn};

use drift_core::CoreError;

use crate::cache::invalidation::{InvalidationMessage, INVALIDATION_SUBJECT};
use crate::cache::two_level::{InvalidationPublisher, TwoLevelCache};

/// Publishes invalidation messages over plain NATS core pub/sub (not
/// JetStream — invalidation is best-effort, a missed message just leaves a
/// peer's L1 stale until its own TTL expires).
pub struct NatsInvalidationPublisher {
  client: async_nats::Client,
}

impl NatsInvalidationPublisher {
  pub fn new(client: async_nats::Client) -> Self {
    Self { client }
  }
}

#[async_trait]
impl InvalidationPublisher for NatsInvalidationPublisher {
  async fn publish(&self, message: InvalidationMessage) -> Result<(), CoreError> {
    let payload = serde_json::to_vec(&message)?;
    self
      .client
      .publish(INVALIDATION_SUBJECT, payload.into())
      .await
      .map_err(|e| CoreError::BusUnavailable(e.to_string()))
  }
}

/// Background subscriber each node runs to drop its own L1 entries when a
/// peer confirms a distributed-tier write (spec §4.3). Subscription
/// failures are logged and do not bring the node down.
pub async fn spawn_invalidation_subscriber(client: async_nats::Client, two_level: Arc<TwoLevelCache>) {
  tokio::spawn(async move {
    let mut subscriber = match client.subscribe(INVALIDATION_SUBJECT).await {
      Ok(sub) => sub,
      Err(e) => {
        error!(error = %e, "failed to subscribe to cache invalidation channel, running without cross-node coherence");
        return;
      }
    };

    info!(subject = INVALIDATION_SUBJECT, "listening for cache invalidation messages");
    while let Some(msg) = subscriber.next().await {
      match serde_json::from_slice::<InvalidationMessage>(&msg.payload) {
        Ok(invalidation) => two_level.apply_invalidation(&invalidation),
        Err(e) => warn!(error = %e, "dropping undecodable invalidation message"),
      }
    }
  });
}
