use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{error, info};

use drift_core::{CoreError, RefreshDispatcher as RefreshDispatcherPort};

/// Calls the external config source's broadcast-refresh endpoint on demand
/// (spec §4.5). `destination` is currently advisory: the source broadcasts
/// to all subscribers rather than targeting one, so it is carried through
/// explicitly rather than silently dropped, in case a future source version
/// adds targeted refresh.
pub struct HttpRefreshDispatcher {
  http: Client,
  base_url: String,
  timeout: Duration,
}

impl HttpRefreshDispatcher {
  pub fn new(http: Client, base_url: String, timeout: Duration) -> Self {
    Self {
      http,
      base_url,
      timeout,
    }
  }
}

#[async_trait]
impl RefreshDispatcherPort for HttpRefreshDispatcher {
  async fn trigger_refresh(&self, destination: &str) -> Result<(), CoreError> {
    let url = format!("{}/actuator/busrefresh", self.base_url);
    info!(destination, url, "triggering config refresh broadcast");

    let result = tokio::time::timeout(
      self.timeout,
      self.http.post(&url).json(&serde_json::json!({})).send(),
    )
    .await;

    match result {
      Ok(Ok(response)) if response.status().is_success() => Ok(()),
      Ok(Ok(response)) => {
        error!(destination, status = %response.status(), "refresh dispatch rejected");
        Err(CoreError::ExternalUnavailable(format!(
          "refresh endpoint returned {}",
          response.status()
        )))
      }
      Ok(Err(e)) => {
        error!(destination, error = %e, "refresh dispatch failed");
        Err(CoreError::ExternalUnavailable(e.to_string()))
      }
      Err(_) => {
        error!(destination, "refresh dispatch timed out");
        Err(CoreError::Timeout("refresh dispatch timed out".into()))
      }
    }
  }
}
