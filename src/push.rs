//! Best-effort push notification sender (FCM HTTP v1 shape).

use color_eyre::{eyre::eyre, Result};
use serde_json::json;
use std::collections::HashMap;
use tracing::info;
use url::Url;

use crate::config::PushConfig;

/// Client for the push notification service.
///
/// Delivery is best-effort; any failure comes back as an opaque message.
pub struct PushClient {
  http: reqwest::Client,
  send_url: Url,
}

impl PushClient {
  pub fn new(config: &PushConfig) -> Result<Self> {
    let endpoint: Url = config
      .endpoint
      .parse()
      .map_err(|e| eyre!("Invalid push endpoint {}: {}", config.endpoint, e))?;

    let send_url = endpoint
      .join(&format!(
        "/v1/projects/{}/messages:send",
        config.project_id
      ))
      .map_err(|e| eyre!("Invalid push project id {}: {}", config.project_id, e))?;

    Ok(Self {
      http: reqwest::Client::new(),
      send_url,
    })
  }

  /// Get the push service access token from the environment.
  ///
  /// Checks SOLRELAY_PUSH_TOKEN.
  pub fn access_token() -> Result<String> {
    std::env::var("SOLRELAY_PUSH_TOKEN").map_err(|_| {
      eyre!("Push access token not found. Set the SOLRELAY_PUSH_TOKEN environment variable.")
    })
  }

  /// Send one notification to a device token.
  pub async fn send(
    &self,
    device_token: &str,
    title: &str,
    body: &str,
    data: &HashMap<String, String>,
  ) -> Result<String> {
    let access_token = Self::access_token()?;

    let message = json!({
      "message": {
        "token": device_token,
        "notification": { "title": title, "body": body },
        "data": data,
      }
    });

    let response = self
      .http
      .post(self.send_url.clone())
      .bearer_auth(access_token)
      .json(&message)
      .send()
      .await
      .map_err(|e| eyre!("Failed to reach push service: {}", e))?;

    let status = response.status();
    let text = response
      .text()
      .await
      .map_err(|e| eyre!("Failed to read push service response: {}", e))?;

    if !status.is_success() {
      return Err(eyre!("Push service returned {}: {}", status, text));
    }

    info!(status = status.as_u16(), "notification sent");
    Ok(text)
  }
}
