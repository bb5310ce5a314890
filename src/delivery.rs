//! Single-shot delivery of payloads to the backend endpoint.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::request::{FetchedResponse, InterceptedRequest};

/// Outcome of one delivery attempt.
///
/// There are no internal retries; retry policy lives entirely in the
/// synchronization scheduler.
#[derive(Debug, Clone)]
pub enum AttemptOutcome {
  /// The endpoint acknowledged the payload with a success status.
  Delivered {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
  },
  /// A response was obtained but the endpoint reported failure.
  Rejected {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
  },
  /// No response was obtained at all.
  TransportFailed { reason: String },
}

impl AttemptOutcome {
  pub fn is_delivered(&self) -> bool {
    matches!(self, AttemptOutcome::Delivered { .. })
  }
}

/// Trait for components that can try to deliver a mutation payload once.
pub trait DeliveryAttempter: Send + Sync {
  async fn attempt(&self, payload: &Value) -> AttemptOutcome;
}

/// Trait for components that can fetch a read request from the network.
pub trait ReadFetcher: Send + Sync {
  async fn fetch(&self, request: &InterceptedRequest) -> Result<FetchedResponse>;
}

/// Acknowledgment body returned by the backend endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendAck {
  pub ok: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

/// Service order payload accepted by the backend endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceOrder {
  pub cliente_id: String,
  pub tipo: String,
  pub descripcion: String,
  pub direccion: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub latitud: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub longitud: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub fecha_preferida: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub created_at: Option<String>,
}

/// reqwest-backed client for the backend endpoint.
#[derive(Clone)]
pub struct HttpBackend {
  http: reqwest::Client,
  base: Url,
  mutation_url: Url,
}

impl HttpBackend {
  /// Build a client for the backend at `base`, with the mutation endpoint
  /// at `mutation_path`.
  pub fn new(base: Url, mutation_path: &str) -> Result<Self> {
    let mutation_url = base
      .join(mutation_path)
      .map_err(|e| eyre!("Invalid mutation path {}: {}", mutation_path, e))?;

    Ok(Self {
      http: reqwest::Client::new(),
      base,
      mutation_url,
    })
  }

  pub fn mutation_url(&self) -> &Url {
    &self.mutation_url
  }
}

impl DeliveryAttempter for HttpBackend {
  async fn attempt(&self, payload: &Value) -> AttemptOutcome {
    let response = match self
      .http
      .post(self.mutation_url.clone())
      .json(payload)
      .send()
      .await
    {
      Ok(r) => r,
      Err(e) => {
        return AttemptOutcome::TransportFailed {
          reason: e.to_string(),
        }
      }
    };

    let status = response.status().as_u16();
    let headers = collect_headers(&response);
    let body = match response.bytes().await {
      Ok(b) => b.to_vec(),
      Err(e) => {
        // The connection died mid-response; treat it like no response
        return AttemptOutcome::TransportFailed {
          reason: e.to_string(),
        };
      }
    };

    debug!(status, "delivery attempt got a response");

    if (200..300).contains(&status) {
      AttemptOutcome::Delivered {
        status,
        headers,
        body,
      }
    } else {
      AttemptOutcome::Rejected {
        status,
        headers,
        body,
      }
    }
  }
}

/// Header pairs of a response, skipping any value that is not valid UTF-8.
fn collect_headers(response: &reqwest::Response) -> Vec<(String, String)> {
  response
    .headers()
    .iter()
    .filter_map(|(k, v)| {
      v.to_str()
        .ok()
        .map(|value| (k.as_str().to_string(), value.to_string()))
    })
    .collect()
}

impl ReadFetcher for HttpBackend {
  async fn fetch(&self, request: &InterceptedRequest) -> Result<FetchedResponse> {
    let mut builder = self.http.get(request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Network fetch failed for {}: {}", request.url, e))?;

    let status = response.status().as_u16();
    let headers = collect_headers(&response);

    // Cross-origin responses are opaque to the relay: servable, not storable
    let opaque = request.url.origin() != self.base.origin();

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read response body for {}: {}", request.url, e))?;

    Ok(FetchedResponse {
      status,
      headers,
      body: Some(body.to_vec()),
      opaque,
    })
  }
}
