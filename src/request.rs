//! Intercepted request and response types shared across the relay.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

/// HTTP method of an intercepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
  Get,
  Post,
  Other(String),
}

impl Method {
  pub fn as_str(&self) -> &str {
    match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Other(m) => m,
    }
  }
}

/// How the client issued the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
  /// Top-level page navigation
  Navigate,
  /// Any other fetch (subresource, API call, probe)
  Standard,
}

/// An outgoing request captured before it reaches the network.
#[derive(Debug, Clone)]
pub struct InterceptedRequest {
  pub method: Method,
  pub url: Url,
  pub mode: RequestMode,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
}

impl InterceptedRequest {
  /// Build a plain GET request with no special headers.
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::Get,
      url,
      mode: RequestMode::Standard,
      headers: Vec::new(),
      body: None,
    }
  }

  /// Build a POST request carrying the given body.
  pub fn post(url: Url, body: Vec<u8>) -> Self {
    Self {
      method: Method::Post,
      url,
      mode: RequestMode::Standard,
      headers: vec![("content-type".to_string(), "application/json".to_string())],
      body: Some(body),
    }
  }

  /// Look up a header value by case-insensitive name.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  /// Stable cache identity for this request (method + full URL).
  pub fn identity(&self) -> String {
    request_identity(&self.method, &self.url)
  }
}

/// Hash a (method, URL) pair into a stable, fixed-length cache key.
pub fn request_identity(method: &Method, url: &Url) -> String {
  let mut hasher = Sha256::new();
  hasher.update(method.as_str().as_bytes());
  hasher.update(b" ");
  hasher.update(url.as_str().as_bytes());
  hex::encode(hasher.finalize())
}

/// A response snapshot that can be served to a caller or stored in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl StoredResponse {
  /// A JSON response with the given status.
  pub fn json(status: u16, value: &serde_json::Value) -> Self {
    Self {
      status,
      headers: vec![("content-type".to_string(), "application/json".to_string())],
      body: value.to_string().into_bytes(),
    }
  }

  /// A plain-text response with the given status.
  pub fn text(status: u16, message: &str) -> Self {
    Self {
      status,
      headers: vec![("content-type".to_string(), "text/plain".to_string())],
      body: message.as_bytes().to_vec(),
    }
  }

  /// Look up a header value by case-insensitive name.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

/// A response obtained from the network, before any relay policy is applied.
#[derive(Debug, Clone)]
pub struct FetchedResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  /// None when the body could not be captured (already consumed upstream)
  pub body: Option<Vec<u8>>,
  /// Cross-origin response whose contents must not be inspected or stored
  pub opaque: bool,
}

impl FetchedResponse {
  /// Whether this response may be copied into the asset cache.
  pub fn is_cacheable(&self) -> bool {
    !self.opaque && self.body.is_some()
  }

  /// Convert into a servable snapshot. An absent body becomes empty.
  pub fn into_stored(self) -> StoredResponse {
    StoredResponse {
      status: self.status,
      headers: self.headers,
      body: self.body.unwrap_or_default(),
    }
  }
}
