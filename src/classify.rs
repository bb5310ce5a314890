//! Pure classification of intercepted requests into routing decisions.

use crate::request::{InterceptedRequest, Method, RequestMode};

/// Routing decision for one intercepted request.
///
/// Every request maps to exactly one variant; anything that is neither the
/// mutation write nor a GET is passed through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
  /// POST to the mutation endpoint - intercepted for offline queueing
  MutationWrite,
  /// Top-level page load - served with the offline-fallback policy
  Navigation,
  /// Any other GET - served network-first with opportunistic caching
  OtherRead,
  /// Not ours - pass through with no side effects
  Ignored,
}

/// Classify a request against the configured mutation endpoint path.
///
/// The mutation check runs before the GET checks; the two cannot overlap
/// because they require different methods.
pub fn classify(request: &InterceptedRequest, mutation_path: &str) -> RouteDecision {
  // Favicon probes are noise, never worth intercepting
  if request.url.path().ends_with("favicon.ico") {
    return RouteDecision::Ignored;
  }

  if request.method == Method::Post && request.url.path() == mutation_path {
    return RouteDecision::MutationWrite;
  }

  if request.method != Method::Get {
    return RouteDecision::Ignored;
  }

  let wants_html = request
    .header("accept")
    .map(|accept| accept.contains("text/html"))
    .unwrap_or(false);

  if request.mode == RequestMode::Navigate || wants_html {
    RouteDecision::Navigation
  } else {
    RouteDecision::OtherRead
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  const MUTATION_PATH: &str = "/api/solicitudes";

  fn url(path: &str) -> Url {
    format!("http://localhost:4000{}", path).parse().unwrap()
  }

  #[test]
  fn test_post_to_mutation_endpoint_is_mutation_write() {
    let req = InterceptedRequest::post(url(MUTATION_PATH), b"{}".to_vec());
    assert_eq!(classify(&req, MUTATION_PATH), RouteDecision::MutationWrite);
  }

  #[test]
  fn test_post_elsewhere_is_ignored() {
    let req = InterceptedRequest::post(url("/api/otra"), b"{}".to_vec());
    assert_eq!(classify(&req, MUTATION_PATH), RouteDecision::Ignored);
  }

  #[test]
  fn test_navigation_mode_is_navigation() {
    let mut req = InterceptedRequest::get(url("/"));
    req.mode = RequestMode::Navigate;
    assert_eq!(classify(&req, MUTATION_PATH), RouteDecision::Navigation);
  }

  #[test]
  fn test_html_accept_header_is_navigation() {
    let mut req = InterceptedRequest::get(url("/inicio"));
    req.headers.push((
      "Accept".to_string(),
      "text/html,application/xhtml+xml".to_string(),
    ));
    assert_eq!(classify(&req, MUTATION_PATH), RouteDecision::Navigation);
  }

  #[test]
  fn test_plain_get_is_other_read() {
    let req = InterceptedRequest::get(url("/styles.css"));
    assert_eq!(classify(&req, MUTATION_PATH), RouteDecision::OtherRead);
  }

  #[test]
  fn test_favicon_is_ignored() {
    let req = InterceptedRequest::get(url("/favicon.ico"));
    assert_eq!(classify(&req, MUTATION_PATH), RouteDecision::Ignored);
  }

  #[test]
  fn test_non_get_non_mutation_methods_are_ignored() {
    let mut req = InterceptedRequest::get(url("/api/solicitudes"));
    req.method = Method::Other("DELETE".to_string());
    assert_eq!(classify(&req, MUTATION_PATH), RouteDecision::Ignored);
  }

  // Totality: every method/mode/header combination lands in exactly one bucket.
  #[test]
  fn test_every_combination_is_classified() {
    let methods = [
      Method::Get,
      Method::Post,
      Method::Other("PUT".to_string()),
      Method::Other("PATCH".to_string()),
    ];
    let paths = [MUTATION_PATH, "/", "/favicon.ico", "/api/estado"];
    let modes = [RequestMode::Navigate, RequestMode::Standard];
    let accepts = [None, Some("text/html"), Some("application/json")];

    for method in &methods {
      for path in &paths {
        for mode in &modes {
          for accept in &accepts {
            let mut req = InterceptedRequest::get(url(path));
            req.method = method.clone();
            req.mode = *mode;
            if let Some(a) = accept {
              req.headers.push(("accept".to_string(), a.to_string()));
            }
            // classify is total; the assertion is that it returns at all
            // and lands in one of the four variants.
            let decision = classify(&req, MUTATION_PATH);
            assert!(matches!(
              decision,
              RouteDecision::MutationWrite
                | RouteDecision::Navigation
                | RouteDecision::OtherRead
                | RouteDecision::Ignored
            ));
          }
        }
      }
    }
  }
}
