//! Outbound HTTP: the fetch wrapper that turns wire responses into
//! storable snapshots.

use color_eyre::{eyre::eyre, Result};
use reqwest::Method;

use crate::cache::{request_key, CachedResponse};

/// An intercepted request, reduced to what routing and caching need.
#[derive(Debug, Clone)]
pub struct FetchRequest {
  pub method: Method,
  pub url: String,
  /// Accept header, when the host passes one along.
  pub accept: Option<String>,
  /// Body for pass-through writes (form submissions).
  pub body: Option<Vec<u8>>,
  pub content_type: Option<String>,
}

impl FetchRequest {
  pub fn get(url: impl Into<String>) -> Self {
    Self {
      method: Method::GET,
      url: url.into(),
      accept: None,
      body: None,
      content_type: None,
    }
  }

  /// A navigation request: a GET that accepts HTML.
  #[allow(dead_code)]
  pub fn navigate(url: impl Into<String>) -> Self {
    Self {
      accept: Some("text/html,application/xhtml+xml".to_string()),
      ..Self::get(url)
    }
  }

  /// A JSON POST, as a form submission arrives.
  #[allow(dead_code)]
  pub fn post_json(url: impl Into<String>, payload: &serde_json::Value) -> Self {
    Self::post_json_raw(url, &payload.to_string())
  }

  /// A JSON POST carrying an already-serialized payload; replay uses this
  /// so queued bodies go out verbatim.
  pub fn post_json_raw(url: impl Into<String>, payload: &str) -> Self {
    Self {
      method: Method::POST,
      url: url.into(),
      accept: None,
      body: Some(payload.as_bytes().to_vec()),
      content_type: Some("application/json".to_string()),
    }
  }

  pub fn is_get(&self) -> bool {
    self.method == Method::GET
  }

  /// Whether the requester would render an HTML fallback.
  pub fn accepts_html(&self) -> bool {
    self
      .accept
      .as_deref()
      .is_some_and(|accept| accept.contains("text/html"))
  }

  /// Store key for this request's identity.
  pub fn key(&self) -> String {
    request_key(self.method.as_str(), &self.url)
  }

  /// Path component of the URL, or the raw string when it does not parse.
  pub fn path(&self) -> String {
    url::Url::parse(&self.url)
      .map(|u| u.path().to_string())
      .unwrap_or_else(|_| self.url.clone())
  }
}

/// Thin reqwest wrapper. Transport failures surface as errors; HTTP error
/// statuses come back as ordinary snapshots, the way `fetch` resolves.
///
/// No timeouts are configured; the worker relies on whatever the network
/// stack imposes.
#[derive(Clone)]
pub struct HttpClient {
  client: reqwest::Client,
}

impl HttpClient {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self { client })
  }

  /// Execute a request and snapshot the response.
  pub async fn fetch(&self, request: &FetchRequest) -> Result<CachedResponse> {
    let mut builder = self.client.request(request.method.clone(), &request.url);

    if let Some(accept) = &request.accept {
      builder = builder.header("accept", accept);
    }
    if let Some(content_type) = &request.content_type {
      builder = builder.header("content-type", content_type);
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Network unavailable for {}: {}", request.url, e))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read response body from {}: {}", request.url, e))?
      .to_vec();

    Ok(CachedResponse {
      status,
      headers,
      body,
    })
  }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn navigation_requests_accept_html() {
    assert!(FetchRequest::navigate("http://x/").accepts_html());
    assert!(!FetchRequest::get("http://x/data.json").accepts_html());
  }

  #[test]
  fn key_includes_method_and_url() {
    let request = FetchRequest::get("http://x/css/style.css");
    assert_eq!(request.key(), "GET http://x/css/style.css");
  }

  #[test]
  fn path_extraction_survives_unparsable_urls() {
    assert_eq!(FetchRequest::get("http://x/api/contact").path(), "/api/contact");
    assert_eq!(FetchRequest::get("not a url").path(), "not a url");
  }

  #[test]
  fn post_json_carries_payload_and_content_type() {
    let request = FetchRequest::post_json("http://x/api/contact", &serde_json::json!({"a": 1}));
    assert_eq!(request.method, Method::POST);
    assert_eq!(request.content_type.as_deref(), Some("application/json"));
    assert_eq!(request.body.as_deref(), Some(br#"{"a":1}"#.as_slice()));
  }
}
