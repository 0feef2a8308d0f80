//! Core trait and types for the response stores.

use color_eyre::Result;
use serde::{Deserialize, Serialize};

/// A stored response snapshot: status, headers, body.
///
/// This is what a named store maps request keys to. It is serializable so
/// backends can persist it verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl CachedResponse {
  pub fn new(status: u16, body: Vec<u8>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body,
    }
  }

  /// Build a response with a Content-Type header.
  pub fn with_content_type(status: u16, content_type: &str, body: Vec<u8>) -> Self {
    Self {
      status,
      headers: vec![("content-type".to_string(), content_type.to_string())],
      body,
    }
  }

  /// Synthesized JSON response.
  pub fn json(status: u16, value: &serde_json::Value) -> Self {
    Self::with_content_type(status, "application/json", value.to_string().into_bytes())
  }

  /// Synthesized HTML response.
  pub fn html(status: u16, document: &str) -> Self {
    Self::with_content_type(
      status,
      "text/html; charset=utf-8",
      document.as_bytes().to_vec(),
    )
  }

  /// 2xx check, mirroring `Response::ok` on the wire.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// First header value with the given name (case-insensitive).
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  /// Body decoded as UTF-8, lossily.
  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

/// Identity of a request inside a store: method plus URL.
pub fn request_key(method: &str, url: &str) -> String {
  format!("{} {}", method.to_ascii_uppercase(), url)
}

/// Where a served response came from. Strategies report this so callers
/// (and tests) can tell a live response from a snapshot or a fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServedSource {
  /// Fresh response straight from the network
  Network,
  /// Snapshot from a named store
  Cache,
  /// Synthesized offline response or offline document
  OfflineFallback,
}

/// A response together with its provenance.
#[derive(Debug, Clone)]
pub struct Served {
  pub response: CachedResponse,
  pub source: ServedSource,
}

impl Served {
  pub fn network(response: CachedResponse) -> Self {
    Self {
      response,
      source: ServedSource::Network,
    }
  }

  pub fn cached(response: CachedResponse) -> Self {
    Self {
      response,
      source: ServedSource::Cache,
    }
  }

  pub fn offline(response: CachedResponse) -> Self {
    Self {
      response,
      source: ServedSource::OfflineFallback,
    }
  }
}

/// Trait for named response-store backends.
///
/// Stores are flat key-value maps created on first open. `keys` reports
/// insertion order, oldest first; re-putting an existing key moves it to
/// the newest position.
pub trait CacheStorage: Send + Sync {
  /// Ensure a named store exists.
  fn open_store(&self, store: &str) -> Result<()>;

  /// Insert or overwrite a snapshot under `key`.
  fn put(&self, store: &str, key: &str, response: &CachedResponse) -> Result<()>;

  /// Look up a snapshot.
  fn get(&self, store: &str, key: &str) -> Result<Option<CachedResponse>>;

  /// Remove one entry. Returns whether it existed.
  fn delete(&self, store: &str, key: &str) -> Result<bool>;

  /// All keys in the store, oldest insertion first.
  fn keys(&self, store: &str) -> Result<Vec<String>>;

  /// Number of entries in the store.
  fn count(&self, store: &str) -> Result<usize>;

  /// Names of every store the backend knows about.
  fn store_names(&self) -> Result<Vec<String>>;

  /// Drop a whole store and its entries. Returns whether it existed.
  fn drop_store(&self, store: &str) -> Result<bool>;
}

/// Look `key` up across several stores in order, returning the first hit.
pub fn first_match<S: CacheStorage + ?Sized>(
  storage: &S,
  stores: &[&str],
  key: &str,
) -> Result<Option<CachedResponse>> {
  for store in stores {
    if let Some(response) = storage.get(store, key)? {
      return Ok(Some(response));
    }
  }
  Ok(None)
}

// ============================================================================
// Tests
// ============================================================================
