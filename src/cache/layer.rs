//! The three caching strategies, run against a store backend and a
//! caller-supplied fetch future.
//!
//! The fetch is passed in as a closure (never a concrete client) so the
//! strategy logic is testable against in-memory fakes. Detached work
//! (cache-first revalidation, the stale-while-revalidate network leg)
//! reports on an optional observation channel; production callers leave
//! it unset and the outcomes are only logged.

use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::{CacheNames, Config};
use crate::net::FetchRequest;

use super::traits::{first_match, request_key, CacheStorage, CachedResponse, Served};

/// Self-contained document served to navigations when the network is
/// down and nothing useful is cached.
pub const OFFLINE_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Offline</title>
<style>
  body { font-family: system-ui, sans-serif; display: flex; align-items: center;
         justify-content: center; min-height: 100vh; margin: 0; background: #f5f5f5; }
  main { text-align: center; padding: 2rem; }
  h1 { color: #333; }
  p { color: #666; }
</style>
</head>
<body>
<main>
  <h1>You are offline</h1>
  <p>This page is not available without a connection. It will load again once you are back online.</p>
</main>
</body>
</html>
"#;

/// Which detached operation a report describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundTask {
  /// Cache-first refresh of the static store
  Revalidate,
  /// Stale-while-revalidate write into the dynamic store
  DynamicWrite,
}

/// Outcome of a detached operation, observable in tests.
#[derive(Debug)]
pub struct BackgroundReport {
  pub task: BackgroundTask,
  pub key: String,
  pub outcome: Result<(), String>,
}

/// Strategy executor over a store backend.
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
  names: CacheNames,
  /// URL substrings that mark an API path (shares the network-first table).
  api_prefixes: Vec<String>,
  /// Store key of the homepage, the preferred offline fallback document.
  homepage_key: String,
  background_tx: Option<mpsc::UnboundedSender<BackgroundReport>>,
}

impl<S: CacheStorage + 'static> CacheLayer<S> {
  pub fn new(storage: Arc<S>, config: &Config) -> Self {
    Self {
      storage,
      names: config.cache_names(),
      api_prefixes: config.network_first.clone(),
      homepage_key: request_key("GET", &config.resolve(&config.homepage)),
      background_tx: None,
    }
  }

  /// Attach an observation channel for detached tasks. Tests use this to
  /// await background completion instead of sleeping.
  pub fn with_background_channel(mut self, tx: mpsc::UnboundedSender<BackgroundReport>) -> Self {
    self.background_tx = Some(tx);
    self
  }

  /// Lookup order shared by the fallback paths: freshest first.
  fn lookup_stores(&self) -> [&str; 3] {
    [
      self.names.dynamic_store.as_str(),
      self.names.static_store.as_str(),
      self.names.aggregate.as_str(),
    ]
  }

  fn is_api_path(&self, request: &FetchRequest) -> bool {
    self
      .api_prefixes
      .iter()
      .any(|prefix| request.url.contains(prefix.as_str()))
  }

  /// Network-first: the live response wins whenever the fetch resolves.
  ///
  /// A successful (2xx) response is copied into the dynamic store. On
  /// transport failure, fall back to any previously cached copy; failing
  /// that, API paths get a synthesized offline 503 and everything else
  /// re-raises the fetch error.
  pub async fn network_first<F, Fut>(&self, request: &FetchRequest, fetch: F) -> Result<Served>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<CachedResponse>>,
  {
    let key = request.key();

    match fetch().await {
      Ok(response) => {
        if response.is_success() {
          self
            .storage
            .put(&self.names.dynamic_store, &key, &response)?;
        }
        Ok(Served::network(response))
      }
      Err(fetch_err) => {
        if let Some(snapshot) = first_match(self.storage.as_ref(), &self.lookup_stores(), &key)? {
          return Ok(Served::cached(snapshot));
        }
        if self.is_api_path(request) {
          return Ok(Served::offline(offline_api_response()));
        }
        Err(fetch_err)
      }
    }
  }

  /// Cache-first: a snapshot is returned immediately and the static
  /// store refreshes in the background; refresh errors are swallowed.
  /// On a miss the fetch runs inline and a failure surfaces.
  pub async fn cache_first<F, Fut>(&self, request: &FetchRequest, fetch: F) -> Result<Served>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<CachedResponse>> + Send + 'static,
  {
    let key = request.key();

    let cached = first_match(
      self.storage.as_ref(),
      &[
        self.names.static_store.as_str(),
        self.names.aggregate.as_str(),
      ],
      &key,
    )?;

    if let Some(snapshot) = cached {
      let _ = self.detach_fetch(
        BackgroundTask::Revalidate,
        &self.names.static_store,
        &key,
        fetch(),
      );
      return Ok(Served::cached(snapshot));
    }

    let response = fetch().await?;
    if response.is_success() {
      self
        .storage
        .put(&self.names.static_store, &key, &response)?;
    }
    Ok(Served::network(response))
  }

  /// Stale-while-revalidate: the network leg detaches immediately and
  /// writes the dynamic store regardless of which path answers. A
  /// snapshot, when present, is returned without awaiting the network;
  /// otherwise the caller waits for the network and, on failure,
  /// HTML-accepting requests get the cached homepage or the built-in
  /// offline page. Non-HTML misses re-raise the error.
  pub async fn stale_while_revalidate<F, Fut>(
    &self,
    request: &FetchRequest,
    fetch: F,
  ) -> Result<Served>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<CachedResponse>> + Send + 'static,
  {
    let key = request.key();

    let network = self.detach_fetch(
      BackgroundTask::DynamicWrite,
      &self.names.dynamic_store,
      &key,
      fetch(),
    );

    if let Some(snapshot) = first_match(self.storage.as_ref(), &self.lookup_stores(), &key)? {
      return Ok(Served::cached(snapshot));
    }

    match network.await {
      Ok(Ok(response)) => Ok(Served::network(response)),
      Ok(Err(fetch_err)) => self.offline_fallback(request, fetch_err),
      Err(join_err) => self.offline_fallback(request, eyre!("Fetch task failed: {}", join_err)),
    }
  }

  /// The offline document is guaranteed for HTML-accepting requests:
  /// cached homepage first, built-in page otherwise.
  fn offline_fallback(&self, request: &FetchRequest, fetch_err: color_eyre::Report) -> Result<Served> {
    if !request.accepts_html() {
      return Err(fetch_err);
    }

    if let Some(home) = first_match(
      self.storage.as_ref(),
      &self.lookup_stores(),
      &self.homepage_key,
    )? {
      return Ok(Served::offline(home));
    }

    Ok(Served::offline(CachedResponse::html(200, OFFLINE_PAGE)))
  }

  /// Spawn the network leg of a strategy: fetch, write successful
  /// responses into `store`, report the outcome. The triggering request
  /// never awaits this unless it had no snapshot to serve.
  fn detach_fetch<Fut>(
    &self,
    task: BackgroundTask,
    store: &str,
    key: &str,
    fut: Fut,
  ) -> JoinHandle<Result<CachedResponse>>
  where
    Fut: Future<Output = Result<CachedResponse>> + Send + 'static,
  {
    let storage = Arc::clone(&self.storage);
    let store = store.to_string();
    let key = key.to_string();
    let tx = self.background_tx.clone();

    tokio::spawn(async move {
      let fetched = fut.await;

      let outcome = match &fetched {
        Ok(response) if response.is_success() => match storage.put(&store, &key, response) {
          Ok(()) => Ok(()),
          Err(e) => {
            debug!(key = %key, error = %e, "Background store write failed");
            Err(e.to_string())
          }
        },
        // Non-2xx responses are returned to any waiter but never stored
        Ok(_) => Ok(()),
        Err(e) => {
          debug!(key = %key, error = %e, "Background fetch failed");
          Err(e.to_string())
        }
      };

      if let Some(tx) = &tx {
        let _ = tx.send(BackgroundReport {
          task,
          key: key.clone(),
          outcome,
        });
      }

      fetched
    })
  }
}

/// Synthesized 503 for API paths with no network and no snapshot.
pub fn offline_api_response() -> CachedResponse {
  CachedResponse::json(
    503,
    &serde_json::json!({
      "error": "Offline mode",
      "message": "No connection. Queued requests are replayed when connectivity returns.",
    }),
  )
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::MemoryStorage;
  use crate::cache::traits::ServedSource;
  use std::sync::atomic::{AtomicUsize, Ordering};

  fn fixture() -> (Arc<MemoryStorage>, CacheLayer<MemoryStorage>, mpsc::UnboundedReceiver<BackgroundReport>) {
    let storage = Arc::new(MemoryStorage::new());
    let (tx, rx) = mpsc::unbounded_channel();
    let layer = CacheLayer::new(Arc::clone(&storage), &Config::default()).with_background_channel(tx);
    (storage, layer, rx)
  }

  fn ok_response(body: &str) -> CachedResponse {
    CachedResponse::with_content_type(200, "text/plain", body.as_bytes().to_vec())
  }

  #[tokio::test]
  async fn network_first_prefers_live_response_and_stores_it() {
    let (storage, layer, _rx) = fixture();
    let request = FetchRequest::get("http://localhost:8000/api/status");

    // A stale snapshot is already present; the live response must win.
    storage
      .put("sitekeeper-dynamic-v3", &request.key(), &ok_response("stale"))
      .unwrap();

    let served = layer
      .network_first(&request, || async { Ok(ok_response("live")) })
      .await
      .unwrap();

    assert_eq!(served.source, ServedSource::Network);
    assert_eq!(served.response.text(), "live");

    let stored = storage
      .get("sitekeeper-dynamic-v3", &request.key())
      .unwrap()
      .unwrap();
    assert_eq!(stored.text(), "live");
  }

  #[tokio::test]
  async fn network_first_falls_back_to_snapshot_when_offline() {
    let (storage, layer, _rx) = fixture();
    let request = FetchRequest::get("http://localhost:8000/api/status");
    storage
      .put("sitekeeper-dynamic-v3", &request.key(), &ok_response("cached"))
      .unwrap();

    let served = layer
      .network_first(&request, || async { Err(eyre!("connection refused")) })
      .await
      .unwrap();

    assert_eq!(served.source, ServedSource::Cache);
    assert_eq!(served.response.text(), "cached");
  }

  #[tokio::test]
  async fn network_first_synthesizes_offline_503_for_api_paths() {
    let (_storage, layer, _rx) = fixture();
    let request = FetchRequest::get("http://localhost:8000/api/visa-application");

    let served = layer
      .network_first(&request, || async { Err(eyre!("connection refused")) })
      .await
      .unwrap();

    assert_eq!(served.source, ServedSource::OfflineFallback);
    assert_eq!(served.response.status, 503);
    assert!(served.response.text().contains("Offline mode"));
    assert_eq!(
      served.response.header("content-type"),
      Some("application/json")
    );
  }

  #[tokio::test]
  async fn network_first_reraises_for_non_api_paths_without_snapshot() {
    let (_storage, layer, _rx) = fixture();
    // Classified network-first by URL substring, but not under /api/
    let layer_request = FetchRequest::get("http://localhost:8000/uncached.bin");

    let result = layer
      .network_first(&layer_request, || async { Err(eyre!("connection refused")) })
      .await;

    assert!(result.is_err());
  }

  #[tokio::test]
  async fn non_success_responses_are_returned_but_never_cached() {
    let (storage, layer, _rx) = fixture();
    let request = FetchRequest::get("http://localhost:8000/api/missing");

    let served = layer
      .network_first(&request, || async {
        Ok(CachedResponse::new(404, b"not found".to_vec()))
      })
      .await
      .unwrap();

    assert_eq!(served.response.status, 404);
    assert!(storage
      .get("sitekeeper-dynamic-v3", &request.key())
      .unwrap()
      .is_none());
  }

  #[tokio::test]
  async fn cache_first_cold_fetch_populates_static_store() {
    let (storage, layer, _rx) = fixture();
    let request = FetchRequest::get("http://localhost:8000/css/style.css");

    let served = layer
      .cache_first(&request, || async { Ok(ok_response("body{}")) })
      .await
      .unwrap();

    assert_eq!(served.source, ServedSource::Network);
    let stored = storage
      .get("sitekeeper-static-v3", &request.key())
      .unwrap()
      .unwrap();
    assert_eq!(stored.text(), "body{}");
  }

  #[tokio::test]
  async fn cache_first_hit_serves_snapshot_and_refreshes_in_background() {
    let (storage, layer, mut rx) = fixture();
    let request = FetchRequest::get("http://localhost:8000/css/style.css");
    storage
      .put("sitekeeper-static-v3", &request.key(), &ok_response("old"))
      .unwrap();

    let served = layer
      .cache_first(&request, || async { Ok(ok_response("new")) })
      .await
      .unwrap();

    // Snapshot answers without waiting on the network
    assert_eq!(served.source, ServedSource::Cache);
    assert_eq!(served.response.text(), "old");

    // The background refresh lands afterwards
    let report = rx.recv().await.unwrap();
    assert_eq!(report.task, BackgroundTask::Revalidate);
    assert!(report.outcome.is_ok());

    let refreshed = storage
      .get("sitekeeper-static-v3", &request.key())
      .unwrap()
      .unwrap();
    assert_eq!(refreshed.text(), "new");
  }

  #[tokio::test]
  async fn cache_first_refresh_errors_are_swallowed() {
    let (storage, layer, mut rx) = fixture();
    let request = FetchRequest::get("http://localhost:8000/js/main.js");
    storage
      .put("sitekeeper-static-v3", &request.key(), &ok_response("kept"))
      .unwrap();

    let served = layer
      .cache_first(&request, || async { Err(eyre!("connection refused")) })
      .await
      .unwrap();

    assert_eq!(served.response.text(), "kept");

    let report = rx.recv().await.unwrap();
    assert!(report.outcome.is_err());

    // The snapshot survives a failed refresh
    assert_eq!(
      storage
        .get("sitekeeper-static-v3", &request.key())
        .unwrap()
        .unwrap()
        .text(),
      "kept"
    );
  }

  #[tokio::test]
  async fn cache_first_cold_miss_surfaces_network_failure() {
    let (_storage, layer, _rx) = fixture();
    let request = FetchRequest::get("http://localhost:8000/css/style.css");

    let result = layer
      .cache_first(&request, || async { Err(eyre!("connection refused")) })
      .await;

    assert!(result.is_err());
  }

  #[tokio::test]
  async fn stale_while_revalidate_serves_snapshot_without_waiting() {
    let (storage, layer, mut rx) = fixture();
    let request = FetchRequest::navigate("http://localhost:8000/pricing.html");
    storage
      .put("sitekeeper-dynamic-v3", &request.key(), &ok_response("stale page"))
      .unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&calls);
    let served = layer
      .stale_while_revalidate(&request, move || async move {
        counted.fetch_add(1, Ordering::SeqCst);
        Ok(ok_response("fresh page"))
      })
      .await
      .unwrap();

    assert_eq!(served.source, ServedSource::Cache);
    assert_eq!(served.response.text(), "stale page");

    // The detached network leg still ran and refreshed the dynamic store
    let report = rx.recv().await.unwrap();
    assert_eq!(report.task, BackgroundTask::DynamicWrite);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(
      storage
        .get("sitekeeper-dynamic-v3", &request.key())
        .unwrap()
        .unwrap()
        .text(),
      "fresh page"
    );
  }

  #[tokio::test]
  async fn stale_while_revalidate_miss_waits_for_network() {
    let (storage, layer, _rx) = fixture();
    let request = FetchRequest::navigate("http://localhost:8000/about.html");

    let served = layer
      .stale_while_revalidate(&request, || async { Ok(ok_response("live page")) })
      .await
      .unwrap();

    assert_eq!(served.source, ServedSource::Network);
    assert_eq!(served.response.text(), "live page");
    assert!(storage
      .get("sitekeeper-dynamic-v3", &request.key())
      .unwrap()
      .is_some());
  }

  #[tokio::test]
  async fn stale_while_revalidate_offline_navigation_gets_cached_homepage() {
    let (storage, layer, _rx) = fixture();
    let request = FetchRequest::navigate("http://localhost:8000/deep/page.html");
    storage
      .put(
        "sitekeeper-static-v3",
        "GET http://localhost:8000/",
        &CachedResponse::html(200, "<html>home</html>"),
      )
      .unwrap();

    let served = layer
      .stale_while_revalidate(&request, || async { Err(eyre!("connection refused")) })
      .await
      .unwrap();

    assert_eq!(served.source, ServedSource::OfflineFallback);
    assert!(served.response.text().contains("home"));
  }

  #[tokio::test]
  async fn stale_while_revalidate_offline_navigation_is_guaranteed_a_document() {
    let (_storage, layer, _rx) = fixture();
    let request = FetchRequest::navigate("http://localhost:8000/deep/page.html");

    let served = layer
      .stale_while_revalidate(&request, || async { Err(eyre!("connection refused")) })
      .await
      .unwrap();

    assert_eq!(served.source, ServedSource::OfflineFallback);
    assert!(served.response.text().contains("You are offline"));
  }

  #[tokio::test]
  async fn stale_while_revalidate_offline_non_html_fails() {
    let (_storage, layer, _rx) = fixture();
    let request = FetchRequest::get("http://localhost:8000/data/feed.json");

    let result = layer
      .stale_while_revalidate(&request, || async { Err(eyre!("connection refused")) })
      .await;

    assert!(result.is_err());
  }
}
