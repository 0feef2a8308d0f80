//! Worker lifecycle: install precaching, generation cleanup on activate,
//! and the periodic dynamic-store eviction pass.

use color_eyre::Result;
use std::future::Future;
use tracing::{debug, info, warn};

use crate::cache::{request_key, CacheStorage, CachedResponse};
use crate::config::{CacheNames, Config};
use crate::notify::ClientSurface;

/// Lifecycle states. A reinstall restarts the sequence from the top.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Installing,
  Activating,
  Active,
}

/// Install: open the current-generation stores and populate the static
/// store from the precache manifest.
///
/// Individual fetch failures are logged and skipped; install never fails
/// because an asset was unreachable. Returns how many manifest entries
/// were stored.
pub async fn install<S, F, Fut>(storage: &S, config: &Config, fetch: F) -> Result<usize>
where
  S: CacheStorage + ?Sized,
  F: Fn(String) -> Fut,
  Fut: Future<Output = Result<CachedResponse>>,
{
  let names = config.cache_names();
  storage.open_store(&names.aggregate)?;
  storage.open_store(&names.static_store)?;
  storage.open_store(&names.dynamic_store)?;

  let mut stored = 0;
  for entry in &config.precache {
    let url = config.resolve(entry);
    match fetch(url.clone()).await {
      Ok(response) if response.is_success() => {
        storage.put(&names.static_store, &request_key("GET", &url), &response)?;
        stored += 1;
      }
      Ok(response) => {
        warn!(url = %url, status = response.status, "Precache fetch rejected");
      }
      Err(e) => {
        warn!(url = %url, error = %e, "Precache fetch failed");
      }
    }
  }

  info!(stored, total = config.precache.len(), "Static store populated");
  Ok(stored)
}

/// Activate: drop every store that is not a current generation, then
/// take control of all open clients immediately.
///
/// Returns the names of the stores that were garbage-collected.
pub fn activate<S>(
  storage: &S,
  names: &CacheNames,
  surface: &dyn ClientSurface,
) -> Result<Vec<String>>
where
  S: CacheStorage + ?Sized,
{
  let mut removed = Vec::new();
  for store in storage.store_names()? {
    if !names.is_current(&store) {
      storage.drop_store(&store)?;
      info!(store = %store, "Dropped stale cache generation");
      removed.push(store);
    }
  }

  surface.claim();
  Ok(removed)
}

/// One eviction pass over the dynamic store.
///
/// The key list is read once; entries written after the snapshot wait for
/// the next pass. Deletes the oldest entries, insertion order, down to
/// the ceiling. Returns how many were removed.
pub fn evict_dynamic<S>(storage: &S, store: &str, ceiling: usize) -> Result<usize>
where
  S: CacheStorage + ?Sized,
{
  let keys = storage.keys(store)?;
  if keys.len() <= ceiling {
    return Ok(0);
  }

  let excess = keys.len() - ceiling;
  let mut removed = 0;
  for key in keys.iter().take(excess) {
    if storage.delete(store, key)? {
      removed += 1;
    }
  }

  debug!(store, removed, "Dynamic store trimmed");
  Ok(removed)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStorage;
  use crate::notify::{ClientWindow, Notification};
  use color_eyre::eyre::eyre;
  use std::sync::atomic::{AtomicUsize, Ordering};

  #[derive(Default)]
  struct ClaimCounter {
    claims: AtomicUsize,
  }

  impl ClientSurface for ClaimCounter {
    fn show_notification(&self, _notification: &Notification) {}
    fn windows(&self) -> Vec<ClientWindow> {
      Vec::new()
    }
    fn focus(&self, _id: u64) -> bool {
      false
    }
    fn open(&self, _url: &str) {}
    fn claim(&self) {
      self.claims.fetch_add(1, Ordering::SeqCst);
    }
  }

  #[tokio::test]
  async fn install_populates_static_store_from_manifest() {
    let storage = MemoryStorage::new();
    let config = Config::default();

    let stored = install(&storage, &config, |_url| async {
      Ok(CachedResponse::new(200, b"asset".to_vec()))
    })
    .await
    .unwrap();

    assert_eq!(stored, config.precache.len());
    assert_eq!(
      storage.count("sitekeeper-static-v3").unwrap(),
      config.precache.len()
    );
    // All three current generations exist, even the empty ones
    let names = storage.store_names().unwrap();
    assert!(names.contains(&"sitekeeper-v3".to_string()));
    assert!(names.contains(&"sitekeeper-dynamic-v3".to_string()));
  }

  #[tokio::test]
  async fn install_survives_individual_fetch_failures() {
    let storage = MemoryStorage::new();
    let config = Config::default();

    let stored = install(&storage, &config, |url| async move {
      if url.contains("style.css") {
        Err(eyre!("connection refused"))
      } else {
        Ok(CachedResponse::new(200, b"asset".to_vec()))
      }
    })
    .await
    .unwrap();

    assert_eq!(stored, config.precache.len() - 1);
  }

  #[tokio::test]
  async fn activate_drops_only_stale_generations_and_claims() {
    let storage = MemoryStorage::new();
    let config = Config::default();
    let names = config.cache_names();
    let surface = ClaimCounter::default();

    storage.open_store(&names.static_store).unwrap();
    storage.open_store(&names.dynamic_store).unwrap();
    storage.open_store("sitekeeper-static-v2").unwrap();
    storage.open_store("sitekeeper-dynamic-v1").unwrap();

    let mut removed = activate(&storage, &names, &surface).unwrap();
    removed.sort();
    assert_eq!(removed, vec!["sitekeeper-dynamic-v1", "sitekeeper-static-v2"]);

    let remaining = storage.store_names().unwrap();
    assert!(remaining.contains(&names.static_store));
    assert!(remaining.contains(&names.dynamic_store));
    assert_eq!(surface.claims.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn eviction_removes_exactly_the_oldest_excess() {
    let storage = MemoryStorage::new();
    for i in 0..55 {
      storage
        .put(
          "dyn",
          &format!("GET http://x/page-{i}"),
          &CachedResponse::new(200, Vec::new()),
        )
        .unwrap();
    }

    let removed = evict_dynamic(&storage, "dyn", 50).unwrap();
    assert_eq!(removed, 5);
    assert_eq!(storage.count("dyn").unwrap(), 50);

    // The five oldest are gone, the rest remain in order
    let keys = storage.keys("dyn").unwrap();
    assert_eq!(keys.first().map(String::as_str), Some("GET http://x/page-5"));
    assert_eq!(
      keys.last().map(String::as_str),
      Some("GET http://x/page-54")
    );
  }

  #[test]
  fn eviction_leaves_stores_at_or_under_the_ceiling_alone() {
    let storage = MemoryStorage::new();
    for i in 0..50 {
      storage
        .put("dyn", &format!("k{i}"), &CachedResponse::new(200, Vec::new()))
        .unwrap();
    }

    assert_eq!(evict_dynamic(&storage, "dyn", 50).unwrap(), 0);
    assert_eq!(storage.count("dyn").unwrap(), 50);
  }
}
