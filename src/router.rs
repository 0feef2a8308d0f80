//! Request classification: which caching strategy handles a fetch.

use url::Url;

use crate::config::Config;
use crate::net::FetchRequest;

/// The caching strategy selected for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Live response preferred; cache is the fallback.
  NetworkFirst,
  /// Snapshot preferred; network refreshes in the background.
  CacheFirst,
  /// Snapshot served immediately, network revalidates concurrently.
  StaleWhileRevalidate,
}

/// Ordered rule evaluator over immutable route tables.
///
/// Evaluation order is fixed: network-first rules, then cache-first
/// rules, then the stale-while-revalidate default. First match wins;
/// there is no ranking among multiple matches.
#[derive(Debug, Clone)]
pub struct Router {
  network_first: Vec<String>,
  asset_prefixes: Vec<String>,
  asset_origins: Vec<String>,
}

impl Router {
  pub fn new(config: &Config) -> Self {
    Self {
      network_first: config.network_first.clone(),
      asset_prefixes: config.asset_prefixes.clone(),
      asset_origins: config.asset_origins.clone(),
    }
  }

  /// Classify a request. Only GETs are considered; anything else returns
  /// `None` and passes through untouched.
  pub fn classify(&self, request: &FetchRequest) -> Option<Strategy> {
    if !request.is_get() {
      return None;
    }

    if self
      .network_first
      .iter()
      .any(|prefix| request.url.contains(prefix.as_str()))
    {
      return Some(Strategy::NetworkFirst);
    }

    if self.is_asset(&request.url) {
      return Some(Strategy::CacheFirst);
    }

    // HTML navigations and anything unclassified
    Some(Strategy::StaleWhileRevalidate)
  }

  fn is_asset(&self, raw_url: &str) -> bool {
    let Ok(url) = Url::parse(raw_url) else {
      return false;
    };

    if let Some(host) = url.host_str() {
      if self.asset_origins.iter().any(|origin| origin == host) {
        return true;
      }
    }

    let path = url.path();
    self
      .asset_prefixes
      .iter()
      .any(|prefix| path.starts_with(prefix.as_str()))
  }
}

// ============================================================================
// Tests
// ============================================================================
