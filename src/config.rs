use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Worker configuration.
///
/// Everything the worker consults at runtime lives here and is immutable
/// after startup: route tables, cache generation names, the precache
/// manifest, and eviction knobs. A missing config file falls back to the
/// built-in defaults, so the worker runs unconfigured.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Human-readable site name, used as the notification title default.
  pub site_name: String,
  /// Origin the site is served from; relative paths in the precache
  /// manifest and form endpoints resolve against this.
  pub origin: String,
  /// Prefix for cache store names.
  pub cache_prefix: String,
  /// Cache generation version; bumping it makes activate drop old stores.
  pub cache_version: String,
  /// URL substrings routed network-first (API and form endpoints).
  pub network_first: Vec<String>,
  /// Path prefixes routed cache-first (static assets).
  pub asset_prefixes: Vec<String>,
  /// Third-party hosts routed cache-first (fonts, CDNs).
  pub asset_origins: Vec<String>,
  /// URLs fetched into the static store on install. Relative paths are
  /// resolved against `origin`.
  pub precache: Vec<String>,
  /// Path of the page served as the offline fallback for navigations.
  pub homepage: String,
  /// Dynamic store entry ceiling enforced by the eviction pass.
  pub dynamic_ceiling: usize,
  /// Seconds between eviction passes.
  pub eviction_interval_secs: u64,
  /// URL probed to detect connectivity restoration (defaults to the
  /// homepage on `origin`).
  pub probe_url: Option<String>,
  /// Seconds between connectivity probes.
  pub probe_interval_secs: u64,
  /// Override for the on-disk database location (defaults to the user
  /// data directory).
  pub data_dir: Option<PathBuf>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      site_name: "Sitekeeper".to_string(),
      origin: "http://localhost:8000".to_string(),
      cache_prefix: "sitekeeper".to_string(),
      cache_version: "v3".to_string(),
      network_first: vec!["/api/".to_string()],
      asset_prefixes: vec![
        "/css/".to_string(),
        "/js/".to_string(),
        "/images/".to_string(),
        "/fonts/".to_string(),
      ],
      asset_origins: vec![
        "fonts.googleapis.com".to_string(),
        "fonts.gstatic.com".to_string(),
        "cdnjs.cloudflare.com".to_string(),
      ],
      precache: vec![
        "/".to_string(),
        "/index.html".to_string(),
        "/css/style.css".to_string(),
        "/js/main.js".to_string(),
        "https://fonts.googleapis.com/css2?family=Inter:wght@400;600&display=swap".to_string(),
      ],
      homepage: "/".to_string(),
      dynamic_ceiling: 50,
      eviction_interval_secs: 600,
      probe_url: None,
      probe_interval_secs: 30,
      data_dir: None,
    }
  }
}

/// Generation-tagged cache store names.
///
/// Exactly one generation of each kind is current at a time; activate
/// treats every other store name as garbage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheNames {
  /// Aggregate store (precache spillover and anything unclassified).
  pub aggregate: String,
  /// Static asset store.
  pub static_store: String,
  /// Dynamic (runtime-populated) store.
  pub dynamic_store: String,
}

impl CacheNames {
  /// Whether `name` is one of the current generation identifiers.
  pub fn is_current(&self, name: &str) -> bool {
    name == self.aggregate || name == self.static_store || name == self.dynamic_store
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided (an error if it does not exist)
  /// 2. ./sitekeeper.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/sitekeeper/config.yaml
  ///
  /// With no file found anywhere, the built-in defaults apply.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("sitekeeper.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("sitekeeper").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Current generation store names.
  pub fn cache_names(&self) -> CacheNames {
    CacheNames {
      aggregate: format!("{}-{}", self.cache_prefix, self.cache_version),
      static_store: format!("{}-static-{}", self.cache_prefix, self.cache_version),
      dynamic_store: format!("{}-dynamic-{}", self.cache_prefix, self.cache_version),
    }
  }

  /// Resolve a manifest or endpoint path against the configured origin.
  /// Absolute URLs pass through unchanged.
  pub fn resolve(&self, path_or_url: &str) -> String {
    if path_or_url.starts_with("http://") || path_or_url.starts_with("https://") {
      path_or_url.to_string()
    } else {
      format!("{}{}", self.origin.trim_end_matches('/'), path_or_url)
    }
  }

  /// URL used by the connectivity probe.
  pub fn probe_url(&self) -> String {
    self
      .probe_url
      .clone()
      .unwrap_or_else(|| self.resolve(&self.homepage))
  }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_produce_versioned_store_names() {
    let names = Config::default().cache_names();
    assert_eq!(names.aggregate, "sitekeeper-v3");
    assert_eq!(names.static_store, "sitekeeper-static-v3");
    assert_eq!(names.dynamic_store, "sitekeeper-dynamic-v3");
    assert!(names.is_current("sitekeeper-static-v3"));
    assert!(!names.is_current("sitekeeper-static-v2"));
  }

  #[test]
  fn resolve_keeps_absolute_urls() {
    let config = Config::default();
    assert_eq!(
      config.resolve("https://fonts.gstatic.com/x.woff2"),
      "https://fonts.gstatic.com/x.woff2"
    );
    assert_eq!(
      config.resolve("/css/style.css"),
      "http://localhost:8000/css/style.css"
    );
  }

  #[test]
  fn version_bump_changes_every_generation() {
    let old = Config::default().cache_names();
    let bumped = Config {
      cache_version: "v4".to_string(),
      ..Config::default()
    }
    .cache_names();
    assert_ne!(old.aggregate, bumped.aggregate);
    assert_ne!(old.static_store, bumped.static_store);
    assert_ne!(old.dynamic_store, bumped.dynamic_store);
  }
}
