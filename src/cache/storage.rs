//! Response store backends: SQLite for production, in-memory for tests.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::traits::{CacheStorage, CachedResponse};

/// SQLite-backed store set.
///
/// All named stores share one database: a registry table records which
/// stores exist, and entries carry their store name. Request keys are
/// SHA256-hashed for a stable fixed-length primary key; the raw key is
/// kept alongside for listing and eviction.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

/// Schema for the response store tables.
const STORE_SCHEMA: &str = r#"
-- Which named stores exist (a store can exist empty)
CREATE TABLE IF NOT EXISTS store_registry (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Response snapshots. Insertion order is rowid order; INSERT OR REPLACE
-- assigns a fresh rowid, so overwriting a key moves it to the newest slot.
CREATE TABLE IF NOT EXISTS response_cache (
    store TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    request_key TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (store, key_hash)
);

CREATE INDEX IF NOT EXISTS idx_response_cache_store ON response_cache(store);
"#;

impl SqliteStorage {
  /// Open (or create) the store database at its default location.
  pub fn open(data_dir: Option<&Path>) -> Result<Self> {
    let path = Self::database_path(data_dir)?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create data directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open store database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// In-memory database, used by tests.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  fn database_path(data_dir: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = data_dir {
      return Ok(dir.join("offline.db"));
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("sitekeeper").join("offline.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(STORE_SCHEMA)
      .map_err(|e| eyre!("Failed to run store migrations: {}", e))?;

    Ok(())
  }
}

/// Stable fixed-length key for a request identity.
fn hash_key(key: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(key.as_bytes());
  hex::encode(hasher.finalize())
}

impl CacheStorage for SqliteStorage {
  fn open_store(&self, store: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR IGNORE INTO store_registry (name) VALUES (?)",
        params![store],
      )
      .map_err(|e| eyre!("Failed to register store {}: {}", store, e))?;

    Ok(())
  }

  fn put(&self, store: &str, key: &str, response: &CachedResponse) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    conn
      .execute(
        "INSERT OR IGNORE INTO store_registry (name) VALUES (?)",
        params![store],
      )
      .map_err(|e| eyre!("Failed to register store {}: {}", store, e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO response_cache (store, key_hash, request_key, status, headers, body, stored_at)
         VALUES (?, ?, ?, ?, ?, ?, datetime('now'))",
        params![store, hash_key(key), key, response.status, headers, response.body],
      )
      .map_err(|e| eyre!("Failed to store response: {}", e))?;

    Ok(())
  }

  fn get(&self, store: &str, key: &str) -> Result<Option<CachedResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT status, headers, body FROM response_cache WHERE store = ? AND key_hash = ?")
      .map_err(|e| eyre!("Failed to prepare lookup: {}", e))?;

    let row: Option<(u16, String, Vec<u8>)> = stmt
      .query_row(params![store, hash_key(key)], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
      })
      .ok();

    match row {
      Some((status, headers, body)) => {
        let headers: Vec<(String, String)> = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to parse stored headers: {}", e))?;
        Ok(Some(CachedResponse {
          status,
          headers,
          body,
        }))
      }
      None => Ok(None),
    }
  }

  fn delete(&self, store: &str, key: &str) -> Result<bool> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let changed = conn
      .execute(
        "DELETE FROM response_cache WHERE store = ? AND key_hash = ?",
        params![store, hash_key(key)],
      )
      .map_err(|e| eyre!("Failed to delete entry: {}", e))?;

    Ok(changed > 0)
  }

  fn keys(&self, store: &str) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT request_key FROM response_cache WHERE store = ? ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare key listing: {}", e))?;

    let keys = stmt
      .query_map(params![store], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list keys: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(keys)
  }

  fn count(&self, store: &str) -> Result<usize> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM response_cache WHERE store = ?",
        params![store],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries: {}", e))?;

    Ok(count as usize)
  }

  fn store_names(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT name FROM store_registry ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare store listing: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list stores: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(names)
  }

  fn drop_store(&self, store: &str) -> Result<bool> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "DELETE FROM response_cache WHERE store = ?",
        params![store],
      )
      .map_err(|e| eyre!("Failed to clear store {}: {}", store, e))?;

    let removed = conn
      .execute("DELETE FROM store_registry WHERE name = ?", params![store])
      .map_err(|e| eyre!("Failed to drop store {}: {}", store, e))?;

    Ok(removed > 0)
  }
}

/// In-memory store set. Used when persistence is disabled and by tests
/// as the backend fake.
///
/// Mirrors the SQLite semantics: per-store insertion order, overwrite
/// moves an entry to the newest slot.
#[derive(Default)]
#[allow(dead_code)]
pub struct MemoryStorage {
  stores: Mutex<HashMap<String, Vec<(String, CachedResponse)>>>,
}

impl MemoryStorage {
  #[allow(dead_code)]
  pub fn new() -> Self {
    Self::default()
  }
}

impl CacheStorage for MemoryStorage {
  fn open_store(&self, store: &str) -> Result<()> {
    let mut stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    stores.entry(store.to_string()).or_default();
    Ok(())
  }

  fn put(&self, store: &str, key: &str, response: &CachedResponse) -> Result<()> {
    let mut stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let entries = stores.entry(store.to_string()).or_default();
    entries.retain(|(k, _)| k != key);
    entries.push((key.to_string(), response.clone()));
    Ok(())
  }

  fn get(&self, store: &str, key: &str) -> Result<Option<CachedResponse>> {
    let stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(stores.get(store).and_then(|entries| {
      entries
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, response)| response.clone())
    }))
  }

  fn delete(&self, store: &str, key: &str) -> Result<bool> {
    let mut stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    match stores.get_mut(store) {
      Some(entries) => {
        let before = entries.len();
        entries.retain(|(k, _)| k != key);
        Ok(entries.len() < before)
      }
      None => Ok(false),
    }
  }

  fn keys(&self, store: &str) -> Result<Vec<String>> {
    let stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(
      stores
        .get(store)
        .map(|entries| entries.iter().map(|(k, _)| k.clone()).collect())
        .unwrap_or_default(),
    )
  }

  fn count(&self, store: &str) -> Result<usize> {
    let stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(stores.get(store).map(|entries| entries.len()).unwrap_or(0))
  }

  fn store_names(&self) -> Result<Vec<String>> {
    let stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let mut names: Vec<String> = stores.keys().cloned().collect();
    names.sort();
    Ok(names)
  }

  fn drop_store(&self, store: &str) -> Result<bool> {
    let mut stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(stores.remove(store).is_some())
  }
}

// ============================================================================
// Tests
// ============================================================================
