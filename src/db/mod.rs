//! Persistent queue for form submissions that could not reach the network.
//!
//! Records are partitioned by form kind and keyed by an auto-incrementing
//! id. A record leaves the queue only when its replay POST succeeds.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// The form kinds the site queues offline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormKind {
  VisaApplication,
  ContactForm,
}

impl FormKind {
  pub const ALL: [FormKind; 2] = [FormKind::VisaApplication, FormKind::ContactForm];

  /// Partition name inside the queue database.
  pub fn store_name(self) -> &'static str {
    match self {
      FormKind::VisaApplication => "visa-applications",
      FormKind::ContactForm => "contact-forms",
    }
  }

  /// Background-sync tag that requests a drain of this partition.
  pub fn sync_tag(self) -> &'static str {
    match self {
      FormKind::VisaApplication => "visa-application-sync",
      FormKind::ContactForm => "contact-form-sync",
    }
  }

  /// Replay endpoint path on the site origin.
  pub fn endpoint_path(self) -> &'static str {
    match self {
      FormKind::VisaApplication => "/api/visa-application",
      FormKind::ContactForm => "/api/contact",
    }
  }

  pub fn from_sync_tag(tag: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|kind| kind.sync_tag() == tag)
  }

  pub fn from_endpoint_path(path: &str) -> Option<Self> {
    Self::ALL
      .into_iter()
      .find(|kind| kind.endpoint_path() == path)
  }

  fn from_store_name(name: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|kind| kind.store_name() == name)
  }
}

/// A queued form submission awaiting replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingForm {
  pub id: i64,
  pub kind: FormKind,
  /// Opaque JSON payload, replayed verbatim.
  pub payload: String,
  pub queued_at: DateTime<Utc>,
}

/// Trait for queue backends.
pub trait QueueStore: Send + Sync {
  /// Append a payload under `kind`, returning the assigned id.
  fn enqueue(&self, kind: FormKind, payload: &str) -> Result<i64>;

  /// All pending records for `kind`, oldest first.
  fn pending(&self, kind: FormKind) -> Result<Vec<PendingForm>>;

  /// Delete one record by id. Returns whether it existed.
  fn remove(&self, id: i64) -> Result<bool>;

  /// Number of pending records for `kind`.
  fn count(&self, kind: FormKind) -> Result<usize>;
}

/// SQLite-backed queue.
pub struct SqliteQueue {
  conn: Mutex<Connection>,
}

/// Schema for the queue table.
const QUEUE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS pending_form (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    payload TEXT NOT NULL,
    queued_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_pending_form_kind ON pending_form(kind);
"#;

impl SqliteQueue {
  /// Open (or create) the queue in the shared worker database.
  pub fn open(data_dir: Option<&Path>) -> Result<Self> {
    let path = Self::database_path(data_dir)?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create data directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open queue database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// In-memory queue, used by tests.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let queue = Self {
      conn: Mutex::new(conn),
    };
    queue.run_migrations()?;
    Ok(queue)
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
      .execute_batch(QUEUE_SCHEMA)
      .map_err(|e| eyre!("Failed to run queue migrations: {}", e))?;

    Ok(())
  }
}

impl QueueStore for SqliteQueue {
  fn enqueue(&self, kind: FormKind, payload: &str) -> Result<i64> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT INTO pending_form (kind, payload) VALUES (?, ?)",
        params![kind.store_name(), payload],
      )
      .map_err(|e| eyre!("Failed to enqueue submission: {}", e))?;

    Ok(conn.last_insert_rowid())
  }

  fn pending(&self, kind: FormKind) -> Result<Vec<PendingForm>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT id, kind, payload, queued_at FROM pending_form WHERE kind = ? ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare queue listing: {}", e))?;

    let rows: Vec<(i64, String, String, String)> = stmt
      .query_map(params![kind.store_name()], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
      })
      .map_err(|e| eyre!("Failed to list queue: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    let mut records = Vec::with_capacity(rows.len());
    for (id, kind_name, payload, queued_at) in rows {
      let kind = FormKind::from_store_name(&kind_name)
        .ok_or_else(|| eyre!("Unknown form kind in queue: {}", kind_name))?;
      records.push(PendingForm {
        id,
        kind,
        payload,
        queued_at: parse_datetime(&queued_at)?,
      });
    }

    Ok(records)
  }

  fn remove(&self, id: i64) -> Result<bool> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let changed = conn
      .execute("DELETE FROM pending_form WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to delete queue record: {}", e))?;

    Ok(changed > 0)
  }

  fn count(&self, kind: FormKind) -> Result<usize> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM pending_form WHERE kind = ?",
        params![kind.store_name()],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count queue: {}", e))?;

    Ok(count as usize)
  }
}

/// In-memory queue, the backend fake for tests.
#[derive(Default)]
#[allow(dead_code)]
pub struct MemoryQueue {
  inner: Mutex<MemoryQueueInner>,
}

#[derive(Default)]
struct MemoryQueueInner {
  next_id: i64,
  records: Vec<PendingForm>,
}

impl MemoryQueue {
  #[allow(dead_code)]
  pub fn new() -> Self {
    Self::default()
  }
}

impl QueueStore for MemoryQueue {
  fn enqueue(&self, kind: FormKind, payload: &str) -> Result<i64> {
    let mut inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    inner.next_id += 1;
    let id = inner.next_id;
    inner.records.push(PendingForm {
      id,
      kind,
      payload: payload.to_string(),
      queued_at: Utc::now(),
    });
    Ok(id)
  }

  fn pending(&self, kind: FormKind) -> Result<Vec<PendingForm>> {
    let inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(
      inner
        .records
        .iter()
        .filter(|record| record.kind == kind)
        .cloned()
        .collect(),
    )
  }

  fn remove(&self, id: i64) -> Result<bool> {
    let mut inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let before = inner.records.len();
    inner.records.retain(|record| record.id != id);
    Ok(inner.records.len() < before)
  }

  fn count(&self, kind: FormKind) -> Result<usize> {
    let inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(
      inner
        .records
        .iter()
        .filter(|record| record.kind == kind)
        .count(),
    )
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

// ============================================================================
// Tests
// ============================================================================
