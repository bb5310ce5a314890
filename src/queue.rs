//! Durable queue of mutation payloads awaiting delivery.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use serde_json::Value;
use std::path::Path;
use std::sync::Mutex;

/// A queued mutation awaiting replay.
#[derive(Debug, Clone)]
pub struct PendingRecord {
  /// Store-assigned unique id; also determines replay order
  pub id: i64,
  /// The serialized request body, untouched since interception
  pub payload: Value,
  /// When the record was enqueued
  pub queued_at: DateTime<Utc>,
}

/// Trait for persistent queue backends.
///
/// Each operation is individually atomic; callers interleaving enqueue,
/// list and remove must never observe a partially written record.
pub trait QueueStore: Send + Sync {
  /// Durably append a payload, returning the assigned id.
  fn enqueue(&self, payload: &Value) -> Result<i64>;

  /// All pending records in insertion order.
  fn list_all(&self) -> Result<Vec<PendingRecord>>;

  /// Delete a record. Removing a nonexistent id is a no-op.
  fn remove(&self, id: i64) -> Result<()>;
}

/// SQLite-backed queue store.
pub struct SqliteQueue {
  conn: Mutex<Connection>,
}

/// Schema for the pending-mutation table.
const QUEUE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS pending_solicitudes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    payload BLOB NOT NULL,
    queued_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl SqliteQueue {
  /// Open (or create) the queue database at the given path.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create queue directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open queue database at {}: {}", path.display(), e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// Open an in-memory queue. Used by tests.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory queue: {}", e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
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
  fn enqueue(&self, payload: &Value) -> Result<i64> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let data = serde_json::to_vec(payload)
      .map_err(|e| eyre!("Failed to serialize payload: {}", e))?;

    // A single INSERT; SQLite makes it atomic
    conn
      .execute(
        "INSERT INTO pending_solicitudes (payload) VALUES (?)",
        params![data],
      )
      .map_err(|e| eyre!("Failed to enqueue payload: {}", e))?;

    Ok(conn.last_insert_rowid())
  }

  fn list_all(&self) -> Result<Vec<PendingRecord>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT id, payload, queued_at FROM pending_solicitudes ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare queue query: {}", e))?;

    let rows: Vec<(i64, Vec<u8>, String)> = stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
      .map_err(|e| eyre!("Failed to query pending records: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    let mut records = Vec::with_capacity(rows.len());
    for (id, data, queued_at_str) in rows {
      let payload: Value = serde_json::from_slice(&data)
        .map_err(|e| eyre!("Failed to deserialize payload {}: {}", id, e))?;
      let queued_at = parse_datetime(&queued_at_str)?;
      records.push(PendingRecord {
        id,
        payload,
        queued_at,
      });
    }

    Ok(records)
  }

  fn remove(&self, id: i64) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    // Zero rows affected means the id was already gone; that is fine
    conn
      .execute("DELETE FROM pending_solicitudes WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove record {}: {}", id, e))?;

    Ok(())
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
