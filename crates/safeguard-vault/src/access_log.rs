//! Bounded, append-only access log.
//!
//! Entries live in their own SQLite database (`access_log.db`) behind their
//! own mutex, so appends never contend with record reads and writes. Each
//! append inserts the new entry and trims the oldest beyond the capacity in
//! one transaction.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use safeguard_core::Clock;

use crate::error::{Result, VaultError};

/// Well-known access-log categories.
pub mod category {
    pub const APPLICATION: &str = "APPLICATION";
    pub const NAVIGATION: &str = "NAVIGATION";
    pub const DATA_PROTECTION: &str = "DATA_PROTECTION";
    pub const DATA_STORAGE: &str = "DATA_STORAGE";
    pub const DATA_ACCESS: &str = "DATA_ACCESS";
    pub const DATA_MANAGEMENT: &str = "DATA_MANAGEMENT";
    pub const KEY_ROTATION: &str = "KEY_ROTATION";
    pub const KEY_ROTATION_ERROR: &str = "KEY_ROTATION_ERROR";
}

/// Timestamp format used when rendering entries.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One access-log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessLogEntry {
    pub timestamp: DateTime<Utc>,
    pub category: String,
    pub action: String,
}

impl std::fmt::Display for AccessLogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} - {}: {}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.category,
            self.action
        )
    }
}

/// Capacity-bounded access log.
pub struct AccessLog {
    conn: Mutex<Connection>,
    capacity: usize,
    clock: Arc<dyn Clock>,
}

impl AccessLog {
    /// Open (or create) the access log database at `path`.
    pub fn open(path: impl AsRef<Path>, capacity: usize, clock: Arc<dyn Clock>) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!(path = %path.display(), capacity = capacity, "opening access log");
        Self::with_connection(Connection::open(path)?, capacity, clock)
    }

    /// Open an in-memory access log.
    pub fn open_in_memory(capacity: usize, clock: Arc<dyn Clock>) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, capacity, clock)
    }

    fn with_connection(conn: Connection, capacity: usize, clock: Arc<dyn Clock>) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS access_log (
                id        INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                category  TEXT NOT NULL,
                action    TEXT NOT NULL
            );",
        )
        .map_err(|e| VaultError::MigrationFailed {
            reason: e.to_string(),
        })?;

        Ok(Self {
            conn: Mutex::new(conn),
            capacity: capacity.max(1),
            clock,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| VaultError::LockPoisoned(format!("access log: {e}")))
    }

    /// Append an entry stamped with the current time, dropping the oldest
    /// entries beyond the capacity.
    pub fn append(&self, category: &str, action: &str) -> Result<()> {
        let now = self.clock.now().timestamp_millis();
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO access_log (timestamp, category, action) VALUES (?1, ?2, ?3)",
            params![now, category, action],
        )?;
        let trimmed = tx.execute(
            "DELETE FROM access_log WHERE id NOT IN (
                SELECT id FROM access_log ORDER BY id DESC LIMIT ?1
             )",
            params![self.capacity as i64],
        )?;
        tx.commit()?;

        if trimmed > 0 {
            tracing::trace!(trimmed = trimmed, "trimmed access log");
        }
        Ok(())
    }

    /// Entries in chronological (storage) order.
    pub fn entries(&self) -> Result<Vec<AccessLogEntry>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT timestamp, category, action FROM access_log ORDER BY id ASC")?;
        let entries = stmt
            .query_map([], |row| {
                Ok(AccessLogEntry {
                    timestamp: DateTime::from_timestamp_millis(row.get::<_, i64>(0)?)
                        .unwrap_or_default(),
                    category: row.get(1)?,
                    action: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Rendered lines, most recent first.
    pub fn lines(&self) -> Result<Vec<String>> {
        Ok(self
            .entries()?
            .iter()
            .rev()
            .map(ToString::to_string)
            .collect())
    }

    pub fn len(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM access_log", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Remove every entry.
    pub fn clear(&self) -> Result<()> {
        let conn = self.lock()?;
        let removed = conn.execute("DELETE FROM access_log", [])?;
        tracing::debug!(removed = removed, "cleared access log");
        Ok(())
    }
}
