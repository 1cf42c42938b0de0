//! Persistent audit and alert logs.
//!
//! Both live in `audit.db` behind one mutex, as two tables with independent
//! retention:
//!
//! - `audit_log` — one row per sensitive action: timestamp, action, status.
//! - `alerts` — one row per suspected-abuse alert.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use safeguard_core::{AuditConfig, Clock};
use serde::{Deserialize, Serialize};

use crate::error::{AuditError, Result};

/// Timestamp format written into audit entries.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Kind tag stored with every alert.
pub const ALERT_KIND: &str = "ALERT";

/// Outcome recorded for a sensitive action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditStatus {
    Success,
    RateLimited,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::RateLimited => "RATE_LIMITED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SUCCESS" => Some(Self::Success),
            "RATE_LIMITED" => Some(Self::RateLimited),
            _ => None,
        }
    }
}

impl std::fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audit-log entry, in the shape it is exported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditEntry {
    pub timestamp: String,
    pub action: String,
    pub status: AuditStatus,
}

/// One alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

/// The audit database.
pub struct AuditLog {
    conn: Mutex<Connection>,
    audit_max: Option<usize>,
    alert_max: Option<usize>,
    clock: Arc<dyn Clock>,
}

impl AuditLog {
    /// Open (or create) the audit database at `path`.
    pub fn open(path: impl AsRef<Path>, config: &AuditConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!(path = %path.display(), "opening audit log");
        Self::with_connection(Connection::open(path)?, config, clock)
    }

    pub fn open_in_memory(config: &AuditConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, config, clock)
    }

    fn with_connection(
        conn: Connection,
        config: &AuditConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS audit_log (
                id        INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                action    TEXT NOT NULL,
                status    TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS alerts (
                id        INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                type      TEXT NOT NULL,
                message   TEXT NOT NULL
            );",
        )
        .map_err(|e| AuditError::MigrationFailed {
            reason: e.to_string(),
        })?;

        Ok(Self {
            conn: Mutex::new(conn),
            audit_max: config.audit_log_max_entries,
            alert_max: config.alert_log_max_entries,
            clock,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| AuditError::LockPoisoned(format!("audit log: {e}")))
    }

    // -- Audit entries ------------------------------------------------------

    /// Append an audit entry stamped with the current time.
    pub fn record(&self, action: &str, status: AuditStatus) -> Result<()> {
        let timestamp = self.clock.now().format(TIMESTAMP_FORMAT).to_string();
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO audit_log (timestamp, action, status) VALUES (?1, ?2, ?3)",
            params![timestamp, action, status.as_str()],
        )?;
        trim(&tx, "audit_log", self.audit_max)?;
        tx.commit()?;

        tracing::debug!(action = action, status = %status, "audit entry recorded");
        Ok(())
    }

    /// Audit entries in storage order.
    pub fn entries(&self) -> Result<Vec<AuditEntry>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT timestamp, action, status FROM audit_log ORDER BY id ASC")?;
        let entries = stmt
            .query_map([], map_audit_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn entry_count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Remove every audit entry. Alerts are kept.
    pub fn clear_entries(&self) -> Result<()> {
        let conn = self.lock()?;
        let removed = conn.execute("DELETE FROM audit_log", [])?;
        tracing::info!(removed = removed, "cleared audit log");
        Ok(())
    }

    // -- Alerts -------------------------------------------------------------

    /// Append an alert stamped with the current time.
    pub fn record_alert(&self, message: &str) -> Result<()> {
        let now = self.clock.now().timestamp_millis();
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO alerts (timestamp, type, message) VALUES (?1, ?2, ?3)",
            params![now, ALERT_KIND, message],
        )?;
        trim(&tx, "alerts", self.alert_max)?;
        tx.commit()?;
        Ok(())
    }

    /// Alerts in storage order.
    pub fn alert_entries(&self) -> Result<Vec<AlertEntry>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT timestamp, type, message FROM alerts ORDER BY id ASC")?;
        let alerts = stmt
            .query_map([], |row| {
                Ok(AlertEntry {
                    timestamp: DateTime::from_timestamp_millis(row.get::<_, i64>(0)?)
                        .unwrap_or_default(),
                    kind: row.get(1)?,
                    message: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(alerts)
    }
}

/// Drop the oldest rows of `table` beyond `max`. `None` keeps everything.
fn trim(conn: &Connection, table: &str, max: Option<usize>) -> Result<usize> {
    let Some(max) = max else {
        return Ok(0);
    };
    let trimmed = conn.execute(
        &format!(
            "DELETE FROM {table} WHERE id NOT IN (
                SELECT id FROM {table} ORDER BY id DESC LIMIT ?1
             )"
        ),
        params![max as i64],
    )?;
    if trimmed > 0 {
        tracing::trace!(table = table, trimmed = trimmed, "trimmed log");
    }
    Ok(trimmed)
}

fn map_audit_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditEntry> {
    let status: String = row.get(2)?;
    let status = AuditStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown audit status {status:?}").into(),
        )
    })?;
    Ok(AuditEntry {
        timestamp: row.get(0)?,
        action: row.get(1)?,
        status,
    })
}
