pub mod migrations;
pub mod models;
pub mod queries;

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::{error, info};

use colloquy_types::error::PersistenceError;

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        migrations::run(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` inside one `BEGIN IMMEDIATE` transaction.
    ///
    /// Commits when `f` succeeds and rolls back when it fails. A failed
    /// rollback is reported separately because the connection state is then
    /// unknown.
    pub fn with_tx<F, T>(&self, f: F) -> Result<T, PersistenceError>
    where
        F: FnOnce(&Transaction<'_>) -> anyhow::Result<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| PersistenceError::CommitFailure(format!("DB lock poisoned: {}", e)))?;

        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| PersistenceError::CommitFailure(e.to_string()))?;

        match f(&tx) {
            Ok(value) => {
                tx.commit()
                    .map_err(|e| PersistenceError::CommitFailure(e.to_string()))?;
                Ok(value)
            }
            Err(op_err) => {
                if let Err(rb_err) = tx.rollback() {
                    error!("Rollback failed after '{}': {}", op_err, rb_err);
                    return Err(PersistenceError::RollbackFailure(rb_err.to_string()));
                }
                Err(PersistenceError::CommitFailure(op_err.to_string()))
            }
        }
    }
}

/// Fixed-width UTC timestamp text. Lexicographic order equals time order,
/// which the turn ordering queries rely on.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}
