//! Durable state: the outcome log and test registry in SQLite, and report
//! artifacts on disk.
mod outcomes;
mod registry;
mod reports;

#[cfg(test)]
mod tests;

use std::path::Path;
use std::time::Duration;

use tokio_rusqlite::Connection;

use crate::error::StoreError;

pub use outcomes::OutcomeRecorder;
pub use registry::StoredTest;
pub use reports::{JsonReportSink, ReportSink, read_report_file};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tests (
    id TEXT PRIMARY KEY,
    registration TEXT NOT NULL,
    status TEXT NOT NULL,
    registered_at INTEGER NOT NULL,
    started_at INTEGER,
    ended_at INTEGER,
    error_info TEXT,
    rejected_requests INTEGER NOT NULL DEFAULT 0,
    workload_hash TEXT
);
CREATE TABLE IF NOT EXISTS outcomes (
    test_id TEXT NOT NULL,
    request_id INTEGER NOT NULL,
    scheduled_at_us INTEGER NOT NULL,
    sent_at_us INTEGER NOT NULL,
    first_token_at_us INTEGER,
    token_times TEXT NOT NULL,
    completed_at_us INTEGER NOT NULL,
    result TEXT NOT NULL,
    token_count INTEGER NOT NULL,
    status_code INTEGER,
    error TEXT,
    PRIMARY KEY (test_id, request_id)
);
";

/// Shared handle to the SQLite database. Clones share one connection whose
/// worker thread serializes every statement.
#[derive(Debug, Clone)]
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens (or creates) the database file and applies the schema.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be opened or the schema fails.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StoreError::Io {
                    context: "create database directory",
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        let conn = Connection::open(path)
            .await
            .map_err(|source| StoreError::Sqlite {
                context: "open database",
                source,
            })?;
        Self::init(conn).await
    }

    /// Private in-memory database, used by `run --in-memory` and tests.
    ///
    /// # Errors
    ///
    /// Returns an error when the schema cannot be applied.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|source| StoreError::Sqlite {
                context: "open in-memory database",
                source,
            })?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.call(|conn| {
            conn.busy_timeout(BUSY_TIMEOUT)?;
            conn.execute_batch(SCHEMA)?;
            // Registries created before the fingerprint column existed.
            let has_hash: bool = conn.query_row(
                "SELECT COUNT(*) > 0 FROM pragma_table_info('tests') WHERE name = 'workload_hash'",
                [],
                |row| row.get(0),
            )?;
            if !has_hash {
                conn.execute_batch("ALTER TABLE tests ADD COLUMN workload_hash TEXT")?;
            }
            Ok(())
        })
        .await
        .map_err(|source| StoreError::Sqlite {
            context: "apply schema",
            source,
        })?;
        Ok(Self { conn })
    }

    pub(crate) const fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}
