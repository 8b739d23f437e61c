//! SQLite support, backed by `rusqlite`.
//!
//! ```
//! use upshift::{sqlite, Script, UpgradeConfig};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let engine = sqlite::engine_from_path(dir.path().join("app.db"), UpgradeConfig::new());
//!
//! let scripts = vec![
//!     Script::new("0001_create_users.sql", "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);"),
//!     Script::new("0002_add_email.sql", "ALTER TABLE users ADD COLUMN email TEXT;"),
//! ];
//! let report = engine.perform_upgrade(&scripts);
//! assert!(report.successful());
//! assert_eq!(report.scripts_run, vec!["0001_create_users.sql", "0002_add_email.sql"]);
//! assert!(!engine.is_upgrade_required(&scripts).unwrap());
//! ```
//!
//! SQLite has no creatable schemas: a configured schema names an attached database
//! such as `main`, and is only used to qualify `$schema$` tokens and the journal table.
//!
//! `CREATE TRIGGER` bodies stay in one statement, so trigger scripts run with statement
//! splitting on.
//!
//! The execution timeout bounds each statement through a progress handler, which
//! interrupts the statement (`SQLITE_INTERRUPT`) once its deadline passes. It is also
//! the connection's busy timeout.

use crate::config::UpgradeConfig;
use crate::dialect::{quote_with, ConnectionFactory, DbConnection, Dialect};
use crate::engine::UpgradeEngine;
use crate::error::DbError;
use crate::split::SplitRules;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Virtual machine instructions between deadline checks.
const PROGRESS_INTERVAL: i32 = 1000;

impl From<rusqlite::Error> for DbError {
    fn from(error: rusqlite::Error) -> Self {
        let message = error.to_string();
        match error {
            // offset is the 0-based byte offset of the rejected token, or -1
            rusqlite::Error::SqlInputError { error, offset, .. } => DbError {
                code: Some(error.extended_code.to_string()),
                sql_state: None,
                position: u32::try_from(offset).ok().map(|offset| offset + 1),
                message,
            },
            other => DbError {
                code: other
                    .sqlite_error()
                    .map(|failure| failure.extended_code.to_string()),
                sql_state: None,
                position: None,
                message,
            },
        }
    }
}

fn arm_deadline(connection: &Connection, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    connection.progress_handler(PROGRESS_INTERVAL, Some(move || Instant::now() >= deadline));
}

impl DbConnection for Connection {
    fn execute(&mut self, sql: &str) -> Result<(), DbError> {
        self.execute_batch(sql)?;
        Ok(())
    }

    fn query_strings(&mut self, sql: &str) -> Result<Vec<String>, DbError> {
        let mut statement = self.prepare(sql)?;
        let values = statement
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(values)
    }

    fn insert_journal_entry(
        &mut self,
        sql: &str,
        script_name: &str,
        applied: DateTime<Utc>,
    ) -> Result<(), DbError> {
        Connection::execute(self, sql, params![script_name, applied.to_rfc3339()])?;
        Ok(())
    }

    fn set_statement_timeout(&mut self, timeout: Duration) -> Result<(), DbError> {
        self.busy_timeout(timeout)?;
        arm_deadline(self, timeout);
        Ok(())
    }

    fn restart_statement_timeout(&mut self, timeout: Duration) {
        arm_deadline(self, timeout);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    type Connection = Connection;

    fn name(&self) -> &'static str {
        "SQLite"
    }

    fn split_rules(&self) -> SplitRules {
        SplitRules::SQLITE
    }

    fn quote_identifier(&self, identifier: &str) -> String {
        quote_with(identifier, '"')
    }

    fn ensure_schema_sql(&self, _schema: &str) -> Option<String> {
        None
    }

    fn journal_table_ddl(&self, table: &str) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (
                Id INTEGER PRIMARY KEY AUTOINCREMENT,
                ScriptName TEXT NOT NULL UNIQUE,
                Applied TEXT NOT NULL
            )",
            table
        )
    }

    fn journal_insert_sql(&self, table: &str) -> String {
        format!("INSERT INTO {} (ScriptName, Applied) VALUES (?1, ?2)", table)
    }
}

/// A factory opening the database file at `path`, creating it if needed.
pub fn connection_factory(path: impl AsRef<Path>) -> ConnectionFactory<Connection> {
    let path = path.as_ref().to_path_buf();
    Arc::new(move || Connection::open(&path).map_err(DbError::from))
}

pub fn engine(
    connection_factory: ConnectionFactory<Connection>,
    config: UpgradeConfig,
) -> UpgradeEngine {
    UpgradeEngine::for_dialect(SqliteDialect, connection_factory, config)
}

/// An engine for the database file at `path`.
pub fn engine_from_path(path: impl AsRef<Path>, config: UpgradeConfig) -> UpgradeEngine {
    engine(connection_factory(path), config)
}
