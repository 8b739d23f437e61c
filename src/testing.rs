//! Test doubles for code that drives an upgrade.
//!
//! [RecordingLog] captures log output, [MemoryJournal] keeps the journal in memory and
//! [RecordingDatabase] stands in for a database connection, recording every statement
//! it is sent and failing the ones it is told to.
//!
//! ```
//! use upshift::testing::{MemoryJournal, RecordingDatabase, RecordingDialect};
//! use upshift::{Script, UpgradeConfig, UpgradeEngine};
//!
//! let database = RecordingDatabase::new();
//! let journal = MemoryJournal::new();
//! let engine = UpgradeEngine::for_dialect(
//!     RecordingDialect,
//!     database.connection_factory(),
//!     UpgradeConfig::new(),
//! )
//! .with_journal(journal.clone());
//!
//! let report = engine.perform_upgrade(&[Script::new("0001.sql", "CREATE TABLE a (id INT)")]);
//! assert!(report.successful());
//! assert_eq!(database.executed(), vec!["CREATE TABLE a (id INT)"]);
//! assert_eq!(journal.entries(), vec!["0001.sql"]);
//! ```

use crate::dialect::{quote_with, ConnectionFactory, DbConnection, Dialect};
use crate::error::{DbError, Error};
use crate::journal::Journal;
use crate::log::UpgradeLog;
use crate::split::SplitRules;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Information,
    Warning,
    Error,
}

/// An [UpgradeLog] that keeps every message. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct RecordingLog {
    lines: Arc<Mutex<Vec<(LogLevel, String)>>>,
}

impl RecordingLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<(LogLevel, String)> {
        lock(&self.lines).clone()
    }

    /// Messages written at `level`, oldest first.
    pub fn messages(&self, level: LogLevel) -> Vec<String> {
        lock(&self.lines)
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, message)| message.clone())
            .collect()
    }

    fn push(&self, level: LogLevel, message: fmt::Arguments<'_>) {
        lock(&self.lines).push((level, message.to_string()));
    }
}

impl UpgradeLog for RecordingLog {
    fn write_information(&self, message: fmt::Arguments<'_>) {
        self.push(LogLevel::Information, message)
    }

    fn write_warning(&self, message: fmt::Arguments<'_>) {
        self.push(LogLevel::Warning, message)
    }

    fn write_error(&self, message: fmt::Arguments<'_>) {
        self.push(LogLevel::Error, message)
    }
}

#[derive(Debug, Default)]
struct MemoryJournalState {
    entries: Vec<String>,
    fail_reads: bool,
    fail_writes_for: Vec<String>,
}

/// A [Journal] held in memory. Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryJournal {
    state: Arc<Mutex<MemoryJournalState>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// A journal that already records `names`.
    pub fn with_entries<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let journal = Self::new();
        lock(&journal.state)
            .entries
            .extend(names.into_iter().map(Into::into));
        journal
    }

    pub fn entries(&self) -> Vec<String> {
        lock(&self.state).entries.clone()
    }

    /// Make every read fail.
    pub fn fail_reads(&self) {
        lock(&self.state).fail_reads = true;
    }

    /// Make recording `script_name` fail.
    pub fn fail_writes_for(&self, script_name: impl Into<String>) {
        lock(&self.state).fail_writes_for.push(script_name.into());
    }
}

impl Journal for MemoryJournal {
    fn get_executed_scripts(&self) -> Result<Vec<String>, Error> {
        let state = lock(&self.state);
        if state.fail_reads {
            return Err(Error::JournalRead(DbError::new("journal is unavailable")));
        }
        Ok(state.entries.clone())
    }

    fn store_executed(&self, script_name: &str) -> Result<(), Error> {
        let mut state = lock(&self.state);
        if state.fail_writes_for.iter().any(|name| name == script_name) {
            return Err(Error::JournalWrite {
                script: script_name.to_string(),
                source: DbError::new("journal is read-only"),
            });
        }
        state.entries.push(script_name.to_string());
        Ok(())
    }
}

#[derive(Debug, Default)]
struct DatabaseState {
    executed: Vec<String>,
    journal: Vec<(String, DateTime<Utc>)>,
    failing: Vec<String>,
    refuse_connections: bool,
    connections_opened: usize,
    open_connections: usize,
    timeouts: Vec<Duration>,
    timeout_restarts: Vec<Duration>,
}

/// A fake database that records what it is asked to do.
///
/// Statements are appended to [executed](RecordingDatabase::executed) unless they
/// contain a fragment registered with [fail_on](RecordingDatabase::fail_on), in which
/// case they fail with MySQL's syntax error code `1064`. Journal inserts go to a
/// separate list that journal queries read back.
#[derive(Debug, Clone, Default)]
pub struct RecordingDatabase {
    state: Arc<Mutex<DatabaseState>>,
}

impl RecordingDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(&self, fragment: impl Into<String>) {
        lock(&self.state).failing.push(fragment.into());
    }

    pub fn refuse_connections(&self, refuse: bool) {
        lock(&self.state).refuse_connections = refuse;
    }

    pub fn connection_factory(&self) -> ConnectionFactory<RecordingConnection> {
        let state = Arc::clone(&self.state);
        Arc::new(move || {
            let mut guard = lock(&state);
            if guard.refuse_connections {
                return Err(DbError::new("connection refused").with_code("2003"));
            }
            guard.connections_opened += 1;
            guard.open_connections += 1;
            Ok(RecordingConnection {
                state: Arc::clone(&state),
            })
        })
    }

    pub fn executed(&self) -> Vec<String> {
        lock(&self.state).executed.clone()
    }

    /// Script names recorded through journal inserts, with their applied times.
    pub fn journal(&self) -> Vec<(String, DateTime<Utc>)> {
        lock(&self.state).journal.clone()
    }

    pub fn connections_opened(&self) -> usize {
        lock(&self.state).connections_opened
    }

    /// Connections handed out and not yet dropped.
    pub fn open_connections(&self) -> usize {
        lock(&self.state).open_connections
    }

    pub fn timeouts(&self) -> Vec<Duration> {
        lock(&self.state).timeouts.clone()
    }

    /// Timeouts passed to `restart_statement_timeout`, one per statement started.
    pub fn timeout_restarts(&self) -> Vec<Duration> {
        lock(&self.state).timeout_restarts.clone()
    }
}

/// A session on a [RecordingDatabase].
#[derive(Debug)]
pub struct RecordingConnection {
    state: Arc<Mutex<DatabaseState>>,
}

impl RecordingConnection {
    fn check(&self, sql: &str) -> Result<(), DbError> {
        let state = lock(&self.state);
        match state.failing.iter().find(|fragment| sql.contains(fragment.as_str())) {
            Some(fragment) => Err(DbError::new(format!(
                "You have an error in your SQL syntax near '{}'",
                fragment
            ))
            .with_code("1064")),
            None => Ok(()),
        }
    }
}

impl DbConnection for RecordingConnection {
    fn execute(&mut self, sql: &str) -> Result<(), DbError> {
        self.check(sql)?;
        lock(&self.state).executed.push(sql.to_string());
        Ok(())
    }

    fn query_strings(&mut self, sql: &str) -> Result<Vec<String>, DbError> {
        self.check(sql)?;
        Ok(lock(&self.state)
            .journal
            .iter()
            .map(|(name, _)| name.clone())
            .collect())
    }

    fn insert_journal_entry(
        &mut self,
        sql: &str,
        script_name: &str,
        applied: DateTime<Utc>,
    ) -> Result<(), DbError> {
        self.check(sql)?;
        lock(&self.state)
            .journal
            .push((script_name.to_string(), applied));
        Ok(())
    }

    fn set_statement_timeout(&mut self, timeout: Duration) -> Result<(), DbError> {
        lock(&self.state).timeouts.push(timeout);
        Ok(())
    }

    fn restart_statement_timeout(&mut self, timeout: Duration) {
        lock(&self.state).timeout_restarts.push(timeout);
    }
}

impl Drop for RecordingConnection {
    fn drop(&mut self) {
        lock(&self.state).open_connections -= 1;
    }
}

/// ANSI-flavoured [Dialect] for [RecordingDatabase].
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordingDialect;

impl Dialect for RecordingDialect {
    type Connection = RecordingConnection;

    fn name(&self) -> &'static str {
        "recording"
    }

    fn split_rules(&self) -> SplitRules {
        SplitRules::ANSI
    }

    fn quote_identifier(&self, identifier: &str) -> String {
        quote_with(identifier, '"')
    }

    fn ensure_schema_sql(&self, schema: &str) -> Option<String> {
        Some(format!(
            "CREATE SCHEMA IF NOT EXISTS {}",
            self.quote_identifier(schema)
        ))
    }

    fn journal_table_ddl(&self, table: &str) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (Id INTEGER PRIMARY KEY, ScriptName VARCHAR(255) NOT NULL UNIQUE, Applied TIMESTAMP NOT NULL)",
            table
        )
    }

    fn journal_insert_sql(&self, table: &str) -> String {
        format!("INSERT INTO {} (ScriptName, Applied) VALUES (?, ?)", table)
    }
}
