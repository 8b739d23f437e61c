//! The per-database capability interface.
//!
//! A [Dialect] describes how one database splits scripts, creates schemas and shapes
//! the journal table. [DbConnection] adapts the driver's connection type to the few
//! operations the executor and journal need. Everything else is shared.

use crate::error::DbError;
use crate::preprocess::SCHEMA_TOKEN;
use crate::split::{split_statements, SplitRules, Statement};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Creates a new, exclusively owned connection. Called once per script execution and
/// once per journal operation.
pub type ConnectionFactory<C> = Arc<dyn Fn() -> Result<C, DbError> + Send + Sync>;

/// The operations performed on a live database session.
pub trait DbConnection {
    /// Run one statement, discarding any rows it returns.
    fn execute(&mut self, sql: &str) -> Result<(), DbError>;

    /// Run a query and return the first column of every row as text.
    fn query_strings(&mut self, sql: &str) -> Result<Vec<String>, DbError>;

    /// Run the journal insert `sql`, binding the script name and applied time as its
    /// two parameters.
    fn insert_journal_entry(
        &mut self,
        sql: &str,
        script_name: &str,
        applied: DateTime<Utc>,
    ) -> Result<(), DbError>;

    /// Bound how long each subsequent statement on this session may run.
    fn set_statement_timeout(&mut self, timeout: Duration) -> Result<(), DbError>;

    /// Called before each statement once a timeout is set. Sessions that track the
    /// timeout on the client side start a new deadline here; server-enforced timeouts
    /// need nothing.
    fn restart_statement_timeout(&mut self, _timeout: Duration) {}
}

/// Database-specific behavior, implemented once per supported database.
pub trait Dialect: Send + Sync {
    type Connection: DbConnection + 'static;

    /// Human-readable database name used in log messages and errors.
    fn name(&self) -> &'static str;

    fn split_rules(&self) -> SplitRules;

    fn split_statements(&self, contents: &str) -> Vec<Statement> {
        split_statements(contents, &self.split_rules())
    }

    fn quote_identifier(&self, identifier: &str) -> String;

    /// Statement creating `schema` if it is missing, or `None` when the database has
    /// no creatable namespaces.
    fn ensure_schema_sql(&self, schema: &str) -> Option<String>;

    /// `CREATE TABLE IF NOT EXISTS` statement for the journal at `table`, which is
    /// already quoted and qualified.
    fn journal_table_ddl(&self, table: &str) -> String;

    fn journal_select_sql(&self, table: &str) -> String {
        format!("SELECT ScriptName FROM {} ORDER BY Id", table)
    }

    /// Insert statement taking the script name and applied time as parameters.
    fn journal_insert_sql(&self, table: &str) -> String;

    fn begin_transaction_sql(&self) -> &'static str {
        "BEGIN"
    }

    fn schema_placeholder_token(&self) -> &'static str {
        SCHEMA_TOKEN
    }

    /// Quote `name`, prefixed by the quoted schema when one is given.
    fn qualified_name(&self, schema: Option<&str>, name: &str) -> String {
        match schema {
            Some(schema) => format!(
                "{}.{}",
                self.quote_identifier(schema),
                self.quote_identifier(name)
            ),
            None => self.quote_identifier(name),
        }
    }
}

/// Wrap `identifier` in `quote`, doubling any embedded quote characters.
pub(crate) fn quote_with(identifier: &str, quote: char) -> String {
    let mut quoted = String::with_capacity(identifier.len() + 2);
    quoted.push(quote);
    for c in identifier.chars() {
        if c == quote {
            quoted.push(quote);
        }
        quoted.push(c);
    }
    quoted.push(quote);
    quoted
}
