use crate::config::UpgradeConfig;
use crate::dialect::{ConnectionFactory, DbConnection, Dialect};
use crate::error::{DbError, Error};
use crate::executor::open_connection;
use chrono::Utc;
use std::sync::Arc;

/// Persistent record of which scripts have been applied.
pub trait Journal {
    /// Names of every recorded script, in the order they were recorded. Empty when the
    /// journal does not exist yet.
    fn get_executed_scripts(&self) -> Result<Vec<String>, Error>;

    /// Record `script_name` as applied now. Creates the journal if needed.
    fn store_executed(&self, script_name: &str) -> Result<(), Error>;
}

/// A journal kept in a database table with `Id`, `ScriptName` and `Applied` columns.
///
/// The table (and its schema, where the dialect can create one) is created with
/// `IF NOT EXISTS` on first use, so concurrent first runs do not conflict on creation.
pub struct TableJournal<D: Dialect> {
    dialect: D,
    connection_factory: ConnectionFactory<D::Connection>,
    config: Arc<UpgradeConfig>,
}

impl<D: Dialect> TableJournal<D> {
    pub fn new(
        dialect: D,
        connection_factory: ConnectionFactory<D::Connection>,
        config: Arc<UpgradeConfig>,
    ) -> Self {
        Self {
            dialect,
            connection_factory,
            config,
        }
    }

    /// Quoted, schema-qualified journal table name.
    pub fn table_name(&self) -> String {
        self.dialect
            .qualified_name(self.config.journal_schema(), self.config.journal_table())
    }

    /// Open a connection with the journal's schema and table in place.
    fn connect_ensured(
        &self,
        on_error: impl Fn(DbError) -> Error,
    ) -> Result<D::Connection, Error> {
        let mut connection = open_connection(&self.dialect, &self.connection_factory)?;
        if let Some(schema) = self.config.journal_schema() {
            if let Some(sql) = self.dialect.ensure_schema_sql(schema) {
                connection.execute(&sql).map_err(&on_error)?;
            }
        }
        let table = self.table_name();
        tracing::debug!(table = %table, "Ensuring journal table exists");
        connection
            .execute(&self.dialect.journal_table_ddl(&table))
            .map_err(&on_error)?;
        Ok(connection)
    }
}

impl<D: Dialect> Journal for TableJournal<D> {
    fn get_executed_scripts(&self) -> Result<Vec<String>, Error> {
        let result = self
            .connect_ensured(Error::JournalRead)
            .and_then(|mut connection| {
                connection
                    .query_strings(&self.dialect.journal_select_sql(&self.table_name()))
                    .map_err(Error::JournalRead)
            });
        match result {
            Ok(scripts) => {
                tracing::debug!(count = scripts.len(), "Read journal");
                Ok(scripts)
            }
            Err(error) => {
                self.config.log().write_error(format_args!("{}", error));
                Err(error)
            }
        }
    }

    fn store_executed(&self, script_name: &str) -> Result<(), Error> {
        let to_journal_error = |source: DbError| Error::JournalWrite {
            script: script_name.to_string(),
            source,
        };
        let result = self.connect_ensured(to_journal_error).and_then(|mut connection| {
            connection
                .insert_journal_entry(
                    &self.dialect.journal_insert_sql(&self.table_name()),
                    script_name,
                    Utc::now(),
                )
                .map_err(to_journal_error)
        });
        if let Err(error) = &result {
            self.config.log().write_error(format_args!("{}", error));
        }
        result
    }
}

/// A journal that remembers nothing, so every script runs on every upgrade.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullJournal;

impl Journal for NullJournal {
    fn get_executed_scripts(&self) -> Result<Vec<String>, Error> {
        Ok(Vec::new())
    }

    fn store_executed(&self, _script_name: &str) -> Result<(), Error> {
        Ok(())
    }
}
