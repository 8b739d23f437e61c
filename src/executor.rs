use crate::config::{TransactionMode, UpgradeConfig};
use crate::dialect::{ConnectionFactory, DbConnection, Dialect};
use crate::error::Error;
use crate::preprocess::{
    PreprocessorPipeline, SchemaTokenPreprocessor, StripSchemaPreprocessor,
    VariableSubstitutionPreprocessor,
};
use crate::script::{merge_variables, Script, Variables};
use crate::split::Statement;
use std::sync::Arc;

/// Outcome of a successfully executed script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionSummary {
    pub statements_executed: usize,
}

/// Runs scripts against a database.
pub trait ScriptExecutor {
    /// Preprocess, split and execute `script`. Stops at the first failing statement.
    fn execute(&self, script: &Script, variables: &Variables) -> Result<ExecutionSummary, Error>;

    /// Create the configured schema if it does not exist. Safe to call on every run.
    fn ensure_schema(&self) -> Result<(), Error>;

    /// Open and release a connection, to check the target is reachable.
    fn try_connect(&self) -> Result<(), Error>;
}

/// Open a connection through `factory`, mapping failures to [Error::Connection].
pub(crate) fn open_connection<D: Dialect>(
    dialect: &D,
    factory: &ConnectionFactory<D::Connection>,
) -> Result<D::Connection, Error> {
    factory().map_err(|source| Error::Connection {
        dialect: dialect.name(),
        source,
    })
}

/// The [ScriptExecutor] for any [Dialect].
///
/// Each call to [execute](ScriptExecutor::execute) opens its own connection from the
/// factory and drops it before returning, whatever the outcome.
pub struct SqlScriptExecutor<D: Dialect> {
    dialect: D,
    connection_factory: ConnectionFactory<D::Connection>,
    config: Arc<UpgradeConfig>,
}

impl<D: Dialect> SqlScriptExecutor<D> {
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

    pub fn dialect(&self) -> &D {
        &self.dialect
    }

    /// The preprocessing stages applied to every script, in order.
    pub fn pipeline(&self, variables: &Variables) -> PreprocessorPipeline {
        let token = self.dialect.schema_placeholder_token();
        let mut pipeline = match self.config.schema() {
            Some(schema) => PreprocessorPipeline::new().with_stage(SchemaTokenPreprocessor::new(
                token,
                self.dialect.quote_identifier(schema),
            )),
            None => PreprocessorPipeline::new().with_stage(StripSchemaPreprocessor::new(token)),
        };
        if self.config.variables_enabled() {
            let variables = merge_variables(variables, self.config.schema());
            let dollar_quotes = self.dialect.split_rules().dollar_quotes;
            pipeline = pipeline.with_stage(
                VariableSubstitutionPreprocessor::new(variables).with_dollar_quotes(dollar_quotes),
            );
        }
        for preprocessor in self.config.preprocessors() {
            pipeline.push(Arc::clone(preprocessor));
        }
        pipeline
    }

    /// Preprocess and split `script` without touching the database.
    pub fn prepare(&self, script: &Script, variables: &Variables) -> Result<Vec<Statement>, Error> {
        let contents = self
            .pipeline(variables)
            .process(script.contents())
            .map_err(|source| Error::Preprocess {
                script: script.name().to_string(),
                source,
            })?;

        let statements = self.dialect.split_statements(&contents);
        if self.config.split_statements() || statements.is_empty() {
            return Ok(statements);
        }
        let leading = contents.len() - contents.trim_start().len();
        Ok(vec![Statement {
            sql: contents.trim().to_string(),
            line: contents[..leading].matches('\n').count() + 1,
        }])
    }

    fn connect(&self) -> Result<D::Connection, Error> {
        let mut connection = open_connection(&self.dialect, &self.connection_factory)?;
        if let Some(timeout) = self.config.execution_timeout() {
            connection
                .set_statement_timeout(timeout)
                .map_err(|source| Error::Connection {
                    dialect: self.dialect.name(),
                    source,
                })?;
        }
        Ok(connection)
    }

    fn run_statements(
        &self,
        connection: &mut D::Connection,
        script: &Script,
        statements: &[Statement],
    ) -> Result<ExecutionSummary, Error> {
        let transactional = self.config.transaction_mode() == TransactionMode::PerScript;
        if transactional {
            connection
                .execute(self.dialect.begin_transaction_sql())
                .map_err(|source| Error::Transaction {
                    script: script.name().to_string(),
                    source,
                })?;
        }

        let timeout = self.config.execution_timeout();
        for (index, statement) in statements.iter().enumerate() {
            tracing::trace!(index, line = statement.line, "Executing statement");
            if let Some(timeout) = timeout {
                connection.restart_statement_timeout(timeout);
            }
            if let Err(source) = connection.execute(&statement.sql) {
                if transactional {
                    self.rollback(connection, script);
                }
                return Err(Error::Statement {
                    script: script.name().to_string(),
                    index,
                    line: statement.line,
                    source,
                });
            }
        }

        if transactional {
            if let Some(timeout) = timeout {
                connection.restart_statement_timeout(timeout);
            }
            connection
                .execute("COMMIT")
                .map_err(|source| Error::Transaction {
                    script: script.name().to_string(),
                    source,
                })?;
        }
        Ok(ExecutionSummary {
            statements_executed: statements.len(),
        })
    }

    fn rollback(&self, connection: &mut D::Connection, script: &Script) {
        if let Err(error) = connection.execute("ROLLBACK") {
            self.config.log().write_error(format_args!(
                "Rollback of script '{}' failed: {}",
                script.name(),
                error
            ));
        }
    }

    fn log_failure(&self, script: &Script, error: &Error) {
        let log = self.config.log();
        match error {
            Error::Statement {
                index,
                line,
                source,
                ..
            } => {
                log.write_information(format_args!(
                    "{} error occurred in script '{}'",
                    self.dialect.name(),
                    script.name()
                ));
                log.write_error(format_args!(
                    "Script block number: {}; Block line: {}; Error code: {}; Message: {}",
                    index,
                    line,
                    source.code.as_deref().unwrap_or("none"),
                    source.message
                ));
            }
            _ => log.write_information(format_args!(
                "Error occurred in script '{}'",
                script.name()
            )),
        }
        log.write_error(format_args!("{}", error));
    }
}

impl<D: Dialect> ScriptExecutor for SqlScriptExecutor<D> {
    fn execute(&self, script: &Script, variables: &Variables) -> Result<ExecutionSummary, Error> {
        self.config.log().write_information(format_args!(
            "Executing {} script '{}'",
            self.dialect.name(),
            script.name()
        ));

        let result = self.prepare(script, variables).and_then(|statements| {
            if statements.is_empty() {
                self.config.log().write_information(format_args!(
                    "Script '{}' contains no statements",
                    script.name()
                ));
                return Ok(ExecutionSummary {
                    statements_executed: 0,
                });
            }
            let mut connection = self.connect()?;
            self.run_statements(&mut connection, script, &statements)
        });

        if let Err(error) = &result {
            self.log_failure(script, error);
        }
        result
    }

    fn ensure_schema(&self) -> Result<(), Error> {
        let Some(schema) = self.config.schema() else {
            return Ok(());
        };
        let Some(sql) = self.dialect.ensure_schema_sql(schema) else {
            tracing::debug!(
                schema,
                dialect = self.dialect.name(),
                "Schemas cannot be created, skipping"
            );
            return Ok(());
        };

        self.config
            .log()
            .write_information(format_args!("Ensuring schema '{}' exists", schema));
        let result = self.connect().and_then(|mut connection| {
            connection.execute(&sql).map_err(|source| Error::Schema {
                schema: schema.to_string(),
                source,
            })
        });
        if let Err(error) = &result {
            self.config.log().write_error(format_args!("{}", error));
        }
        result
    }

    fn try_connect(&self) -> Result<(), Error> {
        let result = self.connect().map(drop);
        if let Err(error) = &result {
            self.config.log().write_error(format_args!("{}", error));
        }
        result
    }
}
