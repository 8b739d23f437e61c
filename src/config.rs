use crate::log::{TracingLog, UpgradeLog};
use crate::preprocess::ScriptPreprocessor;
use crate::script::Variables;
use std::sync::Arc;
use std::time::Duration;

/// Default name of the journal table.
pub const DEFAULT_JOURNAL_TABLE: &str = "SchemaVersions";

/// Whether a script's statements run inside an explicit transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionMode {
    /// Statements run in autocommit mode, one after another.
    #[default]
    None,
    /// All statements of a script run in one transaction that is rolled back when a
    /// statement fails. MySQL commits DDL implicitly, so there this only protects DML.
    PerScript,
}

/// The order in which pending scripts are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScriptOrder {
    /// Ordinal comparison of script names.
    #[default]
    ByName,
    /// The order in which the caller supplied the scripts.
    AsProvided,
}

/// Settings shared by the script executor, the journal and the upgrade engine.
///
/// Built once with the `with_*` methods, then handed to the components that need it.
/// Nothing changes it afterwards.
#[derive(Clone)]
pub struct UpgradeConfig {
    schema: Option<String>,
    journal_schema: Option<String>,
    journal_table: String,
    variables: Variables,
    variables_enabled: bool,
    execution_timeout: Option<Duration>,
    transaction_mode: TransactionMode,
    split_statements: bool,
    script_order: ScriptOrder,
    preprocessors: Vec<Arc<dyn ScriptPreprocessor>>,
    log: Arc<dyn UpgradeLog>,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            schema: None,
            journal_schema: None,
            journal_table: DEFAULT_JOURNAL_TABLE.to_string(),
            variables: Variables::new(),
            variables_enabled: true,
            execution_timeout: None,
            transaction_mode: TransactionMode::None,
            split_statements: true,
            script_order: ScriptOrder::ByName,
            preprocessors: Vec::new(),
            log: Arc::new(TracingLog),
        }
    }
}

impl UpgradeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schema (MySQL database, PostgreSQL schema, SQLite attached database) that scripts
    /// and the journal live in. Also injected as the `schema` variable.
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Set a custom name for the journal table.
    /// Defaults to "SchemaVersions".
    pub fn with_journal_table(mut self, table: impl Into<String>) -> Self {
        self.journal_table = table.into();
        self
    }

    /// Keep the journal in a different schema than the scripts.
    pub fn with_journal_schema(mut self, schema: impl Into<String>) -> Self {
        self.journal_schema = Some(schema.into());
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.variables.extend(variables);
        self
    }

    /// Turn `${name}` substitution on or off. On by default.
    pub fn with_variables_enabled(mut self, enabled: bool) -> Self {
        self.variables_enabled = enabled;
        self
    }

    /// Per-statement timeout. When unset the driver's own default applies.
    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = Some(timeout);
        self
    }

    pub fn with_transaction_mode(mut self, mode: TransactionMode) -> Self {
        self.transaction_mode = mode;
        self
    }

    /// When disabled, each script is sent to the database as a single statement.
    pub fn with_statement_splitting(mut self, enabled: bool) -> Self {
        self.split_statements = enabled;
        self
    }

    pub fn with_script_order(mut self, order: ScriptOrder) -> Self {
        self.script_order = order;
        self
    }

    /// Append a preprocessor that runs after schema handling and variable substitution.
    pub fn with_preprocessor(mut self, preprocessor: impl ScriptPreprocessor + 'static) -> Self {
        self.preprocessors.push(Arc::new(preprocessor));
        self
    }

    pub fn with_log(mut self, log: impl UpgradeLog + 'static) -> Self {
        self.log = Arc::new(log);
        self
    }

    pub fn with_shared_log(mut self, log: Arc<dyn UpgradeLog>) -> Self {
        self.log = log;
        self
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    /// The schema holding the journal table: the journal override, else the script schema.
    pub fn journal_schema(&self) -> Option<&str> {
        self.journal_schema.as_deref().or(self.schema())
    }

    pub fn journal_table(&self) -> &str {
        &self.journal_table
    }

    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    pub fn variables_enabled(&self) -> bool {
        self.variables_enabled
    }

    pub fn execution_timeout(&self) -> Option<Duration> {
        self.execution_timeout
    }

    pub fn transaction_mode(&self) -> TransactionMode {
        self.transaction_mode
    }

    pub fn split_statements(&self) -> bool {
        self.split_statements
    }

    pub fn script_order(&self) -> ScriptOrder {
        self.script_order
    }

    pub fn preprocessors(&self) -> &[Arc<dyn ScriptPreprocessor>] {
        &self.preprocessors
    }

    pub fn log(&self) -> &dyn UpgradeLog {
        self.log.as_ref()
    }
}

// Manual Debug impl since preprocessors and the log are trait objects
impl std::fmt::Debug for UpgradeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpgradeConfig")
            .field("schema", &self.schema)
            .field("journal_schema", &self.journal_schema)
            .field("journal_table", &self.journal_table)
            .field("variables", &self.variables)
            .field("variables_enabled", &self.variables_enabled)
            .field("execution_timeout", &self.execution_timeout)
            .field("transaction_mode", &self.transaction_mode)
            .field("split_statements", &self.split_statements)
            .field("script_order", &self.script_order)
            .field("preprocessors", &self.preprocessors.len())
            .finish()
    }
}
