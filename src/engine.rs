use crate::config::{ScriptOrder, UpgradeConfig};
use crate::dialect::{ConnectionFactory, Dialect};
use crate::error::Error;
use crate::executor::{ScriptExecutor, SqlScriptExecutor};
use crate::journal::{Journal, TableJournal};
use crate::script::Script;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The script that stopped an upgrade, and why.
#[derive(Debug, Clone, PartialEq)]
pub struct UpgradeFailure {
    /// `None` when the upgrade failed before any script started, for example while
    /// creating the schema or reading the journal.
    pub script: Option<String>,
    pub error: Error,
}

/// Outcome of [UpgradeEngine::perform_upgrade] and [UpgradeEngine::mark_as_executed].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpgradeReport {
    /// Scripts executed and journaled during this run, in execution order.
    pub scripts_run: Vec<String>,
    pub statements_executed: usize,
    pub failure: Option<UpgradeFailure>,
}

impl UpgradeReport {
    pub fn successful(&self) -> bool {
        self.failure.is_none()
    }
}

/// Applies scripts that the journal has not seen yet, one at a time, and records each
/// as soon as it succeeds. Stops at the first failure.
pub struct UpgradeEngine {
    executor: Box<dyn ScriptExecutor>,
    journal: Box<dyn Journal>,
    config: Arc<UpgradeConfig>,
    on_script_start: Option<Box<dyn Fn(&str) + Send + Sync>>,
    on_script_complete: Option<Box<dyn Fn(&str, Duration) + Send + Sync>>,
    on_script_error: Option<Box<dyn Fn(&str, &Error) + Send + Sync>>,
}

// Manual Debug impl since closures don't implement Debug
impl std::fmt::Debug for UpgradeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpgradeEngine")
            .field("config", &self.config)
            .field("on_script_start", &self.on_script_start.is_some())
            .field("on_script_complete", &self.on_script_complete.is_some())
            .field("on_script_error", &self.on_script_error.is_some())
            .finish()
    }
}

impl UpgradeEngine {
    pub fn new(
        executor: Box<dyn ScriptExecutor>,
        journal: Box<dyn Journal>,
        config: Arc<UpgradeConfig>,
    ) -> Self {
        Self {
            executor,
            journal,
            config,
            on_script_start: None,
            on_script_complete: None,
            on_script_error: None,
        }
    }

    /// An engine executing through `dialect` and journaling to a [TableJournal] in the
    /// same database.
    pub fn for_dialect<D>(
        dialect: D,
        connection_factory: ConnectionFactory<D::Connection>,
        config: UpgradeConfig,
    ) -> Self
    where
        D: Dialect + Clone + 'static,
    {
        let config = Arc::new(config);
        let executor = SqlScriptExecutor::new(
            dialect.clone(),
            Arc::clone(&connection_factory),
            Arc::clone(&config),
        );
        let journal = TableJournal::new(dialect, connection_factory, Arc::clone(&config));
        Self::new(Box::new(executor), Box::new(journal), config)
    }

    /// Replace the journal, for example with a [NullJournal](crate::NullJournal) to run
    /// every script on every upgrade.
    pub fn with_journal(mut self, journal: impl Journal + 'static) -> Self {
        self.journal = Box::new(journal);
        self
    }

    /// Set a callback to be invoked when a script starts.
    /// The callback receives the script name.
    pub fn on_script_start<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_script_start = Some(Box::new(callback));
        self
    }

    /// Set a callback to be invoked when a script has run and been journaled.
    /// The callback receives the script name and how long it took.
    pub fn on_script_complete<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, Duration) + Send + Sync + 'static,
    {
        self.on_script_complete = Some(Box::new(callback));
        self
    }

    /// Set a callback to be invoked when a script fails to run or to be journaled.
    pub fn on_script_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, &Error) + Send + Sync + 'static,
    {
        self.on_script_error = Some(Box::new(callback));
        self
    }

    pub fn config(&self) -> &UpgradeConfig {
        &self.config
    }

    pub fn get_executed_scripts(&self) -> Result<Vec<String>, Error> {
        self.journal.get_executed_scripts()
    }

    /// The scripts from `scripts` not yet in the journal, in execution order.
    pub fn get_scripts_to_execute<'a>(
        &self,
        scripts: &'a [Script],
    ) -> Result<Vec<&'a Script>, Error> {
        let mut seen = HashSet::new();
        for script in scripts {
            if !seen.insert(script.name()) {
                return Err(Error::Generic(format!(
                    "Duplicate script name found: {}",
                    script.name()
                )));
            }
        }

        let executed: HashSet<String> = self.journal.get_executed_scripts()?.into_iter().collect();
        let mut pending: Vec<&Script> = scripts
            .iter()
            .filter(|script| {
                let applied = executed.contains(script.name());
                if applied {
                    tracing::debug!(name = script.name(), "Skipping script (already applied)");
                }
                !applied
            })
            .collect();
        if self.config.script_order() == ScriptOrder::ByName {
            pending.sort_by(|a, b| a.name().cmp(b.name()));
        }

        tracing::debug!(
            candidates = scripts.len(),
            pending = ?pending.iter().map(|s| s.name()).collect::<Vec<_>>(),
            "Considering scripts to run"
        );
        Ok(pending)
    }

    pub fn is_upgrade_required(&self, scripts: &[Script]) -> Result<bool, Error> {
        Ok(!self.get_scripts_to_execute(scripts)?.is_empty())
    }

    pub fn try_connect(&self) -> Result<(), Error> {
        self.executor.try_connect()
    }

    /// Run every pending script in order, journaling each as soon as it succeeds.
    ///
    /// Failures are reported in the returned [UpgradeReport] rather than as an `Err`.
    /// Scripts that completed before the failure stay journaled.
    pub fn perform_upgrade(&self, scripts: &[Script]) -> UpgradeReport {
        let log = self.config.log();
        let mut report = UpgradeReport::default();
        log.write_information(format_args!("Beginning database upgrade"));

        let pending = match self
            .executor
            .ensure_schema()
            .and_then(|_| self.get_scripts_to_execute(scripts))
        {
            Ok(pending) => pending,
            Err(error) => return self.setup_failure(report, error),
        };
        if pending.is_empty() {
            log.write_information(format_args!(
                "No new scripts need to be executed - completing."
            ));
            return report;
        }

        for script in pending {
            let _span = tracing::info_span!("upgrade_script", name = %script.name()).entered();
            tracing::info!("Starting script");
            if let Some(ref callback) = self.on_script_start {
                callback(script.name());
            }

            let started = Instant::now();
            let result = self
                .executor
                .execute(script, self.config.variables())
                .and_then(|summary| {
                    self.journal.store_executed(script.name())?;
                    Ok(summary)
                });

            match result {
                Ok(summary) => {
                    let duration = started.elapsed();
                    tracing::info!(
                        duration_ms = duration.as_millis(),
                        statements = summary.statements_executed,
                        "Script completed successfully"
                    );
                    report.scripts_run.push(script.name().to_string());
                    report.statements_executed += summary.statements_executed;
                    if let Some(ref callback) = self.on_script_complete {
                        callback(script.name(), duration);
                    }
                }
                Err(error) => {
                    tracing::error!(error = %error, "Script failed");
                    if let Some(ref callback) = self.on_script_error {
                        callback(script.name(), &error);
                    }
                    log.write_error(format_args!(
                        "Upgrade failed due to an unexpected exception:\n{}",
                        error
                    ));
                    report.failure = Some(UpgradeFailure {
                        script: Some(script.name().to_string()),
                        error,
                    });
                    return report;
                }
            }
        }

        log.write_information(format_args!("Upgrade successful"));
        report
    }

    /// Journal every pending script without running it, for adopting an existing
    /// database whose schema is already up to date.
    pub fn mark_as_executed(&self, scripts: &[Script]) -> UpgradeReport {
        let log = self.config.log();
        let mut report = UpgradeReport::default();

        let pending = match self.get_scripts_to_execute(scripts) {
            Ok(pending) => pending,
            Err(error) => return self.setup_failure(report, error),
        };
        for script in pending {
            if let Err(error) = self.journal.store_executed(script.name()) {
                log.write_error(format_args!(
                    "Failed to mark script '{}' as executed: {}",
                    script.name(),
                    error
                ));
                report.failure = Some(UpgradeFailure {
                    script: Some(script.name().to_string()),
                    error,
                });
                return report;
            }
            log.write_information(format_args!(
                "Marked script '{}' as executed",
                script.name()
            ));
            report.scripts_run.push(script.name().to_string());
        }
        report
    }

    fn setup_failure(&self, mut report: UpgradeReport, error: Error) -> UpgradeReport {
        tracing::error!(error = %error, "Upgrade could not start");
        self.config.log().write_error(format_args!(
            "Upgrade failed due to an unexpected exception:\n{}",
            error
        ));
        report.failure = Some(UpgradeFailure {
            script: None,
            error,
        });
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::journal::NullJournal;
    use crate::testing::{
        LogLevel, MemoryJournal, RecordingDatabase, RecordingDialect, RecordingLog,
    };
    use std::sync::Mutex;

    fn engine(
        database: &RecordingDatabase,
        journal: &MemoryJournal,
        config: UpgradeConfig,
    ) -> UpgradeEngine {
        UpgradeEngine::for_dialect(RecordingDialect, database.connection_factory(), config)
            .with_journal(journal.clone())
    }

    fn scripts() -> Vec<Script> {
        vec![
            Script::new("0002_add_column.sql", "ALTER TABLE a ADD COLUMN b INT"),
            Script::new(
                "0001_create_table.sql",
                "CREATE TABLE a (id INT); INSERT INTO a VALUES (1)",
            ),
        ]
    }

    #[test]
    fn runs_pending_scripts_in_name_order() {
        let database = RecordingDatabase::new();
        let journal = MemoryJournal::new();
        let report = engine(&database, &journal, UpgradeConfig::new())
            .perform_upgrade(&scripts());
        assert_eq!(
            report,
            UpgradeReport {
                scripts_run: vec![
                    "0001_create_table.sql".to_string(),
                    "0002_add_column.sql".to_string()
                ],
                statements_executed: 3,
                failure: None,
            }
        );
        assert_eq!(
            database.executed(),
            vec![
                "CREATE TABLE a (id INT)",
                "INSERT INTO a VALUES (1)",
                "ALTER TABLE a ADD COLUMN b INT"
            ]
        );
        assert_eq!(
            journal.entries(),
            vec!["0001_create_table.sql", "0002_add_column.sql"]
        );
    }

    #[test]
    fn second_run_applies_nothing() {
        let database = RecordingDatabase::new();
        let journal = MemoryJournal::new();
        let engine = engine(&database, &journal, UpgradeConfig::new());
        assert!(engine.perform_upgrade(&scripts()).successful());
        let report = engine.perform_upgrade(&scripts());
        assert!(report.successful());
        assert!(report.scripts_run.is_empty());
        assert_eq!(report.statements_executed, 0);
        assert_eq!(database.executed().len(), 3);
        assert!(!engine.is_upgrade_required(&scripts()).unwrap());
    }

    #[test]
    fn journaled_scripts_are_skipped() {
        let database = RecordingDatabase::new();
        let journal = MemoryJournal::with_entries(["0001_create_table.sql"]);
        let engine = engine(&database, &journal, UpgradeConfig::new());
        let scripts = scripts();
        let pending = engine.get_scripts_to_execute(&scripts).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].name(), "0002_add_column.sql");
        assert!(engine.is_upgrade_required(&scripts).unwrap());
        assert_eq!(
            engine.get_executed_scripts().unwrap(),
            vec!["0001_create_table.sql"]
        );
    }

    #[test]
    fn provided_order_is_kept_when_configured() {
        let database = RecordingDatabase::new();
        let journal = MemoryJournal::new();
        let report = engine(
            &database,
            &journal,
            UpgradeConfig::new().with_script_order(ScriptOrder::AsProvided),
        )
        .perform_upgrade(&scripts());
        assert_eq!(
            report.scripts_run,
            vec!["0002_add_column.sql", "0001_create_table.sql"]
        );
    }

    #[test]
    fn duplicate_names_fail_before_running() {
        let database = RecordingDatabase::new();
        let journal = MemoryJournal::new();
        let scripts = vec![
            Script::new("0001.sql", "SELECT 1"),
            Script::new("0001.sql", "SELECT 2"),
        ];
        let report = engine(&database, &journal, UpgradeConfig::new()).perform_upgrade(&scripts);
        let failure = report.failure.unwrap();
        assert_eq!(failure.script, None);
        assert_eq!(failure.error.kind(), ErrorKind::Unclassified);
        assert!(database.executed().is_empty());
    }

    #[test]
    fn halts_at_first_failing_script() {
        let database = RecordingDatabase::new();
        database.fail_on("GARBAGE");
        let journal = MemoryJournal::new();
        let log = RecordingLog::new();
        let scripts = vec![
            Script::new("0001_create_table.sql", "CREATE TABLE Foo (Id INT)"),
            Script::new(
                "0002_bad.sql",
                "CREATE TABLE Bar (Id INT);\nGARBAGE STATEMENT;\nCREATE TABLE Baz (Id INT);",
            ),
            Script::new("0003_never.sql", "CREATE TABLE Never (Id INT)"),
        ];
        let report = engine(&database, &journal, UpgradeConfig::new().with_log(log.clone()))
            .perform_upgrade(&scripts);

        assert_eq!(report.scripts_run, vec!["0001_create_table.sql"]);
        assert_eq!(report.statements_executed, 1);
        let failure = report.failure.unwrap();
        assert_eq!(failure.script.as_deref(), Some("0002_bad.sql"));
        match failure.error {
            Error::Statement { index, line, .. } => {
                assert_eq!(index, 1);
                assert_eq!(line, 2);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(journal.entries(), vec!["0001_create_table.sql"]);
        assert_eq!(
            database.executed(),
            vec!["CREATE TABLE Foo (Id INT)", "CREATE TABLE Bar (Id INT)"]
        );
        assert!(log
            .messages(LogLevel::Error)
            .last()
            .unwrap()
            .starts_with("Upgrade failed due to an unexpected exception:"));
    }

    #[test]
    fn journal_write_failure_stops_the_upgrade() {
        let database = RecordingDatabase::new();
        let journal = MemoryJournal::new();
        journal.fail_writes_for("0001_create_table.sql");
        let report = engine(&database, &journal, UpgradeConfig::new())
            .perform_upgrade(&scripts());
        assert!(report.scripts_run.is_empty());
        let failure = report.failure.unwrap();
        assert_eq!(failure.script.as_deref(), Some("0001_create_table.sql"));
        assert_eq!(failure.error.kind(), ErrorKind::JournalWrite);
        // the script itself ran
        assert_eq!(database.executed().len(), 2);
        assert!(journal.entries().is_empty());
    }

    #[test]
    fn journal_read_failure_is_a_setup_failure() {
        let database = RecordingDatabase::new();
        let journal = MemoryJournal::new();
        journal.fail_reads();
        let engine = engine(&database, &journal, UpgradeConfig::new());
        let report = engine.perform_upgrade(&scripts());
        let failure = report.failure.unwrap();
        assert_eq!(failure.script, None);
        assert_eq!(failure.error.kind(), ErrorKind::Journal);
        assert!(database.executed().is_empty());
        assert!(engine.is_upgrade_required(&scripts()).is_err());
    }

    #[test]
    fn schema_failure_is_a_setup_failure() {
        let database = RecordingDatabase::new();
        database.fail_on("CREATE SCHEMA");
        let journal = MemoryJournal::new();
        let report = engine(&database, &journal, UpgradeConfig::new().with_schema("app"))
            .perform_upgrade(&scripts());
        let failure = report.failure.unwrap();
        assert_eq!(failure.script, None);
        assert_eq!(failure.error.kind(), ErrorKind::Schema);
        assert!(database.executed().is_empty());
    }

    #[test]
    fn empty_script_is_journaled() {
        let database = RecordingDatabase::new();
        let journal = MemoryJournal::new();
        let report = engine(&database, &journal, UpgradeConfig::new())
            .perform_upgrade(&[Script::new("0000_empty.sql", "  \n")]);
        assert!(report.successful());
        assert_eq!(report.statements_executed, 0);
        assert_eq!(journal.entries(), vec!["0000_empty.sql"]);
        assert_eq!(database.connections_opened(), 0);
    }

    #[test]
    fn configured_variables_are_substituted() {
        let database = RecordingDatabase::new();
        let journal = MemoryJournal::new();
        engine(
            &database,
            &journal,
            UpgradeConfig::new().with_variable("owner", "app_user"),
        )
        .perform_upgrade(&[Script::new("0001.sql", "GRANT SELECT ON a TO ${owner}")]);
        assert_eq!(database.executed(), vec!["GRANT SELECT ON a TO app_user"]);
    }

    #[test]
    fn hooks_are_called() {
        let database = RecordingDatabase::new();
        database.fail_on("ALTER");
        let journal = MemoryJournal::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let (start, complete, error) = (events.clone(), events.clone(), events.clone());
        let report = engine(&database, &journal, UpgradeConfig::new())
            .on_script_start(move |name| start.lock().unwrap().push(format!("start {}", name)))
            .on_script_complete(move |name, _| {
                complete.lock().unwrap().push(format!("complete {}", name))
            })
            .on_script_error(move |name, error_value| {
                error
                    .lock()
                    .unwrap()
                    .push(format!("error {} {:?}", name, error_value.kind()))
            })
            .perform_upgrade(&scripts());
        assert!(!report.successful());
        assert_eq!(
            *events.lock().unwrap(),
            vec![
                "start 0001_create_table.sql",
                "complete 0001_create_table.sql",
                "start 0002_add_column.sql",
                "error 0002_add_column.sql Statement",
            ]
        );
    }

    #[test]
    fn mark_as_executed_journals_without_running() {
        let database = RecordingDatabase::new();
        let journal = MemoryJournal::with_entries(["0001_create_table.sql"]);
        let engine = engine(&database, &journal, UpgradeConfig::new());
        let report = engine.mark_as_executed(&scripts());
        assert!(report.successful());
        assert_eq!(report.scripts_run, vec!["0002_add_column.sql"]);
        assert!(database.executed().is_empty());
        assert_eq!(
            journal.entries(),
            vec!["0001_create_table.sql", "0002_add_column.sql"]
        );
    }

    #[test]
    fn null_journal_runs_everything_every_time() {
        let database = RecordingDatabase::new();
        let engine = UpgradeEngine::for_dialect(
            RecordingDialect,
            database.connection_factory(),
            UpgradeConfig::new(),
        )
        .with_journal(NullJournal);
        engine.perform_upgrade(&scripts());
        engine.perform_upgrade(&scripts());
        assert_eq!(database.executed().len(), 6);
    }

    #[test]
    fn try_connect_reports_connection_errors() {
        let database = RecordingDatabase::new();
        let journal = MemoryJournal::new();
        let engine = engine(&database, &journal, UpgradeConfig::new());
        engine.try_connect().unwrap();
        database.refuse_connections(true);
        assert_eq!(engine.try_connect().unwrap_err().kind(), ErrorKind::Connection);
    }

    #[test]
    fn table_journal_is_used_by_default() {
        let database = RecordingDatabase::new();
        let engine = UpgradeEngine::for_dialect(
            RecordingDialect,
            database.connection_factory(),
            UpgradeConfig::new(),
        );
        let report = engine.perform_upgrade(&scripts());
        assert!(report.successful());
        let journaled: Vec<String> = database.journal().into_iter().map(|(name, _)| name).collect();
        assert_eq!(journaled, vec!["0001_create_table.sql", "0002_add_column.sql"]);
        assert!(engine.perform_upgrade(&scripts()).scripts_run.is_empty());
    }
}
