#![cfg_attr(docsrs, feature(doc_cfg))]
//! `upshift` runs versioned SQL scripts against a database, each at most once.
//!
//! Every script is identified by its name. Before running anything the engine reads a
//! journal table (`SchemaVersions` by default) holding the names of the scripts already
//! applied, then runs the remaining ones in name order. Each script that succeeds is
//! journaled immediately, so an upgrade that fails halfway can simply be run again once
//! the failing script is fixed.
//!
//! ```
//! use upshift::{sqlite, Script, UpgradeConfig};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let engine = sqlite::engine_from_path(
//!     dir.path().join("app.db"),
//!     UpgradeConfig::new().with_variable("default_name", "anonymous"),
//! );
//!
//! let scripts = vec![
//!     Script::new(
//!         "0001_create_users.sql",
//!         "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL DEFAULT '${default_name}');",
//!     ),
//!     Script::new("0002_index_names.sql", "CREATE INDEX users_name ON users (name);"),
//! ];
//!
//! let report = engine.perform_upgrade(&scripts);
//! assert!(report.successful());
//! assert_eq!(report.scripts_run.len(), 2);
//!
//! // a second run finds nothing to do
//! assert!(engine.perform_upgrade(&scripts).scripts_run.is_empty());
//! ```
//!
//! # Scripts
//!
//! Before execution each script is [preprocessed](preprocess): `$schema$` tokens are
//! replaced with the configured schema (or `$schema$.` is removed when there is none),
//! `${name}` tokens are replaced with [variables](UpgradeConfig::with_variable), and any
//! custom preprocessors run. The result is [split](split) into statements that run one
//! at a time on a fresh connection. The first failing statement stops the upgrade and
//! is reported with its index, its line and the database's own error code.
//!
//! # Observability
//!
//! Progress goes to an [UpgradeLog], by default [TracingLog], which emits `tracing`
//! events. The engine also opens a `tracing` span per script and accepts
//! [start](UpgradeEngine::on_script_start), [complete](UpgradeEngine::on_script_complete)
//! and [error](UpgradeEngine::on_script_error) hooks.
//!
//! # Database support
//!
//! - [`SQLite`](sqlite) - available with the `sqlite` feature flag (on by default).
//! - [`MySQL`](mysql) - available with the `mysql` feature flag.
//! - [`PostgreSQL`](postgres) - available with the `postgres` feature flag.
//!
//! Test doubles for code that drives upgrades are in the `testing` module, available
//! with the `testing` feature flag.

mod config;
pub mod dialect;
mod engine;
mod error;
mod executor;
mod journal;
mod log;
pub mod preprocess;
mod script;
pub mod split;

pub use config::{ScriptOrder, TransactionMode, UpgradeConfig, DEFAULT_JOURNAL_TABLE};
pub use dialect::{ConnectionFactory, DbConnection, Dialect};
pub use engine::{UpgradeEngine, UpgradeFailure, UpgradeReport};
pub use error::{DbError, Error, ErrorKind, PreprocessError};
pub use executor::{ExecutionSummary, ScriptExecutor, SqlScriptExecutor};
pub use journal::{Journal, NullJournal, TableJournal};
pub use log::{NoopLog, TracingLog, UpgradeLog};
pub use preprocess::ScriptPreprocessor;
pub use script::{merge_variables, Script, Variables, SCHEMA_VARIABLE};

#[cfg(feature = "sqlite")]
#[cfg_attr(docsrs, doc(cfg(feature = "sqlite")))]
pub mod sqlite;

#[cfg(feature = "mysql")]
#[cfg_attr(docsrs, doc(cfg(feature = "mysql")))]
pub mod mysql;

#[cfg(feature = "postgres")]
#[cfg_attr(docsrs, doc(cfg(feature = "postgres")))]
pub mod postgres;

#[cfg(any(test, feature = "testing"))]
#[cfg_attr(docsrs, doc(cfg(feature = "testing")))]
pub mod testing;

#[cfg(all(test, feature = "mysql"))]
pub(crate) mod test_mysql;

#[cfg(all(test, feature = "postgres"))]
pub(crate) mod test_postgres;
