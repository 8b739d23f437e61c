/// Native diagnostic reported by a database driver.
///
/// Drivers disagree on what they report, so every field except `message` is optional.
/// `code` holds the MySQL error number, the SQLite extended result code, or the
/// PostgreSQL SQLSTATE. `position` is the 1-based offset of the rejected token, as
/// PostgreSQL and SQLite report it for syntax errors.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{}{}{}", code_prefix(.code), .message, position_suffix(.position))]
pub struct DbError {
    pub code: Option<String>,
    pub sql_state: Option<String>,
    pub position: Option<u32>,
    pub message: String,
}

impl DbError {
    /// A diagnostic carrying only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            sql_state: None,
            position: None,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

fn code_prefix(code: &Option<String>) -> String {
    code.as_ref()
        .map(|code| format!("[{}] ", code))
        .unwrap_or_default()
}

fn position_suffix(position: &Option<u32>) -> String {
    position
        .map(|position| format!(" (at position {})", position))
        .unwrap_or_default()
}

/// Failure raised while transforming script text, before any database I/O.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PreprocessError {
    #[error("variable '{name}' referenced on line {line} has no value defined")]
    UndefinedVariable { name: String, line: usize },
    #[error("malformed variable token '{token}' on line {line}")]
    MalformedToken { token: String, line: usize },
    #[error("{0}")]
    Custom(String),
}

/// Coarse classification of an [Error], for callers deciding what to do after a failed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Preprocessing,
    Connection,
    Statement,
    Schema,
    Journal,
    JournalWrite,
    Unclassified,
}

/// Error type for the upshift crate.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("failed to preprocess script '{script}': {source}")]
    Preprocess {
        script: String,
        #[source]
        source: PreprocessError,
    },
    #[error("failed to open {dialect} connection: {source}")]
    Connection {
        dialect: &'static str,
        #[source]
        source: DbError,
    },
    #[error("script '{script}' failed at statement {index} (line {line}): {source}")]
    Statement {
        script: String,
        index: usize,
        line: usize,
        #[source]
        source: DbError,
    },
    #[error("transaction for script '{script}' could not be started or committed: {source}")]
    Transaction {
        script: String,
        #[source]
        source: DbError,
    },
    #[error("failed to ensure schema '{schema}' exists: {source}")]
    Schema {
        schema: String,
        #[source]
        source: DbError,
    },
    #[error("failed to read the journal: {0}")]
    JournalRead(#[source] DbError),
    #[error("script '{script}' ran but could not be recorded in the journal: {source}")]
    JournalWrite {
        script: String,
        #[source]
        source: DbError,
    },
    #[error("{0}")]
    Generic(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Preprocess { .. } => ErrorKind::Preprocessing,
            Error::Connection { .. } => ErrorKind::Connection,
            Error::Statement { .. } | Error::Transaction { .. } => ErrorKind::Statement,
            Error::Schema { .. } => ErrorKind::Schema,
            Error::JournalRead(_) => ErrorKind::Journal,
            Error::JournalWrite { .. } => ErrorKind::JournalWrite,
            Error::Generic(_) => ErrorKind::Unclassified,
        }
    }

    /// The driver diagnostic behind this error, if the database produced one.
    pub fn db_error(&self) -> Option<&DbError> {
        match self {
            Error::Connection { source, .. }
            | Error::Statement { source, .. }
            | Error::Transaction { source, .. }
            | Error::Schema { source, .. }
            | Error::JournalRead(source)
            | Error::JournalWrite { source, .. } => Some(source),
            Error::Preprocess { .. } | Error::Generic(_) => None,
        }
    }
}

impl From<String> for Error {
    fn from(value: String) -> Self {
        Self::Generic(value)
    }
}
