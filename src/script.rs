use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Variables available to `${name}` tokens while a script is preprocessed.
pub type Variables = HashMap<String, String>;

/// Name of the variable injected with the configured schema.
pub const SCHEMA_VARIABLE: &str = "schema";

/// A named SQL script.
///
/// The name is the script's identity: it decides execution order and is the key
/// recorded in the journal once the script has been applied. Scripts compare and
/// sort by name only.
#[derive(Debug, Clone)]
pub struct Script {
    name: String,
    contents: String,
    hash: String,
}

impl Script {
    pub fn new(name: impl Into<String>, contents: impl Into<String>) -> Self {
        let contents = contents.into();
        let hash = content_hash(&contents);
        Self {
            name: name.into(),
            contents,
            hash,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The raw, unprocessed script text.
    pub fn contents(&self) -> &str {
        &self.contents
    }

    /// Hex-encoded SHA-256 of the raw contents.
    pub fn hash(&self) -> &str {
        &self.hash
    }
}

impl PartialEq for Script {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Script {}

impl PartialOrd for Script {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Script {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}

fn content_hash(contents: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(contents.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Build the variables for one script execution.
///
/// Starts from the caller's variables and adds `schema` when a schema is configured.
/// A `schema` value supplied by the caller always wins.
pub fn merge_variables(variables: &Variables, schema: Option<&str>) -> Variables {
    let mut merged = variables.clone();
    if let Some(schema) = schema {
        if !merged.contains_key(SCHEMA_VARIABLE) {
            merged.insert(SCHEMA_VARIABLE.to_string(), schema.to_string());
        }
    }
    merged
}
