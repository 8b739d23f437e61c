//!
//! # Script preprocessing
//!
//! Script text passes through a fixed sequence of text transforms before it is split
//! and executed:
//!
//! 1. The schema placeholder `$schema$` is either replaced with the quoted schema name
//!    ([SchemaTokenPreprocessor]) or, when no schema is configured, `$schema$.` is
//!    removed so schema-qualified scripts run unqualified ([StripSchemaPreprocessor]).
//! 2. `${name}` tokens are replaced with variable values
//!    ([VariableSubstitutionPreprocessor]). Write `$${` to keep a literal `${`, except
//!    on dialects with dollar quoting, where `$${` is dollar-quote text and passes
//!    through unchanged.
//! 3. Caller-supplied preprocessors run in the order they were configured.
//!
//! Every stage is a pure function of its input text.

use crate::error::PreprocessError;
use crate::script::Variables;
use std::sync::Arc;

/// Placeholder replaced with the configured schema name.
pub const SCHEMA_TOKEN: &str = "$schema$";

/// A transform applied to script text before execution.
///
/// Any `Fn(&str) -> String` closure is a preprocessor. Implement the trait directly
/// when the transform can fail.
pub trait ScriptPreprocessor: Send + Sync {
    fn process(&self, contents: &str) -> Result<String, PreprocessError>;
}

impl<F> ScriptPreprocessor for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn process(&self, contents: &str) -> Result<String, PreprocessError> {
        Ok(self(contents))
    }
}

/// Removes `<token>.` so that `$schema$.Foo` becomes `Foo`.
///
/// A bare token without the trailing dot is left untouched and will be rejected by
/// the database.
#[derive(Debug, Clone)]
pub struct StripSchemaPreprocessor {
    qualified_token: String,
}

impl StripSchemaPreprocessor {
    pub fn new(token: &str) -> Self {
        Self {
            qualified_token: format!("{}.", token),
        }
    }
}

impl Default for StripSchemaPreprocessor {
    fn default() -> Self {
        Self::new(SCHEMA_TOKEN)
    }
}

impl ScriptPreprocessor for StripSchemaPreprocessor {
    fn process(&self, contents: &str) -> Result<String, PreprocessError> {
        Ok(contents.replace(&self.qualified_token, ""))
    }
}

/// Replaces every occurrence of the schema token with a fixed, already quoted, schema name.
#[derive(Debug, Clone)]
pub struct SchemaTokenPreprocessor {
    token: String,
    replacement: String,
}

impl SchemaTokenPreprocessor {
    pub fn new(token: &str, replacement: impl Into<String>) -> Self {
        Self {
            token: token.to_string(),
            replacement: replacement.into(),
        }
    }
}

impl ScriptPreprocessor for SchemaTokenPreprocessor {
    fn process(&self, contents: &str) -> Result<String, PreprocessError> {
        Ok(contents.replace(&self.token, &self.replacement))
    }
}

/// Replaces `${name}` tokens with values from a variable map.
///
/// Unknown names and malformed tokens are errors rather than being passed through,
/// so a missing value never reaches the database as literal text.
#[derive(Debug, Clone)]
pub struct VariableSubstitutionPreprocessor {
    variables: Variables,
    dollar_quotes: bool,
}

impl VariableSubstitutionPreprocessor {
    pub fn new(variables: Variables) -> Self {
        Self {
            variables,
            dollar_quotes: false,
        }
    }

    /// Treat `$` directly before `${` as the end of a dollar-quote tag, as in
    /// `$${"a": 1}$$`. The text is kept as written and no token is read from it.
    pub fn with_dollar_quotes(mut self, dollar_quotes: bool) -> Self {
        self.dollar_quotes = dollar_quotes;
        self
    }
}

impl ScriptPreprocessor for VariableSubstitutionPreprocessor {
    fn process(&self, contents: &str) -> Result<String, PreprocessError> {
        let mut output = String::with_capacity(contents.len());
        let mut rest = contents;
        let mut line = 1;

        while let Some(found) = rest.find("${") {
            let (before, token) = rest.split_at(found);
            line += before.matches('\n').count();

            if let Some(literal) = before.strip_suffix('$') {
                if self.dollar_quotes {
                    output.push_str(before);
                } else {
                    // "$${" escapes a literal "${"
                    output.push_str(literal);
                }
                output.push_str("${");
                rest = &token[2..];
                continue;
            }
            output.push_str(before);

            let body = &token[2..];
            let end = body.find(['}', '\n']);
            let name = match end {
                Some(end) if body[end..].starts_with('}') => &body[..end],
                _ => {
                    return Err(PreprocessError::MalformedToken {
                        token: token.lines().next().unwrap_or(token).to_string(),
                        line,
                    })
                }
            };
            if !is_variable_name(name) {
                return Err(PreprocessError::MalformedToken {
                    token: format!("${{{}}}", name),
                    line,
                });
            }
            let value =
                self.variables
                    .get(name)
                    .ok_or_else(|| PreprocessError::UndefinedVariable {
                        name: name.to_string(),
                        line,
                    })?;
            output.push_str(value);
            rest = &body[name.len() + 1..];
        }

        output.push_str(rest);
        Ok(output)
    }
}

fn is_variable_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first == '_' || first.is_ascii_alphabetic() => {
            chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
        }
        _ => false,
    }
}

/// An ordered list of preprocessors, each receiving the previous stage's output.
#[derive(Clone, Default)]
pub struct PreprocessorPipeline {
    stages: Vec<Arc<dyn ScriptPreprocessor>>,
}

impl PreprocessorPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stage(mut self, stage: impl ScriptPreprocessor + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    pub fn push(&mut self, stage: Arc<dyn ScriptPreprocessor>) {
        self.stages.push(stage);
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn process(&self, contents: &str) -> Result<String, PreprocessError> {
        self.stages
            .iter()
            .try_fold(contents.to_string(), |current, stage| stage.process(&current))
    }
}

impl std::fmt::Debug for PreprocessorPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreprocessorPipeline")
            .field("stages", &self.stages.len())
            .finish()
    }
}
