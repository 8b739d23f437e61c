//! Splitting processed script text into individually executed statements.

/// One executable statement cut from a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    /// 1-based line of the statement's first code character in the processed script.
    pub line: usize,
}

/// Lexical rules that differ between dialects.
///
/// Single and double quoted literals (with doubled-quote escapes), `--` line comments
/// and `/* */` block comments are always recognised. A terminator is only honoured
/// outside literals and comments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitRules {
    /// `#` starts a line comment.
    pub hash_comments: bool,
    /// A backslash escapes the next character inside quoted literals.
    pub backslash_escapes: bool,
    /// Backtick-quoted identifiers.
    pub backtick_identifiers: bool,
    /// `$tag$ ... $tag$` quoted bodies.
    pub dollar_quotes: bool,
    /// `DELIMITER <token>` lines change the statement terminator.
    pub delimiter_directive: bool,
    /// Terminators inside the `BEGIN ... END` body of a `CREATE [TEMP] TRIGGER` statement
    /// do not end it. `CASE ... END` blocks inside the body are matched.
    pub trigger_bodies: bool,
}

impl SplitRules {
    pub const ANSI: SplitRules = SplitRules {
        hash_comments: false,
        backslash_escapes: false,
        backtick_identifiers: false,
        dollar_quotes: false,
        delimiter_directive: false,
        trigger_bodies: false,
    };

    pub const SQLITE: SplitRules = SplitRules {
        backtick_identifiers: true,
        trigger_bodies: true,
        ..SplitRules::ANSI
    };

    pub const MYSQL: SplitRules = SplitRules {
        hash_comments: true,
        backslash_escapes: true,
        backtick_identifiers: true,
        dollar_quotes: false,
        delimiter_directive: true,
        trigger_bodies: false,
    };

    pub const POSTGRES: SplitRules = SplitRules {
        dollar_quotes: true,
        ..SplitRules::ANSI
    };
}

/// Split `contents` on unquoted statement terminators.
///
/// Chunks holding nothing but whitespace and comments are dropped, so an empty script
/// yields no statements. Statement text excludes the terminator.
pub fn split_statements(contents: &str, rules: &SplitRules) -> Vec<Statement> {
    let bytes = contents.as_bytes();
    let mut statements = Vec::new();
    let mut delimiter = String::from(";");
    let mut code_start: Option<usize> = None;
    let mut trigger = TriggerState::Start;
    let mut at_line_start = true;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];

        if b == b'\n' {
            at_line_start = true;
            i += 1;
            continue;
        }
        if b.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        if rules.delimiter_directive && at_line_start {
            if let Some((new_delimiter, line_end)) = delimiter_directive(contents, i) {
                push_statement(&mut statements, contents, code_start.take(), i);
                trigger = TriggerState::Start;
                delimiter = new_delimiter;
                i = line_end;
                continue;
            }
        }
        at_line_start = false;

        if !trigger.in_body() && bytes[i..].starts_with(delimiter.as_bytes()) {
            push_statement(&mut statements, contents, code_start.take(), i);
            trigger = TriggerState::Start;
            i += delimiter.len();
            continue;
        }

        let next = bytes.get(i + 1).copied();
        match b {
            b'-' if next == Some(b'-') => i = skip_line(bytes, i),
            b'#' if rules.hash_comments => i = skip_line(bytes, i),
            b'/' if next == Some(b'*') => i = skip_block_comment(bytes, i),
            b'\'' | b'"' => {
                code_start.get_or_insert(i);
                i = skip_quoted(bytes, i, rules.backslash_escapes);
            }
            b'`' if rules.backtick_identifiers => {
                code_start.get_or_insert(i);
                i = skip_quoted(bytes, i, false);
            }
            b'$' if rules.dollar_quotes => {
                code_start.get_or_insert(i);
                i = skip_dollar_quoted(contents, i).unwrap_or(i + 1);
            }
            _ if rules.trigger_bodies && is_word_byte(b) => {
                code_start.get_or_insert(i);
                let end = bytes[i..]
                    .iter()
                    .position(|&b| !is_word_byte(b))
                    .map_or(bytes.len(), |offset| i + offset);
                trigger = trigger.after_word(&contents[i..end]);
                i = end;
            }
            _ => {
                code_start.get_or_insert(i);
                i += 1;
            }
        }
    }

    push_statement(&mut statements, contents, code_start, contents.len());
    statements
}

/// Where the scanner stands relative to a `CREATE TRIGGER` body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TriggerState {
    /// No word read yet in this statement.
    Start,
    /// `CREATE`, possibly followed by `TEMP`.
    Create,
    /// Trigger header, before `BEGIN`.
    Header,
    /// Inside the body at the given `BEGIN`/`CASE` nesting depth; 0 once the body closed.
    Body(usize),
    /// Any other statement.
    Other,
}

impl TriggerState {
    fn after_word(self, word: &str) -> Self {
        let is = |keyword: &str| word.eq_ignore_ascii_case(keyword);
        match self {
            TriggerState::Start if is("CREATE") => TriggerState::Create,
            TriggerState::Create if is("TEMP") || is("TEMPORARY") => TriggerState::Create,
            TriggerState::Create if is("TRIGGER") => TriggerState::Header,
            TriggerState::Start | TriggerState::Create | TriggerState::Other => {
                TriggerState::Other
            }
            TriggerState::Header if is("BEGIN") => TriggerState::Body(1),
            TriggerState::Header => TriggerState::Header,
            TriggerState::Body(depth) if depth > 0 && (is("BEGIN") || is("CASE")) => {
                TriggerState::Body(depth + 1)
            }
            TriggerState::Body(depth) if is("END") => {
                TriggerState::Body(depth.saturating_sub(1))
            }
            TriggerState::Body(depth) => TriggerState::Body(depth),
        }
    }

    fn in_body(self) -> bool {
        matches!(self, TriggerState::Body(depth) if depth > 0)
    }
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || !b.is_ascii()
}

fn push_statement(
    statements: &mut Vec<Statement>,
    contents: &str,
    code_start: Option<usize>,
    end: usize,
) {
    let Some(start) = code_start else {
        return;
    };
    let sql = contents[start..end].trim_end();
    if sql.is_empty() {
        return;
    }
    statements.push(Statement {
        sql: sql.to_string(),
        line: line_of(contents, start),
    });
}

fn line_of(contents: &str, offset: usize) -> usize {
    contents[..offset].matches('\n').count() + 1
}

/// Index of the newline ending the line that starts at `start` (or the end of input).
fn skip_line(bytes: &[u8], start: usize) -> usize {
    bytes[start..]
        .iter()
        .position(|&b| b == b'\n')
        .map_or(bytes.len(), |offset| start + offset)
}

fn skip_block_comment(bytes: &[u8], start: usize) -> usize {
    let mut i = start + 2;
    while i + 1 < bytes.len() {
        if bytes[i] == b'*' && bytes[i + 1] == b'/' {
            return i + 2;
        }
        i += 1;
    }
    bytes.len()
}

/// Skip a literal opened by the quote at `start`; returns the index after the closing quote.
fn skip_quoted(bytes: &[u8], start: usize, backslash_escapes: bool) -> usize {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        let b = bytes[i];
        if backslash_escapes && b == b'\\' {
            i += 2;
            continue;
        }
        i += 1;
        if b == quote {
            // doubled quote is an escaped quote
            if bytes.get(i) == Some(&quote) {
                i += 1;
                continue;
            }
            return i;
        }
    }
    bytes.len()
}

/// Skip a `$tag$ ... $tag$` body starting at `start`. Returns `None` when the `$` does
/// not open a dollar quote (for example a positional parameter such as `$1`).
fn skip_dollar_quoted(contents: &str, start: usize) -> Option<usize> {
    let rest = &contents[start + 1..];
    let tag_len = rest.find('$')?;
    let tag = &rest[..tag_len];
    let valid_tag = tag
        .chars()
        .enumerate()
        .all(|(n, c)| c == '_' || c.is_alphabetic() || (n > 0 && c.is_ascii_digit()));
    if !valid_tag {
        return None;
    }
    let opener = &contents[start..start + tag_len + 2];
    let body_start = start + opener.len();
    match contents[body_start..].find(opener) {
        Some(offset) => Some(body_start + offset + opener.len()),
        None => Some(contents.len()),
    }
}

/// Recognise a `DELIMITER <token>` line starting at `start`; returns the new delimiter and
/// the index of the end of the line.
fn delimiter_directive(contents: &str, start: usize) -> Option<(String, usize)> {
    const KEYWORD: &str = "DELIMITER";
    let rest = &contents[start..];
    let keyword = rest.get(..KEYWORD.len())?;
    if !keyword.eq_ignore_ascii_case(KEYWORD) {
        return None;
    }
    let line_end = skip_line(contents.as_bytes(), start);
    let argument = &contents[start + KEYWORD.len()..line_end];
    if !argument.starts_with([' ', '\t']) {
        return None;
    }
    let delimiter = argument.split_whitespace().next()?;
    Some((delimiter.to_string(), line_end))
}
