//! Command-line parsing for the virtual shell.
//!
//! Parsing happens in two passes. [`parse_script`] splits the raw input into
//! [`Step`]s on `&&`, `;`, `&` and newlines and lifts heredoc bodies out of
//! the text. [`tokenize`] then turns one step into argv plus redirections;
//! it runs right before the step executes so `$VAR` sees earlier `export`s
//! in the same chain.

/// Syntax errors. These surface as exit code 2 with the message on stderr.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// A quote was opened and never closed.
    #[error("unexpected EOF while looking for matching `{0}'")]
    UnterminatedQuote(char),

    /// Input ended before the heredoc delimiter line.
    #[error("here-document delimited by end-of-file (wanted `{0}')")]
    UnterminatedHeredoc(String),

    /// An operator appeared where a command or word was expected.
    #[error("syntax error near unexpected token `{0}'")]
    UnexpectedToken(String),

    /// Valid shell syntax outside the supported subset.
    #[error("{0} are not supported")]
    Unsupported(&'static str),
}

impl ParseError {
    /// True when more input lines could complete the command.
    pub fn is_incomplete(&self) -> bool {
        matches!(
            self,
            Self::UnterminatedQuote(_) | Self::UnterminatedHeredoc(_)
        )
    }
}

/// How a step depends on the one before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connector {
    /// Runs regardless of the previous exit code (`;`, newline, `&`).
    Always,
    /// Runs only if the previous step exited 0 (`&&`).
    OnSuccess,
}

/// One simple command inside a script, still in source form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Relation to the previous step.
    pub connector: Connector,
    /// Command text with heredoc operators removed.
    pub text: String,
    /// Heredoc body fed to the command's stdin.
    pub stdin: Option<String>,
    /// Launched with a trailing `&`.
    pub background: bool,
}

#[derive(Debug)]
struct PendingHeredoc {
    owner: usize,
    delimiter: String,
    strip_tabs: bool,
}

struct ScriptBuilder {
    steps: Vec<Step>,
    current: String,
    next_connector: Connector,
    pending: Vec<PendingHeredoc>,
}

impl ScriptBuilder {
    fn new() -> Self {
        Self {
            steps: Vec::new(),
            current: String::new(),
            next_connector: Connector::Always,
            pending: Vec::new(),
        }
    }

    /// Closes the current segment. `next` is the connector for whatever
    /// follows the operator that ended it.
    fn finish(&mut self, next: Connector, background: bool) -> Result<(), ParseError> {
        let text = self.current.trim().to_string();
        self.current.clear();
        if text.is_empty() {
            if background {
                return Err(ParseError::UnexpectedToken("&".into()));
            }
            if next == Connector::OnSuccess {
                return Err(ParseError::UnexpectedToken("&&".into()));
            }
            return Ok(());
        }
        self.steps.push(Step {
            connector: self.next_connector,
            text,
            stdin: None,
            background,
        });
        self.next_connector = next;
        Ok(())
    }

    /// Consumes heredoc bodies starting at `start`; returns the index just
    /// past the last delimiter line.
    fn read_heredoc_bodies(&mut self, chars: &[char], start: usize) -> Result<usize, ParseError> {
        let mut i = start;
        for pending in std::mem::take(&mut self.pending) {
            let mut body = String::new();
            let mut found = false;
            while i < chars.len() {
                let line_start = i;
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                let raw: String = chars[line_start..i].iter().collect();
                if i < chars.len() {
                    i += 1;
                }
                let raw = raw.strip_suffix('\r').unwrap_or(&raw);
                let line = if pending.strip_tabs {
                    raw.trim_start_matches('\t')
                } else {
                    raw
                };
                if line == pending.delimiter {
                    found = true;
                    break;
                }
                body.push_str(line);
                body.push('\n');
            }
            if !found {
                return Err(ParseError::UnterminatedHeredoc(pending.delimiter));
            }
            let step = self
                .steps
                .get_mut(pending.owner)
                .ok_or_else(|| ParseError::UnexpectedToken("<<".into()))?;
            step.stdin = Some(body);
        }
        Ok(i)
    }
}

/// Reads a heredoc delimiter word starting at `i`. Quotes are stripped.
fn read_delimiter(chars: &[char], mut i: usize) -> Result<(String, usize), ParseError> {
    let mut word = String::new();
    while let Some(&c) = chars.get(i) {
        match c {
            '\'' | '"' => {
                i += 1;
                loop {
                    match chars.get(i) {
                        Some(&q) if q == c => break,
                        Some(&other) => word.push(other),
                        None => return Err(ParseError::UnterminatedQuote(c)),
                    }
                    i += 1;
                }
            }
            '\\' => {
                if let Some(&next) = chars.get(i + 1) {
                    word.push(next);
                    i += 1;
                }
            }
            c if c.is_whitespace() || matches!(c, ';' | '&' | '|' | '<' | '>') => break,
            other => word.push(other),
        }
        i += 1;
    }
    if word.is_empty() {
        return Err(ParseError::UnexpectedToken("newline".into()));
    }
    Ok((word, i))
}

/// Splits raw input into steps.
pub fn parse_script(input: &str) -> Result<Vec<Step>, ParseError> {
    let chars: Vec<char> = input.chars().collect();
    let mut b = ScriptBuilder::new();
    let mut quote: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if let Some(q) = quote {
            b.current.push(c);
            if q == '"' && c == '\\' {
                if let Some(n) = next {
                    b.current.push(n);
                    i += 2;
                    continue;
                }
            } else if c == q {
                quote = None;
            } else if q == '"' && (c == '`' || (c == '$' && next == Some('('))) {
                return Err(ParseError::Unsupported("command substitutions"));
            }
            i += 1;
            continue;
        }

        match c {
            '\'' | '"' => {
                quote = Some(c);
                b.current.push(c);
            }
            '\\' => {
                b.current.push(c);
                if let Some(n) = next {
                    b.current.push(n);
                    i += 1;
                }
            }
            '#' if b.current.is_empty() || b.current.ends_with(char::is_whitespace) => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            '`' => return Err(ParseError::Unsupported("command substitutions")),
            '$' if next == Some('(') => {
                return Err(ParseError::Unsupported("command substitutions"));
            }
            '<' if next == Some('<') => {
                if chars.get(i + 2) == Some(&'<') {
                    return Err(ParseError::Unsupported("here-strings"));
                }
                i += 2;
                let strip_tabs = chars.get(i) == Some(&'-');
                if strip_tabs {
                    i += 1;
                }
                while chars.get(i).is_some_and(|c| *c == ' ' || *c == '\t') {
                    i += 1;
                }
                let (delimiter, after) = read_delimiter(&chars, i)?;
                b.pending.push(PendingHeredoc {
                    owner: b.steps.len(),
                    delimiter,
                    strip_tabs,
                });
                b.current.push(' ');
                i = after;
                continue;
            }
            '&' if next == Some('&') => {
                b.finish(Connector::OnSuccess, false)?;
                i += 2;
                continue;
            }
            '&' if b.current.ends_with('>') || next == Some('>') => b.current.push(c),
            '&' => b.finish(Connector::Always, true)?,
            '|' if next == Some('|') => return Err(ParseError::Unsupported("`||' lists")),
            '|' => return Err(ParseError::Unsupported("pipelines")),
            ';' => b.finish(Connector::Always, false)?,
            '\n' => {
                b.finish(Connector::Always, false)?;
                if !b.pending.is_empty() {
                    i = b.read_heredoc_bodies(&chars, i + 1)?;
                    continue;
                }
            }
            other => b.current.push(other),
        }
        i += 1;
    }

    if let Some(q) = quote {
        return Err(ParseError::UnterminatedQuote(q));
    }
    b.finish(Connector::Always, false)?;
    if let Some(pending) = b.pending.first() {
        return Err(ParseError::UnterminatedHeredoc(pending.delimiter.clone()));
    }
    if b.next_connector == Connector::OnSuccess {
        return Err(ParseError::UnexpectedToken("newline".into()));
    }
    Ok(b.steps)
}

/// Strips a trailing background `&` from a single command line, if present.
pub fn strip_background(command: &str) -> Option<&str> {
    let trimmed = command.trim_end();
    let body = trimmed.strip_suffix('&')?;
    if body.ends_with('&') || body.ends_with('>') {
        return None;
    }
    Some(body.trim_end())
}

// -----------------------------------------------------------------------------
// Tokenizer
// -----------------------------------------------------------------------------

/// A file redirection target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    /// Target path as written.
    pub target: String,
    /// `>>` instead of `>`.
    pub append: bool,
}

/// Where a command's stderr goes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StderrTarget {
    /// Returned as the command's stderr.
    #[default]
    Inherit,
    /// Merged into stdout (`2>&1`).
    Stdout,
    /// Written to a file (`2> path`).
    File(Redirect),
}

/// A tokenized simple command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimpleCommand {
    /// Leading `NAME=value` words.
    pub assignments: Vec<(String, String)>,
    /// Command name followed by its arguments.
    pub argv: Vec<String>,
    /// `>` / `>>` target.
    pub stdout: Option<Redirect>,
    /// stderr routing.
    pub stderr: StderrTarget,
    /// `< path` source.
    pub stdin_file: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum PendingRedirect {
    Stdout { append: bool },
    Stderr { append: bool },
    Both { append: bool },
    Stdin,
}

struct Tokenizer<'a> {
    vars: &'a dyn Fn(&str) -> Option<String>,
    cmd: SimpleCommand,
    words: Vec<String>,
    word: String,
    in_word: bool,
    quoted: bool,
    pending: Option<PendingRedirect>,
}

impl Tokenizer<'_> {
    fn end_word(&mut self) {
        if !self.in_word {
            return;
        }
        let word = std::mem::take(&mut self.word);
        let quoted = std::mem::take(&mut self.quoted);
        self.in_word = false;
        // `$UNSET` expands to nothing, not to an empty argument.
        if word.is_empty() && !quoted && self.pending.is_none() {
            return;
        }
        match self.pending.take() {
            Some(PendingRedirect::Stdout { append }) => {
                self.cmd.stdout = Some(Redirect {
                    target: word,
                    append,
                });
            }
            Some(PendingRedirect::Stderr { append }) => {
                self.cmd.stderr = StderrTarget::File(Redirect {
                    target: word,
                    append,
                });
            }
            Some(PendingRedirect::Both { append }) => {
                self.cmd.stdout = Some(Redirect {
                    target: word,
                    append,
                });
                self.cmd.stderr = StderrTarget::Stdout;
            }
            Some(PendingRedirect::Stdin) => self.cmd.stdin_file = Some(word),
            None => self.words.push(word),
        }
    }

    fn start_redirect(&mut self, pending: PendingRedirect) -> Result<(), ParseError> {
        if self.pending.is_some() {
            return Err(ParseError::UnexpectedToken(">".into()));
        }
        self.pending = Some(pending);
        Ok(())
    }

    /// Expands `$NAME`, `${NAME}` or `$?` starting after the `$` at `i`.
    /// Returns the index of the last consumed character.
    fn expand(&mut self, chars: &[char], i: usize) -> usize {
        match chars.get(i + 1) {
            Some('{') => {
                let start = i + 2;
                let mut end = start;
                while end < chars.len() && chars[end] != '}' {
                    end += 1;
                }
                let name: String = chars[start..end.min(chars.len())].iter().collect();
                if let Some(value) = (self.vars)(&name) {
                    self.word.push_str(&value);
                }
                end
            }
            Some('?') => {
                if let Some(value) = (self.vars)("?") {
                    self.word.push_str(&value);
                }
                i + 1
            }
            Some(c) if c.is_ascii_alphabetic() || *c == '_' => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len()
                    && (chars[end].is_ascii_alphanumeric() || chars[end] == '_')
                {
                    end += 1;
                }
                let name: String = chars[start..end].iter().collect();
                if let Some(value) = (self.vars)(&name) {
                    self.word.push_str(&value);
                }
                end - 1
            }
            Some(c) if c.is_ascii_digit() => i + 1,
            _ => {
                self.word.push('$');
                i
            }
        }
    }
}

fn is_assignment(word: &str) -> Option<(String, String)> {
    let (name, value) = word.split_once('=')?;
    let mut chars = name.chars();
    let first = chars.next()?;
    if !(first.is_ascii_alphabetic() || first == '_')
        || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return None;
    }
    Some((name.to_string(), value.to_string()))
}

/// Tokenizes one step. `vars` resolves variable names (including `?` and
/// `HOME`) at expansion time.
pub fn tokenize(
    text: &str,
    vars: &dyn Fn(&str) -> Option<String>,
) -> Result<SimpleCommand, ParseError> {
    let chars: Vec<char> = text.chars().collect();
    let mut t = Tokenizer {
        vars,
        cmd: SimpleCommand::default(),
        words: Vec::new(),
        word: String::new(),
        in_word: false,
        quoted: false,
        pending: None,
    };

    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            c if c.is_whitespace() => t.end_word(),
            '\'' => {
                t.in_word = true;
                t.quoted = true;
                i += 1;
                while i < chars.len() && chars[i] != '\'' {
                    t.word.push(chars[i]);
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(ParseError::UnterminatedQuote('\''));
                }
            }
            '"' => {
                t.in_word = true;
                t.quoted = true;
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(ParseError::UnterminatedQuote('"')),
                        Some('"') => break,
                        Some('\\') => match chars.get(i + 1) {
                            Some(&n @ ('"' | '\\' | '$' | '`')) => {
                                t.word.push(n);
                                i += 1;
                            }
                            Some('\n') => i += 1,
                            _ => t.word.push('\\'),
                        },
                        Some('$') => i = t.expand(&chars, i),
                        Some(&other) => t.word.push(other),
                    }
                    i += 1;
                }
            }
            '\\' => {
                t.in_word = true;
                match next {
                    Some('\n') => {}
                    Some(n) => t.word.push(n),
                    None => {}
                }
                i += 1;
            }
            '$' => {
                t.in_word = true;
                i = t.expand(&chars, i);
            }
            '~' if !t.in_word && next.is_none_or(|n| n == '/' || n.is_whitespace()) => {
                t.in_word = true;
                match (t.vars)("HOME") {
                    Some(home) => t.word.push_str(&home),
                    None => t.word.push('~'),
                }
            }
            '>' => {
                let fd = if t.in_word && !t.quoted && (t.word == "1" || t.word == "2") {
                    let fd = if t.word == "2" { 2 } else { 1 };
                    t.word.clear();
                    t.in_word = false;
                    fd
                } else {
                    t.end_word();
                    1
                };
                let append = next == Some('>');
                if append {
                    i += 1;
                }
                if chars.get(i + 1) == Some(&'&') {
                    let target = chars.get(i + 2).copied();
                    i += 2;
                    match (fd, target) {
                        (2, Some('1')) => t.cmd.stderr = StderrTarget::Stdout,
                        (1, Some('2') | Some('1')) | (2, Some('2')) => {}
                        _ => return Err(ParseError::UnexpectedToken(">&".into())),
                    }
                } else if fd == 2 {
                    t.start_redirect(PendingRedirect::Stderr { append })?;
                } else {
                    t.start_redirect(PendingRedirect::Stdout { append })?;
                }
            }
            '&' if next == Some('>') => {
                t.end_word();
                i += 1;
                let append = chars.get(i + 1) == Some(&'>');
                if append {
                    i += 1;
                }
                t.start_redirect(PendingRedirect::Both { append })?;
            }
            '<' => {
                t.end_word();
                t.start_redirect(PendingRedirect::Stdin)?;
            }
            other => {
                t.in_word = true;
                t.word.push(other);
            }
        }
        i += 1;
    }
    t.end_word();

    if t.pending.is_some() {
        return Err(ParseError::UnexpectedToken("newline".into()));
    }

    let mut words = std::mem::take(&mut t.words).into_iter().peekable();
    while let Some(assignment) = words.peek().and_then(|w| is_assignment(w)) {
        t.cmd.assignments.push(assignment);
        words.next();
    }
    t.cmd.argv = words.collect();
    Ok(t.cmd)
}
