//! Text built-ins: `echo`, `sed`, `grep`, `head`, `tail`, `wc`.

use regex::{Regex, RegexBuilder};

use super::{Context, Invocation, parse_args, read_inputs};
use crate::shell::Output;
use crate::shell::args::ParsedArgs;

/// Default line count for `head`/`tail`.
const DEFAULT_LINES: usize = 10;

pub(super) fn echo(_ctx: &mut Context<'_>, inv: &Invocation<'_>) -> Output {
    let mut newline = true;
    let mut escapes = false;
    let mut words = inv.args;
    while let Some((first, rest)) = words.split_first() {
        let is_option = first.len() > 1
            && first.starts_with('-')
            && first[1..].chars().all(|c| matches!(c, 'n' | 'e' | 'E'));
        if !is_option {
            break;
        }
        for c in first[1..].chars() {
            match c {
                'n' => newline = false,
                'e' => escapes = true,
                _ => escapes = false,
            }
        }
        words = rest;
    }

    let mut text = words.join(" ");
    if escapes {
        let (expanded, stop) = expand_escapes(&text);
        text = expanded;
        if stop {
            return Output::stdout(text);
        }
    }
    if newline {
        text.push('\n');
    }
    Output::stdout(text)
}

/// Interprets backslash escapes for `echo -e`. The flag is set when `\c`
/// cut the output short.
fn expand_escapes(input: &str) -> (String, bool) {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some('a') => out.push('\u{7}'),
            Some('e') => out.push('\u{1b}'),
            Some('0') => out.push('\0'),
            Some('c') => return (out, true),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    (out, false)
}

// ---- Regex helpers ----

/// Converts a POSIX basic regular expression to the `regex` crate's syntax.
fn basic_to_extended(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(n @ ('(' | ')' | '{' | '}' | '+' | '?' | '|')) => out.push(n),
                Some(n) => {
                    out.push('\\');
                    out.push(n);
                }
                None => out.push_str("\\\\"),
            },
            '(' | ')' | '{' | '}' | '+' | '?' | '|' => {
                out.push('\\');
                out.push(c);
            }
            other => out.push(other),
        }
    }
    out
}

/// Compiles a user pattern. An invalid basic expression falls back to a
/// literal match.
fn compile(
    pattern: &str,
    extended: bool,
    fixed: bool,
    insensitive: bool,
    word: bool,
) -> Result<Regex, regex::Error> {
    let build = |src: &str| {
        let src = if word {
            format!(r"\b(?:{src})\b")
        } else {
            src.to_string()
        };
        RegexBuilder::new(&src).case_insensitive(insensitive).build()
    };
    if fixed {
        return build(&regex::escape(pattern));
    }
    if extended {
        return build(pattern);
    }
    build(&basic_to_extended(pattern)).or_else(|_| build(&regex::escape(pattern)))
}

// ---- sed ----

struct Substitution {
    regex: Regex,
    replacement: String,
    global: bool,
    occurrence: usize,
}

/// Parsed pieces of one `s<d>pattern<d>replacement<d>flags` command.
struct RawSubstitution {
    pattern: String,
    replacement: String,
    flags: String,
}

/// Reads one substitution from the front of `script`, honoring
/// backslash-escaped delimiters. Returns the unparsed remainder.
fn split_substitution(script: &str) -> Option<(RawSubstitution, &str)> {
    let mut chars = script.char_indices();
    if chars.next()?.1 != 's' {
        return None;
    }
    let (_, delim) = chars.next()?;
    let mut parts = vec![String::new()];
    let mut rest = "";
    while let Some((idx, c)) = chars.next() {
        if parts.len() == 3 && (c == ';' || c == '\n') {
            rest = &script[idx + c.len_utf8()..];
            break;
        }
        if c == '\\' && parts.len() < 3 {
            let part = parts.last_mut()?;
            match chars.next() {
                Some((_, n)) if n == delim => part.push(n),
                Some((_, n)) => {
                    part.push('\\');
                    part.push(n);
                }
                None => part.push('\\'),
            }
        } else if c == delim && parts.len() < 3 {
            parts.push(String::new());
        } else {
            parts.last_mut()?.push(c);
        }
    }
    if parts.len() != 3 {
        return None;
    }
    let flags = parts.pop()?.trim().to_string();
    let replacement = parts.pop()?;
    let pattern = parts.pop()?;
    Some((
        RawSubstitution {
            pattern,
            replacement,
            flags,
        },
        rest,
    ))
}

/// Rewrites a sed replacement (`&`, `\1`) into `regex` expansion syntax.
fn convert_replacement(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        match c {
            '&' => out.push_str("${0}"),
            '$' => out.push_str("$$"),
            '\\' => match chars.next() {
                Some(d) if d.is_ascii_digit() => out.push_str(&format!("${{{d}}}")),
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            },
            other => out.push(other),
        }
    }
    out
}

/// Parses a script made of `;`-separated substitutions.
fn parse_script(script: &str, extended: bool) -> Result<Vec<Substitution>, String> {
    let mut subs = Vec::new();
    let mut rest = script.trim_start_matches([' ', ';', '\n']);
    while !rest.is_empty() {
        let expr = subs.len() + 1;
        let (raw, remainder) = split_substitution(rest).ok_or_else(|| match rest.chars().next() {
            Some('s') => format!("sed: -e expression #{expr}: unterminated `s' command"),
            Some(c) => format!("sed: -e expression #{expr}: unknown command: `{c}'"),
            None => format!("sed: -e expression #{expr}: missing command"),
        })?;

        let mut global = false;
        let mut insensitive = false;
        let mut occurrence = 1;
        for flag in raw.flags.chars() {
            match flag {
                'g' => global = true,
                'i' | 'I' => insensitive = true,
                d if d.is_ascii_digit() => {
                    occurrence = d.to_digit(10).map_or(1, |n| n as usize).max(1);
                }
                other => {
                    return Err(format!(
                        "sed: -e expression #{expr}: unknown option to `s' ({other})"
                    ));
                }
            }
        }
        let regex = compile(&raw.pattern, extended, false, insensitive, false)
            .map_err(|e| format!("sed: -e expression #{expr}: {e}"))?;
        subs.push(Substitution {
            regex,
            replacement: convert_replacement(&raw.replacement),
            global,
            occurrence,
        });
        rest = remainder.trim_start_matches([' ', ';', '\n']);
    }
    Ok(subs)
}

impl Substitution {
    fn apply(&self, line: &str) -> String {
        if self.global {
            return self.regex.replace_all(line, self.replacement.as_str()).into_owned();
        }
        if self.occurrence == 1 {
            return self.regex.replace(line, self.replacement.as_str()).into_owned();
        }
        let Some(caps) = self.regex.captures_iter(line).nth(self.occurrence - 1) else {
            return line.to_string();
        };
        let Some(whole) = caps.get(0) else {
            return line.to_string();
        };
        let mut expanded = String::new();
        caps.expand(&self.replacement, &mut expanded);
        format!("{}{}{}", &line[..whole.start()], expanded, &line[whole.end()..])
    }

    fn apply_text(&self, text: &str) -> String {
        text.split_inclusive('\n')
            .map(|line| match line.strip_suffix('\n') {
                Some(body) => format!("{}\n", self.apply(body)),
                None => self.apply(line),
            })
            .collect()
    }
}

pub(super) fn sed(ctx: &mut Context<'_>, inv: &Invocation<'_>) -> Output {
    let args = match parse_args(inv, &["e", "expression"]) {
        Ok(a) => a,
        Err(out) => return out,
    };
    let in_place = args.any(&["i", "in-place"]);
    let extended = args.any(&["E", "r", "regexp-extended"]);

    let mut operands = args.positional.clone();
    let script = match args.value("e").or_else(|| args.value("expression")) {
        Some(s) => s.to_string(),
        None if !operands.is_empty() => operands.remove(0),
        None => return Output::error(1, "sed: no script specified"),
    };

    let subs = match parse_script(&script, extended) {
        Ok(subs) => subs,
        Err(msg) => return Output::error(1, msg),
    };
    let run = |text: &str| subs.iter().fold(text.to_string(), |acc, s| s.apply_text(&acc));

    if in_place {
        if operands.is_empty() {
            return Output::error(1, "sed: no input files");
        }
        let mut out = Output::ok();
        for operand in &operands {
            let resolved = ctx.resolve(operand);
            let edited = match ctx.fs.read(&resolved) {
                Ok(bytes) => run(&String::from_utf8_lossy(bytes)),
                Err(e) => {
                    out.fail(2, &format!("sed: can't read {operand}: {}", e.reason()));
                    continue;
                }
            };
            if let Err(e) = ctx.fs.write(&resolved, edited.as_bytes()) {
                out.fail(4, &format!("sed: couldn't edit {operand}: {}", e.reason()));
            }
        }
        return out;
    }

    let (inputs, mut out) = read_inputs(ctx, inv, &operands);
    let mut text = String::new();
    for (_, bytes) in inputs {
        text.push_str(&run(&String::from_utf8_lossy(&bytes)));
    }
    if out.exit_code != 0 {
        out.exit_code = 2;
    }
    out.stdout = text.into_bytes();
    out
}

// ---- grep ----

pub(super) fn grep(ctx: &mut Context<'_>, inv: &Invocation<'_>) -> Output {
    let args = match parse_args(inv, &["e", "regexp", "m", "max-count"]) {
        Ok(a) => a,
        Err(out) => return out,
    };
    let mut operands = args.positional.clone();
    let pattern = match args.value("e").or_else(|| args.value("regexp")) {
        Some(p) => p.to_string(),
        None if !operands.is_empty() => operands.remove(0),
        None => return Output::error(2, "Usage: grep [OPTION]... PATTERNS [FILE]..."),
    };

    let recursive = args.any(&["r", "R", "recursive"]);
    let regex = match compile(
        &pattern,
        args.any(&["E", "extended-regexp"]),
        args.any(&["F", "fixed-strings"]),
        args.any(&["i", "ignore-case"]),
        args.any(&["w", "word-regexp"]),
    ) {
        Ok(r) => r,
        Err(e) => return Output::error(2, format!("grep: {e}")),
    };
    let invert = args.any(&["v", "invert-match"]);
    let max_count = args
        .value("m")
        .or_else(|| args.value("max-count"))
        .and_then(|m| m.parse::<usize>().ok());

    if recursive && operands.is_empty() {
        operands.push(".".to_string());
    }

    let mut out = Output::ok();
    let mut sources: Vec<(String, Vec<u8>)> = Vec::new();
    if operands.is_empty() {
        sources.push(("(standard input)".to_string(), inv.stdin.unwrap_or_default().to_vec()));
    }
    for operand in &operands {
        let resolved = ctx.resolve(operand);
        match ctx.fs.stat(&resolved) {
            Ok(meta) if meta.is_dir && recursive => {
                let Ok(walked) = ctx.fs.walk(&resolved) else { continue };
                for (abs, _) in walked.into_iter().filter(|(_, m)| !m.is_dir) {
                    let rel = abs[resolved.len()..].trim_start_matches('/');
                    let shown = if operand.ends_with('/') {
                        format!("{operand}{rel}")
                    } else {
                        format!("{operand}/{rel}")
                    };
                    if let Ok(bytes) = ctx.fs.read(&abs) {
                        sources.push((shown, bytes.to_vec()));
                    }
                }
            }
            Ok(meta) if meta.is_dir => out.fail(2, &format!("grep: {operand}: Is a directory")),
            Ok(_) => {
                if let Ok(bytes) = ctx.fs.read(&resolved) {
                    sources.push((operand.clone(), bytes.to_vec()));
                }
            }
            Err(_) => out.fail(2, &format!("grep: {operand}: No such file or directory")),
        }
    }

    let show_names = if args.has("h") {
        false
    } else {
        args.has("H") || recursive || operands.len() > 1
    };
    let line_numbers = args.any(&["n", "line-number"]);
    let count_only = args.any(&["c", "count"]);
    let files_only = args.any(&["l", "files-with-matches"]);
    let quiet = args.any(&["q", "quiet", "silent"]);

    let mut listing = String::new();
    let mut matched_any = false;
    for (name, bytes) in &sources {
        let text = String::from_utf8_lossy(bytes);
        let mut count = 0;
        for (idx, line) in text.lines().enumerate() {
            if max_count.is_some_and(|m| count >= m) {
                break;
            }
            if regex.is_match(line) == invert {
                continue;
            }
            count += 1;
            if count_only || files_only || quiet {
                continue;
            }
            if show_names {
                listing.push_str(name);
                listing.push(':');
            }
            if line_numbers {
                listing.push_str(&format!("{}:", idx + 1));
            }
            listing.push_str(line);
            listing.push('\n');
        }
        matched_any |= count > 0;
        if count_only {
            if show_names {
                listing.push_str(&format!("{name}:{count}\n"));
            } else {
                listing.push_str(&format!("{count}\n"));
            }
        } else if files_only && count > 0 {
            listing.push_str(name);
            listing.push('\n');
        }
    }

    if !quiet {
        out.stdout = listing.into_bytes();
    }
    out.exit_code = match (matched_any, out.exit_code) {
        (true, _) if quiet => 0,
        (_, code) if code != 0 => 2,
        (true, _) => 0,
        (false, _) => 1,
    };
    out
}

// ---- head / tail ----

fn line_count(args: &ParsedArgs) -> Result<(usize, bool), String> {
    let Some(raw) = args.value("n").or_else(|| args.value("lines")) else {
        return Ok((DEFAULT_LINES, false));
    };
    let from_start = raw.starts_with('+');
    raw.trim_start_matches(['+', '-'])
        .parse()
        .map(|n| (n, from_start))
        .map_err(|_| format!("invalid number of lines: '{raw}'"))
}

fn head_or_tail(ctx: &mut Context<'_>, inv: &Invocation<'_>, tail: bool) -> Output {
    let args = match parse_args(inv, &["n", "lines"]) {
        Ok(a) => a,
        Err(out) => return out,
    };
    let (count, from_start) = match line_count(&args) {
        Ok(c) => c,
        Err(msg) => return Output::error(1, format!("{}: {msg}", inv.name)),
    };
    let (inputs, mut out) = read_inputs(ctx, inv, &args.positional);
    let headers = inputs.len() > 1;

    let mut text = String::new();
    for (idx, (name, bytes)) in inputs.iter().enumerate() {
        if headers {
            if idx > 0 {
                text.push('\n');
            }
            text.push_str(&format!("==> {name} <==\n"));
        }
        let content = String::from_utf8_lossy(bytes);
        let lines: Vec<&str> = content.split_inclusive('\n').collect();
        let selected = match (tail, from_start) {
            (false, _) => &lines[..count.min(lines.len())],
            (true, true) => &lines[count.saturating_sub(1).min(lines.len())..],
            (true, false) => &lines[lines.len().saturating_sub(count)..],
        };
        text.extend(selected.iter().copied());
    }
    out.stdout = text.into_bytes();
    out
}

pub(super) fn head(ctx: &mut Context<'_>, inv: &Invocation<'_>) -> Output {
    head_or_tail(ctx, inv, false)
}

pub(super) fn tail(ctx: &mut Context<'_>, inv: &Invocation<'_>) -> Output {
    head_or_tail(ctx, inv, true)
}

// ---- wc ----

#[derive(Default, Clone, Copy)]
struct Counts {
    lines: usize,
    words: usize,
    bytes: usize,
}

impl Counts {
    fn of(bytes: &[u8]) -> Self {
        Self {
            lines: bytes.iter().filter(|b| **b == b'\n').count(),
            words: String::from_utf8_lossy(bytes).split_whitespace().count(),
            bytes: bytes.len(),
        }
    }
}

pub(super) fn wc(ctx: &mut Context<'_>, inv: &Invocation<'_>) -> Output {
    let args = match parse_args(inv, &[]) {
        Ok(a) => a,
        Err(out) => return out,
    };
    let mut show_lines = args.any(&["l", "lines"]);
    let mut show_words = args.any(&["w", "words"]);
    let mut show_bytes = args.any(&["c", "m", "bytes", "chars"]);
    if !(show_lines || show_words || show_bytes) {
        (show_lines, show_words, show_bytes) = (true, true, true);
    }

    let (inputs, mut out) = read_inputs(ctx, inv, &args.positional);
    let from_stdin = args.positional.is_empty();
    let mut rows: Vec<(Counts, Option<String>)> = inputs
        .iter()
        .map(|(name, bytes)| (Counts::of(bytes), (!from_stdin).then(|| name.clone())))
        .collect();
    if rows.len() > 1 {
        let total = rows.iter().fold(Counts::default(), |acc, (c, _)| Counts {
            lines: acc.lines + c.lines,
            words: acc.words + c.words,
            bytes: acc.bytes + c.bytes,
        });
        rows.push((total, Some("total".to_string())));
    }

    let columns = [show_lines, show_words, show_bytes].iter().filter(|s| **s).count();
    let width = if columns == 1 && rows.len() == 1 {
        0
    } else if from_stdin {
        7
    } else {
        rows.iter()
            .map(|(c, _)| c.lines.max(c.words).max(c.bytes).to_string().len())
            .max()
            .unwrap_or(1)
    };

    let mut text = String::new();
    for (counts, name) in rows {
        let mut fields = Vec::new();
        if show_lines {
            fields.push(format!("{:>width$}", counts.lines));
        }
        if show_words {
            fields.push(format!("{:>width$}", counts.words));
        }
        if show_bytes {
            fields.push(format!("{:>width$}", counts.bytes));
        }
        if let Some(name) = name {
            fields.push(name);
        }
        text.push_str(&fields.join(" "));
        text.push('\n');
    }
    out.stdout = text.into_bytes();
    out
}

#[cfg(test)]
mod tests {
    use super::super::testing::{Harness, stdout};
    use super::*;

    #[test]
    fn test_echo() {
        let mut h = Harness::new();
        assert_eq!(stdout(&h.run("echo Hello")), "Hello\n");
        assert_eq!(stdout(&h.run("echo -n a b")), "a b");
        assert_eq!(stdout(&h.run("echo -e 'a\\tb'")), "a\tb\n");
        assert_eq!(stdout(&h.run("echo -x")), "-x\n");
        assert_eq!(stdout(&h.run("echo")), "\n");
    }

    #[test]
    fn test_sed_substitution_flags() {
        let mut h = Harness::new();
        h.write("/app/f", "foo foo\nFoo\n");
        assert_eq!(stdout(&h.run("sed s/foo/bar/ f")), "bar foo\nFoo\n");
        assert_eq!(stdout(&h.run("sed s/foo/bar/g f")), "bar bar\nFoo\n");
        assert_eq!(stdout(&h.run("sed s/foo/bar/gi f")), "bar bar\nbar\n");
        assert_eq!(stdout(&h.run("sed s/foo/bar/2 f")), "foo bar\nFoo\n");
    }

    #[test]
    fn test_sed_in_place_with_groups_and_custom_delimiter() {
        let mut h = Harness::new();
        h.write("/app/vite.config.ts", "server: { port: 5173 }\n");
        let out = h.run("sed -i 's|port: \\([0-9]*\\)|port: 3000 /* was \\1 */|' vite.config.ts");
        assert_eq!(out.exit_code, 0);
        assert!(out.stdout.is_empty());
        assert_eq!(
            h.fs.read("/app/vite.config.ts").unwrap(),
            b"server: { port: 3000 /* was 5173 */ }\n"
        );
        h.run("sed -i 's/port/[&]/' vite.config.ts");
        let edited = h.fs.read("/app/vite.config.ts").unwrap();
        assert!(String::from_utf8_lossy(edited).contains("[port]"));
    }

    #[test]
    fn test_sed_rejects_other_commands() {
        let mut h = Harness::new();
        h.write("/app/f", "x\n");
        assert_eq!(h.run("sed /x/d f").exit_code, 1);
        assert_eq!(h.run("sed -i s/x/y/ missing").exit_code, 2);
        assert_eq!(h.run("sed 's/x/y' f").exit_code, 1);
    }

    #[test]
    fn test_sed_multiple_expressions_and_semicolons_in_replacement() {
        let mut h = Harness::new();
        h.write("/app/f", "a b\n");
        assert_eq!(stdout(&h.run("sed 's/a/x/; s/b/y/' f")), "x y\n");
        assert_eq!(stdout(&h.run("sed 's/a/x;/' f")), "x; b\n");
    }

    #[test]
    fn test_grep_matches_and_exit_codes() {
        let mut h = Harness::new();
        h.write(
            "/app/package.json",
            "{\n  \"dependencies\": {\n    \"react\": \"^18.2.0\"\n  }\n}\n",
        );
        let out = h.run("grep react package.json");
        assert_eq!(out.exit_code, 0);
        assert_eq!(stdout(&out), "    \"react\": \"^18.2.0\"\n");

        assert_eq!(h.run("grep vue package.json").exit_code, 1);
        assert_eq!(h.run("grep React package.json").exit_code, 1);
        assert_eq!(h.run("grep -i React package.json").exit_code, 0);
        assert_eq!(stdout(&h.run("grep -n react package.json")), "3:    \"react\": \"^18.2.0\"\n");
        assert_eq!(stdout(&h.run("grep -c '\"' package.json")), "2\n");
        assert_eq!(h.run("grep x missing").exit_code, 2);
    }

    #[test]
    fn test_grep_recursive_prefixes_paths() {
        let mut h = Harness::new();
        h.fs.make_dir("/app/src", false).unwrap();
        h.write("/app/src/App.tsx", "import React from 'react';\n");
        h.write("/app/src/index.css", "body {}\n");
        let out = h.run("grep -r React src");
        assert_eq!(stdout(&out), "src/App.tsx:import React from 'react';\n");
        assert_eq!(stdout(&h.run("grep -rl body .")), "./src/index.css\n");
    }

    #[test]
    fn test_head_and_tail() {
        let mut h = Harness::new();
        let body: String = (1..=12).map(|n| format!("{n}\n")).collect();
        h.write("/app/n", &body);
        assert_eq!(stdout(&h.run("head -n 2 n")), "1\n2\n");
        assert_eq!(stdout(&h.run("tail -n 2 n")), "11\n12\n");
        assert_eq!(stdout(&h.run("tail -3 n")), "10\n11\n12\n");
        assert_eq!(stdout(&h.run("tail -n +11 n")), "11\n12\n");
        assert_eq!(stdout(&h.run("head n")).lines().count(), 10);
    }

    #[test]
    fn test_wc_column_order() {
        let mut h = Harness::new();
        h.write("/app/f", "one two\nthree\n");
        assert_eq!(stdout(&h.run("wc f")), " 2  3 14 f\n");
        assert_eq!(stdout(&h.run("wc -l f")), "2 f\n");
        h.write("/app/g", "x\n");
        let out = stdout(&h.run("wc -l f g"));
        assert_eq!(out, " 2 f\n 1 g\n 3 total\n");
        let out = h.run_with_stdin("wc -w", Some(b"a b c"));
        assert_eq!(stdout(&out), "3\n");
    }

    #[test]
    fn test_basic_regex_conversion() {
        assert_eq!(basic_to_extended(r"\(a\)\+"), "(a)+");
        assert_eq!(basic_to_extended("a+(b)"), r"a\+\(b\)");
        assert_eq!(convert_replacement(r"[&] \1 $x"), "[${0}] ${1} $$x");
    }
}
