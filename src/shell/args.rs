//! Flag parsing shared by the built-in commands.

use std::collections::{BTreeMap, BTreeSet};

/// Parsed command arguments.
#[derive(Debug, Default)]
pub struct ParsedArgs {
    flags: BTreeSet<String>,
    values: BTreeMap<String, String>,
    /// Non-flag arguments in order.
    pub positional: Vec<String>,
}

impl ParsedArgs {
    /// Parses `args`. Names in `valued` take a value (`-n 5`, `-n5`,
    /// `--name=v`, `--name v`). Short flags cluster (`-la`). `--` ends flag
    /// parsing. When `n` is valued, `-5` is shorthand for `-n 5`.
    pub fn parse(args: &[String], valued: &[&str]) -> Result<Self, String> {
        let mut parsed = Self::default();
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            if arg == "--" {
                parsed.positional.extend(iter.cloned());
                break;
            }
            if let Some(long) = arg.strip_prefix("--") {
                if let Some((name, value)) = long.split_once('=') {
                    parsed.values.insert(name.to_string(), value.to_string());
                } else if valued.contains(&long) {
                    let value = iter
                        .next()
                        .ok_or_else(|| format!("option '--{long}' requires an argument"))?;
                    parsed.values.insert(long.to_string(), value.clone());
                } else {
                    parsed.flags.insert(long.to_string());
                }
                continue;
            }
            let Some(short) = arg.strip_prefix('-').filter(|s| !s.is_empty()) else {
                parsed.positional.push(arg.clone());
                continue;
            };
            if valued.contains(&"n") && short.chars().all(|c| c.is_ascii_digit()) {
                parsed.values.insert("n".to_string(), short.to_string());
                continue;
            }
            for (idx, c) in short.char_indices() {
                let name = c.to_string();
                if valued.contains(&name.as_str()) {
                    let rest = &short[idx + c.len_utf8()..];
                    let value = if rest.is_empty() {
                        iter.next()
                            .cloned()
                            .ok_or_else(|| format!("option requires an argument -- '{c}'"))?
                    } else {
                        rest.to_string()
                    };
                    parsed.values.insert(name, value);
                    break;
                }
                parsed.flags.insert(name);
            }
        }
        Ok(parsed)
    }

    /// True if the flag was given.
    pub fn has(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }

    /// True if any of the flags was given.
    pub fn any(&self, flags: &[&str]) -> bool {
        flags.iter().any(|f| self.has(f))
    }

    /// Value of a valued option.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_clustered_short_flags() {
        let parsed = ParsedArgs::parse(&args(&["-la", "src"]), &[]).unwrap();
        assert!(parsed.has("l"));
        assert!(parsed.has("a"));
        assert_eq!(parsed.positional, vec!["src"]);
    }

    #[test]
    fn test_valued_flags() {
        let parsed = ParsedArgs::parse(&args(&["-n", "5", "f"]), &["n"]).unwrap();
        assert_eq!(parsed.value("n"), Some("5"));
        let parsed = ParsedArgs::parse(&args(&["-n5"]), &["n"]).unwrap();
        assert_eq!(parsed.value("n"), Some("5"));
        let parsed = ParsedArgs::parse(&args(&["-20", "f"]), &["n"]).unwrap();
        assert_eq!(parsed.value("n"), Some("20"));
        let parsed = ParsedArgs::parse(&args(&["--name=*.ts"]), &[]).unwrap();
        assert_eq!(parsed.value("name"), Some("*.ts"));
    }

    #[test]
    fn test_missing_value_is_an_error() {
        assert!(ParsedArgs::parse(&args(&["-n"]), &["n"]).is_err());
    }

    #[test]
    fn test_double_dash_ends_flags() {
        let parsed = ParsedArgs::parse(&args(&["-f", "--", "-x", "-"]), &[]).unwrap();
        assert!(parsed.has("f"));
        assert_eq!(parsed.positional, vec!["-x", "-"]);
        let parsed = ParsedArgs::parse(&args(&["-"]), &[]).unwrap();
        assert_eq!(parsed.positional, vec!["-"]);
    }
}
