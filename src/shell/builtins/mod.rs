//! Built-in commands of the virtual shell.
//!
//! Each built-in is a plain function looked up by name in [`BUILTINS`].
//! Names missing from the table fall through to a host subprocess.

mod files;
mod system;
mod text;

use std::collections::BTreeMap;

use super::Output;
use super::args::ParsedArgs;
use super::process::ProcessTable;
use crate::vfs::{FsError, VirtualFs, path};

/// Mutable shell state a built-in may touch.
pub(crate) struct Context<'a> {
    pub fs: &'a mut VirtualFs,
    pub cwd: &'a mut String,
    pub env: &'a mut BTreeMap<String, String>,
    pub history: &'a [String],
    pub processes: &'a mut ProcessTable,
}

impl Context<'_> {
    /// Absolute path for `p` relative to the working directory.
    pub fn resolve(&self, p: &str) -> String {
        path::resolve(p, self.cwd.as_str())
    }
}

/// One call of a built-in.
pub(crate) struct Invocation<'a> {
    pub name: &'a str,
    pub args: &'a [String],
    pub stdin: Option<&'a [u8]>,
}

pub(crate) type Handler = fn(&mut Context<'_>, &Invocation<'_>) -> Output;

const BUILTINS: &[(&str, Handler)] = &[
    ("base64", files::base64),
    ("cat", files::cat),
    ("cd", files::cd),
    ("chmod", files::chmod),
    ("cp", files::cp),
    ("echo", text::echo),
    ("env", system::env),
    ("export", system::export),
    ("false", system::false_),
    ("find", files::find),
    ("grep", text::grep),
    ("head", text::head),
    ("history", system::history),
    ("kill", system::kill),
    ("ls", files::ls),
    ("mkdir", files::mkdir),
    ("mv", files::mv),
    ("ps", system::ps),
    ("pwd", files::pwd),
    ("rm", files::rm),
    ("rmdir", files::rmdir),
    ("sed", text::sed),
    ("tail", text::tail),
    ("touch", files::touch),
    ("true", system::true_),
    ("unset", system::unset),
    ("wc", text::wc),
    ("which", system::which),
];

/// Handler for a built-in name.
pub(crate) fn lookup(name: &str) -> Option<Handler> {
    BUILTINS
        .binary_search_by(|(n, _)| n.cmp(&name))
        .ok()
        .map(|idx| BUILTINS[idx].1)
}

/// True if `name` is handled in-process.
pub fn is_builtin(name: &str) -> bool {
    lookup(name).is_some()
}

// ---- Shared helpers ----

fn parse_args(inv: &Invocation<'_>, valued: &[&str]) -> Result<ParsedArgs, Output> {
    ParsedArgs::parse(inv.args, valued)
        .map_err(|msg| Output::error(2, format!("{}: {msg}", inv.name)))
}

fn fs_error(name: &str, err: &FsError) -> Output {
    Output::error(1, format!("{name}: {err}"))
}

/// Like [`fs_error`] but reports the path as the user typed it.
fn fs_error_at(name: &str, shown: &str, err: &FsError) -> Output {
    Output::error(1, format!("{name}: {shown}: {}", err.reason()))
}

/// Contents of each input. No operands (or `-`) reads stdin. Missing files
/// are reported in the returned error output and skipped.
fn read_inputs(
    ctx: &Context<'_>,
    inv: &Invocation<'_>,
    operands: &[String],
) -> (Vec<(String, Vec<u8>)>, Output) {
    let mut inputs = Vec::new();
    let mut errors = Output::ok();
    if operands.is_empty() {
        inputs.push(("-".to_string(), inv.stdin.unwrap_or_default().to_vec()));
        return (inputs, errors);
    }
    for operand in operands {
        if operand == "-" {
            inputs.push((operand.clone(), inv.stdin.unwrap_or_default().to_vec()));
            continue;
        }
        match ctx.fs.read(&ctx.resolve(operand)) {
            Ok(bytes) => inputs.push((operand.clone(), bytes.to_vec())),
            Err(e) => errors.fail(1, &format!("{}: {operand}: {}", inv.name, e.reason())),
        }
    }
    (inputs, errors)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Minimal shell state for exercising a built-in directly.
    pub struct Harness {
        pub fs: VirtualFs,
        pub cwd: String,
        pub env: BTreeMap<String, String>,
        pub history: Vec<String>,
        pub processes: ProcessTable,
    }

    impl Harness {
        pub fn new() -> Self {
            let mut fs = VirtualFs::new();
            fs.make_dir("/app", true).unwrap();
            Self {
                fs,
                cwd: "/app".to_string(),
                env: BTreeMap::from([("HOME".to_string(), "/app".to_string())]),
                history: Vec::new(),
                processes: ProcessTable::default(),
            }
        }

        pub fn run(&mut self, line: &str) -> Output {
            self.run_with_stdin(line, None)
        }

        pub fn run_with_stdin(&mut self, line: &str, stdin: Option<&[u8]>) -> Output {
            let words: Vec<String> = shell_words::split(line).unwrap();
            let (name, args) = words.split_first().unwrap();
            let handler = lookup(name).unwrap_or_else(|| panic!("no builtin {name}"));
            let mut ctx = Context {
                fs: &mut self.fs,
                cwd: &mut self.cwd,
                env: &mut self.env,
                history: &self.history,
                processes: &mut self.processes,
            };
            handler(
                &mut ctx,
                &Invocation {
                    name,
                    args,
                    stdin,
                },
            )
        }

        pub fn write(&mut self, p: &str, content: &str) {
            self.fs.write(p, content.as_bytes()).unwrap();
        }
    }

    pub fn stdout(out: &Output) -> String {
        String::from_utf8_lossy(&out.stdout).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_sorted_for_lookup() {
        let names: Vec<&str> = BUILTINS.iter().map(|(n, _)| *n).collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);
    }

    #[test]
    fn test_lookup() {
        assert!(is_builtin("ls"));
        assert!(is_builtin("which"));
        assert!(!is_builtin("npm"));
    }
}
