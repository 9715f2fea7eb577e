//! Environment, process and bookkeeping built-ins.

use super::{Context, Invocation, is_builtin, parse_args};
use crate::shell::Output;

fn valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub(super) fn export(ctx: &mut Context<'_>, inv: &Invocation<'_>) -> Output {
    let operands: Vec<&String> = inv.args.iter().filter(|a| *a != "-p").collect();
    if operands.is_empty() {
        let listing: String = ctx
            .env
            .iter()
            .map(|(k, v)| format!("declare -x {k}=\"{v}\"\n"))
            .collect();
        return Output::stdout(listing);
    }

    let mut out = Output::ok();
    for operand in operands {
        let (name, value) = match operand.split_once('=') {
            Some((n, v)) => (n, Some(v)),
            None => (operand.as_str(), None),
        };
        if !valid_name(name) {
            out.fail(1, &format!("export: `{operand}': not a valid identifier"));
            continue;
        }
        match value {
            Some(v) => {
                ctx.env.insert(name.to_string(), v.to_string());
            }
            None => {
                ctx.env.entry(name.to_string()).or_default();
            }
        }
    }
    out
}

pub(super) fn unset(ctx: &mut Context<'_>, inv: &Invocation<'_>) -> Output {
    for name in inv.args.iter().filter(|a| !a.starts_with('-')) {
        ctx.env.remove(name);
    }
    Output::ok()
}

pub(super) fn env(ctx: &mut Context<'_>, inv: &Invocation<'_>) -> Output {
    let mut listing = ctx.env.clone();
    for arg in inv.args {
        match arg.split_once('=') {
            Some((k, v)) if valid_name(k) => {
                listing.insert(k.to_string(), v.to_string());
            }
            _ => {
                return Output::error(
                    125,
                    format!("env: '{arg}': running commands through env is not supported"),
                );
            }
        }
    }
    Output::stdout(
        listing
            .iter()
            .map(|(k, v)| format!("{k}={v}\n"))
            .collect::<String>(),
    )
}

pub(super) fn which(ctx: &mut Context<'_>, inv: &Invocation<'_>) -> Output {
    let args = match parse_args(inv, &[]) {
        Ok(a) => a,
        Err(out) => return out,
    };
    if args.positional.is_empty() {
        return Output::error(1, "which: missing argument");
    }
    let search = ctx.env.get("PATH").cloned().or_else(|| std::env::var("PATH").ok());

    let mut out = Output::ok();
    let mut listing = String::new();
    for name in &args.positional {
        if is_builtin(name) {
            listing.push_str(&format!("/usr/bin/{name}\n"));
            continue;
        }
        let found = match &search {
            Some(paths) => which::which_in(name, Some(paths), "/"),
            None => which::which(name),
        };
        match found {
            Ok(p) => {
                listing.push_str(&p.display().to_string());
                listing.push('\n');
            }
            Err(_) => out.fail(
                1,
                &format!("which: no {name} in ({})", search.as_deref().unwrap_or_default()),
            ),
        }
    }
    out.stdout = listing.into_bytes();
    out
}

pub(super) fn ps(ctx: &mut Context<'_>, _inv: &Invocation<'_>) -> Output {
    let mut listing = format!("{:>7} {:<8} {:<6} {}\n", "PID", "STAT", "PORT", "COMMAND");
    for p in ctx.processes.list() {
        listing.push_str(&format!(
            "{:>7} {:<8} {:<6} {}\n",
            p.pid,
            if p.running { "running" } else { "exited" },
            p.port.map(|port| port.to_string()).unwrap_or_else(|| "-".into()),
            p.command,
        ));
    }
    Output::stdout(listing)
}

pub(super) fn kill(ctx: &mut Context<'_>, inv: &Invocation<'_>) -> Output {
    let args = match parse_args(inv, &["s", "n"]) {
        Ok(a) => a,
        Err(out) => return out,
    };
    if args.positional.is_empty() {
        return Output::error(
            2,
            "kill: usage: kill [-s sigspec | -n signum | -sigspec] pid | jobspec ...",
        );
    }
    let mut out = Output::ok();
    for target in &args.positional {
        if ctx.processes.kill(target).is_empty() {
            out.fail(1, &format!("kill: ({target}) - No such process"));
        }
    }
    out
}

pub(super) fn history(ctx: &mut Context<'_>, _inv: &Invocation<'_>) -> Output {
    let listing: String = ctx
        .history
        .iter()
        .enumerate()
        .map(|(idx, line)| format!("{:>5}  {line}\n", idx + 1))
        .collect();
    Output::stdout(listing)
}

pub(super) fn true_(_ctx: &mut Context<'_>, _inv: &Invocation<'_>) -> Output {
    Output::ok()
}

pub(super) fn false_(_ctx: &mut Context<'_>, _inv: &Invocation<'_>) -> Output {
    Output::error(1, "")
}
