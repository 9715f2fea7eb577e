//! Filesystem built-ins: navigation, listing, creation and removal.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use super::{Context, Invocation, fs_error, fs_error_at, parse_args, read_inputs};
use crate::shell::Output;
use crate::vfs::{DirEntry, FsError, Metadata, path};

pub(super) fn pwd(ctx: &mut Context<'_>, _inv: &Invocation<'_>) -> Output {
    Output::stdout(format!("{}\n", ctx.cwd))
}

pub(super) fn cd(ctx: &mut Context<'_>, inv: &Invocation<'_>) -> Output {
    let target = match inv.args.first().map(String::as_str) {
        None | Some("~") => ctx.env.get("HOME").cloned().unwrap_or_else(|| path::ROOT.to_string()),
        Some("-") => match ctx.env.get("OLDPWD") {
            Some(old) => old.clone(),
            None => return Output::error(1, "cd: OLDPWD not set"),
        },
        Some(dir) => dir.to_string(),
    };
    let resolved = ctx.resolve(&target);
    match ctx.fs.stat(&resolved) {
        Ok(meta) if meta.is_dir => {
            let previous = std::mem::replace(ctx.cwd, resolved);
            ctx.env.insert("OLDPWD".to_string(), previous);
            ctx.env.insert("PWD".to_string(), ctx.cwd.clone());
            if inv.args.first().is_some_and(|a| a == "-") {
                return Output::stdout(format!("{}\n", ctx.cwd));
            }
            Output::ok()
        }
        Ok(_) => Output::error(1, format!("cd: {target}: Not a directory")),
        Err(_) => Output::error(1, format!("cd: {target}: No such file or directory")),
    }
}

// ---- ls ----

fn mode_string(meta: &Metadata) -> String {
    let mut s = String::with_capacity(10);
    s.push(if meta.is_dir { 'd' } else { '-' });
    for shift in [6, 3, 0] {
        let bits = (meta.mode >> shift) & 0o7;
        s.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        s.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        s.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    s
}

fn long_listing(entries: &[DirEntry]) -> String {
    let width = entries
        .iter()
        .map(|e| e.metadata.size.to_string().len())
        .max()
        .unwrap_or(1);
    let blocks: u64 = entries.iter().map(|e| e.metadata.size.div_ceil(1024)).sum();
    let mut out = format!("total {blocks}\n");
    for e in entries {
        out.push_str(&format!(
            "{} 1 root root {:>width$} {} {}\n",
            mode_string(&e.metadata),
            e.metadata.size,
            e.metadata.modified.format("%b %e %H:%M"),
            e.name,
        ));
    }
    out
}

pub(super) fn ls(ctx: &mut Context<'_>, inv: &Invocation<'_>) -> Output {
    let args = match parse_args(inv, &[]) {
        Ok(a) => a,
        Err(out) => return out,
    };
    let long = args.has("l");
    let all = args.any(&["a", "all"]);
    let almost_all = args.any(&["A", "almost-all"]);

    let operands = if args.positional.is_empty() {
        vec![".".to_string()]
    } else {
        args.positional.clone()
    };
    let multiple = operands.len() > 1;

    let mut out = Output::ok();
    let mut sections = Vec::new();
    for operand in &operands {
        let resolved = ctx.resolve(operand);
        let meta = match ctx.fs.stat(&resolved) {
            Ok(m) => m,
            Err(_) => {
                out.fail(
                    2,
                    &format!("ls: cannot access '{operand}': No such file or directory"),
                );
                continue;
            }
        };

        let mut entries = if meta.is_dir {
            match ctx.fs.list(&resolved) {
                Ok(list) => list,
                Err(e) => {
                    out.merge(fs_error("ls", &e));
                    continue;
                }
            }
        } else {
            vec![DirEntry {
                name: operand.clone(),
                metadata: meta.clone(),
            }]
        };
        if meta.is_dir {
            entries.retain(|e| all || almost_all || !e.name.starts_with('.'));
            if all {
                let parent_meta = ctx
                    .fs
                    .stat(&path::parent(&resolved))
                    .unwrap_or_else(|_| meta.clone());
                entries.insert(0, DirEntry { name: "..".into(), metadata: parent_meta });
                entries.insert(0, DirEntry { name: ".".into(), metadata: meta.clone() });
            }
        }

        let body = if long {
            long_listing(&entries)
        } else {
            entries
                .iter()
                .map(|e| format!("{}\n", e.name))
                .collect::<String>()
        };
        if multiple && meta.is_dir {
            sections.push(format!("{operand}:\n{body}"));
        } else {
            sections.push(body);
        }
    }
    out.stdout = sections.join("\n").into_bytes();
    out
}

// ---- Reading and creating ----

pub(super) fn cat(ctx: &mut Context<'_>, inv: &Invocation<'_>) -> Output {
    let operands: Vec<String> = inv
        .args
        .iter()
        .filter(|a| !a.starts_with('-') || *a == "-")
        .cloned()
        .collect();
    let (inputs, mut out) = read_inputs(ctx, inv, &operands);
    out.stdout = inputs.into_iter().flat_map(|(_, bytes)| bytes).collect();
    out
}

pub(super) fn touch(ctx: &mut Context<'_>, inv: &Invocation<'_>) -> Output {
    let args = match parse_args(inv, &[]) {
        Ok(a) => a,
        Err(out) => return out,
    };
    if args.positional.is_empty() {
        return Output::error(1, "touch: missing file operand");
    }
    let mut out = Output::ok();
    for operand in &args.positional {
        let resolved = ctx.resolve(operand);
        if let Err(e) = ctx.fs.touch(&resolved) {
            out.fail(1, &format!("touch: cannot touch '{operand}': {}", e.reason()));
        }
    }
    out
}

pub(super) fn mkdir(ctx: &mut Context<'_>, inv: &Invocation<'_>) -> Output {
    let args = match parse_args(inv, &["m"]) {
        Ok(a) => a,
        Err(out) => return out,
    };
    if args.positional.is_empty() {
        return Output::error(1, "mkdir: missing operand");
    }
    let recursive = args.any(&["p", "parents"]);
    let mut out = Output::ok();
    for operand in &args.positional {
        let resolved = ctx.resolve(operand);
        if let Err(e) = ctx.fs.make_dir(&resolved, recursive) {
            out.fail(
                1,
                &format!("mkdir: cannot create directory '{operand}': {}", e.reason()),
            );
        }
    }
    out
}

// ---- Removing ----

pub(super) fn rm(ctx: &mut Context<'_>, inv: &Invocation<'_>) -> Output {
    let args = match parse_args(inv, &[]) {
        Ok(a) => a,
        Err(out) => return out,
    };
    let recursive = args.any(&["r", "R", "recursive"]);
    let force = args.any(&["f", "force"]);
    let empty_dirs = args.any(&["d", "dir"]);

    if args.positional.is_empty() && !force {
        return Output::error(1, "rm: missing operand");
    }

    let mut out = Output::ok();
    for operand in &args.positional {
        let resolved = ctx.resolve(operand);
        if resolved == path::ROOT {
            out.fail(1, "rm: it is dangerous to operate recursively on '/'");
            continue;
        }
        let meta = match ctx.fs.stat(&resolved) {
            Ok(m) => m,
            Err(_) if force => continue,
            Err(e) => {
                out.fail(1, &format!("rm: cannot remove '{operand}': {}", e.reason()));
                continue;
            }
        };
        let result = if meta.is_dir && !recursive {
            if empty_dirs {
                ctx.fs.remove(&resolved, false)
            } else {
                Err(FsError::IsADirectory(resolved))
            }
        } else {
            ctx.fs.remove(&resolved, recursive)
        };
        if let Err(e) = result {
            out.fail(1, &format!("rm: cannot remove '{operand}': {}", e.reason()));
        }
    }
    out
}

pub(super) fn rmdir(ctx: &mut Context<'_>, inv: &Invocation<'_>) -> Output {
    let args = match parse_args(inv, &[]) {
        Ok(a) => a,
        Err(out) => return out,
    };
    if args.positional.is_empty() {
        return Output::error(1, "rmdir: missing operand");
    }
    let mut out = Output::ok();
    for operand in &args.positional {
        let resolved = ctx.resolve(operand);
        let result = match ctx.fs.stat(&resolved) {
            Ok(meta) if !meta.is_dir => Err(FsError::NotADirectory(resolved)),
            Ok(_) => ctx.fs.remove(&resolved, false),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            out.fail(1, &format!("rmdir: failed to remove '{operand}': {}", e.reason()));
        }
    }
    out
}

// ---- Permissions ----

/// Applies a numeric (`755`) or symbolic (`u+x`, `go-w`, `a=r`) mode.
fn apply_mode(spec: &str, current: u32) -> Option<u32> {
    if spec.chars().all(|c| c.is_digit(8)) {
        return u32::from_str_radix(spec, 8).ok().map(|m| m & 0o7777);
    }
    let mut mode = current;
    for clause in spec.split(',') {
        let op_at = clause.find(['+', '-', '='])?;
        let (who, rest) = clause.split_at(op_at);
        let mut rest = rest.chars();
        let op = rest.next()?;
        let mut mask = 0;
        for c in if who.is_empty() { "a".chars() } else { who.chars() } {
            mask |= match c {
                'u' => 0o700,
                'g' => 0o070,
                'o' => 0o007,
                'a' => 0o777,
                _ => return None,
            };
        }
        let mut bits = 0;
        for c in rest {
            bits |= match c {
                'r' => 0o444,
                'w' => 0o222,
                'x' => 0o111,
                _ => return None,
            };
        }
        bits &= mask;
        mode = match op {
            '+' => mode | bits,
            '-' => mode & !bits,
            _ => (mode & !mask) | bits,
        };
    }
    Some(mode)
}

pub(super) fn chmod(ctx: &mut Context<'_>, inv: &Invocation<'_>) -> Output {
    let recursive = inv.args.iter().any(|a| a == "-R");
    let mut operands = inv.args.iter().filter(|a| *a != "-R");
    let (Some(spec), targets) = (operands.next(), operands.collect::<Vec<_>>()) else {
        return Output::error(1, "chmod: missing operand");
    };
    if targets.is_empty() {
        return Output::error(1, format!("chmod: missing operand after '{spec}'"));
    }

    let mut out = Output::ok();
    for operand in targets {
        let resolved = ctx.resolve(operand);
        let nodes = if recursive {
            ctx.fs.walk(&resolved)
        } else {
            ctx.fs.stat(&resolved).map(|m| vec![(resolved.clone(), m)])
        };
        let nodes = match nodes {
            Ok(n) => n,
            Err(e) => {
                out.fail(1, &format!("chmod: cannot access '{operand}': {}", e.reason()));
                continue;
            }
        };
        for (p, meta) in nodes {
            let Some(mode) = apply_mode(spec, meta.mode) else {
                return Output::error(1, format!("chmod: invalid mode: '{spec}'"));
            };
            if let Err(e) = ctx.fs.set_mode(&p, mode) {
                out.merge(fs_error("chmod", &e));
            }
        }
    }
    out
}

// ---- Copying and moving ----

/// Splits operands into sources and destination, checking the multi-source
/// rule shared by `cp` and `mv`.
fn sources_and_dest<'a>(
    ctx: &Context<'_>,
    name: &str,
    operands: &'a [String],
) -> Result<(&'a [String], &'a String), Output> {
    let Some((dest, sources)) = operands.split_last() else {
        return Err(Output::error(1, format!("{name}: missing file operand")));
    };
    if sources.is_empty() {
        return Err(Output::error(
            1,
            format!("{name}: missing destination file operand after '{dest}'"),
        ));
    }
    if sources.len() > 1 && !ctx.fs.is_dir(&ctx.resolve(dest)) {
        return Err(Output::error(1, format!("{name}: target '{dest}' is not a directory")));
    }
    Ok((sources, dest))
}

pub(super) fn cp(ctx: &mut Context<'_>, inv: &Invocation<'_>) -> Output {
    let args = match parse_args(inv, &[]) {
        Ok(a) => a,
        Err(out) => return out,
    };
    let recursive = args.any(&["r", "R", "a", "recursive", "archive"]);
    let (sources, dest) = match sources_and_dest(ctx, "cp", &args.positional) {
        Ok(pair) => pair,
        Err(out) => return out,
    };
    let dest_path = ctx.resolve(dest);

    let mut out = Output::ok();
    for source in sources {
        let src_path = ctx.resolve(source);
        match ctx.fs.copy(&src_path, &dest_path, recursive) {
            Ok(()) => {}
            Err(FsError::NotFound(p)) if p == src_path => {
                out.fail(1, &format!("cp: cannot stat '{source}': No such file or directory"));
            }
            Err(FsError::IsADirectory(p)) if p == src_path => {
                out.fail(1, &format!("cp: -r not specified; omitting directory '{source}'"));
            }
            Err(FsError::InvalidTarget(_)) => out.fail(
                1,
                &format!("cp: cannot copy a directory, '{source}', into itself, '{dest}'"),
            ),
            Err(e) => out.merge(fs_error_at("cp", dest, &e)),
        }
    }
    out
}

pub(super) fn mv(ctx: &mut Context<'_>, inv: &Invocation<'_>) -> Output {
    let args = match parse_args(inv, &[]) {
        Ok(a) => a,
        Err(out) => return out,
    };
    let (sources, dest) = match sources_and_dest(ctx, "mv", &args.positional) {
        Ok(pair) => pair,
        Err(out) => return out,
    };
    let dest_path = ctx.resolve(dest);

    let mut out = Output::ok();
    for source in sources {
        let src_path = ctx.resolve(source);
        match ctx.fs.rename(&src_path, &dest_path) {
            Ok(()) => {}
            Err(FsError::NotFound(p)) if p == src_path => {
                out.fail(1, &format!("mv: cannot stat '{source}': No such file or directory"));
            }
            Err(FsError::InvalidTarget(_)) => out.fail(
                1,
                &format!("mv: cannot move '{source}' to a subdirectory of itself, '{dest}'"),
            ),
            Err(e) => out.merge(fs_error_at("mv", dest, &e)),
        }
    }
    out
}

// ---- find ----

#[derive(Default)]
struct FindFilter {
    name: Option<(glob::Pattern, bool)>,
    kind: Option<char>,
    max_depth: Option<usize>,
    min_depth: usize,
}

fn parse_find(args: &[String]) -> Result<(Vec<String>, FindFilter), String> {
    let split = args.iter().position(|a| a.starts_with('-')).unwrap_or(args.len());
    let starts = args[..split].to_vec();
    let mut filter = FindFilter::default();
    let mut rest = args[split..].iter();
    while let Some(flag) = rest.next() {
        let mut value = || {
            rest.next()
                .cloned()
                .ok_or_else(|| format!("find: missing argument to `{flag}'"))
        };
        match flag.as_str() {
            "-name" | "-iname" => {
                let raw = value()?;
                let insensitive = flag == "-iname";
                let pattern = if insensitive { raw.to_lowercase() } else { raw };
                let compiled = glob::Pattern::new(&pattern)
                    .map_err(|e| format!("find: invalid pattern '{pattern}': {e}"))?;
                filter.name = Some((compiled, insensitive));
            }
            "-type" => match value()?.as_str() {
                "f" => filter.kind = Some('f'),
                "d" => filter.kind = Some('d'),
                other => return Err(format!("find: Unknown argument to -type: {other}")),
            },
            "-maxdepth" | "-mindepth" => {
                let raw = value()?;
                let depth = raw.parse().map_err(|_| {
                    format!(
                        "find: Expected a positive decimal integer argument to {flag}, \
                         but got '{raw}'"
                    )
                })?;
                if flag == "-maxdepth" {
                    filter.max_depth = Some(depth);
                } else {
                    filter.min_depth = depth;
                }
            }
            other => return Err(format!("find: unknown predicate `{other}'")),
        }
    }
    Ok((starts, filter))
}

pub(super) fn find(ctx: &mut Context<'_>, inv: &Invocation<'_>) -> Output {
    let (mut starts, filter) = match parse_find(inv.args) {
        Ok(parsed) => parsed,
        Err(msg) => return Output::error(1, msg),
    };
    if starts.is_empty() {
        starts.push(".".to_string());
    }

    let mut out = Output::ok();
    let mut listing = String::new();
    for start in &starts {
        let start_abs = ctx.resolve(start);
        let walked = match ctx.fs.walk(&start_abs) {
            Ok(w) => w,
            Err(e) => {
                out.merge(fs_error_at("find", &format!("'{start}'"), &e));
                continue;
            }
        };
        for (abs, meta) in walked {
            let rel = abs
                .strip_prefix(start_abs.as_str())
                .unwrap_or(&abs)
                .trim_start_matches('/');
            let depth = path::components(rel).len();
            if depth < filter.min_depth || filter.max_depth.is_some_and(|max| depth > max) {
                continue;
            }
            if let Some(kind) = filter.kind {
                if (kind == 'd') != meta.is_dir {
                    continue;
                }
            }
            if let Some((pattern, insensitive)) = &filter.name {
                let name = if rel.is_empty() {
                    path::file_name(start.trim_end_matches('/')).to_string()
                } else {
                    path::file_name(&abs).to_string()
                };
                let name = if *insensitive { name.to_lowercase() } else { name };
                if !pattern.matches(&name) {
                    continue;
                }
            }
            let shown = if rel.is_empty() {
                start.clone()
            } else if start.ends_with('/') {
                format!("{start}{rel}")
            } else {
                format!("{start}/{rel}")
            };
            listing.push_str(&shown);
            listing.push('\n');
        }
    }
    out.stdout = listing.into_bytes();
    out
}

// ---- base64 ----

fn wrap(encoded: &str, width: usize) -> String {
    if width == 0 {
        return format!("{encoded}\n");
    }
    let mut out = String::with_capacity(encoded.len() + encoded.len() / width + 1);
    for chunk in encoded.as_bytes().chunks(width) {
        out.push_str(&String::from_utf8_lossy(chunk));
        out.push('\n');
    }
    out
}

pub(super) fn base64(ctx: &mut Context<'_>, inv: &Invocation<'_>) -> Output {
    let args = match parse_args(inv, &["w", "wrap"]) {
        Ok(a) => a,
        Err(out) => return out,
    };
    let (inputs, errors) = read_inputs(ctx, inv, &args.positional);
    if errors.exit_code != 0 {
        return errors;
    }
    let data: Vec<u8> = inputs.into_iter().flat_map(|(_, bytes)| bytes).collect();

    if args.any(&["d", "decode"]) {
        let compact: Vec<u8> = data.into_iter().filter(|b| !b.is_ascii_whitespace()).collect();
        return match STANDARD.decode(&compact) {
            Ok(decoded) => Output::stdout(decoded),
            Err(_) => Output::error(1, "base64: invalid input"),
        };
    }

    let width = match args.value("w").or_else(|| args.value("wrap")).map(str::parse) {
        None => 76,
        Some(Ok(w)) => w,
        Some(Err(_)) => return Output::error(1, "base64: invalid wrap size"),
    };
    let encoded = STANDARD.encode(&data);
    if encoded.is_empty() {
        return Output::ok();
    }
    Output::stdout(wrap(&encoded, width))
}

#[cfg(test)]
mod tests {
    use super::super::testing::{Harness, stdout};

    #[test]
    fn test_pwd_and_cd() {
        let mut h = Harness::new();
        h.fs.make_dir("/app/src", false).unwrap();
        assert_eq!(stdout(&h.run("pwd")), "/app\n");
        assert_eq!(h.run("cd src").exit_code, 0);
        assert_eq!(stdout(&h.run("pwd")), "/app/src\n");
        assert_eq!(h.run("cd ..").exit_code, 0);
        assert_eq!(h.cwd, "/app");

        let out = h.run("cd missing");
        assert_eq!(out.exit_code, 1);
        assert_eq!(out.stderr, "cd: missing: No such file or directory\n");
        assert_eq!(h.cwd, "/app");
    }

    #[test]
    fn test_ls_plain_hides_dotfiles() {
        let mut h = Harness::new();
        h.write("/app/package.json", "{}");
        h.write("/app/.env", "X=1");
        h.fs.make_dir("/app/src", false).unwrap();
        assert_eq!(stdout(&h.run("ls")), "package.json\nsrc\n");
        let all = stdout(&h.run("ls -a"));
        assert!(all.starts_with(".\n..\n.env\n"));
    }

    #[test]
    fn test_ls_long_format() {
        let mut h = Harness::new();
        h.write("/app/package.json", "{\"name\":\"x\"}");
        h.fs.make_dir("/app/src", false).unwrap();
        let out = stdout(&h.run("ls -la"));
        let lines: Vec<&str> = out.lines().collect();
        assert!(lines[0].starts_with("total "));
        assert!(out.contains("package.json"));
        assert!(out.contains("src"));
        let pkg = lines.iter().find(|l| l.ends_with("package.json")).unwrap();
        assert!(pkg.starts_with("-rw-r--r-- 1 root root"));
        assert!(pkg.contains(" 12 "));
        let src = lines.iter().find(|l| l.ends_with(" src")).unwrap();
        assert!(src.starts_with("drwxr-xr-x"));
    }

    #[test]
    fn test_ls_missing_path() {
        let mut h = Harness::new();
        let out = h.run("ls nope");
        assert_eq!(out.exit_code, 2);
        assert!(out.stderr.contains("cannot access 'nope'"));
    }

    #[test]
    fn test_cat_concatenates_and_reports_missing() {
        let mut h = Harness::new();
        h.write("/app/a", "one\n");
        h.write("/app/b", "two\n");
        assert_eq!(stdout(&h.run("cat a b")), "one\ntwo\n");

        let out = h.run("cat a missing");
        assert_eq!(out.exit_code, 1);
        assert_eq!(stdout(&out), "one\n");
        assert_eq!(out.stderr, "cat: missing: No such file or directory\n");
    }

    #[test]
    fn test_mkdir_parents_is_idempotent() {
        let mut h = Harness::new();
        assert_eq!(h.run("mkdir -p a/b/c").exit_code, 0);
        assert_eq!(h.run("mkdir -p a/b/c").exit_code, 0);
        assert_eq!(stdout(&h.run("ls a/b")), "c\n");

        let out = h.run("mkdir a");
        assert_eq!(out.exit_code, 1);
        assert!(out.stderr.contains("File exists"));
        assert_eq!(h.run("mkdir x/y").exit_code, 1);
    }

    #[test]
    fn test_rm_requires_recursive_for_directories() {
        let mut h = Harness::new();
        h.run("mkdir -p dir/sub");
        h.write("/app/dir/sub/f", "x");

        let out = h.run("rm dir");
        assert_eq!(out.exit_code, 1);
        assert_eq!(out.stderr, "rm: cannot remove 'dir': Is a directory\n");
        assert!(h.fs.exists("/app/dir/sub/f"));

        assert_eq!(h.run("rm -rf dir").exit_code, 0);
        assert!(!h.fs.exists("/app/dir"));
        assert_eq!(h.run("rm -f dir").exit_code, 0);
        assert_eq!(h.run("rm dir").exit_code, 1);
    }

    #[test]
    fn test_rm_d_and_rmdir_only_take_empty_dirs() {
        let mut h = Harness::new();
        h.run("mkdir -p empty full");
        h.write("/app/full/f", "x");
        assert_eq!(h.run("rm -d empty").exit_code, 0);
        assert_eq!(h.run("rmdir full").exit_code, 1);
        assert_eq!(h.run("rmdir full/f").exit_code, 1);
    }

    #[test]
    fn test_cp_and_mv() {
        let mut h = Harness::new();
        h.run("mkdir -p src/components dist");
        h.write("/app/src/components/X.tsx", "x");

        let out = h.run("cp src dist");
        assert!(out.stderr.contains("omitting directory 'src'"));
        assert_eq!(h.run("cp -r src dist").exit_code, 0);
        assert!(h.fs.exists("/app/dist/src/components/X.tsx"));

        assert_eq!(h.run("mv src/components/X.tsx src/Y.tsx").exit_code, 0);
        assert!(h.fs.exists("/app/src/Y.tsx"));
        assert!(!h.fs.exists("/app/src/components/X.tsx"));

        let out = h.run("mv nothing here");
        assert_eq!(out.stderr, "mv: cannot stat 'nothing': No such file or directory\n");
        assert_eq!(h.run("cp -r src src/components").exit_code, 1);
    }

    #[test]
    fn test_find_by_name_and_type() {
        let mut h = Harness::new();
        h.run("mkdir -p src/components");
        h.write("/app/src/App.tsx", "");
        h.write("/app/src/components/Button.tsx", "");
        h.write("/app/src/index.css", "");

        let out = stdout(&h.run("find . -name *.tsx"));
        assert_eq!(out, "./src/App.tsx\n./src/components/Button.tsx\n");

        let out = stdout(&h.run("find src -type d"));
        assert_eq!(out, "src\nsrc/components\n");

        let out = stdout(&h.run("find . -maxdepth 1"));
        assert_eq!(out, ".\n./src\n");
    }

    #[test]
    fn test_chmod_numeric_and_symbolic() {
        let mut h = Harness::new();
        h.write("/app/run.sh", "#!/bin/sh\n");
        assert_eq!(h.run("chmod 755 run.sh").exit_code, 0);
        assert_eq!(h.fs.stat("/app/run.sh").unwrap().mode, 0o755);
        h.run("chmod go-rx run.sh");
        assert_eq!(h.fs.stat("/app/run.sh").unwrap().mode, 0o700);
        h.run("chmod +r run.sh");
        assert_eq!(h.fs.stat("/app/run.sh").unwrap().mode, 0o744);
        assert_eq!(h.run("chmod zz run.sh").exit_code, 1);
        assert_eq!(h.run("chmod 644 nope").exit_code, 1);
    }

    #[test]
    fn test_base64_encode_and_decode() {
        let mut h = Harness::new();
        let out = h.run_with_stdin("base64", Some(b"hello\n"));
        assert_eq!(stdout(&out), "aGVsbG8K\n");

        let out = h.run_with_stdin("base64 -d", Some(b"aGVs\nbG8K\n"));
        assert_eq!(out.stdout, b"hello\n");

        let out = h.run_with_stdin("base64 -d", Some(b"!!!"));
        assert_eq!(out.exit_code, 1);
    }
}
