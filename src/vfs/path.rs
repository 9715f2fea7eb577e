//! POSIX-style path resolution for the virtual filesystem.
//!
//! Every path handed to [`super::VirtualFs`] is absolute and normalized.
//! These helpers turn user input (relative paths, `.`, `..`, repeated
//! separators) into that canonical form.

/// The filesystem root.
pub const ROOT: &str = "/";

/// Resolves `path` against `cwd` into an absolute, normalized path.
///
/// `..` never climbs above the root.
pub fn resolve(path: &str, cwd: &str) -> String {
    if path.starts_with('/') {
        normalize(path)
    } else {
        normalize(&format!("{cwd}/{path}"))
    }
}

/// Collapses `.`, `..` and repeated separators in an absolute path.
pub fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        ROOT.to_string()
    } else {
        format!("/{}", parts.join("/"))
    }
}

/// Splits a normalized absolute path into its segments.
pub fn components(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Parent directory of a normalized path. The root is its own parent.
pub fn parent(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => ROOT.to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

/// Final segment of a normalized path (empty for the root).
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or("")
}

/// Joins a directory and an entry name.
pub fn join(dir: &str, name: &str) -> String {
    if dir == ROOT {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Returns true if `path` equals `ancestor` or lives below it.
pub fn is_within(path: &str, ancestor: &str) -> bool {
    ancestor == ROOT
        || path == ancestor
        || path
            .strip_prefix(ancestor)
            .is_some_and(|rest| rest.starts_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_absolute_and_relative() {
        assert_eq!(resolve("/etc/hosts", "/app"), "/etc/hosts");
        assert_eq!(resolve("src", "/app"), "/app/src");
        assert_eq!(resolve("./src/../lib", "/app"), "/app/lib");
        assert_eq!(resolve(".", "/app/src"), "/app/src");
    }

    #[test]
    fn test_resolve_clamps_at_root() {
        assert_eq!(resolve("../../../..", "/app/src"), "/");
        assert_eq!(resolve("/../x", "/app"), "/x");
    }

    #[test]
    fn test_resolve_collapses_separators() {
        assert_eq!(resolve("a//b///c/", "/app"), "/app/a/b/c");
        assert_eq!(normalize("//"), "/");
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let cwd = "/app/src";
        for p in ["", ".", "..", "a/b/../c", "/x/./y", "../../..", "deep//nested/./path/"] {
            let once = resolve(p, cwd);
            assert_eq!(resolve(&once, cwd), once, "path {p:?}");
        }
    }

    #[test]
    fn test_parent_and_file_name() {
        assert_eq!(parent("/app/src/App.tsx"), "/app/src");
        assert_eq!(parent("/app"), "/");
        assert_eq!(parent("/"), "/");
        assert_eq!(file_name("/app/src/App.tsx"), "App.tsx");
        assert_eq!(file_name("/"), "");
    }

    #[test]
    fn test_is_within() {
        assert!(is_within("/app/src", "/app"));
        assert!(is_within("/app", "/app"));
        assert!(!is_within("/application", "/app"));
        assert!(is_within("/anything", "/"));
    }
}
