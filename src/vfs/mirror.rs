//! On-disk mirror of a virtual filesystem.
//!
//! Host subprocesses (`npm`, `node`, ...) cannot see the in-memory tree, so
//! before one runs the tree is written out to a directory, and afterwards the
//! directory is read back in.

use std::fs;
use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};

use super::{Dir, File, Node, VirtualFs};

/// Directory names that stay on disk only. Re-importing dependency trees
/// would balloon memory for no benefit to the shell built-ins.
pub const DISK_ONLY: &[&str] = &["node_modules", ".git"];

/// Files larger than this are left on disk.
const MAX_IMPORT_BYTES: u64 = 8 * 1024 * 1024;

impl VirtualFs {
    /// Makes `root` an exact copy of the tree: new and changed files are
    /// written, files deleted in memory are deleted on disk.
    pub fn sync_to_disk(&self, root: &Path) -> io::Result<()> {
        fs::create_dir_all(root)?;
        match &self.root {
            Node::Dir(d) => sync_dir(d, root),
            Node::File(_) => Ok(()),
        }
    }

    /// Replaces the tree with the contents of `root`, keeping timestamps of
    /// unchanged files and any in-memory content under [`DISK_ONLY`] names.
    pub fn load_from_disk(&mut self, root: &Path) -> io::Result<()> {
        let previous = match &self.root {
            Node::Dir(d) => Some(d),
            Node::File(_) => None,
        };
        let fresh = load_dir(root, previous)?;
        self.root = Node::Dir(fresh);
        Ok(())
    }
}

fn sync_dir(dir: &Dir, disk: &Path) -> io::Result<()> {
    for entry in fs::read_dir(disk)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if DISK_ONLY.contains(&name.as_str()) {
            continue;
        }
        let on_disk_dir = entry.file_type()?.is_dir();
        match dir.entries.get(&name) {
            Some(Node::Dir(_)) if on_disk_dir => {}
            Some(Node::File(_)) if !on_disk_dir => {}
            _ if on_disk_dir => fs::remove_dir_all(entry.path())?,
            _ => fs::remove_file(entry.path())?,
        }
    }

    for (name, node) in &dir.entries {
        let target = disk.join(name);
        match node {
            Node::File(f) => {
                let unchanged = fs::read(&target).is_ok_and(|existing| existing == f.content);
                if !unchanged {
                    fs::write(&target, &f.content)?;
                    set_mode(&target, f.mode)?;
                }
            }
            Node::Dir(d) => {
                fs::create_dir_all(&target)?;
                sync_dir(d, &target)?;
            }
        }
    }
    Ok(())
}

fn load_dir(disk: &Path, previous: Option<&Dir>) -> io::Result<Dir> {
    let mut dir = Dir::new();
    if let Some(prev) = previous {
        dir.mode = prev.mode;
        dir.modified = prev.modified;
        for name in DISK_ONLY {
            if let Some(node) = prev.entries.get(*name) {
                dir.entries.insert((*name).to_string(), node.clone());
            }
        }
    }

    for entry in fs::read_dir(disk)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if DISK_ONLY.contains(&name.as_str()) {
            continue;
        }
        let metadata = entry.metadata()?;
        let prev_node = previous.and_then(|p| p.entries.get(&name));

        if metadata.is_dir() {
            let prev_dir = match prev_node {
                Some(Node::Dir(d)) => Some(d),
                _ => None,
            };
            dir.entries
                .insert(name, Node::Dir(load_dir(&entry.path(), prev_dir)?));
        } else if metadata.is_file() && metadata.len() <= MAX_IMPORT_BYTES {
            let content = fs::read(entry.path())?;
            let file = match prev_node {
                Some(Node::File(f)) if f.content == content => f.clone(),
                _ => File {
                    content,
                    mode: mode_of(&metadata),
                    modified: metadata
                        .modified()
                        .map(DateTime::<Utc>::from)
                        .unwrap_or_else(|_| Utc::now()),
                },
            };
            dir.entries.insert(name, Node::File(file));
        }
    }
    Ok(dir)
}

#[cfg(unix)]
fn set_mode(target: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(target, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_target: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn mode_of(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn mode_of(metadata: &fs::Metadata) -> u32 {
    if metadata.is_dir() {
        super::DIR_MODE
    } else {
        super::FILE_MODE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_sync_writes_and_prunes() {
        let disk = tempdir().unwrap();
        let mut vfs = VirtualFs::new();
        vfs.make_dir("/app/src", true).unwrap();
        vfs.write("/app/src/a.ts", b"a").unwrap();
        vfs.sync_to_disk(disk.path()).unwrap();
        assert_eq!(fs::read(disk.path().join("app/src/a.ts")).unwrap(), b"a");

        vfs.remove("/app/src/a.ts", false).unwrap();
        vfs.sync_to_disk(disk.path()).unwrap();
        assert!(!disk.path().join("app/src/a.ts").exists());
    }

    #[test]
    fn test_sync_leaves_node_modules_alone() {
        let disk = tempdir().unwrap();
        fs::create_dir_all(disk.path().join("app/node_modules/react")).unwrap();
        let mut vfs = VirtualFs::new();
        vfs.make_dir("/app", false).unwrap();
        vfs.sync_to_disk(disk.path()).unwrap();
        assert!(disk.path().join("app/node_modules/react").exists());
    }

    #[test]
    fn test_load_picks_up_new_files_and_skips_node_modules() {
        let disk = tempdir().unwrap();
        let mut vfs = VirtualFs::new();
        vfs.make_dir("/app", false).unwrap();
        vfs.sync_to_disk(disk.path()).unwrap();

        fs::write(disk.path().join("app/package-lock.json"), "{}").unwrap();
        fs::create_dir_all(disk.path().join("app/node_modules/x")).unwrap();
        fs::write(disk.path().join("app/node_modules/x/index.js"), "1").unwrap();

        vfs.load_from_disk(disk.path()).unwrap();
        assert_eq!(vfs.read("/app/package-lock.json").unwrap(), b"{}");
        assert!(!vfs.exists("/app/node_modules"));
    }

    #[test]
    fn test_load_keeps_timestamps_of_unchanged_files() {
        let disk = tempdir().unwrap();
        let mut vfs = VirtualFs::new();
        vfs.make_dir("/app", false).unwrap();
        vfs.write("/app/a", b"same").unwrap();
        let before = vfs.stat("/app/a").unwrap().modified;
        vfs.sync_to_disk(disk.path()).unwrap();
        vfs.load_from_disk(disk.path()).unwrap();
        assert_eq!(vfs.stat("/app/a").unwrap().modified, before);
    }
}
