//! In-memory virtual filesystem backing the emulated sandbox.
//!
//! The tree is a nest of ordered maps so directory listings come out sorted
//! without extra work. All public operations take absolute, normalized paths
//! (see [`path::resolve`]); callers resolve user input first.

mod mirror;
pub mod path;

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Size reported for directories, matching what `ls -l` shows on ext4.
const DIR_SIZE: u64 = 4096;

/// Default permission bits for new files.
pub const FILE_MODE: u32 = 0o644;

/// Default permission bits for new directories.
pub const DIR_MODE: u32 = 0o755;

/// Filesystem errors. The display form is the tail of a shell error message,
/// e.g. `cat: ` + `/app/x: No such file or directory`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FsError {
    /// Path does not exist.
    #[error("{0}: No such file or directory")]
    NotFound(String),

    /// A path component is a file.
    #[error("{0}: Not a directory")]
    NotADirectory(String),

    /// A file operation targeted a directory.
    #[error("{0}: Is a directory")]
    IsADirectory(String),

    /// Target already exists.
    #[error("{0}: File exists")]
    AlreadyExists(String),

    /// Non-recursive removal of a populated directory.
    #[error("{0}: Directory not empty")]
    NotEmpty(String),

    /// Operation would remove the root or nest a directory inside itself.
    #[error("{0}: Invalid argument")]
    InvalidTarget(String),
}

impl FsError {
    /// The path the error refers to.
    pub fn path(&self) -> &str {
        match self {
            Self::NotFound(p)
            | Self::NotADirectory(p)
            | Self::IsADirectory(p)
            | Self::AlreadyExists(p)
            | Self::NotEmpty(p)
            | Self::InvalidTarget(p) => p,
        }
    }

    /// The error text without the path, e.g. `No such file or directory`.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "No such file or directory",
            Self::NotADirectory(_) => "Not a directory",
            Self::IsADirectory(_) => "Is a directory",
            Self::AlreadyExists(_) => "File exists",
            Self::NotEmpty(_) => "Directory not empty",
            Self::InvalidTarget(_) => "Invalid argument",
        }
    }
}

/// Result alias for filesystem operations.
pub type FsResult<T> = std::result::Result<T, FsError>;

/// Point-in-time metadata for one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    /// Content length for files, a fixed block size for directories.
    pub size: u64,
    /// Whether the node is a directory.
    pub is_dir: bool,
    /// Permission bits.
    pub mode: u32,
    /// Last modification time.
    pub modified: DateTime<Utc>,
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Entry name (not a path).
    pub name: String,
    /// Entry metadata.
    pub metadata: Metadata,
}

#[derive(Debug, Clone)]
enum Node {
    File(File),
    Dir(Dir),
}

#[derive(Debug, Clone)]
struct File {
    content: Vec<u8>,
    mode: u32,
    modified: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct Dir {
    entries: BTreeMap<String, Node>,
    mode: u32,
    modified: DateTime<Utc>,
}

impl File {
    fn new(content: &[u8]) -> Self {
        Self {
            content: content.to_vec(),
            mode: FILE_MODE,
            modified: Utc::now(),
        }
    }
}

impl Dir {
    fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            mode: DIR_MODE,
            modified: Utc::now(),
        }
    }

    fn size(&self) -> u64 {
        self.entries
            .values()
            .map(|node| match node {
                Node::File(f) => f.content.len() as u64,
                Node::Dir(d) => d.size(),
            })
            .sum()
    }
}

impl Node {
    fn metadata(&self) -> Metadata {
        match self {
            Node::File(f) => Metadata {
                size: f.content.len() as u64,
                is_dir: false,
                mode: f.mode,
                modified: f.modified,
            },
            Node::Dir(d) => Metadata {
                size: DIR_SIZE,
                is_dir: true,
                mode: d.mode,
                modified: d.modified,
            },
        }
    }

    fn touched(mut self, now: DateTime<Utc>) -> Self {
        match &mut self {
            Node::File(f) => f.modified = now,
            Node::Dir(d) => {
                d.modified = now;
                let names: Vec<String> = d.entries.keys().cloned().collect();
                for name in names {
                    if let Some(child) = d.entries.remove(&name) {
                        d.entries.insert(name, child.touched(now));
                    }
                }
            }
        }
        self
    }
}

/// A private, in-memory directory tree.
#[derive(Debug, Clone)]
pub struct VirtualFs {
    root: Node,
}

impl Default for VirtualFs {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualFs {
    /// Creates an empty filesystem containing only `/`.
    pub fn new() -> Self {
        Self {
            root: Node::Dir(Dir::new()),
        }
    }

    fn lookup(&self, target: &str) -> FsResult<&Node> {
        let mut node = &self.root;
        for segment in path::components(target) {
            node = match node {
                Node::Dir(d) => d
                    .entries
                    .get(segment)
                    .ok_or_else(|| FsError::NotFound(target.to_string()))?,
                Node::File(_) => return Err(FsError::NotADirectory(target.to_string())),
            };
        }
        Ok(node)
    }

    fn lookup_mut(&mut self, target: &str) -> FsResult<&mut Node> {
        let mut node = &mut self.root;
        for segment in path::components(target) {
            node = match node {
                Node::Dir(d) => d
                    .entries
                    .get_mut(segment)
                    .ok_or_else(|| FsError::NotFound(target.to_string()))?,
                Node::File(_) => return Err(FsError::NotADirectory(target.to_string())),
            };
        }
        Ok(node)
    }

    /// Returns the directory that holds `target` plus the entry name.
    fn parent_dir_mut(&mut self, target: &str) -> FsResult<(&mut Dir, String)> {
        if target == path::ROOT {
            return Err(FsError::InvalidTarget(target.to_string()));
        }
        let parent = path::parent(target);
        let name = path::file_name(target).to_string();
        match self.lookup_mut(&parent) {
            Ok(Node::Dir(d)) => Ok((d, name)),
            Ok(Node::File(_)) | Err(FsError::NotADirectory(_)) => {
                Err(FsError::NotADirectory(target.to_string()))
            }
            Err(_) => Err(FsError::NotFound(target.to_string())),
        }
    }

    fn insert_node(&mut self, target: &str, node: Node) -> FsResult<()> {
        let now = Utc::now();
        let (dir, name) = self.parent_dir_mut(target)?;
        dir.entries.insert(name, node);
        dir.modified = now;
        Ok(())
    }

    /// Returns true if anything exists at `target`.
    pub fn exists(&self, target: &str) -> bool {
        self.lookup(target).is_ok()
    }

    /// Returns true if `target` is a directory.
    pub fn is_dir(&self, target: &str) -> bool {
        matches!(self.lookup(target), Ok(Node::Dir(_)))
    }

    /// Metadata for `target`.
    pub fn stat(&self, target: &str) -> FsResult<Metadata> {
        self.lookup(target).map(Node::metadata)
    }

    /// Reads a file's bytes.
    pub fn read(&self, target: &str) -> FsResult<&[u8]> {
        match self.lookup(target)? {
            Node::File(f) => Ok(&f.content),
            Node::Dir(_) => Err(FsError::IsADirectory(target.to_string())),
        }
    }

    /// Creates or truncates a file. The parent directory must exist.
    pub fn write(&mut self, target: &str, content: &[u8]) -> FsResult<()> {
        let now = Utc::now();
        let (dir, name) = self.parent_dir_mut(target)?;
        match dir.entries.get_mut(&name) {
            Some(Node::Dir(_)) => Err(FsError::IsADirectory(target.to_string())),
            Some(Node::File(f)) => {
                f.content = content.to_vec();
                f.modified = now;
                Ok(())
            }
            None => {
                dir.entries.insert(name, Node::File(File::new(content)));
                dir.modified = now;
                Ok(())
            }
        }
    }

    /// Appends to a file, creating it if missing.
    pub fn append(&mut self, target: &str, content: &[u8]) -> FsResult<()> {
        match self.lookup_mut(target) {
            Ok(Node::File(f)) => {
                f.content.extend_from_slice(content);
                f.modified = Utc::now();
                Ok(())
            }
            Ok(Node::Dir(_)) => Err(FsError::IsADirectory(target.to_string())),
            Err(FsError::NotFound(_)) => self.write(target, content),
            Err(e) => Err(e),
        }
    }

    /// Creates an empty file or bumps the modification time of an existing node.
    pub fn touch(&mut self, target: &str) -> FsResult<()> {
        match self.lookup_mut(target) {
            Ok(Node::File(f)) => {
                f.modified = Utc::now();
                Ok(())
            }
            Ok(Node::Dir(d)) => {
                d.modified = Utc::now();
                Ok(())
            }
            Err(FsError::NotFound(_)) => self.write(target, b""),
            Err(e) => Err(e),
        }
    }

    /// Sets the permission bits of a node.
    pub fn set_mode(&mut self, target: &str, mode: u32) -> FsResult<()> {
        match self.lookup_mut(target)? {
            Node::File(f) => f.mode = mode,
            Node::Dir(d) => d.mode = mode,
        }
        Ok(())
    }

    /// Lists a directory. Listing a file yields that single file.
    pub fn list(&self, target: &str) -> FsResult<Vec<DirEntry>> {
        match self.lookup(target)? {
            Node::Dir(d) => Ok(d
                .entries
                .iter()
                .map(|(name, node)| DirEntry {
                    name: name.clone(),
                    metadata: node.metadata(),
                })
                .collect()),
            node @ Node::File(_) => Ok(vec![DirEntry {
                name: path::file_name(target).to_string(),
                metadata: node.metadata(),
            }]),
        }
    }

    /// Creates a directory. With `recursive`, missing parents are created and
    /// an existing directory is not an error.
    pub fn make_dir(&mut self, target: &str, recursive: bool) -> FsResult<()> {
        if !recursive {
            if self.exists(target) {
                return Err(FsError::AlreadyExists(target.to_string()));
            }
            return self.insert_node(target, Node::Dir(Dir::new()));
        }

        let mut walked = String::new();
        let mut node = &mut self.root;
        for segment in path::components(target) {
            let parent_path = if walked.is_empty() {
                path::ROOT.to_string()
            } else {
                walked.clone()
            };
            walked.push('/');
            walked.push_str(segment);
            node = match node {
                Node::Dir(d) => d
                    .entries
                    .entry(segment.to_string())
                    .or_insert_with(|| Node::Dir(Dir::new())),
                Node::File(_) => return Err(FsError::NotADirectory(parent_path)),
            };
        }
        match node {
            Node::Dir(_) => Ok(()),
            Node::File(_) => Err(FsError::AlreadyExists(target.to_string())),
        }
    }

    /// Removes a node. Without `recursive`, only files and empty directories
    /// can be removed.
    pub fn remove(&mut self, target: &str, recursive: bool) -> FsResult<()> {
        let now = Utc::now();
        let (dir, name) = self.parent_dir_mut(target)?;
        match dir.entries.get(&name) {
            None => return Err(FsError::NotFound(target.to_string())),
            Some(Node::Dir(d)) if !recursive && !d.entries.is_empty() => {
                return Err(FsError::NotEmpty(target.to_string()));
            }
            Some(_) => {}
        }
        dir.entries.remove(&name);
        dir.modified = now;
        Ok(())
    }

    /// Where `src` lands when copied or moved to `dst`: into `dst` if it is a
    /// directory, otherwise at `dst` itself.
    fn landing_path(&self, src: &str, dst: &str) -> String {
        if self.is_dir(dst) {
            path::join(dst, path::file_name(src))
        } else {
            dst.to_string()
        }
    }

    /// Copies `src` to `dst`. Directories require `recursive`.
    pub fn copy(&mut self, src: &str, dst: &str, recursive: bool) -> FsResult<()> {
        let node = self.lookup(src)?.clone();
        let is_dir = matches!(node, Node::Dir(_));
        if is_dir && !recursive {
            return Err(FsError::IsADirectory(src.to_string()));
        }
        let target = self.landing_path(src, dst);
        if is_dir && path::is_within(&target, src) {
            return Err(FsError::InvalidTarget(target));
        }
        if !is_dir && self.is_dir(&target) {
            return Err(FsError::IsADirectory(target));
        }
        self.insert_node(&target, node.touched(Utc::now()))
    }

    /// Moves `src` to `dst`.
    pub fn rename(&mut self, src: &str, dst: &str) -> FsResult<()> {
        if src == path::ROOT {
            return Err(FsError::InvalidTarget(src.to_string()));
        }
        let src_is_dir = match self.lookup(src)? {
            Node::Dir(_) => true,
            Node::File(_) => false,
        };
        let target = self.landing_path(src, dst);
        if target == src {
            return Ok(());
        }
        if src_is_dir && path::is_within(&target, src) {
            return Err(FsError::InvalidTarget(target));
        }
        match self.lookup(&target) {
            Ok(Node::Dir(_)) if !src_is_dir => return Err(FsError::IsADirectory(target)),
            Ok(Node::Dir(d)) if !d.entries.is_empty() => return Err(FsError::NotEmpty(target)),
            Ok(Node::File(_)) if src_is_dir => return Err(FsError::NotADirectory(target)),
            _ => {}
        }
        if !self.is_dir(&path::parent(&target)) {
            return Err(FsError::NotFound(target));
        }

        let now = Utc::now();
        let node = {
            let (dir, name) = self.parent_dir_mut(src)?;
            dir.modified = now;
            dir.entries
                .remove(&name)
                .ok_or_else(|| FsError::NotFound(src.to_string()))?
        };
        self.insert_node(&target, node)
    }

    /// Depth-first walk starting at (and including) `start`, in sorted order.
    pub fn walk(&self, start: &str) -> FsResult<Vec<(String, Metadata)>> {
        fn visit(node: &Node, at: String, out: &mut Vec<(String, Metadata)>) {
            out.push((at.clone(), node.metadata()));
            if let Node::Dir(d) = node {
                for (name, child) in &d.entries {
                    visit(child, path::join(&at, name), out);
                }
            }
        }

        let node = self.lookup(start)?;
        let mut out = Vec::new();
        visit(node, start.to_string(), &mut out);
        Ok(out)
    }

    /// Sum of all file sizes in the tree.
    pub fn total_size(&self) -> u64 {
        match &self.root {
            Node::Dir(d) => d.size(),
            Node::File(f) => f.content.len() as u64,
        }
    }
}
