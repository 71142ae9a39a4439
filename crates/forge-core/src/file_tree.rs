//! Project file trees for mounting into a sandbox
//!
//! A [`FileTree`] is a directory's children keyed by name. It serializes in
//! the shape sandboxes accept for a mount:
//!
//! ```json
//! { "package.json": { "file": { "contents": "{...}" } },
//!   "src": { "directory": { "App.tsx": { "file": { "contents": "..." } } } } }
//! ```
//!
//! Paths handed out by this module always use `/`, whatever the host OS.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};

/// Directory names never walked, on top of every dot-entry.
const SKIP_DIRECTORIES: &[&str] = &["node_modules"];

/// One node of a project tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileSystemEntry {
    File { contents: String },
    Directory(FileTree),
}

impl FileSystemEntry {
    pub fn file(contents: impl Into<String>) -> Self {
        FileSystemEntry::File {
            contents: contents.into(),
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, FileSystemEntry::File { .. })
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, FileSystemEntry::Directory(_))
    }
}

/// A directory's children, names unique by construction.
///
/// Deserializing rejects any name that is not a single path component, so a
/// tree read from the network or a snapshot cannot reach above its root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FileTree {
    children: BTreeMap<String, FileSystemEntry>,
}

impl TryFrom<BTreeMap<String, FileSystemEntry>> for FileTree {
    type Error = Error;

    fn try_from(children: BTreeMap<String, FileSystemEntry>) -> Result<Self> {
        if let Some(name) = children.keys().find(|name| !is_valid_name(name)) {
            return Err(Error::invalid_path(name.as_str()));
        }
        Ok(Self { children })
    }
}

impl<'de> Deserialize<'de> for FileTree {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let children = BTreeMap::<String, FileSystemEntry>::deserialize(deserializer)?;
        FileTree::try_from(children).map_err(serde::de::Error::custom)
    }
}

impl FileTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Direct child by name
    pub fn child(&self, name: &str) -> Option<&FileSystemEntry> {
        self.children.get(name)
    }

    /// Insert or replace a direct child
    pub fn insert(&mut self, name: impl Into<String>, entry: FileSystemEntry) {
        self.children.insert(name.into(), entry);
    }

    /// Direct children, directories first, then by name.
    pub fn sorted_children(&self) -> Vec<(&str, &FileSystemEntry)> {
        let mut entries: Vec<(&str, &FileSystemEntry)> = self
            .children
            .iter()
            .map(|(name, entry)| (name.as_str(), entry))
            .collect();
        // BTreeMap order is already by name; stable sort keeps it within each group.
        entries.sort_by_key(|(_, entry)| entry.is_file());
        entries
    }

    /// Depth-first walk yielding `(path, entry)`, directories before files.
    pub fn walk(&self) -> Vec<(String, &FileSystemEntry)> {
        let mut out = Vec::new();
        self.walk_into("", &mut out);
        out
    }

    fn walk_into<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a FileSystemEntry)>) {
        for (name, entry) in self.sorted_children() {
            let path = join_path(prefix, name);
            out.push((path.clone(), entry));
            if let FileSystemEntry::Directory(tree) = entry {
                tree.walk_into(&path, out);
            }
        }
    }

    /// Flat `path → contents` map of every file.
    pub fn flatten(&self) -> BTreeMap<String, String> {
        self.walk()
            .into_iter()
            .filter_map(|(path, entry)| match entry {
                FileSystemEntry::File { contents } => Some((path, contents.clone())),
                FileSystemEntry::Directory(_) => None,
            })
            .collect()
    }

    /// Rebuild a tree from `path → contents` pairs.
    pub fn from_flat<I, P, C>(files: I) -> Result<Self>
    where
        I: IntoIterator<Item = (P, C)>,
        P: AsRef<str>,
        C: Into<String>,
    {
        let mut tree = FileTree::new();
        for (path, contents) in files {
            tree.insert_file(path.as_ref(), contents)?;
        }
        Ok(tree)
    }

    /// Insert a file at a relative path, creating parent directories.
    ///
    /// Backslashes are treated as separators. Absolute paths, `..` components
    /// and paths that run through an existing file are rejected.
    pub fn insert_file(&mut self, path: &str, contents: impl Into<String>) -> Result<()> {
        let components = split_relative_path(path)?;
        let Some((file_name, parents)) = components.split_last() else {
            return Err(Error::invalid_path(path));
        };

        let mut current = self;
        for dir in parents {
            let entry = current
                .children
                .entry((*dir).to_string())
                .or_insert_with(|| FileSystemEntry::Directory(FileTree::new()));
            current = match entry {
                FileSystemEntry::Directory(tree) => tree,
                FileSystemEntry::File { .. } => return Err(Error::invalid_path(path)),
            };
        }

        if current
            .children
            .get(*file_name)
            .is_some_and(FileSystemEntry::is_directory)
        {
            return Err(Error::invalid_path(path));
        }
        current
            .children
            .insert((*file_name).to_string(), FileSystemEntry::file(contents));
        Ok(())
    }

    /// Look up an entry by relative path
    pub fn get(&self, path: &str) -> Option<&FileSystemEntry> {
        let components = split_relative_path(path).ok()?;
        let (last, parents) = components.split_last()?;
        let mut current = self;
        for dir in parents {
            match current.children.get(*dir)? {
                FileSystemEntry::Directory(tree) => current = tree,
                FileSystemEntry::File { .. } => return None,
            }
        }
        current.children.get(*last)
    }

    /// Contents of the file at `path`, if it is a file
    pub fn file_contents(&self, path: &str) -> Option<&str> {
        match self.get(path)? {
            FileSystemEntry::File { contents } => Some(contents),
            FileSystemEntry::Directory(_) => None,
        }
    }

    /// Mutable access to every file's contents, with its path
    pub fn files_mut(&mut self) -> Vec<(String, &mut String)> {
        let mut out = Vec::new();
        self.files_mut_into("", &mut out);
        out
    }

    fn files_mut_into<'a>(&'a mut self, prefix: &str, out: &mut Vec<(String, &'a mut String)>) {
        for (name, entry) in self.children.iter_mut() {
            let path = join_path(prefix, name);
            match entry {
                FileSystemEntry::File { contents } => out.push((path, contents)),
                FileSystemEntry::Directory(tree) => tree.files_mut_into(&path, out),
            }
        }
    }

    /// Drop `.git`, `node_modules` and dot-entries at every depth.
    ///
    /// Returns how many entries were removed, counting a pruned directory once.
    pub fn prune_excluded(&mut self) -> usize {
        let before = self.children.len();
        self.children.retain(|name, _| !is_excluded(name));
        let mut removed = before - self.children.len();
        for entry in self.children.values_mut() {
            if let FileSystemEntry::Directory(tree) = entry {
                removed += tree.prune_excluded();
            }
        }
        removed
    }

    pub fn file_count(&self) -> usize {
        self.walk().iter().filter(|(_, e)| e.is_file()).count()
    }

    pub fn total_bytes(&self) -> usize {
        self.walk()
            .iter()
            .map(|(_, entry)| match entry {
                FileSystemEntry::File { contents } => contents.len(),
                FileSystemEntry::Directory(_) => 0,
            })
            .sum()
    }
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

/// Split a relative path into its components, normalising separators.
fn split_relative_path(path: &str) -> Result<Vec<&str>> {
    let is_absolute = path.starts_with('/')
        || path.starts_with('\\')
        || path.as_bytes().get(1) == Some(&b':');
    if is_absolute {
        return Err(Error::invalid_path(path));
    }

    let mut components = Vec::new();
    for part in path.split(['/', '\\']) {
        match part {
            "" | "." => continue,
            ".." => return Err(Error::invalid_path(path)),
            other => components.push(other),
        }
    }

    if components.is_empty() {
        return Err(Error::invalid_path(path));
    }
    Ok(components)
}

/// A single path component: not empty, not `.` or `..`, no separators.
fn is_valid_name(name: &str) -> bool {
    !matches!(name, "" | "." | "..") && !name.contains(['/', '\\', '\0'])
}

/// Whether a directory entry is excluded from the walk.
fn is_excluded(name: &str) -> bool {
    name.starts_with('.') || SKIP_DIRECTORIES.contains(&name)
}

/// Build a [`FileTree`] from a project directory on disk.
///
/// `.git`, `node_modules` and every dot-entry are skipped, and so are symlinks.
/// Unreadable or non-UTF-8 files are skipped with a warning: a partial tree is
/// better than no preview. Only a missing or unreadable root is an error.
pub fn build_file_tree(root: &Path) -> Result<FileTree> {
    if !root.is_dir() {
        return Err(Error::ProjectNotFound {
            path: root.to_path_buf(),
        });
    }
    let root = dunce::canonicalize(root)?;

    let entries = fs::read_dir(&root)?;
    let tree = build_directory(&root, entries);

    debug!(
        "Built file tree for {}: {} files, {} bytes",
        root.display(),
        tree.file_count(),
        tree.total_bytes()
    );
    Ok(tree)
}

fn build_directory(dir: &Path, entries: fs::ReadDir) -> FileTree {
    let mut tree = FileTree::new();

    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Skipping unreadable entry in {}: {}", dir.display(), e);
                continue;
            }
        };

        let path = entry.path();
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            warn!("Skipping non-UTF-8 file name: {}", path.display());
            continue;
        };

        if is_excluded(&name) {
            trace!("Excluding {}", path.display());
            continue;
        }

        let file_type = match entry.file_type() {
            Ok(ft) => ft,
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                continue;
            }
        };

        if file_type.is_symlink() {
            trace!("Not following symlink {}", path.display());
        } else if file_type.is_dir() {
            match fs::read_dir(&path) {
                Ok(children) => {
                    tree.insert(name, FileSystemEntry::Directory(build_directory(&path, children)))
                }
                Err(e) => warn!("Skipping unreadable directory {}: {}", path.display(), e),
            }
        } else if file_type.is_file() {
            match fs::read_to_string(&path) {
                Ok(contents) => tree.insert(name, FileSystemEntry::file(contents)),
                Err(e) => warn!("Skipping unreadable file {}: {}", path.display(), e),
            }
        }
    }

    tree
}
