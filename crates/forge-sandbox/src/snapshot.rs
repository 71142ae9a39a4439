//! Persistence for the last mounted file tree
//!
//! The snapshot lives outside the sandbox so a freshly booted sandbox can be
//! brought back to the state the previous one was in.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use forge_core::prelude::*;
use forge_core::FileTree;

/// File name used by [`FileSnapshotStore::in_dir`].
pub const SNAPSHOT_FILENAME: &str = "mounted-snapshot.json";

/// Where the mounted snapshot is kept
pub trait SnapshotStore: Send + Sync {
    fn load(&self) -> Result<Option<FileTree>>;
    fn save(&self, tree: &FileTree) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// In-process store; lives exactly as long as the session that owns it.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    tree: Mutex<Option<FileTree>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<FileTree>> {
        match self.tree.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self) -> Result<Option<FileTree>> {
        Ok(self.slot().clone())
    }

    fn save(&self, tree: &FileTree) -> Result<()> {
        *self.slot() = Some(tree.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.slot() = None;
        Ok(())
    }
}

/// JSON file store that survives a restart of the whole process.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `<dir>/mounted-snapshot.json`
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(SNAPSHOT_FILENAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn load(&self) -> Result<Option<FileTree>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str(&content) {
            Ok(tree) => Ok(Some(tree)),
            Err(e) => {
                // A torn or foreign file is no reason to refuse to boot.
                warn!(
                    "Ignoring unreadable snapshot at {}: {}",
                    self.path.display(),
                    e
                );
                Ok(None)
            }
        }
    }

    fn save(&self, tree: &FileTree) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string(tree)?;
        let temp_path = self.temp_path();

        // Atomic write: write to temp, then rename
        std::fs::write(&temp_path, content)
            .with_context(|| format!("Failed to write {}", temp_path.display()))?;
        std::fs::rename(&temp_path, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        debug!("Saved mounted snapshot to {}", self.path.display());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
