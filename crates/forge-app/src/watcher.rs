//! Local project watcher
//!
//! Watches the project root and reports debounced changes, so the engine can
//! rebuild the file tree and remount it. Paths the tree builder skips
//! (dot-entries, `node_modules`) are ignored here as well.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use notify::RecursiveMode;
use notify_debouncer_full::{new_debouncer, DebounceEventResult};
use tokio::sync::mpsc;

use forge_core::prelude::*;

use crate::config::WatcherSettings;

/// Directories never reported, on top of every dot-entry
pub const IGNORED_DIRECTORIES: &[&str] = &["node_modules"];

/// What the watcher tells the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// Files changed under the project root (relative paths, deduplicated)
    Changed { paths: Vec<PathBuf> },
    Error { message: String },
}

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub debounce: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
        }
    }
}

impl From<&WatcherSettings> for WatcherConfig {
    fn from(settings: &WatcherSettings) -> Self {
        Self {
            debounce: Duration::from_millis(settings.debounce_ms),
        }
    }
}

/// Whether a change at `path` should trigger a remount.
pub fn is_relevant(root: &Path, path: &Path) -> bool {
    let Ok(relative) = path.strip_prefix(root) else {
        return false;
    };
    relative.components().all(|component| match component {
        Component::Normal(name) => {
            let name = name.to_string_lossy();
            !name.starts_with('.') && !IGNORED_DIRECTORIES.contains(&name.as_ref())
        }
        _ => true,
    }) && relative.components().next().is_some()
}

/// Watches one project directory
pub struct ProjectWatcher {
    root: PathBuf,
    config: WatcherConfig,
    stop_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl ProjectWatcher {
    pub fn new(root: PathBuf, config: WatcherConfig) -> Self {
        Self {
            root,
            config,
            stop_tx: None,
        }
    }

    /// Start watching; events go to `event_tx`.
    pub fn start(&mut self, event_tx: mpsc::Sender<WatchEvent>) -> Result<()> {
        if self.is_running() {
            return Err(Error::config("Watcher is already running"));
        }

        let root = self.root.clone();
        let config = self.config.clone();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel();
        self.stop_tx = Some(stop_tx);

        tokio::task::spawn_blocking(move || {
            run_watcher(root, config, event_tx, stop_rx);
        });

        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }

    pub fn is_running(&self) -> bool {
        self.stop_tx.is_some()
    }
}

impl Drop for ProjectWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_watcher(
    root: PathBuf,
    config: WatcherConfig,
    event_tx: mpsc::Sender<WatchEvent>,
    mut stop_rx: tokio::sync::oneshot::Receiver<()>,
) {
    let tx = event_tx.clone();
    let filter_root = root.clone();

    let debouncer_result = new_debouncer(config.debounce, None, move |result: DebounceEventResult| {
        match result {
            Ok(events) => {
                let mut paths: Vec<PathBuf> = events
                    .iter()
                    .flat_map(|event| event.paths.iter())
                    .filter(|path| is_relevant(&filter_root, path))
                    .filter_map(|path| path.strip_prefix(&filter_root).ok())
                    .map(Path::to_path_buf)
                    .collect();
                paths.sort();
                paths.dedup();

                if paths.is_empty() {
                    return;
                }
                debug!("Project watcher saw {} changed path(s)", paths.len());
                let _ = tx.blocking_send(WatchEvent::Changed { paths });
            }
            Err(errors) => {
                for error in errors {
                    warn!("Project watcher error: {:?}", error);
                    let _ = tx.blocking_send(WatchEvent::Error {
                        message: error.to_string(),
                    });
                }
            }
        }
    });

    let mut debouncer = match debouncer_result {
        Ok(d) => d,
        Err(e) => {
            error!("Failed to create project watcher: {}", e);
            let _ = event_tx.blocking_send(WatchEvent::Error {
                message: format!("Failed to create watcher: {}", e),
            });
            return;
        }
    };

    if let Err(e) = debouncer.watch(&root, RecursiveMode::Recursive) {
        warn!("Failed to watch {}: {}", root.display(), e);
        let _ = event_tx.blocking_send(WatchEvent::Error {
            message: e.to_string(),
        });
        return;
    }
    info!("Watching: {}", root.display());

    loop {
        match stop_rx.try_recv() {
            Ok(()) | Err(tokio::sync::oneshot::error::TryRecvError::Closed) => {
                info!("Project watcher stopping");
                break;
            }
            Err(tokio::sync::oneshot::error::TryRecvError::Empty) => {
                std::thread::sleep(Duration::from_millis(100));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relevant_paths() {
        let root = Path::new("/work/app");
        assert!(is_relevant(root, Path::new("/work/app/src/App.tsx")));
        assert!(is_relevant(root, Path::new("/work/app/package.json")));
        assert!(!is_relevant(root, Path::new("/work/app/node_modules/vite/index.js")));
        assert!(!is_relevant(root, Path::new("/work/app/.git/HEAD")));
        assert!(!is_relevant(root, Path::new("/work/app/src/.App.tsx.swp")));
        assert!(!is_relevant(root, Path::new("/work/app/.forge/config.toml")));
        assert!(!is_relevant(root, Path::new("/elsewhere/file.ts")));
        assert!(!is_relevant(root, root));
    }

    #[test]
    fn test_config_from_settings() {
        let settings = WatcherSettings {
            enabled: true,
            debounce_ms: 250,
        };
        assert_eq!(WatcherConfig::from(&settings).debounce, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_double_start_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut watcher = ProjectWatcher::new(dir.path().to_path_buf(), WatcherConfig::default());
        let (tx, _rx) = mpsc::channel(8);

        watcher.start(tx.clone()).unwrap();
        assert!(watcher.is_running());
        assert!(watcher.start(tx).is_err());

        watcher.stop();
        assert!(!watcher.is_running());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reports_changed_file() {
        let dir = tempfile::tempdir().unwrap();
        let root = canonical_root(dir.path());
        std::fs::create_dir_all(root.join("src")).unwrap();

        let mut watcher = ProjectWatcher::new(
            root.clone(),
            WatcherConfig {
                debounce: Duration::from_millis(50),
            },
        );
        let (tx, mut rx) = mpsc::channel(8);
        watcher.start(tx).unwrap();

        // Give the backend a moment to register the watch
        tokio::time::sleep(Duration::from_millis(300)).await;
        std::fs::write(root.join("src/App.tsx"), "export {}").unwrap();

        // The directory itself may be reported first; wait for the file
        let paths = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                match rx.recv().await {
                    Some(WatchEvent::Changed { paths })
                        if paths.iter().any(|p| p.ends_with("src/App.tsx")) =>
                    {
                        return paths
                    }
                    Some(_) => continue,
                    None => panic!("watcher channel closed"),
                }
            }
        })
        .await
        .expect("no change reported for src/App.tsx");

        assert!(paths.iter().all(|p| p.is_relative()));
        watcher.stop();
    }

    /// Watch backends report canonical paths (e.g. /private/var on macOS).
    fn canonical_root(path: &Path) -> PathBuf {
        std::fs::canonicalize(path).unwrap()
    }
}
