//! Host-process sandbox backend
//!
//! Runs sandbox commands as ordinary child processes inside a private
//! temporary working directory. Ports are the host's own, so the proxied
//! preview URL is plain `localhost`.

use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use forge_core::prelude::*;
use forge_core::{FileSystemEntry, FileTree, ProcessEvent};

use crate::capability::{Sandbox, SandboxBooter};
use crate::process::{ProcessKiller, SpawnedProcess};

/// How long to wait for the output pipes to drain after the process exits.
///
/// A grandchild can inherit the pipes and keep them open; the exit event must
/// not wait on it forever.
const PIPE_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// A process started by a [`HostSandbox`] that may still be running
#[derive(Debug)]
struct TrackedProcess {
    killer: ProcessKiller,
    exited: Arc<AtomicBool>,
}

/// A sandbox backed by host child processes.
#[derive(Debug)]
pub struct HostSandbox {
    workdir: TempDir,
    processes: Mutex<Vec<TrackedProcess>>,
    torn_down: AtomicBool,
}

impl HostSandbox {
    fn new(workdir: TempDir) -> Self {
        Self {
            workdir,
            processes: Mutex::new(Vec::new()),
            torn_down: AtomicBool::new(false),
        }
    }

    /// Root of the sandbox filesystem
    pub fn root(&self) -> &Path {
        self.workdir.path()
    }

    /// Number of spawned processes that have not exited yet.
    pub fn running_processes(&self) -> usize {
        self.lock_processes()
            .iter()
            .filter(|p| !p.exited.load(Ordering::Acquire))
            .count()
    }

    fn lock_processes(&self) -> std::sync::MutexGuard<'_, Vec<TrackedProcess>> {
        match self.processes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn track(&self, process: TrackedProcess) {
        let mut processes = self.lock_processes();
        processes.retain(|p| !p.exited.load(Ordering::Acquire));
        processes.push(process);
    }

    fn ensure_live(&self) -> Result<()> {
        if self.torn_down.load(Ordering::Acquire) {
            return Err(Error::sandbox_unavailable("sandbox has been torn down"));
        }
        Ok(())
    }
}

impl Sandbox for HostSandbox {
    async fn mount(&self, tree: &FileTree) -> Result<()> {
        self.ensure_live()?;

        let root = tokio::fs::canonicalize(self.root())
            .await
            .map_err(|e| Error::mount(format!("{}: {}", self.root().display(), e)))?;

        for (path, entry) in tree.walk() {
            let target = mount_target(&root, &path).await?;
            let result = match entry {
                FileSystemEntry::Directory(_) => tokio::fs::create_dir_all(&target).await,
                FileSystemEntry::File { contents } => {
                    tokio::fs::write(&target, contents.as_bytes()).await
                }
            };
            result.map_err(|e| Error::mount(format!("{}: {}", path, e)))?;
        }

        debug!(
            "Mounted {} files ({} bytes) into {}",
            tree.file_count(),
            tree.total_bytes(),
            self.root().display()
        );
        Ok(())
    }

    async fn spawn(&self, command: &str, args: &[String]) -> Result<SpawnedProcess> {
        self.ensure_live()?;

        let program = resolve_command(command, self.root())?;
        info!("Spawning in sandbox: {} {}", command, args.join(" "));

        let mut child = Command::new(&program)
            .args(args)
            .current_dir(self.root())
            .env("FORCE_COLOR", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::ToolNotFound {
                        command: command.to_string(),
                    }
                } else {
                    Error::process_spawn(e.to_string())
                }
            })?;

        let pid = child.id();
        debug!("Sandbox process started with PID: {:?}", pid);

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::process_spawn("stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::process_spawn("stderr was not captured"))?;

        let (process, controller) = SpawnedProcess::channel(pid);
        let readers = [
            tokio::spawn(read_output(stdout, controller.events_tx.clone(), "stdout")),
            tokio::spawn(read_output(stderr, controller.events_tx.clone(), "stderr")),
        ];

        let exited = Arc::new(AtomicBool::new(false));
        tokio::spawn(wait_for_exit(
            child,
            controller.kill_rx,
            controller.events_tx,
            readers,
            Arc::clone(&exited),
        ));

        self.track(TrackedProcess {
            killer: process.killer(),
            exited,
        });
        Ok(process)
    }

    async fn teardown(&self) -> Result<()> {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let processes: Vec<TrackedProcess> = self.lock_processes().drain(..).collect();
        let mut killed = 0;
        for process in processes {
            if !process.exited.load(Ordering::Acquire) && process.killer.kill() {
                killed += 1;
            }
        }
        info!(
            "Sandbox at {} torn down ({} processes killed)",
            self.root().display(),
            killed
        );
        Ok(())
    }

    fn preview_url(&self, port: u16) -> String {
        format!("http://localhost:{}/", port)
    }
}

/// Where `path` lands under the canonical `root`.
///
/// Only plain relative components are accepted, the parent directory must
/// resolve inside `root`, and an existing symlink is never written through.
async fn mount_target(root: &Path, path: &str) -> Result<PathBuf> {
    let outside = || Error::mount(format!("{}: outside the sandbox root", path));

    let relative = Path::new(path);
    let plain = relative
        .components()
        .all(|component| matches!(component, Component::Normal(_)));
    if path.is_empty() || !plain {
        return Err(outside());
    }

    let target = root.join(relative);
    let parent = target.parent().unwrap_or(root);
    let real_parent = tokio::fs::canonicalize(parent)
        .await
        .map_err(|e| Error::mount(format!("{}: {}", path, e)))?;
    if !real_parent.starts_with(root) {
        return Err(outside());
    }

    if let Ok(meta) = tokio::fs::symlink_metadata(&target).await {
        if meta.file_type().is_symlink() {
            return Err(outside());
        }
    }
    Ok(target)
}

/// Resolve a command name against `PATH`, with the sandbox root as cwd.
fn resolve_command(command: &str, root: &Path) -> Result<PathBuf> {
    which::which_in(command, std::env::var_os("PATH"), root).map_err(|e| {
        debug!("Could not resolve '{}': {}", command, e);
        Error::ToolNotFound {
            command: command.to_string(),
        }
    })
}

/// Forward raw output chunks from one pipe.
///
/// Chunks are cut on read boundaries, not lines. A multi-byte character split
/// across two reads is carried over so every chunk is valid UTF-8.
async fn read_output<R>(mut pipe: R, tx: mpsc::Sender<ProcessEvent>, name: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let n = match pipe.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!("{} read error: {}", name, e);
                break;
            }
        };
        pending.extend_from_slice(&buf[..n]);

        let chunk = take_utf8_prefix(&mut pending);
        if chunk.is_empty() {
            continue;
        }
        trace!("{}: {:?}", name, chunk);
        if tx.send(ProcessEvent::Output(chunk)).await.is_err() {
            debug!("{} channel closed", name);
            return;
        }
    }

    if !pending.is_empty() {
        let rest = String::from_utf8_lossy(&pending).into_owned();
        let _ = tx.send(ProcessEvent::Output(rest)).await;
    }
    debug!("{} reader finished", name);
}

/// Split off the longest valid UTF-8 prefix of `bytes`.
///
/// An incomplete trailing sequence stays in `bytes`; invalid bytes in the
/// middle are replaced.
fn take_utf8_prefix(bytes: &mut Vec<u8>) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => {
            let out = s.to_string();
            bytes.clear();
            out
        }
        Err(e) if e.error_len().is_none() => {
            let tail = bytes.split_off(e.valid_up_to());
            let out = String::from_utf8_lossy(bytes).into_owned();
            *bytes = tail;
            out
        }
        Err(_) => {
            let out = String::from_utf8_lossy(bytes).into_owned();
            bytes.clear();
            out
        }
    }
}

/// Owns `child` until it exits, then emits the single `Exited` event.
///
/// Exit is reported only after both pipes have drained (or the drain timed
/// out), so it is always the last event on the channel.
async fn wait_for_exit(
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    event_tx: mpsc::Sender<ProcessEvent>,
    readers: [JoinHandle<()>; 2],
    exited: Arc<AtomicBool>,
) {
    let code: Option<i32> = tokio::select! {
        result = child.wait() => {
            match result {
                Ok(status) => {
                    debug!("Sandbox process exited with status: {:?}", status);
                    status.code()
                }
                Err(e) => {
                    error!("Error waiting for sandbox process: {}", e);
                    None
                }
            }
        }
        // Fires on an explicit kill and when every killer has been dropped.
        _ = kill_rx => {
            info!("Kill requested, killing sandbox process");
            if let Err(e) = child.kill().await {
                error!("Failed to kill sandbox process: {}", e);
            }
            match child.wait().await {
                Ok(status) => status.code(),
                Err(e) => {
                    error!("Error waiting after kill: {}", e);
                    None
                }
            }
        }
    };

    for reader in readers {
        if tokio::time::timeout(PIPE_DRAIN_TIMEOUT, reader).await.is_err() {
            warn!("Output pipe still open after exit, dropping remaining output");
        }
    }

    exited.store(true, Ordering::Release);
    let _ = event_tx.send(ProcessEvent::Exited { code }).await;
}

/// Boots [`HostSandbox`] instances in fresh temporary directories.
#[derive(Debug, Clone, Default)]
pub struct HostSandboxBooter {
    base_dir: Option<PathBuf>,
}

impl HostSandboxBooter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create sandbox directories under `base_dir` instead of the system temp dir.
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(base_dir.into()),
        }
    }
}

impl SandboxBooter for HostSandboxBooter {
    type Handle = HostSandbox;

    async fn boot(&self) -> Result<HostSandbox> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("forge-sandbox-");

        let workdir = match &self.base_dir {
            Some(base) => {
                std::fs::create_dir_all(base)
                    .map_err(|e| Error::boot(format!("{}: {}", base.display(), e)))?;
                builder.tempdir_in(base)
            }
            None => builder.tempdir(),
        }
        .map_err(|e| Error::boot(e.to_string()))?;

        info!("Booted host sandbox at {}", workdir.path().display());
        Ok(HostSandbox::new(workdir))
    }
}
