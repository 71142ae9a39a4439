//! Engine - one project's preview, from files to a running dev server
//!
//! The Engine owns everything a frontend needs for a single project: the
//! sandbox session, the dev-server supervisor, the preview surface and the
//! change sources (local watcher or remote event stream). Frontends call the
//! lifecycle methods and drain [`Engine::next_event`].
//!
//! Must be created inside a tokio runtime.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use url::Url;

use forge_core::prelude::*;
use forge_core::{build_file_tree, AppStatus, FileTree, ProjectStreamMessage, ServerAddress};
use forge_sandbox::{FileSnapshotStore, SandboxBooter, SandboxSession, SnapshotStore};

use crate::config::{Settings, FORGE_DIR};
use crate::engine_event::{EngineEvent, RemountTrigger};
use crate::event_stream::{run_event_stream, ReconnectPolicy};
use crate::preview::{FrameSpec, Overlay, PreviewAction, PreviewSurface, PreviewTarget};
use crate::project_files::{build_remote_tree, HttpProjectFiles};
use crate::supervisor::{Supervisor, SupervisorEvent, SupervisorSnapshot};
use crate::watcher::{ProjectWatcher, WatchEvent, WatcherConfig};

/// How long shutdown waits for the event stream task
const STREAM_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Where the project files come from
enum Origin {
    Local(PathBuf),
    Remote {
        name: String,
        client: HttpProjectFiles,
    },
}

/// Orchestration engine for one project.
pub struct Engine<B: SandboxBooter> {
    settings: Settings,
    origin: Origin,
    session: Arc<SandboxSession<B>>,
    supervisor: Supervisor,
    supervisor_rx: broadcast::Receiver<SupervisorEvent>,
    preview: PreviewSurface,

    /// Local watcher; only for local projects with watching enabled
    file_watcher: Option<ProjectWatcher>,
    watch_rx: Option<mpsc::Receiver<WatchEvent>>,

    /// Remote change stream; only when an events URL is configured
    stream_task: Option<JoinHandle<()>>,
    refresh_rx: Option<mpsc::Receiver<ProjectStreamMessage>>,

    shutdown_tx: watch::Sender<bool>,
    pending: VecDeque<EngineEvent>,
}

impl<B: SandboxBooter> Engine<B> {
    /// Engine for a project directory.
    ///
    /// The mounted snapshot is kept in `<root>/.forge`, so a restarted
    /// process remounts the same files into its fresh sandbox.
    pub fn open_local(booter: B, root: impl Into<PathBuf>, settings: Settings) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(Error::ProjectNotFound { path: root });
        }

        let snapshot = Arc::new(FileSnapshotStore::in_dir(&root.join(FORGE_DIR)));
        Ok(Self::with_origin(booter, snapshot, Origin::Local(root), settings))
    }

    /// Engine for a project stored behind the project-files API.
    ///
    /// There is no project directory, so the caller picks where the mounted
    /// snapshot lives.
    pub fn open_remote(
        booter: B,
        name: impl Into<String>,
        settings: Settings,
        snapshot: Arc<dyn SnapshotStore>,
    ) -> Result<Self> {
        let client = HttpProjectFiles::new(&settings.remote.api_base)?;
        let origin = Origin::Remote {
            name: name.into(),
            client,
        };
        Ok(Self::with_origin(booter, snapshot, origin, settings))
    }

    fn with_origin(
        booter: B,
        snapshot: Arc<dyn SnapshotStore>,
        origin: Origin,
        settings: Settings,
    ) -> Self {
        let session = Arc::new(SandboxSession::new(booter, snapshot));
        let supervisor = Supervisor::spawn(
            session.clone(),
            settings.install.clone(),
            settings.dev_server.clone(),
        );
        let supervisor_rx = supervisor.subscribe();
        let preview = match &settings.preview.static_url {
            Some(url) => PreviewSurface::with_static(url.clone()),
            None => PreviewSurface::new(),
        };
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            settings,
            origin,
            session,
            supervisor,
            supervisor_rx,
            preview,
            file_watcher: None,
            watch_rx: None,
            stream_task: None,
            refresh_rx: None,
            shutdown_tx,
            pending: VecDeque::new(),
        }
    }

    // ─────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────

    /// Mount the project, install dependencies and start the dev server.
    ///
    /// A static preview only loads its frame. Boot and mount failures are
    /// not returned: they land in the supervisor as a `Failed` state.
    pub async fn start(&mut self) -> Result<SupervisorSnapshot> {
        if self.is_static() {
            if let Some(frame) = self.preview.refresh() {
                self.pending.push_back(EngineEvent::Frame(frame));
            }
            return Ok(self.supervisor.snapshot());
        }

        info!("Starting preview for {}", self.project_name());
        if let Err(e) = self.mount_project().await {
            return self.supervisor.report_failure(e).await;
        }
        let snapshot = self.supervisor.start().await?;
        self.start_change_sources();
        Ok(snapshot)
    }

    /// Start the dev server again with the installed dependencies.
    pub async fn restart(&mut self) -> Result<SupervisorSnapshot> {
        if self.is_static() {
            return self.reload_static();
        }
        self.supervisor.restart().await
    }

    /// Reload the files, reinstall and start over.
    pub async fn rebuild(&mut self) -> Result<SupervisorSnapshot> {
        if self.is_static() {
            return self.reload_static();
        }

        match self.mount_project().await {
            Ok(files) => self.pending.push_back(EngineEvent::Remounted {
                trigger: RemountTrigger::Rebuild,
                files,
            }),
            Err(e) => return self.supervisor.report_failure(e).await,
        }
        let snapshot = self.supervisor.rebuild().await?;
        self.start_change_sources();
        Ok(snapshot)
    }

    /// Stop the dev server; later output is ignored.
    pub async fn stop(&mut self) -> Result<SupervisorSnapshot> {
        self.supervisor.stop().await
    }

    /// Reload the preview frame. `None` when nothing is bound yet.
    pub fn refresh(&mut self) -> Option<FrameSpec> {
        self.preview.refresh()
    }

    /// Carry out a preview toolbar action.
    pub async fn dispatch(&mut self, action: PreviewAction) -> Result<()> {
        debug!("Preview action: {:?}", action);
        match action {
            PreviewAction::Refresh => {
                if let Some(frame) = self.refresh() {
                    self.pending.push_back(EngineEvent::Frame(frame));
                }
            }
            PreviewAction::Rebuild => {
                self.rebuild().await?;
            }
            PreviewAction::Restart => {
                self.restart().await?;
            }
        }
        Ok(())
    }

    /// Wait for the current run to become ready or fail.
    pub async fn wait_ready(&self) -> Result<ServerAddress> {
        self.supervisor.wait_ready().await
    }

    /// Stop change sources and the supervisor, then release the sandbox.
    pub async fn shutdown(mut self) {
        if let Some(watcher) = self.file_watcher.as_mut() {
            watcher.stop();
        }

        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.stream_task.take() {
            match tokio::time::timeout(STREAM_SHUTDOWN_TIMEOUT, task).await {
                Ok(Ok(())) => debug!("Event stream stopped"),
                Ok(Err(e)) => warn!("Event stream task panicked: {}", e),
                Err(_) => warn!("Event stream shutdown timed out"),
            }
        }

        self.supervisor.shutdown().await;
        self.session.release().await;
        info!("Engine shut down");
    }

    // ─────────────────────────────────────────────────────────
    // Events
    // ─────────────────────────────────────────────────────────

    /// Next event for the frontend. `None` once the supervisor is gone.
    ///
    /// Dropping the future while a change is being mounted drops that
    /// remount; the next change mounts the whole tree again.
    pub async fn next_event(&mut self) -> Option<EngineEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }

            tokio::select! {
                received = self.supervisor_rx.recv() => match received {
                    Ok(event) => self.handle_supervisor_event(event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Engine fell behind, {} supervisor events skipped", skipped);
                    }
                    Err(RecvError::Closed) => return None,
                },
                change = recv_optional(&mut self.watch_rx) => match change {
                    Some(event) => self.handle_watch_event(event).await,
                    None => self.watch_rx = None,
                },
                message = recv_optional(&mut self.refresh_rx) => match message {
                    Some(message) => self.handle_stream_message(message).await,
                    None => {
                        debug!("Event stream ended");
                        self.refresh_rx = None;
                    }
                },
            }
        }
    }

    fn handle_supervisor_event(&mut self, event: SupervisorEvent) {
        let frame = self.preview.apply_event(&event);
        self.pending.push_back(EngineEvent::Supervisor(event));
        if let Some(frame) = frame {
            self.pending.push_back(EngineEvent::Frame(frame));
        }
    }

    /// React to the local watcher: mount the changed tree. The dev server's
    /// own hot reload takes it from there.
    pub async fn handle_watch_event(&mut self, event: WatchEvent) {
        match event {
            WatchEvent::Changed { paths } => {
                debug!("{} project file(s) changed", paths.len());
                self.remount(RemountTrigger::LocalChange).await;
            }
            WatchEvent::Error { message } => warn!("Project watcher: {}", message),
        }
    }

    /// React to the remote event stream: fetch and mount the files again,
    /// then reload the frame.
    pub async fn handle_stream_message(&mut self, message: ProjectStreamMessage) {
        let ProjectStreamMessage::Refresh { file } = message else {
            return;
        };
        debug!("Remote refresh for {}", file.as_deref().unwrap_or("the whole project"));

        if self.remount(RemountTrigger::RemoteRefresh).await {
            let live = self.preview.target().is_some_and(PreviewTarget::is_live);
            if live {
                if let Some(frame) = self.preview.refresh() {
                    self.pending.push_back(EngineEvent::Frame(frame));
                }
            }
        }
    }

    /// Mount the current files without touching the supervisor.
    async fn remount(&mut self, trigger: RemountTrigger) -> bool {
        if self.is_static() {
            return false;
        }

        match self.mount_project().await {
            Ok(files) => {
                self.pending
                    .push_back(EngineEvent::Remounted { trigger, files });
                true
            }
            Err(e) => {
                warn!("Remount ({}) failed: {}", trigger.label(), e);
                self.pending.push_back(EngineEvent::RemountFailed {
                    trigger,
                    message: e.to_string(),
                });
                false
            }
        }
    }

    // ─────────────────────────────────────────────────────────
    // State
    // ─────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> SupervisorSnapshot {
        self.supervisor.snapshot()
    }

    /// Status for the generated-app record
    pub fn app_status(&self) -> AppStatus {
        if self.is_static() {
            return AppStatus::Ready;
        }
        AppStatus::from(self.supervisor.snapshot().state)
    }

    pub fn frame(&self) -> Option<FrameSpec> {
        self.preview.frame()
    }

    pub fn overlay(&self) -> Option<Overlay> {
        self.preview.overlay(&self.supervisor.snapshot())
    }

    pub fn preview(&self) -> &PreviewSurface {
        &self.preview
    }

    pub fn session(&self) -> &Arc<SandboxSession<B>> {
        &self.session
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn project_name(&self) -> String {
        match &self.origin {
            Origin::Local(root) => root
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| root.display().to_string()),
            Origin::Remote { name, .. } => name.clone(),
        }
    }

    fn is_static(&self) -> bool {
        matches!(self.preview.target(), Some(PreviewTarget::Static { .. }))
    }

    fn reload_static(&mut self) -> Result<SupervisorSnapshot> {
        if let Some(frame) = self.preview.refresh() {
            self.pending.push_back(EngineEvent::Frame(frame));
        }
        Ok(self.supervisor.snapshot())
    }

    // ─────────────────────────────────────────────────────────
    // Files
    // ─────────────────────────────────────────────────────────

    async fn load_tree(&self) -> Result<FileTree> {
        match &self.origin {
            Origin::Local(root) => {
                let root = root.clone();
                tokio::task::spawn_blocking(move || build_file_tree(&root))
                    .await
                    .map_err(std::io::Error::other)
                    .context("Project walk task failed")?
            }
            Origin::Remote { name, client } => build_remote_tree(client, name).await,
        }
    }

    /// Load the project and mount it. Returns the number of files.
    async fn mount_project(&self) -> Result<usize> {
        let tree = self.load_tree().await?;
        self.session.mount(&tree).await?;
        info!(
            "Mounted {} files ({} bytes) for {}",
            tree.file_count(),
            tree.total_bytes(),
            self.project_name()
        );
        Ok(tree.file_count())
    }

    // ─────────────────────────────────────────────────────────
    // Change sources
    // ─────────────────────────────────────────────────────────

    fn start_change_sources(&mut self) {
        let root = match &self.origin {
            Origin::Local(root) => Some(root.clone()),
            Origin::Remote { .. } => None,
        };
        match root {
            Some(root) => self.start_file_watcher(&root),
            None => self.start_event_stream(),
        }
    }

    fn start_file_watcher(&mut self, root: &Path) {
        if !self.settings.watcher.enabled || self.file_watcher.is_some() {
            return;
        }

        let (tx, rx) = mpsc::channel(32);
        let mut watcher =
            ProjectWatcher::new(root.to_path_buf(), WatcherConfig::from(&self.settings.watcher));
        match watcher.start(tx) {
            Ok(()) => {
                self.file_watcher = Some(watcher);
                self.watch_rx = Some(rx);
            }
            Err(e) => warn!("Failed to start project watcher: {}", e),
        }
    }

    fn start_event_stream(&mut self) {
        if self.stream_task.is_some() {
            return;
        }
        let Some(events_url) = self.settings.remote.events_url.as_deref() else {
            return;
        };
        let url = match Url::parse(events_url) {
            Ok(url) => url,
            Err(e) => {
                warn!("Ignoring invalid events URL '{}': {}", events_url, e);
                return;
            }
        };

        let (tx, rx) = mpsc::channel(16);
        let policy = ReconnectPolicy::from(&self.settings.remote);
        self.stream_task = Some(tokio::spawn(run_event_stream(
            url,
            policy,
            tx,
            self.shutdown_tx.subscribe(),
        )));
        self.refresh_rx = Some(rx);
    }
}

/// Receive from an optional channel; pends forever when there is none.
async fn recv_optional<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_http::{serve, StubResponse};
    use forge_core::DevServerState;
    use forge_sandbox::test_utils::{FakeBooter, ProcessScript};
    use forge_sandbox::MemorySnapshotStore;

    const DEV_READY: &str = "  Local: http://localhost:5173/\n";

    fn quiet_settings() -> Settings {
        let mut settings = Settings::default();
        settings.watcher.enabled = false;
        settings
    }

    fn write_project(root: &Path) {
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::write(root.join("package.json"), r#"{"scripts":{"dev":"vite"}}"#).unwrap();
        std::fs::write(root.join("vite.config.ts"), "export default {}").unwrap();
        std::fs::write(
            root.join("src/App.tsx"),
            "export default function App() { return null }",
        )
        .unwrap();
    }

    fn ready_booter() -> FakeBooter {
        let booter = FakeBooter::new();
        booter.script("npm run dev", ProcessScript::new().output(DEV_READY));
        booter
    }

    /// Frame bound by the next ready signal, skipping settle reloads.
    async fn next_ready_frame<B: SandboxBooter>(engine: &mut Engine<B>) -> FrameSpec {
        loop {
            match engine.next_event().await {
                Some(EngineEvent::Supervisor(SupervisorEvent::Ready(_))) => {
                    return next_frame(engine).await
                }
                Some(_) => continue,
                None => panic!("engine closed before the server was ready"),
            }
        }
    }

    async fn next_frame<B: SandboxBooter>(engine: &mut Engine<B>) -> FrameSpec {
        loop {
            match engine.next_event().await {
                Some(EngineEvent::Frame(frame)) => return frame,
                Some(_) => continue,
                None => panic!("engine closed before a frame was loaded"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_project_reaches_ready() {
        let dir = tempfile::tempdir().unwrap();
        write_project(dir.path());
        let booter = ready_booter();

        let mut engine = Engine::open_local(booter.clone(), dir.path(), quiet_settings()).unwrap();
        assert_eq!(engine.app_status(), AppStatus::Pending);

        let snapshot = engine.start().await.unwrap();
        assert_eq!(snapshot.state, DevServerState::Installing);

        let frame = next_frame(&mut engine).await;
        assert_eq!(frame.src, "https://fake-1--5173.sandbox.test/");
        assert_eq!(engine.app_status(), AppStatus::Ready);
        assert!(engine.overlay().is_none());

        let mounted = booter.last_sandbox().unwrap().last_mount().unwrap();
        assert!(mounted.file_contents("src/App.tsx").is_some());
        assert!(mounted.file_contents("vite.config.ts").is_some());

        engine.shutdown().await;
        assert_eq!(booter.last_sandbox().unwrap().teardowns(), 1);
    }

    #[tokio::test]
    async fn test_open_local_requires_directory() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");

        let result = Engine::open_local(FakeBooter::new(), missing, quiet_settings());
        assert!(matches!(result, Err(Error::ProjectNotFound { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mount_failure_surfaces_as_failed() {
        let dir = tempfile::tempdir().unwrap();
        write_project(dir.path());
        let booter = ready_booter();
        booter.fail_mounts(true);

        let mut engine = Engine::open_local(booter.clone(), dir.path(), quiet_settings()).unwrap();
        let snapshot = engine.start().await.unwrap();

        assert_eq!(snapshot.state, DevServerState::Failed);
        assert_eq!(engine.app_status(), AppStatus::Error);
        assert!(matches!(engine.overlay(), Some(Overlay::Error { .. })));
        // Nothing was spawned
        assert!(booter.last_sandbox().unwrap().spawns().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_change_remounts() {
        let dir = tempfile::tempdir().unwrap();
        write_project(dir.path());
        let booter = ready_booter();

        let mut engine = Engine::open_local(booter.clone(), dir.path(), quiet_settings()).unwrap();
        engine.start().await.unwrap();
        next_frame(&mut engine).await;

        std::fs::write(dir.path().join("src/App.tsx"), "export default () => 'edited'").unwrap();
        engine
            .handle_watch_event(WatchEvent::Changed {
                paths: vec![PathBuf::from("src/App.tsx")],
            })
            .await;

        assert_eq!(
            engine.next_event().await,
            Some(EngineEvent::Remounted {
                trigger: RemountTrigger::LocalChange,
                files: 3,
            })
        );
        let sandbox = booter.last_sandbox().unwrap();
        assert_eq!(
            sandbox.last_mount().unwrap().file_contents("src/App.tsx"),
            Some("export default () => 'edited'")
        );
        // Hot reload only: the dev server keeps running
        assert_eq!(sandbox.kills(), 0);
        assert_eq!(engine.snapshot().state, DevServerState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rebuild_remounts_and_reinstalls() {
        let dir = tempfile::tempdir().unwrap();
        write_project(dir.path());
        let booter = ready_booter();

        let mut engine = Engine::open_local(booter.clone(), dir.path(), quiet_settings()).unwrap();
        engine.start().await.unwrap();
        let first = next_frame(&mut engine).await;

        engine.dispatch(PreviewAction::Rebuild).await.unwrap();
        let second = next_ready_frame(&mut engine).await;

        // Same proxied URL, new frame identity
        assert_eq!(first.src, second.src);
        assert_ne!(first.key, second.key);

        let sandbox = booter.last_sandbox().unwrap();
        assert_eq!(sandbox.mounts().len(), 2);
        assert_eq!(sandbox.kills(), 1);
        assert_eq!(
            sandbox
                .spawned_command_lines()
                .iter()
                .filter(|line| line.starts_with("npm install"))
                .count(),
            2
        );
        assert_eq!(booter.boot_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_skips_install() {
        let dir = tempfile::tempdir().unwrap();
        write_project(dir.path());
        let booter = ready_booter();

        let mut engine = Engine::open_local(booter.clone(), dir.path(), quiet_settings()).unwrap();
        engine.start().await.unwrap();
        next_frame(&mut engine).await;

        engine.dispatch(PreviewAction::Restart).await.unwrap();
        next_ready_frame(&mut engine).await;

        let lines = booter.last_sandbox().unwrap().spawned_command_lines();
        assert_eq!(
            lines,
            vec![
                "npm install --yes --legacy-peer-deps --no-audit --no-fund",
                "npm run dev",
                "npm run dev",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_static_preview_skips_sandbox() {
        let dir = tempfile::tempdir().unwrap();
        write_project(dir.path());
        let booter = FakeBooter::new();
        let mut settings = quiet_settings();
        settings.preview.static_url = Some("https://apps.example.com/demo/".to_string());

        let mut engine = Engine::open_local(booter.clone(), dir.path(), settings).unwrap();
        engine.start().await.unwrap();

        let frame = next_frame(&mut engine).await;
        assert_eq!(frame.src, "https://apps.example.com/demo/");
        assert_eq!(engine.app_status(), AppStatus::Ready);
        assert!(engine.overlay().is_none());
        assert_eq!(booter.boot_count(), 0);

        engine.dispatch(PreviewAction::Refresh).await.unwrap();
        let refreshed = next_frame(&mut engine).await;
        assert_ne!(refreshed.key, frame.key);
    }

    #[tokio::test]
    async fn test_remote_project_and_refresh() {
        let server = serve(vec![StubResponse::json(
            r#"{"package.json":{"file":{"contents":"{}"}},"src":{"directory":{"App.tsx":{"file":{"contents":"export {}"}}}}}"#,
        )])
        .await;
        let mut settings = quiet_settings();
        settings.remote.api_base = format!("{}/api", server.base);
        let booter = ready_booter();

        let mut engine = Engine::open_remote(
            booter.clone(),
            "demo",
            settings,
            Arc::new(MemorySnapshotStore::new()),
        )
        .unwrap();
        assert_eq!(engine.project_name(), "demo");
        engine.start().await.unwrap();
        let first = next_frame(&mut engine).await;
        assert_eq!(first.src, "https://fake-1--5173.sandbox.test/");

        engine
            .handle_stream_message(ProjectStreamMessage::Refresh {
                file: Some("src/App.tsx".to_string()),
            })
            .await;

        assert_eq!(
            engine.next_event().await,
            Some(EngineEvent::Remounted {
                trigger: RemountTrigger::RemoteRefresh,
                files: 2,
            })
        );
        let reloaded = next_frame(&mut engine).await;
        assert_eq!(reloaded.src, first.src);
        assert_ne!(reloaded.key, first.key);

        assert_eq!(booter.last_sandbox().unwrap().mounts().len(), 2);
        assert!(server
            .requests()
            .iter()
            .all(|line| line == "GET /api/project-files/demo HTTP/1.1"));

        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_inert() {
        let dir = tempfile::tempdir().unwrap();
        write_project(dir.path());
        let booter = ready_booter();

        let mut engine = Engine::open_local(booter.clone(), dir.path(), quiet_settings()).unwrap();
        engine.start().await.unwrap();
        next_frame(&mut engine).await;

        let snapshot = engine.stop().await.unwrap();
        assert_eq!(snapshot.state, DevServerState::Stopped);
        assert_eq!(engine.app_status(), AppStatus::Pending);

        loop {
            let event = engine.next_event().await.unwrap();
            if let EngineEvent::Supervisor(SupervisorEvent::StateChanged { to, .. }) = event {
                if to == DevServerState::Stopped {
                    break;
                }
            }
        }
        // The stopped server's URL is no longer shown
        assert!(engine.frame().is_none());
    }
}
