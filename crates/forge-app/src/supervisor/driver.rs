//! Async driver for the dev-server state machine
//!
//! One task owns the [`DevServerMachine`]. Commands, process output and timer
//! expiries all arrive as messages on a single channel, so the machine only
//! ever sees one input at a time. Actions are carried out by short-lived
//! tasks that report back on the same channel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use forge_core::prelude::*;
use forge_core::{DevServerState, ProcessEvent, ServerAddress};
use forge_sandbox::{ProcessKiller, Sandbox, SandboxBooter, SandboxSession};

use super::machine::{
    DevServerMachine, Generation, PreviewUrls, SupervisorAction, SupervisorMessage,
    SupervisorSnapshot,
};
use super::report::FailureReport;
use crate::config::{DevServerSettings, InstallSettings};
use crate::installer::spawn_install;

/// Broadcast capacity; slow subscribers lose the oldest events
const EVENT_CAPACITY: usize = 256;

/// Notifications for observers of the supervisor
#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorEvent {
    StateChanged {
        from: DevServerState,
        to: DevServerState,
    },
    /// Raw output chunk from the installer or dev server
    Output(String),
    Ready(ServerAddress),
    /// The preview frame should load again
    RefreshPreview,
    Failed(FailureReport),
}

enum Input {
    Message(SupervisorMessage),
    Command {
        message: SupervisorMessage,
        ack: oneshot::Sender<SupervisorSnapshot>,
    },
    Shutdown,
}

/// Killers for running processes, keyed by generation.
///
/// A process registered for a generation that is no longer current is killed
/// on the spot; its kill request went out before it existed.
#[derive(Default)]
struct ProcessTable {
    current: Generation,
    killers: HashMap<Generation, ProcessKiller>,
}

type SharedProcessTable = Arc<Mutex<ProcessTable>>;

fn lock_table(table: &SharedProcessTable) -> MutexGuard<'_, ProcessTable> {
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ProcessTable {
    fn register(&mut self, generation: Generation, killer: ProcessKiller) -> bool {
        if generation != self.current {
            debug!("Process for stale generation {} killed on arrival", generation);
            killer.kill();
            return false;
        }
        self.killers.insert(generation, killer);
        true
    }

    fn kill(&mut self, generation: Generation) {
        if let Some(killer) = self.killers.remove(&generation) {
            debug!("Killing process for generation {}", generation);
            killer.kill();
        }
    }

    fn kill_all(&mut self) {
        for (_, killer) in self.killers.drain() {
            killer.kill();
        }
    }

    fn remove(&mut self, generation: Generation) {
        self.killers.remove(&generation);
    }
}

/// Handle to a running supervisor task
pub struct Supervisor {
    input_tx: mpsc::UnboundedSender<Input>,
    snapshot_rx: watch::Receiver<SupervisorSnapshot>,
    events_tx: broadcast::Sender<SupervisorEvent>,
    task: Option<JoinHandle<()>>,
}

impl Supervisor {
    /// Start the supervisor task. Nothing runs until [`Supervisor::start`].
    pub fn spawn<B>(
        session: Arc<SandboxSession<B>>,
        install: InstallSettings,
        dev_server: DevServerSettings,
    ) -> Self
    where
        B: SandboxBooter,
    {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(SupervisorSnapshot::default());
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);

        let runner = Runner {
            diagnostic_lines: dev_server.diagnostic_lines,
            machine: DevServerMachine::new(dev_server),
            session,
            install: Arc::new(install),
            input_tx: input_tx.clone(),
            processes: Arc::default(),
            snapshot_tx,
            events_tx: events_tx.clone(),
        };
        let task = tokio::spawn(runner.run(input_rx));

        Self {
            input_tx,
            snapshot_rx,
            events_tx,
            task: Some(task),
        }
    }

    async fn command(&self, message: SupervisorMessage) -> Result<SupervisorSnapshot> {
        let (ack, ack_rx) = oneshot::channel();
        self.input_tx
            .send(Input::Command { message, ack })
            .map_err(|_| Error::ChannelClosed)?;
        ack_rx.await.map_err(|_| Error::ChannelClosed)
    }

    /// Install dependencies, then start the dev server.
    pub async fn start(&self) -> Result<SupervisorSnapshot> {
        self.command(SupervisorMessage::Start).await
    }

    /// Start the dev server again, reusing installed dependencies.
    pub async fn restart(&self) -> Result<SupervisorSnapshot> {
        self.command(SupervisorMessage::Restart).await
    }

    /// Reinstall dependencies and start over.
    pub async fn rebuild(&self) -> Result<SupervisorSnapshot> {
        self.command(SupervisorMessage::Start).await
    }

    pub async fn stop(&self) -> Result<SupervisorSnapshot> {
        self.command(SupervisorMessage::Stop).await
    }

    /// Surface a failure from outside the supervisor (boot, mount).
    pub async fn report_failure(&self, error: Error) -> Result<SupervisorSnapshot> {
        self.command(SupervisorMessage::ReportFailure { error }).await
    }

    pub fn snapshot(&self) -> SupervisorSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SupervisorSnapshot> {
        self.snapshot_rx.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.events_tx.subscribe()
    }

    /// Wait until the current run is ready or has failed.
    ///
    /// Call after [`Supervisor::start`] or [`Supervisor::restart`]; the state
    /// those leave behind is never terminal.
    pub async fn wait_ready(&self) -> Result<ServerAddress> {
        let mut rx = self.snapshot_rx.clone();
        let snapshot = rx
            .wait_for(|s| {
                s.state.is_ready()
                    || s.state.needs_user_action()
                    || s.state == DevServerState::Stopped
            })
            .await
            .map_err(|_| Error::ChannelClosed)?
            .clone();

        match snapshot.state {
            DevServerState::Ready => snapshot
                .address
                .ok_or_else(|| Error::sandbox_unavailable("ready without an address")),
            DevServerState::Stopped => Err(Error::sandbox_unavailable("dev server was stopped")),
            _ => Err(snapshot
                .failure
                .map(|report| report.to_error())
                .unwrap_or_else(|| Error::sandbox_unavailable("dev server failed"))),
        }
    }

    /// Stop everything and wait for the supervisor task to finish.
    pub async fn shutdown(mut self) {
        let _ = self.input_tx.send(Input::Shutdown);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Supervisor task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        // The runner keeps a sender of its own, so the channel never closes
        if self.task.is_some() {
            let _ = self.input_tx.send(Input::Shutdown);
        }
    }
}

struct Runner<B: SandboxBooter> {
    machine: DevServerMachine,
    session: Arc<SandboxSession<B>>,
    install: Arc<InstallSettings>,
    diagnostic_lines: usize,
    input_tx: mpsc::UnboundedSender<Input>,
    processes: SharedProcessTable,
    snapshot_tx: watch::Sender<SupervisorSnapshot>,
    events_tx: broadcast::Sender<SupervisorEvent>,
}

impl<B: SandboxBooter> Runner<B> {
    async fn run(mut self, mut input_rx: mpsc::UnboundedReceiver<Input>) {
        debug!("Supervisor task started");

        while let Some(input) = input_rx.recv().await {
            match input {
                Input::Message(message) => self.process(message),
                Input::Command { message, ack } => {
                    self.process(message);
                    let _ = ack.send(self.machine.snapshot());
                }
                Input::Shutdown => {
                    self.process(SupervisorMessage::Stop);
                    break;
                }
            }
        }

        lock_table(&self.processes).kill_all();
        debug!("Supervisor task finished");
    }

    fn process(&mut self, message: SupervisorMessage) {
        let before = self.machine.state();
        let actions = self.machine.update(message);
        let after = self.machine.state();

        lock_table(&self.processes).current = self.machine.generation();

        if before != after {
            debug!("Dev server state: {} -> {}", before, after);
            let _ = self.events_tx.send(SupervisorEvent::StateChanged {
                from: before,
                to: after,
            });
        }

        for action in actions {
            self.execute(action);
        }

        let snapshot = self.machine.snapshot();
        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }

    fn execute(&self, action: SupervisorAction) {
        match action {
            SupervisorAction::RunInstall { generation } => {
                tokio::spawn(run_install_task(
                    self.session.clone(),
                    self.install.clone(),
                    self.diagnostic_lines,
                    generation,
                    self.processes.clone(),
                    self.input_tx.clone(),
                ));
            }
            SupervisorAction::SpawnDevServer {
                generation,
                command,
                args,
            } => {
                tokio::spawn(run_dev_server_task(
                    self.session.clone(),
                    generation,
                    command,
                    args,
                    self.processes.clone(),
                    self.input_tx.clone(),
                ));
            }
            SupervisorAction::KillProcess { generation } => {
                lock_table(&self.processes).kill(generation);
            }
            SupervisorAction::StartPromptTimer {
                generation,
                token,
                after,
            } => {
                self.after(after, SupervisorMessage::PromptTimerFired { generation, token });
            }
            SupervisorAction::StartFallbackTimer { generation, after } => {
                self.after(after, SupervisorMessage::FallbackTimerFired { generation });
            }
            SupervisorAction::ScheduleSettle { generation, after } => {
                self.after(after, SupervisorMessage::SettleElapsed { generation });
            }
            SupervisorAction::EmitOutput(chunk) => {
                let _ = self.events_tx.send(SupervisorEvent::Output(chunk));
            }
            SupervisorAction::EmitReady(address) => {
                let _ = self.events_tx.send(SupervisorEvent::Ready(address));
            }
            SupervisorAction::RefreshPreview => {
                let _ = self.events_tx.send(SupervisorEvent::RefreshPreview);
            }
            SupervisorAction::EmitFailure(report) => {
                let _ = self.events_tx.send(SupervisorEvent::Failed(report));
            }
        }
    }

    /// One-shot timer; a stale generation is dropped by the machine.
    fn after(&self, delay: std::time::Duration, message: SupervisorMessage) {
        let input_tx = self.input_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = input_tx.send(Input::Message(message));
        });
    }
}

async fn run_install_task<B: SandboxBooter>(
    session: Arc<SandboxSession<B>>,
    settings: Arc<InstallSettings>,
    diagnostic_lines: usize,
    generation: Generation,
    processes: SharedProcessTable,
    input_tx: mpsc::UnboundedSender<Input>,
) {
    let send = |message| {
        let _ = input_tx.send(Input::Message(message));
    };

    let sandbox = match session.acquire().await {
        Ok(sandbox) => sandbox,
        Err(error) => return send(SupervisorMessage::SandboxFailed { generation, error }),
    };

    let install = match spawn_install(&*sandbox, &settings, diagnostic_lines).await {
        Ok(install) => install,
        Err(error) => return send(SupervisorMessage::SandboxFailed { generation, error }),
    };

    if !lock_table(&processes).register(generation, install.killer()) {
        return;
    }

    let result = install
        .wait(|chunk| {
            send(SupervisorMessage::InstallOutput {
                generation,
                chunk: chunk.to_string(),
            })
        })
        .await;

    lock_table(&processes).remove(generation);
    send(SupervisorMessage::InstallFinished { generation, result });
}

async fn run_dev_server_task<B: SandboxBooter>(
    session: Arc<SandboxSession<B>>,
    generation: Generation,
    command: String,
    args: Vec<String>,
    processes: SharedProcessTable,
    input_tx: mpsc::UnboundedSender<Input>,
) {
    let send = |message| {
        let _ = input_tx.send(Input::Message(message));
    };

    let sandbox = match session.acquire().await {
        Ok(sandbox) => sandbox,
        Err(error) => return send(SupervisorMessage::SandboxFailed { generation, error }),
    };

    let mut process = match sandbox.spawn(&command, &args).await {
        Ok(process) => process,
        Err(error) => return send(SupervisorMessage::DevServerSpawnFailed { generation, error }),
    };

    if !lock_table(&processes).register(generation, process.killer()) {
        return;
    }

    let handle = sandbox.clone();
    send(SupervisorMessage::DevServerSpawned {
        generation,
        urls: PreviewUrls::new(move |port| handle.preview_url(port)),
    });

    let mut code = None;
    while let Some(event) = process.next_event().await {
        match event {
            ProcessEvent::Output(chunk) => {
                send(SupervisorMessage::DevServerOutput { generation, chunk })
            }
            ProcessEvent::Exited { code: exit_code } => {
                code = exit_code;
                break;
            }
        }
    }

    lock_table(&processes).remove(generation);
    send(SupervisorMessage::DevServerExited { generation, code });
}
