//! Test utilities for sandbox consumers
//!
//! [`FakeBooter`] boots [`FakeSandbox`]es that record every mount, spawn,
//! kill and teardown, and play back scripted process output. Both are cheap
//! handles over shared state, so a test can keep a clone after handing one to
//! a session or supervisor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};

use forge_core::prelude::*;
use forge_core::{FileTree, ProcessEvent};

use crate::capability::{Sandbox, SandboxBooter};
use crate::process::{ProcessController, SpawnedProcess};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One step of a scripted process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    Output(String),
    Sleep(Duration),
    Exit(Option<i32>),
}

/// Scripted behaviour of a fake process.
///
/// Steps run in order. A script that runs out of steps without exiting keeps
/// the process alive until it is killed, like a dev server would.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessScript {
    steps: Vec<ScriptStep>,
    manual: bool,
}

impl ProcessScript {
    pub fn new() -> Self {
        Self::default()
    }

    /// A process driven by the test through [`ManualProcess`].
    pub fn manual() -> Self {
        Self {
            steps: Vec::new(),
            manual: true,
        }
    }

    pub fn output(mut self, chunk: impl Into<String>) -> Self {
        self.steps.push(ScriptStep::Output(chunk.into()));
        self
    }

    pub fn sleep(mut self, duration: Duration) -> Self {
        self.steps.push(ScriptStep::Sleep(duration));
        self
    }

    pub fn exit(mut self, code: i32) -> Self {
        self.steps.push(ScriptStep::Exit(Some(code)));
        self
    }

    pub fn steps(&self) -> &[ScriptStep] {
        &self.steps
    }
}

/// A spawn seen by a [`FakeSandbox`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRecord {
    pub command: String,
    pub args: Vec<String>,
}

impl SpawnRecord {
    /// `command arg1 arg2 ...`
    pub fn command_line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Test side of a [`ProcessScript::manual`] process
#[derive(Debug)]
pub struct ManualProcess {
    pub record: SpawnRecord,
    events_tx: mpsc::Sender<ProcessEvent>,
    kill_rx: oneshot::Receiver<()>,
}

impl ManualProcess {
    fn new(record: SpawnRecord, controller: ProcessController) -> Self {
        Self {
            record,
            events_tx: controller.events_tx,
            kill_rx: controller.kill_rx,
        }
    }

    /// Push an output chunk. Returns `false` if nobody is listening anymore.
    pub async fn output(&self, chunk: &str) -> bool {
        self.events_tx
            .send(ProcessEvent::Output(chunk.to_string()))
            .await
            .is_ok()
    }

    /// Report the process exit
    pub async fn exit(self, code: Option<i32>) -> bool {
        self.events_tx
            .send(ProcessEvent::Exited { code })
            .await
            .is_ok()
    }

    /// Whether a kill was requested (or every killer was dropped)
    pub fn was_killed(&mut self) -> bool {
        !matches!(
            self.kill_rx.try_recv(),
            Err(oneshot::error::TryRecvError::Empty)
        )
    }
}

/// Scripts shared by every sandbox a booter produces.
///
/// Keys are full command lines (`npm run dev`) or bare commands (`npm`); the
/// full line is tried first. Several scripts under one key are used in
/// order, the last one repeating.
#[derive(Debug, Default)]
pub struct ScriptBook {
    scripts: Mutex<HashMap<String, Vec<ProcessScript>>>,
}

impl ScriptBook {
    pub fn add(&self, key: &str, script: ProcessScript) {
        lock(&self.scripts)
            .entry(key.to_string())
            .or_default()
            .push(script);
    }

    fn next_for(&self, record: &SpawnRecord) -> ProcessScript {
        let mut scripts = lock(&self.scripts);
        for key in [record.command_line(), record.command.clone()] {
            if let Some(queue) = scripts.get_mut(&key) {
                if queue.len() > 1 {
                    return queue.remove(0);
                }
                if let Some(last) = queue.first() {
                    return last.clone();
                }
            }
        }
        ProcessScript::new().exit(0)
    }
}

#[derive(Debug, Default)]
struct FakeSandboxState {
    mounts: Vec<FileTree>,
    spawns: Vec<SpawnRecord>,
    manual: Vec<ManualProcess>,
    kills: usize,
    teardowns: usize,
}

#[derive(Debug)]
struct FakeSandboxInner {
    id: usize,
    state: Mutex<FakeSandboxState>,
    scripts: Arc<ScriptBook>,
    fail_mounts: Arc<AtomicBool>,
}

/// A recording, scripted sandbox
#[derive(Debug, Clone)]
pub struct FakeSandbox {
    inner: Arc<FakeSandboxInner>,
}

impl FakeSandbox {
    pub fn new(id: usize) -> Self {
        Self::with_scripts(id, Arc::new(ScriptBook::default()), Arc::default())
    }

    fn with_scripts(id: usize, scripts: Arc<ScriptBook>, fail_mounts: Arc<AtomicBool>) -> Self {
        Self {
            inner: Arc::new(FakeSandboxInner {
                id,
                state: Mutex::new(FakeSandboxState::default()),
                scripts,
                fail_mounts,
            }),
        }
    }

    pub fn id(&self) -> usize {
        self.inner.id
    }

    /// Register a script for a command line or bare command
    pub fn script(&self, key: &str, script: ProcessScript) {
        self.inner.scripts.add(key, script);
    }

    pub fn mounts(&self) -> Vec<FileTree> {
        lock(&self.inner.state).mounts.clone()
    }

    pub fn last_mount(&self) -> Option<FileTree> {
        lock(&self.inner.state).mounts.last().cloned()
    }

    pub fn spawns(&self) -> Vec<SpawnRecord> {
        lock(&self.inner.state).spawns.clone()
    }

    pub fn spawned_command_lines(&self) -> Vec<String> {
        self.spawns().iter().map(SpawnRecord::command_line).collect()
    }

    /// Kills delivered to scripted processes
    pub fn kills(&self) -> usize {
        lock(&self.inner.state).kills
    }

    pub fn teardowns(&self) -> usize {
        lock(&self.inner.state).teardowns
    }

    /// Take the oldest manual process not yet handed out
    pub fn take_manual_process(&self) -> Option<ManualProcess> {
        let mut state = lock(&self.inner.state);
        if state.manual.is_empty() {
            None
        } else {
            Some(state.manual.remove(0))
        }
    }

    /// Wait (in virtual or real time) until a manual process has been spawned.
    pub async fn next_manual_process(&self) -> ManualProcess {
        loop {
            if let Some(process) = self.take_manual_process() {
                return process;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    fn record_kill(&self) {
        lock(&self.inner.state).kills += 1;
    }
}

impl Sandbox for FakeSandbox {
    async fn mount(&self, tree: &FileTree) -> Result<()> {
        if self.inner.fail_mounts.load(Ordering::SeqCst) {
            return Err(Error::mount("fake mount rejected"));
        }
        lock(&self.inner.state).mounts.push(tree.clone());
        Ok(())
    }

    async fn spawn(&self, command: &str, args: &[String]) -> Result<SpawnedProcess> {
        let record = SpawnRecord {
            command: command.to_string(),
            args: args.to_vec(),
        };
        let script = self.inner.scripts.next_for(&record);
        lock(&self.inner.state).spawns.push(record.clone());

        let (process, controller) = SpawnedProcess::channel(None);
        if script.manual {
            lock(&self.inner.state)
                .manual
                .push(ManualProcess::new(record, controller));
        } else {
            tokio::spawn(run_script(self.clone(), script, controller));
        }
        Ok(process)
    }

    async fn teardown(&self) -> Result<()> {
        lock(&self.inner.state).teardowns += 1;
        Ok(())
    }

    fn preview_url(&self, port: u16) -> String {
        format!("https://fake-{}--{}.sandbox.test/", self.inner.id, port)
    }
}

/// Play a script, honouring kill requests between steps.
async fn run_script(sandbox: FakeSandbox, script: ProcessScript, controller: ProcessController) {
    let ProcessController {
        events_tx,
        mut kill_rx,
    } = controller;

    for step in script.steps {
        match step {
            ScriptStep::Output(chunk) => {
                if events_tx.send(ProcessEvent::Output(chunk)).await.is_err() {
                    return;
                }
            }
            ScriptStep::Sleep(duration) => {
                tokio::select! {
                    _ = tokio::time::sleep(duration) => {}
                    _ = &mut kill_rx => {
                        sandbox.record_kill();
                        let _ = events_tx.send(ProcessEvent::Exited { code: None }).await;
                        return;
                    }
                }
            }
            ScriptStep::Exit(code) => {
                let _ = events_tx.send(ProcessEvent::Exited { code }).await;
                return;
            }
        }
    }

    // Out of steps: keep running until killed.
    let _ = kill_rx.await;
    sandbox.record_kill();
    let _ = events_tx.send(ProcessEvent::Exited { code: None }).await;
}

#[derive(Debug)]
struct FakeBooterInner {
    boots: AtomicUsize,
    failures_remaining: AtomicUsize,
    gate: watch::Sender<bool>,
    booted: Mutex<Vec<FakeSandbox>>,
    scripts: Arc<ScriptBook>,
    fail_mounts: Arc<AtomicBool>,
}

/// Boots [`FakeSandbox`]es; cloning shares the recorded state.
#[derive(Debug, Clone)]
pub struct FakeBooter {
    inner: Arc<FakeBooterInner>,
}

impl Default for FakeBooter {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBooter {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            inner: Arc::new(FakeBooterInner {
                boots: AtomicUsize::new(0),
                failures_remaining: AtomicUsize::new(0),
                gate,
                booted: Mutex::new(Vec::new()),
                scripts: Arc::new(ScriptBook::default()),
                fail_mounts: Arc::new(AtomicBool::new(false)),
            }),
        }
    }

    /// Register a script used by every sandbox this booter produces
    pub fn script(&self, key: &str, script: ProcessScript) {
        self.inner.scripts.add(key, script);
    }

    /// Make the next `count` boots fail
    pub fn fail_next_boots(&self, count: usize) {
        self.inner.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Make every mount (including snapshot remounts) fail
    pub fn fail_mounts(&self, fail: bool) {
        self.inner.fail_mounts.store(fail, Ordering::SeqCst);
    }

    /// Hold boots in flight until [`FakeBooter::open_boots`]
    pub fn hold_boots(&self) {
        self.inner.gate.send_replace(false);
    }

    pub fn open_boots(&self) {
        self.inner.gate.send_replace(true);
    }

    /// Number of `boot()` invocations so far
    pub fn boot_count(&self) -> usize {
        self.inner.boots.load(Ordering::SeqCst)
    }

    /// Every sandbox booted so far, oldest first
    pub fn sandboxes(&self) -> Vec<FakeSandbox> {
        lock(&self.inner.booted).clone()
    }

    pub fn last_sandbox(&self) -> Option<FakeSandbox> {
        lock(&self.inner.booted).last().cloned()
    }
}

impl SandboxBooter for FakeBooter {
    type Handle = FakeSandbox;

    async fn boot(&self) -> Result<FakeSandbox> {
        let id = self.inner.boots.fetch_add(1, Ordering::SeqCst) + 1;

        let mut gate = self.inner.gate.subscribe();
        if gate.wait_for(|open| *open).await.is_err() {
            return Err(Error::boot("boot gate closed"));
        }

        let fail = self
            .inner
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(Error::boot(format!("fake boot {} failed", id)));
        }

        let sandbox = FakeSandbox::with_scripts(
            id,
            Arc::clone(&self.inner.scripts),
            Arc::clone(&self.inner.fail_mounts),
        );
        lock(&self.inner.booted).push(sandbox.clone());
        Ok(sandbox)
    }
}
