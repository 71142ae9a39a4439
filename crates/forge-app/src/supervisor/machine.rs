//! Dev-server lifecycle state machine
//!
//! Pure and synchronous: messages go in, actions come out, and the driver
//! carries the actions out against the sandbox. Every process and timer is
//! tagged with the generation that was current when it was started; a
//! message carrying any other generation is dropped before it can touch the
//! state.

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde::Serialize;

use forge_core::logging::{READY_FALLBACK_TARGET, READY_TARGET};
use forge_core::prelude::*;
use forge_core::{
    detect_prompt, detect_ready_signal, strip_ansi_codes, DevServerState, ReadySource,
    ServerAddress, ServerStatus,
};

use super::report::FailureReport;
use crate::config::DevServerSettings;
use crate::installer::InstallReport;
use crate::output_buffer::{status_for_chunk, OutputBuffer};

/// Monotonic run counter; bumped whenever the current process is replaced
pub type Generation = u64;

/// Maps a sandbox port to the URL the preview frame should load.
#[derive(Clone)]
pub struct PreviewUrls(Arc<dyn Fn(u16) -> String + Send + Sync>);

impl PreviewUrls {
    pub fn new(resolve: impl Fn(u16) -> String + Send + Sync + 'static) -> Self {
        Self(Arc::new(resolve))
    }

    pub fn url_for(&self, port: u16) -> String {
        (self.0)(port)
    }
}

impl fmt::Debug for PreviewUrls {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PreviewUrls(..)")
    }
}

/// Inputs to the state machine
#[derive(Debug)]
pub enum SupervisorMessage {
    // ─────────────────────────────────────────────────────────
    // Commands
    // ─────────────────────────────────────────────────────────
    /// Install, then start the dev server
    Start,
    /// Start the dev server again without reinstalling
    Restart,
    /// Go inert; output from running processes is ignored from here on
    Stop,
    /// A failure outside the supervisor, such as a rejected mount
    ReportFailure { error: Error },
    /// Acquiring the sandbox for an action failed
    SandboxFailed { generation: Generation, error: Error },

    // ─────────────────────────────────────────────────────────
    // Installer
    // ─────────────────────────────────────────────────────────
    InstallOutput { generation: Generation, chunk: String },
    InstallFinished {
        generation: Generation,
        result: Result<InstallReport>,
    },

    // ─────────────────────────────────────────────────────────
    // Dev server
    // ─────────────────────────────────────────────────────────
    DevServerSpawned {
        generation: Generation,
        urls: PreviewUrls,
    },
    DevServerSpawnFailed { generation: Generation, error: Error },
    DevServerOutput { generation: Generation, chunk: String },
    DevServerExited {
        generation: Generation,
        code: Option<i32>,
    },

    // ─────────────────────────────────────────────────────────
    // Timers
    // ─────────────────────────────────────────────────────────
    PromptTimerFired { generation: Generation, token: u64 },
    FallbackTimerFired { generation: Generation },
    SettleElapsed { generation: Generation },
}

impl SupervisorMessage {
    /// Generation the message belongs to; `None` for commands
    pub fn generation(&self) -> Option<Generation> {
        match self {
            SupervisorMessage::Start
            | SupervisorMessage::Restart
            | SupervisorMessage::Stop
            | SupervisorMessage::ReportFailure { .. } => None,
            SupervisorMessage::SandboxFailed { generation, .. }
            | SupervisorMessage::InstallOutput { generation, .. }
            | SupervisorMessage::InstallFinished { generation, .. }
            | SupervisorMessage::DevServerSpawned { generation, .. }
            | SupervisorMessage::DevServerSpawnFailed { generation, .. }
            | SupervisorMessage::DevServerOutput { generation, .. }
            | SupervisorMessage::DevServerExited { generation, .. }
            | SupervisorMessage::PromptTimerFired { generation, .. }
            | SupervisorMessage::FallbackTimerFired { generation }
            | SupervisorMessage::SettleElapsed { generation } => Some(*generation),
        }
    }
}

/// Side effects requested by the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorAction {
    RunInstall {
        generation: Generation,
    },
    SpawnDevServer {
        generation: Generation,
        command: String,
        args: Vec<String>,
    },
    /// Kill whatever process belongs to this generation
    KillProcess {
        generation: Generation,
    },
    StartPromptTimer {
        generation: Generation,
        token: u64,
        after: Duration,
    },
    StartFallbackTimer {
        generation: Generation,
        after: Duration,
    },
    ScheduleSettle {
        generation: Generation,
        after: Duration,
    },
    EmitOutput(String),
    EmitReady(ServerAddress),
    /// Force one more load of the preview frame
    RefreshPreview,
    EmitFailure(FailureReport),
}

/// Single-assignment slot for the run's server address.
///
/// Detection and the fallback timer both try to fill it; whichever comes
/// second gets `false` back and its address is dropped.
#[derive(Debug, Default)]
pub struct ReadySlot(OnceLock<ServerAddress>);

impl ReadySlot {
    pub fn fill(&self, address: ServerAddress) -> bool {
        self.0.set(address).is_ok()
    }

    pub fn get(&self) -> Option<&ServerAddress> {
        self.0.get()
    }
}

/// A prompt waiting to be answered by output that never comes
#[derive(Debug, Default)]
struct PromptWatch {
    /// Token of the armed timer; cleared when the process keeps talking
    pending: Option<u64>,
    next_token: u64,
    prompt: Option<String>,
    /// The single respawn has been used up
    escalated: bool,
}

impl PromptWatch {
    fn arm(&mut self, prompt: String) -> u64 {
        let token = self.next_token;
        self.next_token += 1;
        self.pending = Some(token);
        self.prompt = Some(prompt);
        token
    }

    fn disarm(&mut self) {
        self.pending = None;
    }
}

/// Published view of the supervisor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SupervisorSnapshot {
    pub state: DevServerState,
    pub generation: Generation,
    pub status: ServerStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<ServerAddress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReport>,
    /// The stuck-prompt respawn has happened in this run
    pub recovered_from_prompt: bool,
}

impl Default for SupervisorSnapshot {
    fn default() -> Self {
        Self {
            state: DevServerState::NotStarted,
            generation: 0,
            status: ServerStatus::plain("Not started"),
            address: None,
            failure: None,
            recovered_from_prompt: false,
        }
    }
}

pub struct DevServerMachine {
    settings: DevServerSettings,
    state: DevServerState,
    generation: Generation,
    status: ServerStatus,
    output: OutputBuffer,
    ready: ReadySlot,
    prompt: PromptWatch,
    urls: Option<PreviewUrls>,
    failure: Option<FailureReport>,
}

impl DevServerMachine {
    pub fn new(settings: DevServerSettings) -> Self {
        let output = OutputBuffer::new(settings.diagnostic_lines);
        Self {
            settings,
            state: DevServerState::NotStarted,
            generation: 0,
            status: ServerStatus::plain("Not started"),
            output,
            ready: ReadySlot::default(),
            prompt: PromptWatch::default(),
            urls: None,
            failure: None,
        }
    }

    pub fn state(&self) -> DevServerState {
        self.state
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn status(&self) -> &ServerStatus {
        &self.status
    }

    pub fn address(&self) -> Option<&ServerAddress> {
        self.ready.get()
    }

    pub fn snapshot(&self) -> SupervisorSnapshot {
        SupervisorSnapshot {
            state: self.state,
            generation: self.generation,
            status: self.status.clone(),
            address: self.ready.get().cloned(),
            failure: self.failure.clone(),
            recovered_from_prompt: self.prompt.escalated,
        }
    }

    /// Apply one message and return the actions it calls for.
    pub fn update(&mut self, msg: SupervisorMessage) -> Vec<SupervisorAction> {
        if let Some(generation) = msg.generation() {
            if generation != self.generation {
                trace!(
                    "Dropping message for stale generation {} (current {})",
                    generation,
                    self.generation
                );
                return Vec::new();
            }
        }

        match msg {
            SupervisorMessage::Start => self.handle_start(),
            SupervisorMessage::Restart => self.handle_restart(),
            SupervisorMessage::Stop => self.handle_stop(),
            SupervisorMessage::ReportFailure { error } => self.handle_report_failure(error),
            SupervisorMessage::SandboxFailed { error, .. } => self.handle_sandbox_failed(error),
            SupervisorMessage::InstallOutput { chunk, .. } => self.handle_install_output(chunk),
            SupervisorMessage::InstallFinished { result, .. } => {
                self.handle_install_finished(result)
            }
            SupervisorMessage::DevServerSpawned { urls, .. } => self.handle_spawned(urls),
            SupervisorMessage::DevServerSpawnFailed { error, .. } => {
                if self.state == DevServerState::Starting {
                    self.fail(DevServerState::Failed, &error)
                } else {
                    Vec::new()
                }
            }
            SupervisorMessage::DevServerOutput { chunk, .. } => self.handle_dev_output(chunk),
            SupervisorMessage::DevServerExited { code, .. } => self.handle_exit(code),
            SupervisorMessage::PromptTimerFired { token, .. } => self.handle_prompt_timer(token),
            SupervisorMessage::FallbackTimerFired { .. } => self.handle_fallback(),
            SupervisorMessage::SettleElapsed { .. } => {
                if self.state == DevServerState::Ready {
                    vec![SupervisorAction::RefreshPreview]
                } else {
                    Vec::new()
                }
            }
        }
    }

    // ─────────────────────────────────────────────────────────
    // Commands
    // ─────────────────────────────────────────────────────────

    /// Invalidate the current generation and reset per-run state.
    fn begin_run(&mut self, actions: &mut Vec<SupervisorAction>) {
        if self.state.is_active() {
            actions.push(SupervisorAction::KillProcess {
                generation: self.generation,
            });
        }
        self.generation += 1;
        self.output.clear();
        self.ready = ReadySlot::default();
        self.prompt = PromptWatch::default();
        self.urls = None;
        self.failure = None;
    }

    fn handle_start(&mut self) -> Vec<SupervisorAction> {
        let mut actions = Vec::new();
        self.begin_run(&mut actions);
        info!("Starting run {}: installing dependencies", self.generation);

        self.state = DevServerState::Installing;
        self.status = ServerStatus::plain("Installing dependencies...");
        actions.push(SupervisorAction::RunInstall {
            generation: self.generation,
        });
        actions
    }

    fn handle_restart(&mut self) -> Vec<SupervisorAction> {
        // Nothing installed yet, so there is nothing to reuse
        if matches!(
            self.state,
            DevServerState::NotStarted | DevServerState::InstallFailed
        ) {
            return self.handle_start();
        }

        let mut actions = Vec::new();
        self.begin_run(&mut actions);
        info!("Restarting dev server as run {}", self.generation);
        actions.push(self.spawn_primary());
        actions
    }

    fn handle_stop(&mut self) -> Vec<SupervisorAction> {
        if self.state == DevServerState::Stopped {
            return Vec::new();
        }

        let mut actions = Vec::new();
        if self.state.is_active() {
            actions.push(SupervisorAction::KillProcess {
                generation: self.generation,
            });
        }
        self.generation += 1;
        self.prompt.disarm();
        self.state = DevServerState::Stopped;
        self.status = ServerStatus::plain("Stopped");
        info!("Dev server supervisor stopped");
        actions
    }

    fn handle_report_failure(&mut self, error: Error) -> Vec<SupervisorAction> {
        if self.state == DevServerState::Stopped {
            return Vec::new();
        }

        let mut actions = Vec::new();
        if self.state.is_active() {
            actions.push(SupervisorAction::KillProcess {
                generation: self.generation,
            });
        }
        self.generation += 1;
        actions.extend(self.fail(DevServerState::Failed, &error));
        actions
    }

    fn handle_sandbox_failed(&mut self, error: Error) -> Vec<SupervisorAction> {
        if !self.state.is_active() {
            debug!("Ignoring sandbox failure in state {}: {}", self.state, error);
            return Vec::new();
        }
        self.fail(DevServerState::Failed, &error)
    }

    // ─────────────────────────────────────────────────────────
    // Installer
    // ─────────────────────────────────────────────────────────

    fn handle_install_output(&mut self, chunk: String) -> Vec<SupervisorAction> {
        if self.state != DevServerState::Installing {
            return Vec::new();
        }
        self.record_output(&chunk);
        vec![SupervisorAction::EmitOutput(chunk)]
    }

    fn handle_install_finished(&mut self, result: Result<InstallReport>) -> Vec<SupervisorAction> {
        if self.state != DevServerState::Installing {
            return Vec::new();
        }

        match result {
            Ok(report) => {
                info!(
                    "Dependencies installed in {:.1}s ({} output chunks)",
                    report.elapsed.as_secs_f64(),
                    report.chunks
                );
                vec![self.spawn_primary()]
            }
            Err(error) => {
                error!("Dependency install failed: {}", error);
                self.fail(DevServerState::InstallFailed, &error)
            }
        }
    }

    // ─────────────────────────────────────────────────────────
    // Dev server
    // ─────────────────────────────────────────────────────────

    fn spawn_primary(&mut self) -> SupervisorAction {
        let command = self.settings.command.clone();
        let args = self.settings.args.clone();
        self.spawn(command, args)
    }

    fn spawn(&mut self, command: String, args: Vec<String>) -> SupervisorAction {
        self.output.clear();
        self.state = DevServerState::Starting;
        self.status = ServerStatus::plain("Starting dev server...");
        debug!(
            "Spawning dev server for run {}: {} {}",
            self.generation,
            command,
            args.join(" ")
        );
        SupervisorAction::SpawnDevServer {
            generation: self.generation,
            command,
            args,
        }
    }

    fn handle_spawned(&mut self, urls: PreviewUrls) -> Vec<SupervisorAction> {
        if self.state != DevServerState::Starting {
            return Vec::new();
        }

        self.urls = Some(urls);
        self.state = DevServerState::AwaitingReady;
        self.status = ServerStatus::plain("Waiting for dev server...");
        vec![SupervisorAction::StartFallbackTimer {
            generation: self.generation,
            after: self.settings.ready_fallback(),
        }]
    }

    fn handle_dev_output(&mut self, chunk: String) -> Vec<SupervisorAction> {
        if !matches!(
            self.state,
            DevServerState::Starting | DevServerState::AwaitingReady | DevServerState::Ready
        ) {
            return Vec::new();
        }

        self.record_output(&chunk);
        let mut actions = vec![SupervisorAction::EmitOutput(chunk.clone())];

        if self.state == DevServerState::Ready {
            return actions;
        }

        if let Some(signal) = detect_ready_signal(&chunk) {
            let url = match (signal.port, &self.urls) {
                (Some(port), Some(urls)) => urls.url_for(port),
                _ => signal.url.clone(),
            };
            let address = ServerAddress {
                port: signal.port,
                url,
                source: ReadySource::Detected,
            };
            info!(
                target: READY_TARGET,
                "Dev server ready on port {:?} ({})",
                address.port,
                signal.url
            );
            actions.extend(self.become_ready(address));
            return actions;
        }

        if let Some(prompt) = detect_prompt(&chunk) {
            if self.prompt.pending.is_none() {
                let token = self.prompt.arm(prompt.clone());
                warn!("Dev server is waiting on a prompt: {}", prompt);
                actions.push(SupervisorAction::StartPromptTimer {
                    generation: self.generation,
                    token,
                    after: self.settings.prompt_timeout(),
                });
            }
        } else if !strip_ansi_codes(&chunk).trim().is_empty() {
            // The process moved past the prompt on its own
            self.prompt.disarm();
        }

        actions
    }

    fn handle_exit(&mut self, code: Option<i32>) -> Vec<SupervisorAction> {
        let output = self.output.tail();
        match self.state {
            DevServerState::Starting | DevServerState::AwaitingReady => {
                warn!("Dev server exited with {:?} before it was ready", code);
                self.fail(
                    DevServerState::Crashed,
                    &Error::CrashBeforeReady { code, output },
                )
            }
            DevServerState::Ready => {
                warn!("Dev server exited with {:?} after it was ready", code);
                self.fail(
                    DevServerState::Crashed,
                    &Error::CrashAfterReady { code, output },
                )
            }
            _ => Vec::new(),
        }
    }

    // ─────────────────────────────────────────────────────────
    // Timers
    // ─────────────────────────────────────────────────────────

    fn handle_prompt_timer(&mut self, token: u64) -> Vec<SupervisorAction> {
        if self.state != DevServerState::AwaitingReady || self.prompt.pending != Some(token) {
            return Vec::new();
        }

        let prompt = self.prompt.prompt.clone().unwrap_or_default();

        if self.prompt.escalated {
            error!("Dev server stuck on a prompt again after respawn: {}", prompt);
            let mut actions = vec![SupervisorAction::KillProcess {
                generation: self.generation,
            }];
            actions.extend(self.fail(DevServerState::Failed, &Error::stuck_prompt(prompt)));
            return actions;
        }

        warn!(
            "Prompt unanswered for {}ms, respawning with {}",
            self.settings.prompt_timeout_ms, self.settings.recovery_command
        );
        let mut actions = vec![SupervisorAction::KillProcess {
            generation: self.generation,
        }];
        self.generation += 1;
        self.prompt.disarm();
        self.prompt.escalated = true;
        self.urls = None;

        let command = self.settings.recovery_command.clone();
        let args = self.settings.recovery_args.clone();
        actions.push(self.spawn(command, args));
        actions
    }

    fn handle_fallback(&mut self) -> Vec<SupervisorAction> {
        if self.state != DevServerState::AwaitingReady {
            return Vec::new();
        }

        let port = self.settings.default_port;
        let url = match &self.urls {
            Some(urls) => urls.url_for(port),
            None => format!("http://localhost:{}/", port),
        };
        warn!(
            target: READY_FALLBACK_TARGET,
            "No ready signal after {}ms, assuming port {}",
            self.settings.ready_fallback_ms,
            port
        );
        self.become_ready(ServerAddress {
            port: Some(port),
            url,
            source: ReadySource::Fallback,
        })
    }

    // ─────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────

    fn become_ready(&mut self, address: ServerAddress) -> Vec<SupervisorAction> {
        if !self.ready.fill(address.clone()) {
            return Vec::new();
        }

        self.prompt.disarm();
        self.state = DevServerState::Ready;
        self.status = ServerStatus::plain(format!("Dev server ready at {}", address.url));
        vec![
            SupervisorAction::EmitReady(address),
            SupervisorAction::ScheduleSettle {
                generation: self.generation,
                after: self.settings.settle_delay(),
            },
        ]
    }

    fn record_output(&mut self, chunk: &str) {
        self.output.push(chunk);
        if let Some(status) = status_for_chunk(chunk) {
            self.status = status;
        }
    }

    fn fail(&mut self, state: DevServerState, error: &Error) -> Vec<SupervisorAction> {
        let report = FailureReport::from_error(error);
        self.prompt.disarm();
        self.state = state;
        self.status = ServerStatus::error(report.message.clone(), report.error_text.clone());
        self.failure = Some(report.clone());
        vec![SupervisorAction::EmitFailure(report)]
    }
}
