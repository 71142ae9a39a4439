//! Headless mode runner - drives one Engine and prints its events
//!
//! Preview actions arrive as lines on stdin (`r`/`refresh`, `b`/`rebuild`,
//! `s`/`restart`, `q`/`quit`). SIGINT and SIGTERM shut the engine down and
//! release the sandbox before exiting.

use std::io::Write;

use tokio::sync::mpsc;

use forge_app::{Engine, PreviewAction};
use forge_core::prelude::*;
use forge_sandbox::SandboxBooter;

use super::{HeadlessEvent, RenderOptions};
use crate::signals;

/// Inputs to the headless loop besides engine events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadlessCommand {
    Action(PreviewAction),
    Quit,
}

/// Parse one stdin line. Empty lines give `None`.
pub fn parse_command(line: &str) -> Option<std::result::Result<HeadlessCommand, String>> {
    let trimmed = line.trim();
    match trimmed {
        "" => None,
        "q" | "quit" => Some(Ok(HeadlessCommand::Quit)),
        other => Some(other.parse().map(HeadlessCommand::Action)),
    }
}

/// Run the engine until it stops or a quit arrives, printing NDJSON to stdout.
pub async fn run_headless<B: SandboxBooter>(engine: Engine<B>, options: RenderOptions) -> Result<()> {
    let (command_tx, command_rx) = mpsc::channel(16);

    signals::spawn_signal_handler(command_tx.clone());
    std::thread::spawn(move || {
        spawn_stdin_reader_blocking(command_tx);
    });

    let mut stdout = std::io::stdout();
    run_event_loop(engine, options, command_rx, &mut stdout).await
}

/// The headless loop proper, writing events to `out`.
pub async fn run_event_loop<B, W>(
    mut engine: Engine<B>,
    options: RenderOptions,
    mut command_rx: mpsc::Receiver<HeadlessCommand>,
    out: &mut W,
) -> Result<()>
where
    B: SandboxBooter,
    W: Write,
{
    info!("═══════════════════════════════════════════════════════");
    info!("App Forge starting in HEADLESS mode");
    info!("Project: {}", engine.project_name());
    info!("═══════════════════════════════════════════════════════");

    if let Err(e) = engine.start().await {
        HeadlessEvent::error(e.to_string(), None, true).write_line(out)?;
        engine.shutdown().await;
        return Err(e);
    }

    loop {
        tokio::select! {
            event = engine.next_event() => match event {
                Some(event) => {
                    if let Some(headless) = HeadlessEvent::from_engine_event(&event, options) {
                        headless.write_line(out)?;
                    }
                }
                None => {
                    info!("Engine event stream closed");
                    break;
                }
            },
            command = command_rx.recv() => match command {
                Some(HeadlessCommand::Action(action)) => {
                    if let Err(e) = engine.dispatch(action).await {
                        warn!("Preview action {:?} failed: {}", action, e);
                        HeadlessEvent::error(e.to_string(), None, e.is_fatal()).write_line(out)?;
                    }
                }
                Some(HeadlessCommand::Quit) | None => {
                    info!("Quit requested");
                    break;
                }
            },
        }
    }

    engine.shutdown().await;
    info!("App Forge headless mode exiting");
    Ok(())
}

/// Read preview actions from stdin (blocking; runs on its own thread)
fn spawn_stdin_reader_blocking(command_tx: mpsc::Sender<HeadlessCommand>) {
    use std::io::BufRead;

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to read stdin: {}", e);
                break;
            }
        };

        match parse_command(&line) {
            Some(Ok(command)) => {
                info!("Stdin: {:?}", command);
                if command_tx.blocking_send(command).is_err() || command == HeadlessCommand::Quit {
                    break;
                }
            }
            Some(Err(e)) => warn!("Unknown stdin command: {}", e),
            None => {}
        }
    }

    info!("Stdin reader exiting");
}
