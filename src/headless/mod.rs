//! Headless mode - NDJSON event output
//!
//! The `forge` binary has no UI of its own. It prints one JSON object per line
//! on stdout, so an embedding frontend (or a test script) can follow the
//! preview without parsing terminal output.
//!
//! # Event Format
//!
//! Each event has an "event" field naming its type, event-specific data and a
//! millisecond timestamp.
//!
//! ```json
//! {"event":"state_changed","from":"not_started","to":"installing","app_status":"generating","timestamp":1704700001000}
//! {"event":"output","text":"added 212 packages in 9s\n","timestamp":1704700010000}
//! {"event":"server_ready","url":"http://localhost:5173/","port":5173,"source":"detected","timestamp":1704700012000}
//! {"event":"preview_frame","key":"http://localhost:5173/#1","src":"http://localhost:5173/","timestamp":1704700012001}
//! ```

pub mod runner;

use std::io::{self, Write};

use chrono::Utc;
use serde::Serialize;
use tracing::error;

use forge_app::{EngineEvent, FailureReport, FrameSpec, SupervisorEvent};
use forge_core::{
    render_html, strip_control_sequences, AppStatus, DevServerState, ReadySource,
    ServerAddress, Theme,
};

/// Events emitted in headless mode
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HeadlessEvent {
    /// Dev-server state transition
    StateChanged {
        from: DevServerState,
        to: DevServerState,
        app_status: AppStatus,
        timestamp: i64,
    },

    /// Installer or dev-server output
    Output {
        /// Control sequences removed, colour codes kept
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        html: Option<String>,
        timestamp: i64,
    },

    /// The dev server can be previewed
    ServerReady {
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        port: Option<u16>,
        source: ReadySource,
        timestamp: i64,
    },

    /// The preview frame must be (re)created
    PreviewFrame {
        key: String,
        src: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        html: Option<String>,
        timestamp: i64,
    },

    /// Project files were mounted again
    Remounted {
        trigger: String,
        files: usize,
        timestamp: i64,
    },

    /// Something failed
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
        fatal: bool,
        timestamp: i64,
    },
}

/// How output and frames are rendered
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions {
    /// Attach HTML renderings to output and frame events
    pub html: bool,
    pub theme: Theme,
}

impl HeadlessEvent {
    /// Emit this event to stdout as one JSON line
    pub fn emit(&self) {
        let mut stdout = io::stdout().lock();
        if let Err(e) = self.write_line(&mut stdout) {
            error!("Failed to write headless event to stdout: {}", e);
        }
    }

    /// Write this event as one JSON line and flush.
    pub fn write_line<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let json = serde_json::to_string(self).map_err(io::Error::other)?;
        writeln!(out, "{}", json)?;
        out.flush()
    }

    /// Get current timestamp in milliseconds
    fn now() -> i64 {
        Utc::now().timestamp_millis()
    }

    /// Translate an engine event. Engine events without a headless
    /// counterpart (settle reloads, which surface as frames) give `None`.
    pub fn from_engine_event(event: &EngineEvent, options: RenderOptions) -> Option<Self> {
        match event {
            EngineEvent::Supervisor(event) => Self::from_supervisor_event(event, options),
            EngineEvent::Frame(frame) => Some(Self::preview_frame(frame, options)),
            EngineEvent::Remounted { trigger, files } => Some(Self::Remounted {
                trigger: trigger.label().to_string(),
                files: *files,
                timestamp: Self::now(),
            }),
            EngineEvent::RemountFailed { trigger, message } => Some(Self::error(
                format!("Reloading project files failed ({})", trigger.label()),
                Some(message.clone()),
                false,
            )),
        }
    }

    fn from_supervisor_event(event: &SupervisorEvent, options: RenderOptions) -> Option<Self> {
        match event {
            SupervisorEvent::StateChanged { from, to } => Some(Self::state_changed(*from, *to)),
            SupervisorEvent::Output(chunk) => Some(Self::output(chunk, options)),
            SupervisorEvent::Ready(address) => Some(Self::server_ready(address)),
            SupervisorEvent::Failed(report) => Some(Self::failure(report)),
            SupervisorEvent::RefreshPreview => None,
        }
    }

    // ─────────────────────────────────────────────────────────
    // Convenience constructors
    // ─────────────────────────────────────────────────────────

    pub fn state_changed(from: DevServerState, to: DevServerState) -> Self {
        Self::StateChanged {
            from,
            to,
            app_status: AppStatus::from(to),
            timestamp: Self::now(),
        }
    }

    pub fn output(chunk: &str, options: RenderOptions) -> Self {
        Self::Output {
            text: strip_control_sequences(chunk),
            html: options.html.then(|| render_html(chunk, options.theme)),
            timestamp: Self::now(),
        }
    }

    pub fn server_ready(address: &ServerAddress) -> Self {
        Self::ServerReady {
            url: address.url.clone(),
            port: address.port,
            source: address.source,
            timestamp: Self::now(),
        }
    }

    pub fn preview_frame(frame: &FrameSpec, options: RenderOptions) -> Self {
        Self::PreviewFrame {
            key: frame.key.clone(),
            src: frame.src.clone(),
            html: options.html.then(|| frame.to_html()),
            timestamp: Self::now(),
        }
    }

    pub fn failure(report: &FailureReport) -> Self {
        let detail = (!report.error_text.is_empty()).then(|| report.error_text.clone());
        Self::error(report.message.clone(), detail, report.to_error().is_fatal())
    }

    pub fn error(message: String, detail: Option<String>, fatal: bool) -> Self {
        Self::Error {
            message,
            detail,
            fatal,
            timestamp: Self::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_app::RemountTrigger;
    use forge_core::Error;

    fn to_value(event: &HeadlessEvent) -> serde_json::Value {
        let mut buf = Vec::new();
        event.write_line(&mut buf).expect("write failed");
        assert!(buf.ends_with(b"\n"));
        serde_json::from_slice(&buf).expect("invalid JSON")
    }

    #[test]
    fn test_state_changed_serialization() {
        let value = to_value(&HeadlessEvent::state_changed(
            DevServerState::NotStarted,
            DevServerState::Installing,
        ));

        assert_eq!(value["event"], "state_changed");
        assert_eq!(value["from"], "not_started");
        assert_eq!(value["to"], "installing");
        assert_eq!(value["app_status"], "generating");
        assert!(value["timestamp"].is_number());
    }

    #[test]
    fn test_output_strips_control_sequences() {
        let plain = to_value(&HeadlessEvent::output(
            "\x1b[?25l\x1b[32mready\x1b[39m\x1b[?25h",
            RenderOptions::default(),
        ));
        assert_eq!(plain["event"], "output");
        assert_eq!(plain["text"], "\x1b[32mready\x1b[39m");
        assert!(plain.get("html").is_none());

        let rendered = to_value(&HeadlessEvent::output(
            "<b>",
            RenderOptions {
                html: true,
                theme: Theme::Light,
            },
        ));
        assert!(rendered["html"].as_str().unwrap().contains("&lt;b&gt;"));
    }

    #[test]
    fn test_server_ready_serialization() {
        let value = to_value(&HeadlessEvent::server_ready(&ServerAddress {
            port: Some(5173),
            url: "https://fake-1--5173.sandbox.test/".to_string(),
            source: ReadySource::Fallback,
        }));

        assert_eq!(value["event"], "server_ready");
        assert_eq!(value["port"], 5173);
        assert_eq!(value["source"], "fallback");
    }

    #[test]
    fn test_engine_event_translation() {
        let options = RenderOptions::default();

        let frame = HeadlessEvent::from_engine_event(
            &EngineEvent::Frame(FrameSpec {
                key: "https://x.test/#2".to_string(),
                src: "https://x.test/".to_string(),
            }),
            options,
        )
        .unwrap();
        let value = to_value(&frame);
        assert_eq!(value["event"], "preview_frame");
        assert_eq!(value["key"], "https://x.test/#2");

        let remount = HeadlessEvent::from_engine_event(
            &EngineEvent::Remounted {
                trigger: RemountTrigger::LocalChange,
                files: 3,
            },
            options,
        )
        .unwrap();
        assert_eq!(to_value(&remount)["trigger"], "local_change");

        assert!(HeadlessEvent::from_engine_event(
            &EngineEvent::Supervisor(SupervisorEvent::RefreshPreview),
            options,
        )
        .is_none());
    }

    #[test]
    fn test_error_serialization() {
        let value = to_value(&HeadlessEvent::error(
            "Dependency install failed".to_string(),
            Some("npm ERR! code E404".to_string()),
            false,
        ));

        assert_eq!(value["event"], "error");
        assert_eq!(value["detail"], "npm ERR! code E404");
        assert_eq!(value["fatal"], false);
    }

    #[test]
    fn test_failure_marks_fatal_errors() {
        let install = FailureReport::from_error(&Error::InstallFailure {
            code: Some(1),
            output: "npm ERR! code ERESOLVE".to_string(),
        });
        let value = to_value(&HeadlessEvent::failure(&install));
        assert_eq!(value["detail"], "npm ERR! code ERESOLVE");
        assert_eq!(value["fatal"], true);

        let crash = FailureReport::from_error(&Error::CrashAfterReady {
            code: Some(1),
            output: "Segmentation fault".to_string(),
        });
        assert_eq!(to_value(&HeadlessEvent::failure(&crash))["fatal"], false);
    }
}
