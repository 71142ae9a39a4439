//! Domain event definitions

use serde::{Deserialize, Serialize};

/// Events produced by a process running inside the sandbox.
///
/// A process emits any number of `Output` chunks followed by exactly one
/// `Exited`. Chunks are raw: they may contain ANSI codes and partial lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// A chunk of combined stdout/stderr output
    Output(String),
    /// The process ended; `None` when killed by a signal
    Exited { code: Option<i32> },
}

impl ProcessEvent {
    pub fn is_exit(&self) -> bool {
        matches!(self, ProcessEvent::Exited { .. })
    }
}

/// Messages pushed by the project event stream (file-change notifications).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProjectStreamMessage {
    /// Stream established
    Connected,
    /// Project files changed; the preview should reload
    Refresh {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file: Option<String>,
    },
    /// Keep-alive
    Heartbeat,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_event_is_exit() {
        assert!(ProcessEvent::Exited { code: Some(0) }.is_exit());
        assert!(!ProcessEvent::Output("x".into()).is_exit());
    }

    #[test]
    fn test_stream_message_parsing() {
        let msg: ProjectStreamMessage = serde_json::from_str(r#"{"type":"connected"}"#).unwrap();
        assert_eq!(msg, ProjectStreamMessage::Connected);

        let msg: ProjectStreamMessage =
            serde_json::from_str(r#"{"type":"refresh","file":"src/App.tsx"}"#).unwrap();
        assert_eq!(
            msg,
            ProjectStreamMessage::Refresh {
                file: Some("src/App.tsx".to_string())
            }
        );

        let msg: ProjectStreamMessage = serde_json::from_str(r#"{"type":"refresh"}"#).unwrap();
        assert_eq!(msg, ProjectStreamMessage::Refresh { file: None });

        let msg: ProjectStreamMessage =
            serde_json::from_str(r#"{"type":"heartbeat"}"#).unwrap();
        assert_eq!(msg, ProjectStreamMessage::Heartbeat);
    }
}
