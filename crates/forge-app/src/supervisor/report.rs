//! Failure reports published by the supervisor

use serde::Serialize;

use forge_core::Error;

/// Which part of the pipeline failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Boot,
    Mount,
    Install,
    Spawn,
    CrashBeforeReady,
    CrashAfterReady,
    StuckPrompt,
    Other,
}

/// A failure in a form that can be cloned into snapshots and events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureReport {
    pub kind: FailureKind,
    /// Exit code, for process failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
    /// One-line summary
    pub message: String,
    /// What the user should see: captured output where there is any
    pub error_text: String,
    /// Payload of the original error, for rebuilding it
    #[serde(skip)]
    detail: String,
}

impl FailureReport {
    pub fn from_error(error: &Error) -> Self {
        let (kind, code) = match error {
            Error::BootFailure { .. } | Error::SandboxUnavailable { .. } => (FailureKind::Boot, None),
            Error::MountFailure { .. } => (FailureKind::Mount, None),
            Error::InstallFailure { code, .. } => (FailureKind::Install, *code),
            Error::ToolNotFound { .. } | Error::ProcessSpawn { .. } => (FailureKind::Spawn, None),
            Error::CrashBeforeReady { code, .. } => (FailureKind::CrashBeforeReady, *code),
            Error::CrashAfterReady { code, .. } => (FailureKind::CrashAfterReady, *code),
            Error::StuckPrompt { .. } => (FailureKind::StuckPrompt, None),
            _ => (FailureKind::Other, None),
        };

        let detail = match error {
            Error::BootFailure { message }
            | Error::MountFailure { message }
            | Error::SandboxUnavailable { message } => message.clone(),
            Error::ProcessSpawn { reason } => reason.clone(),
            Error::StuckPrompt { prompt } => prompt.clone(),
            Error::InstallFailure { output, .. }
            | Error::CrashBeforeReady { output, .. }
            | Error::CrashAfterReady { output, .. } => output.clone(),
            other => other.to_string(),
        };

        Self {
            kind,
            code,
            message: error.to_string(),
            error_text: error.status_text(),
            detail,
        }
    }

    /// Rebuild an error for callers that want a `Result`.
    pub fn to_error(&self) -> Error {
        let output = self.detail.clone();
        match self.kind {
            FailureKind::Boot => Error::boot(output),
            FailureKind::Mount => Error::mount(output),
            FailureKind::Install => Error::InstallFailure {
                code: self.code,
                output,
            },
            FailureKind::Spawn => Error::process_spawn(output),
            FailureKind::CrashBeforeReady => Error::CrashBeforeReady {
                code: self.code,
                output,
            },
            FailureKind::CrashAfterReady => Error::CrashAfterReady {
                code: self.code,
                output,
            },
            FailureKind::StuckPrompt => Error::stuck_prompt(output),
            FailureKind::Other => Error::sandbox_unavailable(output),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_failure_report_carries_output() {
        let err = Error::InstallFailure {
            code: Some(1),
            output: "npm ERR! code ERESOLVE".to_string(),
        };
        let report = FailureReport::from_error(&err);

        assert_eq!(report.kind, FailureKind::Install);
        assert_eq!(report.code, Some(1));
        assert_eq!(report.error_text, "npm ERR! code ERESOLVE");
        assert!(matches!(
            report.to_error(),
            Error::InstallFailure { code: Some(1), .. }
        ));
    }

    #[test]
    fn test_tool_not_found_is_spawn_failure() {
        let report = FailureReport::from_error(&Error::ToolNotFound {
            command: "npm".to_string(),
        });
        assert_eq!(report.kind, FailureKind::Spawn);
        assert!(report.error_text.contains("npm"));
    }

    #[test]
    fn test_to_error_does_not_repeat_prefix() {
        let report = FailureReport::from_error(&Error::boot("no isolation"));
        assert_eq!(report.to_error().to_string(), "Sandbox failed to boot: no isolation");

        let report = FailureReport::from_error(&Error::stuck_prompt("Ok to proceed? (y)"));
        assert!(matches!(
            report.to_error(),
            Error::StuckPrompt { prompt } if prompt == "Ok to proceed? (y)"
        ));
    }
}
