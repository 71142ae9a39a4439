//! Application error types with rich context

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Application error types organized by layer/domain
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────
    // Sandbox Lifecycle Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Sandbox failed to boot: {message}")]
    BootFailure { message: String },

    #[error("Sandbox rejected the file tree: {message}")]
    MountFailure { message: String },

    #[error("Sandbox is not available: {message}")]
    SandboxUnavailable { message: String },

    // ─────────────────────────────────────────────────────────────
    // Process Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Command not found in sandbox: {command}")]
    ToolNotFound { command: String },

    #[error("Failed to spawn process: {reason}")]
    ProcessSpawn { reason: String },

    #[error("Dependency install failed with exit code {code:?}")]
    InstallFailure { code: Option<i32>, output: String },

    #[error("Dev server exited with code {code:?} before it was ready")]
    CrashBeforeReady { code: Option<i32>, output: String },

    #[error("Dev server exited unexpectedly with code {code:?}")]
    CrashAfterReady { code: Option<i32>, output: String },

    #[error("Dev server is stuck on an interactive prompt: {prompt}")]
    StuckPrompt { prompt: String },

    // ─────────────────────────────────────────────────────────────
    // Project Files Errors
    // ─────────────────────────────────────────────────────────────
    #[error("No project found in: {path}")]
    ProjectNotFound { path: PathBuf },

    #[error("Invalid project path: {path}")]
    InvalidPath { path: String },

    #[error("Project files error: {message}")]
    ProjectFiles { message: String },

    #[error("Network error: {message}")]
    Network { message: String },

    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ─────────────────────────────────────────────────────────────
    // Channel/Communication Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Channel closed unexpectedly")]
    ChannelClosed,
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn boot(message: impl Into<String>) -> Self {
        Self::BootFailure {
            message: message.into(),
        }
    }

    pub fn mount(message: impl Into<String>) -> Self {
        Self::MountFailure {
            message: message.into(),
        }
    }

    pub fn sandbox_unavailable(message: impl Into<String>) -> Self {
        Self::SandboxUnavailable {
            message: message.into(),
        }
    }

    pub fn process_spawn(reason: impl Into<String>) -> Self {
        Self::ProcessSpawn {
            reason: reason.into(),
        }
    }

    pub fn stuck_prompt(prompt: impl Into<String>) -> Self {
        Self::StuckPrompt {
            prompt: prompt.into(),
        }
    }

    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath { path: path.into() }
    }

    pub fn project_files(message: impl Into<String>) -> Self {
        Self::ProjectFiles {
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Text shown to the user in `ServerStatus::error_text`.
    ///
    /// Install and crash failures carry the captured process output, which is
    /// the only useful diagnostic; everything else falls back to `Display`.
    pub fn status_text(&self) -> String {
        match self {
            Error::InstallFailure { output, .. }
            | Error::CrashBeforeReady { output, .. }
            | Error::CrashAfterReady { output, .. }
                if !output.trim().is_empty() =>
            {
                output.clone()
            }
            other => other.to_string(),
        }
    }

    /// Check if this error should end the current attempt for good
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::BootFailure { .. }
                | Error::MountFailure { .. }
                | Error::InstallFailure { .. }
                | Error::ProjectNotFound { .. }
                | Error::ToolNotFound { .. }
        )
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions
// ─────────────────────────────────────────────────────────────────

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", f(), err);
            err
        })
    }
}
