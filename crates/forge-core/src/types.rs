//! Shared domain types: dev-server lifecycle, status projection, themes.

use serde::{Deserialize, Serialize};

/// Lifecycle of one project's dev server.
///
/// Owned by the supervisor; everything else only observes transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DevServerState {
    /// No start has been requested yet
    #[default]
    NotStarted,
    /// Package install running inside the sandbox
    Installing,
    /// Install exited non-zero; needs template/dependency changes
    InstallFailed,
    /// Install succeeded, dev-server process being spawned
    Starting,
    /// Dev server spawned, waiting for a ready signal
    AwaitingReady,
    /// Server URL captured (detected or fallback)
    Ready,
    /// Dev server exited (before or after becoming ready)
    Crashed,
    /// Boot, mount or spawn failed, or prompt recovery gave up
    Failed,
    /// Torn down by the user or by navigation; output is ignored
    Stopped,
}

impl DevServerState {
    /// States in which a dev-server or install process may still be producing output.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            DevServerState::Installing
                | DevServerState::Starting
                | DevServerState::AwaitingReady
                | DevServerState::Ready
        )
    }

    /// States the user has to act on (restart, rebuild, fix the template).
    pub fn needs_user_action(&self) -> bool {
        matches!(
            self,
            DevServerState::InstallFailed | DevServerState::Crashed | DevServerState::Failed
        )
    }

    /// Whether a preview can be shown at all.
    pub fn is_ready(&self) -> bool {
        *self == DevServerState::Ready
    }
}

impl std::fmt::Display for DevServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DevServerState::NotStarted => "not started",
            DevServerState::Installing => "installing",
            DevServerState::InstallFailed => "install failed",
            DevServerState::Starting => "starting",
            DevServerState::AwaitingReady => "awaiting ready",
            DevServerState::Ready => "ready",
            DevServerState::Crashed => "crashed",
            DevServerState::Failed => "failed",
            DevServerState::Stopped => "stopped",
        };
        write!(f, "{}", label)
    }
}

/// UI-facing projection of the supervisor's latest state.
///
/// Overwritten on every output chunk; history lives in the supervisor's
/// diagnostic buffer, not here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,
    /// `message` still carries colour codes and should be rendered as HTML
    pub is_rich_text: bool,
}

impl ServerStatus {
    pub fn plain(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_text: None,
            is_rich_text: false,
        }
    }

    pub fn rich(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_text: None,
            is_rich_text: true,
        }
    }

    pub fn error(message: impl Into<String>, error_text: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_text: Some(error_text.into()),
            is_rich_text: false,
        }
    }

    pub fn has_error(&self) -> bool {
        self.error_text.is_some()
    }
}

/// How the dev-server URL was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadySource {
    /// Read from the server's own output
    Detected,
    /// Synthesized from the default port after the fallback timer fired
    Fallback,
}

/// The dev server's address once it is ready
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerAddress {
    /// Port inside the sandbox, if one was found
    pub port: Option<u16>,
    /// URL the preview frame should load (sandbox-proxied)
    pub url: String,
    pub source: ReadySource,
}

/// Colour theme for rendered output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    #[default]
    Dark,
}

impl std::str::FromStr for Theme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "light" => Ok(Theme::Light),
            "dark" => Ok(Theme::Dark),
            other => Err(format!("unknown theme '{}'", other)),
        }
    }
}

/// Status written to the generated-app persistence API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppStatus {
    Pending,
    Generating,
    Ready,
    Error,
}

impl From<DevServerState> for AppStatus {
    fn from(state: DevServerState) -> Self {
        match state {
            DevServerState::NotStarted | DevServerState::Stopped => AppStatus::Pending,
            DevServerState::Installing
            | DevServerState::Starting
            | DevServerState::AwaitingReady => AppStatus::Generating,
            DevServerState::Ready => AppStatus::Ready,
            DevServerState::InstallFailed | DevServerState::Crashed | DevServerState::Failed => {
                AppStatus::Error
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_classification() {
        assert!(DevServerState::AwaitingReady.is_active());
        assert!(DevServerState::Ready.is_active());
        assert!(!DevServerState::Stopped.is_active());
        assert!(DevServerState::Crashed.needs_user_action());
        assert!(!DevServerState::Ready.needs_user_action());
        assert!(DevServerState::Ready.is_ready());
    }

    #[test]
    fn test_state_serializes_snake_case() {
        let json = serde_json::to_string(&DevServerState::AwaitingReady).unwrap();
        assert_eq!(json, "\"awaiting_ready\"");
    }

    #[test]
    fn test_server_status_serialization() {
        let status = ServerStatus::error("Install failed", "npm ERR! 404");
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["errorText"], "npm ERR! 404");
        assert_eq!(json["isRichText"], false);

        let json = serde_json::to_value(ServerStatus::plain("Booting")).unwrap();
        assert!(json.get("errorText").is_none());
    }

    #[test]
    fn test_theme_parse() {
        assert_eq!("Light".parse::<Theme>(), Ok(Theme::Light));
        assert_eq!("dark".parse::<Theme>(), Ok(Theme::Dark));
        assert!("solarized".parse::<Theme>().is_err());
    }

    #[test]
    fn test_app_status_from_state() {
        assert_eq!(AppStatus::from(DevServerState::Installing), AppStatus::Generating);
        assert_eq!(AppStatus::from(DevServerState::Ready), AppStatus::Ready);
        assert_eq!(AppStatus::from(DevServerState::InstallFailed), AppStatus::Error);
        assert_eq!(AppStatus::from(DevServerState::NotStarted), AppStatus::Pending);
    }
}
