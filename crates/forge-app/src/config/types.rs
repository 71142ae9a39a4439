//! Configuration types for App Forge
//!
//! Defines:
//! - `Settings` - Project settings (`.forge/config.toml`)
//! - Per-concern sections: install, dev server, preview, remote, watcher

use serde::{Deserialize, Serialize};
use std::time::Duration;

use forge_core::Theme;

/// Project settings (.forge/config.toml)
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub install: InstallSettings,

    #[serde(default)]
    pub dev_server: DevServerSettings,

    #[serde(default)]
    pub preview: PreviewSettings,

    #[serde(default)]
    pub remote: RemoteSettings,

    #[serde(default)]
    pub watcher: WatcherSettings,
}

/// Dependency install command
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct InstallSettings {
    #[serde(default = "default_install_command")]
    pub command: String,

    /// Must never let the installer stop on a question
    #[serde(default = "default_install_args")]
    pub args: Vec<String>,
}

impl Default for InstallSettings {
    fn default() -> Self {
        Self {
            command: default_install_command(),
            args: default_install_args(),
        }
    }
}

fn default_install_command() -> String {
    "npm".to_string()
}

fn default_install_args() -> Vec<String> {
    ["install", "--yes", "--legacy-peer-deps", "--no-audit", "--no-fund"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Dev server command, recovery and timers
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DevServerSettings {
    #[serde(default = "default_dev_command")]
    pub command: String,

    #[serde(default = "default_dev_args")]
    pub args: Vec<String>,

    /// Respawned with this after the first process got stuck on a prompt
    #[serde(default = "default_recovery_command")]
    pub recovery_command: String,

    #[serde(default = "default_recovery_args")]
    pub recovery_args: Vec<String>,

    /// How long a prompt may sit unanswered before the process is replaced
    #[serde(default = "default_prompt_timeout_ms")]
    pub prompt_timeout_ms: u64,

    /// How long to wait for a ready signal before guessing the URL
    #[serde(default = "default_ready_fallback_ms")]
    pub ready_fallback_ms: u64,

    /// Delay before the preview frame is reloaded once more after ready
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Port assumed by the fallback
    #[serde(default = "default_port")]
    pub default_port: u16,

    /// Output lines kept for error reports
    #[serde(default = "default_diagnostic_lines")]
    pub diagnostic_lines: usize,
}

impl Default for DevServerSettings {
    fn default() -> Self {
        Self {
            command: default_dev_command(),
            args: default_dev_args(),
            recovery_command: default_recovery_command(),
            recovery_args: default_recovery_args(),
            prompt_timeout_ms: default_prompt_timeout_ms(),
            ready_fallback_ms: default_ready_fallback_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            default_port: default_port(),
            diagnostic_lines: default_diagnostic_lines(),
        }
    }
}

impl DevServerSettings {
    pub fn prompt_timeout(&self) -> Duration {
        Duration::from_millis(self.prompt_timeout_ms)
    }

    pub fn ready_fallback(&self) -> Duration {
        Duration::from_millis(self.ready_fallback_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

fn default_dev_command() -> String {
    "npm".to_string()
}

fn default_dev_args() -> Vec<String> {
    vec!["run".to_string(), "dev".to_string()]
}

fn default_recovery_command() -> String {
    "npx".to_string()
}

fn default_recovery_args() -> Vec<String> {
    vec!["--yes".to_string(), "vite".to_string(), "--force".to_string()]
}

fn default_prompt_timeout_ms() -> u64 {
    5_000
}

fn default_ready_fallback_ms() -> u64 {
    20_000
}

fn default_settle_delay_ms() -> u64 {
    500
}

fn default_port() -> u16 {
    5173
}

fn default_diagnostic_lines() -> usize {
    50
}

/// Preview rendering
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct PreviewSettings {
    #[serde(default)]
    pub theme: Theme,

    /// Static build to show instead of a live dev server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_url: Option<String>,
}

/// Remote project files and change stream
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RemoteSettings {
    /// Base URL of the project-files API
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Server-sent events endpoint; no stream when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events_url: Option<String>,

    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            events_url: None,
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_base_ms: default_reconnect_base_ms(),
        }
    }
}

fn default_api_base() -> String {
    "http://localhost:3000/api".to_string()
}

fn default_max_reconnect_attempts() -> u32 {
    3
}

fn default_reconnect_base_ms() -> u64 {
    1_000
}

/// Local file watcher
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct WatcherSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Debounce duration in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: default_debounce_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_debounce_ms() -> u64 {
    500
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(
            settings.install.args,
            vec!["install", "--yes", "--legacy-peer-deps", "--no-audit", "--no-fund"]
        );
        assert_eq!(settings.dev_server.command, "npm");
        assert_eq!(settings.dev_server.args, vec!["run", "dev"]);
        assert_eq!(settings.dev_server.recovery_args, vec!["--yes", "vite", "--force"]);
        assert_eq!(settings.dev_server.ready_fallback(), Duration::from_secs(20));
        assert_eq!(settings.dev_server.default_port, 5173);
        assert_eq!(settings.remote.max_reconnect_attempts, 3);
        assert_eq!(settings.preview.theme, Theme::Dark);
        assert!(settings.watcher.enabled);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let settings: Settings = toml::from_str(
            r#"
[dev_server]
default_port = 3000
"#,
        )
        .unwrap();
        assert_eq!(settings.dev_server.default_port, 3000);
        assert_eq!(settings.dev_server.prompt_timeout_ms, 5000);
        assert_eq!(settings.install, InstallSettings::default());
    }
}
