//! Settings file loading and saving

use std::path::Path;

use forge_core::prelude::*;

use super::types::Settings;

/// Project-local configuration directory
pub const FORGE_DIR: &str = ".forge";

pub const CONFIG_FILENAME: &str = "config.toml";

/// Load settings from `.forge/config.toml`.
///
/// Returns defaults when the file is missing or unreadable.
pub fn load_settings(project_path: &Path) -> Settings {
    let config_path = project_path.join(FORGE_DIR).join(CONFIG_FILENAME);

    if !config_path.exists() {
        debug!("No config file at {:?}, using defaults", config_path);
        return Settings::default();
    }

    match std::fs::read_to_string(&config_path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(settings) => {
                debug!("Loaded settings from {:?}", config_path);
                settings
            }
            Err(e) => {
                warn!("Failed to parse {:?}: {}", config_path, e);
                Settings::default()
            }
        },
        Err(e) => {
            warn!("Failed to read {:?}: {}", config_path, e);
            Settings::default()
        }
    }
}

/// Write settings to `.forge/config.toml` atomically.
pub fn save_settings(project_path: &Path, settings: &Settings) -> Result<()> {
    let forge_dir = project_path.join(FORGE_DIR);

    if !forge_dir.exists() {
        std::fs::create_dir_all(&forge_dir)
            .map_err(|e| Error::config(format!("Failed to create .forge dir: {}", e)))?;
    }

    let config_path = forge_dir.join(CONFIG_FILENAME);
    let temp_path = forge_dir.join(".config.toml.tmp");

    let content = toml::to_string_pretty(settings)
        .map_err(|e| Error::config(format!("Failed to serialize settings: {}", e)))?;
    let full_content = format!("{}{}", CONFIG_HEADER, content);

    // Atomic write: write to temp, then rename
    std::fs::write(&temp_path, &full_content)
        .map_err(|e| Error::config(format!("Failed to write temp file: {}", e)))?;

    std::fs::rename(&temp_path, &config_path)
        .map_err(|e| Error::config(format!("Failed to rename temp file: {}", e)))?;

    info!("Saved settings to {:?}", config_path);
    Ok(())
}

const CONFIG_HEADER: &str = "# App Forge Configuration\n\n";

/// Create a commented default `.forge/config.toml` if none exists.
pub fn init_config_dir(project_path: &Path) -> Result<()> {
    let forge_dir = project_path.join(FORGE_DIR);

    if !forge_dir.exists() {
        std::fs::create_dir_all(&forge_dir)
            .map_err(|e| Error::config(format!("Failed to create .forge dir: {}", e)))?;
    }

    let config_path = forge_dir.join(CONFIG_FILENAME);
    if !config_path.exists() {
        let default_content = r#"# App Forge Configuration

[install]
command = "npm"
args = ["install", "--yes", "--legacy-peer-deps", "--no-audit", "--no-fund"]

[dev_server]
command = "npm"
args = ["run", "dev"]
recovery_command = "npx"          # used once if the server hangs on a prompt
recovery_args = ["--yes", "vite", "--force"]
prompt_timeout_ms = 5000
ready_fallback_ms = 20000         # assume default_port after this long
settle_delay_ms = 500
default_port = 5173
diagnostic_lines = 50

[preview]
theme = "dark"                    # "light" or "dark"

[remote]
api_base = "http://localhost:3000/api"
max_reconnect_attempts = 3
reconnect_base_ms = 1000

[watcher]
enabled = true
debounce_ms = 500
"#;
        std::fs::write(&config_path, default_content)
            .map_err(|e| Error::config(format!("Failed to write config.toml: {}", e)))?;
        info!("Created default config at {:?}", config_path);
    }

    Ok(())
}
