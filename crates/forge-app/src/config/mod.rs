//! Configuration file parsing for App Forge
//!
//! Supports:
//! - `.forge/config.toml` - Project settings

pub mod settings;
pub mod types;

pub use settings::{init_config_dir, load_settings, save_settings, CONFIG_FILENAME, FORGE_DIR};
pub use types::*;
