//! Logging configuration using tracing

use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::Result;

/// Target used when the dev-server URL is a guess rather than a detection.
pub const READY_FALLBACK_TARGET: &str = "forge::ready_fallback";

/// Target used when the dev-server URL was read from its output.
pub const READY_TARGET: &str = "forge::ready";

/// Initialize the logging subsystem
///
/// Logs are written to `~/.local/share/app-forge/logs/`. Stdout is reserved
/// for the headless event stream, so nothing is logged there.
/// Log level is controlled by the `FORGE_LOG` environment variable.
///
/// # Examples
/// ```bash
/// FORGE_LOG=debug forge ./my-app
/// FORGE_LOG=forge::ready_fallback=warn,forge_app=trace forge ./my-app
/// ```
pub fn init() -> Result<()> {
    let log_dir = get_log_directory()?;
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, "forge.log");

    let env_filter = EnvFilter::try_from_env("FORGE_LOG").unwrap_or_else(|_| {
        EnvFilter::new("app_forge=info,forge_app=info,forge_sandbox=info,forge=info,warn")
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(true)
                .with_line_number(true)
                .with_timer(fmt::time::ChronoLocal::new(
                    "%Y-%m-%d %H:%M:%S%.3f".to_string(),
                )),
        )
        .init();

    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("App Forge starting");
    tracing::info!("Log directory: {}", log_dir.display());
    tracing::info!("═══════════════════════════════════════════════════════");

    Ok(())
}

/// Get the log directory path
fn get_log_directory() -> Result<PathBuf> {
    let base = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    Ok(base.join("app-forge").join("logs"))
}

/// Directory for state that must outlive a single run (mounted snapshots).
pub fn state_directory() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("app-forge")
        .join("state")
}
