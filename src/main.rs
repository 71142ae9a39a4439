//! App Forge - live previews of generated React/Vite apps
//!
//! This is the binary entry point. All logic lives in the library.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::{eyre, Result};

use app_forge::RenderOptions;
use forge_app::config::{self, Settings};
use forge_app::Engine;
use forge_core::{logging, Theme};
use forge_sandbox::{FileSnapshotStore, HostSandboxBooter};

/// App Forge - install, run and preview a generated app
#[derive(Parser, Debug)]
#[command(name = "forge")]
#[command(about = "Install, run and preview a generated React/Vite app", long_about = None)]
struct Args {
    /// Path to the project (defaults to the current directory)
    #[arg(value_name = "PATH")]
    path: Option<PathBuf>,

    /// Fetch this project from the project-files API instead of PATH
    #[arg(long, value_name = "NAME")]
    remote: Option<String>,

    /// Base URL of the project-files API
    #[arg(long, value_name = "URL")]
    api: Option<String>,

    /// Server-sent events endpoint announcing remote edits
    #[arg(long, value_name = "URL")]
    events: Option<String>,

    /// Show this static build instead of running a dev server
    #[arg(long = "static", value_name = "URL")]
    static_url: Option<String>,

    /// Colour theme for rendered output (light or dark)
    #[arg(long)]
    theme: Option<Theme>,

    /// Attach HTML renderings to output and frame events
    #[arg(long)]
    html: bool,

    /// Do not watch the project directory for changes
    #[arg(long)]
    no_watch: bool,

    /// Write the effective settings to .forge/config.toml before starting
    #[arg(long)]
    save_config: bool,
}

impl Args {
    /// Command-line flags win over the config file.
    fn apply_overrides(&self, settings: &mut Settings) {
        if let Some(api) = &self.api {
            settings.remote.api_base = api.clone();
        }
        if let Some(events) = &self.events {
            settings.remote.events_url = Some(events.clone());
        }
        if let Some(url) = &self.static_url {
            settings.preview.static_url = Some(url.clone());
        }
        if let Some(theme) = self.theme {
            settings.preview.theme = theme;
        }
        if self.no_watch {
            settings.watcher.enabled = false;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    logging::init()?;

    let args = Args::parse();

    let project_path = match &args.path {
        Some(path) => path.clone(),
        None => std::env::current_dir()?,
    };

    let mut settings = config::load_settings(&project_path);
    args.apply_overrides(&mut settings);
    if args.save_config {
        config::save_settings(&project_path, &settings)?;
    }

    let options = RenderOptions {
        html: args.html,
        theme: settings.preview.theme,
    };
    let booter = HostSandboxBooter::new();

    let engine = match &args.remote {
        Some(name) => {
            let snapshot_dir = logging::state_directory().join(snapshot_dir_name(name));
            let snapshot = Arc::new(FileSnapshotStore::in_dir(&snapshot_dir));
            Engine::open_remote(booter, name.clone(), settings, snapshot)?
        }
        None => {
            if !project_path.is_dir() {
                return Err(eyre!("No project directory at {}", project_path.display()));
            }
            if let Err(e) = config::init_config_dir(&project_path) {
                tracing::warn!("Failed to initialize .forge directory: {}", e);
            }
            Engine::open_local(booter, project_path, settings)?
        }
    };

    app_forge::run_headless(engine, options).await?;
    Ok(())
}

/// Directory name for a remote project's snapshot
fn snapshot_dir_name(project: &str) -> String {
    project
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect()
}
