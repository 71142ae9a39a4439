//! forge-app - Orchestration for App Forge previews
//!
//! Configuration loading, the dependency installer, the dev-server supervisor,
//! the preview surface, the remote project-files and event-stream clients,
//! the local file watcher, and the Engine tying them together.

pub mod config;
pub mod engine;
pub mod engine_event;
pub mod event_stream;
pub mod installer;
pub mod output_buffer;
pub mod preview;
pub mod project_files;
pub mod supervisor;
pub mod watcher;

#[cfg(test)]
mod test_http;

// Re-export primary types
pub use engine::Engine;
pub use engine_event::{EngineEvent, RemountTrigger};
pub use installer::{run_install, InstallReport};
pub use preview::{FrameSpec, Overlay, PreviewAction, PreviewSurface, PreviewTarget};
pub use project_files::{build_remote_tree, HttpProjectFiles, ProjectFileSource};
pub use supervisor::{
    FailureKind, FailureReport, Supervisor, SupervisorEvent, SupervisorSnapshot,
};
pub use watcher::{ProjectWatcher, WatchEvent};
