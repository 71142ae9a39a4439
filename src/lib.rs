//! App Forge Library
//!
//! Runs a generated React/Vite project in a sandbox and streams its preview
//! lifecycle as NDJSON.

pub mod headless;
pub mod signals;

// Re-export main entry points
pub use headless::runner::{run_event_loop, run_headless};
pub use headless::{HeadlessEvent, RenderOptions};
