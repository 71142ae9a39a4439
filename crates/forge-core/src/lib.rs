//! # forge-core - Core Domain Types
//!
//! Foundation crate for App Forge. Provides the project file tree, error
//! handling, dev-server lifecycle types, output pattern detection and ANSI
//! handling for output panels.
//!
//! This crate has **zero internal dependencies** -- it only depends on external
//! crates (serde, thiserror, regex, tracing).
//!
//! ## Public API
//!
//! ### File Trees (`file_tree`)
//! - [`FileTree`] - Directory children keyed by name, in the sandbox mount shape
//! - [`FileSystemEntry`] - A file with contents, or a nested directory
//! - [`build_file_tree()`] - Walk a project directory into a [`FileTree`]
//!
//! ### Domain Types (`types`)
//! - [`DevServerState`] - Dev-server lifecycle (Installing, AwaitingReady, Ready, ...)
//! - [`ServerStatus`] - Latest status line shown to the user
//! - [`ServerAddress`], [`ReadySource`] - Where the dev server is reachable and how we know
//! - [`Theme`] - Colour theme for rendered output
//!
//! ### Events (`events`)
//! - [`ProcessEvent`] - Output chunks and the exit of a sandboxed process
//! - [`ProjectStreamMessage`] - Messages on the project change stream
//!
//! ### Output Handling (`ansi`, `ansi_html`, `server_output`)
//! - [`strip_ansi_codes()`], [`strip_control_sequences()`] - Escape removal
//! - [`render_html()`], [`RenderedOutput`] - Colour-preserving HTML for output panels
//! - [`detect_ready_signal()`], [`detect_prompt()`] - Dev-server output inspection
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Custom error enum with `fatal` classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ## Prelude
//!
//! Import commonly used types with:
//! ```rust
//! use forge_core::prelude::*;
//! ```

pub mod ansi;
pub mod ansi_html;
pub mod error;
pub mod events;
pub mod file_tree;
pub mod logging;
pub mod server_output;
pub mod types;

/// Prelude for common imports used throughout all App Forge crates
pub mod prelude {
    pub use super::error::{Error, Result, ResultExt};
    pub use tracing::{debug, error, info, instrument, trace, warn};
}

// Re-export commonly used types at crate root for convenience
pub use ansi::{after_line_reset, contains_ansi_codes, strip_ansi_codes, strip_control_sequences};
pub use ansi_html::{escape_html, render_html, RenderedOutput};
pub use error::{Error, Result, ResultExt};
pub use events::{ProcessEvent, ProjectStreamMessage};
pub use file_tree::{build_file_tree, FileSystemEntry, FileTree};
pub use server_output::{detect_prompt, detect_ready_signal, ReadySignal};
pub use types::{
    AppStatus, DevServerState, ReadySource, ServerAddress, ServerStatus, Theme,
};
