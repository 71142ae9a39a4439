//! Sandbox capability traits
//!
//! A sandbox is an opaque, process-capable environment: it accepts a file
//! tree, spawns commands against it and proxies the ports those commands
//! listen on. Nothing in the orchestration layers knows how a backend does
//! this; they only see these traits.

use std::future::Future;

use forge_core::prelude::*;
use forge_core::FileTree;

use crate::process::SpawnedProcess;

/// A booted sandbox instance
#[trait_variant::make(Sandbox: Send)]
pub trait LocalSandbox {
    /// Write a file tree into the sandbox filesystem.
    ///
    /// Existing files at the same paths are overwritten. Files that are not
    /// part of `tree` are left alone, so installed packages survive a remount.
    async fn mount(&self, tree: &FileTree) -> Result<()>;

    /// Spawn `command args...` in the project root.
    ///
    /// Output and exit are delivered on the returned process's event channel.
    async fn spawn(&self, command: &str, args: &[String]) -> Result<SpawnedProcess>;

    /// Kill everything running in the sandbox and release its resources.
    async fn teardown(&self) -> Result<()>;

    /// URL under which a server listening on `port` inside the sandbox is reachable.
    fn preview_url(&self, port: u16) -> String;
}

/// Boots sandbox instances
///
/// Each call to [`SandboxBooter::boot`] produces a fresh sandbox. Callers that
/// need at most one live instance go through
/// [`SandboxSession`](crate::SandboxSession).
pub trait SandboxBooter: Send + Sync + 'static {
    type Handle: Sandbox + Sync + 'static;

    fn boot(&self) -> impl Future<Output = Result<Self::Handle>> + Send;
}
