//! # forge-sandbox - Sandbox Lifecycle
//!
//! Owns the sandbox a generated project runs in: the capability traits a
//! backend implements, the session that keeps exactly one sandbox alive and
//! remounts the last mounted files into a fresh one, and a backend that runs
//! sandbox processes on the host.
//!
//! Depends on [`forge_core`] for the file tree, process events and errors.
//!
//! ## Public API
//!
//! ### Capabilities
//! - [`Sandbox`] - Mount files, spawn processes, tear down, proxy ports
//! - [`SandboxBooter`] - Boot fresh sandbox instances
//! - [`SpawnedProcess`], [`ProcessKiller`] - Event stream and kill switch of a spawned process
//!
//! ### Session
//! - [`SandboxSession`] - One live sandbox: `acquire`, `mount`, `release`
//! - [`SnapshotStore`] - Where the last mounted tree is persisted
//!   ([`MemorySnapshotStore`], [`FileSnapshotStore`])
//!
//! ### Host Backend
//! - [`HostSandbox`], [`HostSandboxBooter`] - Child processes in a private temp directory

pub mod capability;
pub mod host;
pub mod process;
pub mod session;
pub mod snapshot;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;

// Public API re-exports
pub use capability::{LocalSandbox, Sandbox, SandboxBooter};
pub use host::{HostSandbox, HostSandboxBooter};
pub use process::{ProcessController, ProcessKiller, SpawnedProcess};
pub use session::SandboxSession;
pub use snapshot::{FileSnapshotStore, MemorySnapshotStore, SnapshotStore, SNAPSHOT_FILENAME};
