//! Events emitted by the [`Engine`](crate::engine::Engine) for frontends
//!
//! The headless runner turns these into NDJSON lines; anything else driving
//! the engine (a UI, a test) reads the same stream.

use crate::preview::FrameSpec;
use crate::supervisor::SupervisorEvent;

/// Why the project files were mounted again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemountTrigger {
    /// The local watcher saw files change
    LocalChange,
    /// The remote project's event stream asked for a refresh
    RemoteRefresh,
    /// The user asked for a rebuild
    Rebuild,
}

impl RemountTrigger {
    pub fn label(&self) -> &'static str {
        match self {
            RemountTrigger::LocalChange => "local_change",
            RemountTrigger::RemoteRefresh => "remote_refresh",
            RemountTrigger::Rebuild => "rebuild",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Forwarded from the dev-server supervisor
    Supervisor(SupervisorEvent),

    /// The preview frame must be (re)created with this identity
    Frame(FrameSpec),

    /// Files were mounted into the sandbox again
    Remounted { trigger: RemountTrigger, files: usize },

    /// Files could not be reloaded or mounted; the running server is untouched
    RemountFailed {
        trigger: RemountTrigger,
        message: String,
    },
}
