//! Handles for processes running inside a sandbox

use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};

use forge_core::prelude::*;
use forge_core::ProcessEvent;

/// Capacity of a process's event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Asks a sandboxed process to die.
///
/// Cloneable; the first `kill()` wins and later calls are no-ops. When the last
/// clone is dropped without a kill, the backend treats that as a kill request
/// too, so a process can never outlive everyone holding a handle to it.
#[derive(Debug, Clone)]
pub struct ProcessKiller {
    kill_tx: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl ProcessKiller {
    pub fn new(kill_tx: oneshot::Sender<()>) -> Self {
        Self {
            kill_tx: Arc::new(Mutex::new(Some(kill_tx))),
        }
    }

    /// Request a kill. Returns `false` if one was already requested.
    pub fn kill(&self) -> bool {
        let sender = match self.kill_tx.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match sender {
            Some(tx) => {
                // The receiver is gone once the process has exited on its own.
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }
}

/// A spawned process: its event stream and a way to kill it.
///
/// The stream yields any number of [`ProcessEvent::Output`] chunks, then
/// exactly one [`ProcessEvent::Exited`], then closes.
#[derive(Debug)]
pub struct SpawnedProcess {
    events: mpsc::Receiver<ProcessEvent>,
    killer: ProcessKiller,
    pid: Option<u32>,
}

/// Backend side of a [`SpawnedProcess`]
///
/// Whatever runs the process pushes events through `events_tx` and watches
/// `kill_rx`, which resolves on a kill request or when every killer is dropped.
#[derive(Debug)]
pub struct ProcessController {
    pub events_tx: mpsc::Sender<ProcessEvent>,
    pub kill_rx: oneshot::Receiver<()>,
}

impl SpawnedProcess {
    /// Create a connected process handle and backend controller.
    pub fn channel(pid: Option<u32>) -> (Self, ProcessController) {
        let (events_tx, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (kill_tx, kill_rx) = oneshot::channel();
        let process = Self {
            events,
            killer: ProcessKiller::new(kill_tx),
            pid,
        };
        (process, ProcessController { events_tx, kill_rx })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn killer(&self) -> ProcessKiller {
        self.killer.clone()
    }

    /// Next event, or `None` once the stream is finished.
    pub async fn next_event(&mut self) -> Option<ProcessEvent> {
        self.events.recv().await
    }

    /// Split into the event receiver and the killer.
    pub fn into_parts(self) -> (mpsc::Receiver<ProcessEvent>, ProcessKiller) {
        (self.events, self.killer)
    }

    /// Drain the process to completion, feeding every chunk to `on_chunk`.
    ///
    /// Returns the exit code. A stream that closes without an exit event is
    /// reported as `None`, the same as a signal death.
    pub async fn wait_with<F>(mut self, mut on_chunk: F) -> Option<i32>
    where
        F: FnMut(&str),
    {
        while let Some(event) = self.events.recv().await {
            match event {
                ProcessEvent::Output(chunk) => on_chunk(&chunk),
                ProcessEvent::Exited { code } => return code,
            }
        }
        warn!("Process event stream closed without an exit event");
        None
    }
}
