//! Sandbox session: at most one live sandbox, booted once, remounted on boot.
//!
//! The session is created once by whoever owns the application context and
//! shared by `Arc`. All access to the sandbox goes through
//! [`SandboxSession::acquire`], [`SandboxSession::mount`] and
//! [`SandboxSession::release`].
//!
//! ```text
//!   Empty ──acquire──▶ Booting(id, shared boot) ──ok──▶ Ready(handle)
//!     ▲                      │ err                          │
//!     └──────────────────────┴──────────── release ─────────┘
//! ```
//!
//! Every concurrent `acquire` during a boot awaits the same shared boot future,
//! so `boot()` runs exactly once per transition out of `Empty`.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::future::{BoxFuture, FutureExt, Shared};

use forge_core::prelude::*;
use forge_core::FileTree;

use crate::capability::{Sandbox, SandboxBooter};
use crate::snapshot::{MemorySnapshotStore, SnapshotStore};

/// Why a shared boot failed. `Error` is not `Clone`, so waiters get this.
#[derive(Debug, Clone)]
enum BootFailure {
    Boot(String),
    Remount(String),
}

impl From<BootFailure> for Error {
    fn from(failure: BootFailure) -> Self {
        match failure {
            BootFailure::Boot(message) => Error::boot(message),
            BootFailure::Remount(message) => Error::mount(message),
        }
    }
}

type SharedBoot<H> = Shared<BoxFuture<'static, std::result::Result<Arc<H>, BootFailure>>>;

/// One in-flight boot, as seen by each of its waiters.
struct PendingBoot<H> {
    id: u64,
    boot: SharedBoot<H>,
    /// Set by the one waiter that tears down a boot released mid-flight
    orphan_claimed: Arc<AtomicBool>,
}

impl<H> Clone for PendingBoot<H> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            boot: self.boot.clone(),
            orphan_claimed: Arc::clone(&self.orphan_claimed),
        }
    }
}

enum Slot<H> {
    Empty,
    Booting(PendingBoot<H>),
    Ready(Arc<H>),
}

/// What an `acquire` that awaited a boot should do with the outcome.
enum Settle<H> {
    Use(Arc<H>),
    Discard(Arc<H>),
    /// Released mid-flight and another waiter is tearing it down
    Orphaned,
    Failed(BootFailure),
}

/// Owner of the single sandbox instance and its mounted snapshot.
pub struct SandboxSession<B: SandboxBooter> {
    booter: Arc<B>,
    snapshot: Arc<dyn SnapshotStore>,
    slot: Mutex<Slot<B::Handle>>,
    next_boot_id: AtomicU64,
    boots_started: AtomicUsize,
}

impl<B: SandboxBooter> SandboxSession<B> {
    /// Session persisting its snapshot in `snapshot`.
    pub fn new(booter: B, snapshot: Arc<dyn SnapshotStore>) -> Self {
        Self {
            booter: Arc::new(booter),
            snapshot,
            slot: Mutex::new(Slot::Empty),
            next_boot_id: AtomicU64::new(1),
            boots_started: AtomicUsize::new(0),
        }
    }

    /// Session with an in-process snapshot store.
    pub fn with_memory_snapshot(booter: B) -> Self {
        Self::new(booter, Arc::new(MemorySnapshotStore::new()))
    }

    fn lock_slot(&self) -> MutexGuard<'_, Slot<B::Handle>> {
        match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// The live sandbox, booting one if needed.
    ///
    /// Returns immediately when a sandbox is live. While a boot is in flight,
    /// every caller shares it. A failed boot leaves the session empty, so the
    /// next call makes exactly one new attempt.
    pub async fn acquire(&self) -> Result<Arc<B::Handle>> {
        let pending = {
            let mut slot = self.lock_slot();
            let in_flight = match &*slot {
                Slot::Ready(handle) => return Ok(Arc::clone(handle)),
                Slot::Booting(pending) => Some(pending.clone()),
                Slot::Empty => None,
            };
            match in_flight {
                Some(pending) => pending,
                None => {
                    let pending = PendingBoot {
                        id: self.next_boot_id.fetch_add(1, Ordering::Relaxed),
                        boot: self.start_boot(),
                        orphan_claimed: Arc::new(AtomicBool::new(false)),
                    };
                    *slot = Slot::Booting(pending.clone());
                    pending
                }
            }
        };

        let outcome = pending.boot.clone().await;

        let settle = {
            let mut slot = self.lock_slot();
            let is_current =
                matches!(&*slot, Slot::Booting(current) if current.id == pending.id);
            match outcome {
                Ok(handle) if is_current => {
                    *slot = Slot::Ready(Arc::clone(&handle));
                    Settle::Use(handle)
                }
                Ok(handle) => {
                    // Another waiter of the same boot may have published it already.
                    if matches!(&*slot, Slot::Ready(existing) if Arc::ptr_eq(existing, &handle)) {
                        Settle::Use(handle)
                    } else if !pending.orphan_claimed.swap(true, Ordering::AcqRel) {
                        Settle::Discard(handle)
                    } else {
                        Settle::Orphaned
                    }
                }
                Err(failure) => {
                    if is_current {
                        *slot = Slot::Empty;
                    }
                    Settle::Failed(failure)
                }
            }
        };

        match settle {
            Settle::Use(handle) => Ok(handle),
            Settle::Discard(handle) => {
                // Released while booting; nobody else will ever see this handle.
                if let Err(e) = handle.teardown().await {
                    warn!("Teardown of orphaned sandbox failed: {}", e);
                }
                Err(Error::sandbox_unavailable(
                    "sandbox was released while booting",
                ))
            }
            Settle::Orphaned => Err(Error::sandbox_unavailable(
                "sandbox was released while booting",
            )),
            Settle::Failed(failure) => {
                let err: Error = failure.into();
                warn!("Sandbox boot failed: {}", err);
                Err(err)
            }
        }
    }

    fn start_boot(&self) -> SharedBoot<B::Handle> {
        let booter = Arc::clone(&self.booter);
        let snapshot = Arc::clone(&self.snapshot);
        let attempt = self.boots_started.fetch_add(1, Ordering::Relaxed) + 1;

        async move {
            info!("Booting sandbox (attempt {})", attempt);
            let handle = booter
                .boot()
                .await
                .map(Arc::new)
                .map_err(|e| BootFailure::Boot(failure_message(e)))?;

            match snapshot.load() {
                Ok(Some(tree)) => {
                    info!(
                        "Remounting snapshot into fresh sandbox ({} files)",
                        tree.file_count()
                    );
                    if let Err(e) = handle.mount(&tree).await {
                        if let Err(teardown_err) = handle.teardown().await {
                            warn!("Teardown after failed remount failed: {}", teardown_err);
                        }
                        return Err(BootFailure::Remount(failure_message(e)));
                    }
                }
                Ok(None) => debug!("No mounted snapshot to restore"),
                Err(e) => warn!("Could not read mounted snapshot, booting empty: {}", e),
            }

            info!("Sandbox ready");
            Ok(handle)
        }
        .boxed()
        .shared()
    }

    /// Mount `tree` into the sandbox and make it the new snapshot.
    ///
    /// On failure the previous snapshot is kept.
    pub async fn mount(&self, tree: &FileTree) -> Result<()> {
        let handle = self.acquire().await?;

        handle.mount(tree).await.map_err(|e| match e {
            Error::MountFailure { .. } => e,
            other => Error::mount(other.to_string()),
        })?;

        if let Err(e) = self.snapshot.save(tree) {
            warn!("Mounted files could not be persisted: {}", e);
        }
        debug!("Mounted {} files", tree.file_count());
        Ok(())
    }

    /// Tear down the live sandbox and forget the snapshot.
    ///
    /// Best-effort: a failing teardown is logged and the session is left empty
    /// regardless, so the next `acquire` boots a fresh sandbox. An in-flight
    /// boot is invalidated; whoever awaits it tears its result down.
    pub async fn release(&self) {
        let previous = std::mem::replace(&mut *self.lock_slot(), Slot::Empty);

        match previous {
            Slot::Ready(handle) => {
                info!("Releasing sandbox");
                if let Err(e) = handle.teardown().await {
                    warn!("Sandbox teardown failed: {}", e);
                }
            }
            Slot::Booting(pending) => info!("Releasing session during boot {}", pending.id),
            Slot::Empty => debug!("Release on empty session"),
        }

        if let Err(e) = self.snapshot.clear() {
            warn!("Mounted snapshot could not be cleared: {}", e);
        }
    }

    /// The live sandbox, if any, without booting
    pub fn current(&self) -> Option<Arc<B::Handle>> {
        match &*self.lock_slot() {
            Slot::Ready(handle) => Some(Arc::clone(handle)),
            _ => None,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(&*self.lock_slot(), Slot::Ready(_))
    }

    pub fn is_booting(&self) -> bool {
        matches!(&*self.lock_slot(), Slot::Booting(_))
    }

    /// Boots started over the session's lifetime
    pub fn boot_count(&self) -> usize {
        self.boots_started.load(Ordering::Relaxed)
    }

    /// The persisted snapshot, if one is readable
    pub fn snapshot(&self) -> Option<FileTree> {
        self.snapshot.load().ok().flatten()
    }
}

fn failure_message(err: Error) -> String {
    match err {
        Error::BootFailure { message } | Error::MountFailure { message } => message,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeBooter;
    use tokio_test::{assert_pending, assert_ready_ok};

    fn minimal_project() -> FileTree {
        FileTree::from_flat([
            ("package.json", "{\"scripts\":{\"dev\":\"vite\"}}"),
            ("vite.config.ts", "export default {}"),
            ("src/App.tsx", "export default function App() { return null }"),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn test_acquire_boots_once_and_reuses() {
        let booter = FakeBooter::new();
        let session = SandboxSession::with_memory_snapshot(booter.clone());

        let first = session.acquire().await.unwrap();
        let second = session.acquire().await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(booter.boot_count(), 1);
        assert!(session.is_live());
    }

    #[tokio::test]
    async fn test_concurrent_acquires_share_one_boot() {
        let booter = FakeBooter::new();
        booter.hold_boots();
        let session = SandboxSession::with_memory_snapshot(booter.clone());

        let mut waiters: Vec<_> = (0..5)
            .map(|_| tokio_test::task::spawn(session.acquire()))
            .collect();
        for waiter in waiters.iter_mut() {
            assert_pending!(waiter.poll());
        }
        assert!(session.is_booting());
        assert_eq!(booter.boot_count(), 1);

        booter.open_boots();
        let mut handles = Vec::new();
        for waiter in waiters.iter_mut() {
            // The gate is a watch channel; give the booting task a turn.
            let handle = loop {
                match waiter.poll() {
                    std::task::Poll::Ready(result) => break result.unwrap(),
                    std::task::Poll::Pending => tokio::task::yield_now().await,
                }
            };
            handles.push(handle);
        }

        assert_eq!(booter.boot_count(), 1);
        assert!(handles.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[tokio::test]
    async fn test_boot_failure_resets_and_next_call_retries_once() {
        let booter = FakeBooter::new();
        booter.fail_next_boots(1);
        let session = SandboxSession::with_memory_snapshot(booter.clone());

        let err = session.acquire().await.unwrap_err();
        assert!(matches!(err, Error::BootFailure { .. }));
        assert!(!session.is_live());
        assert!(!session.is_booting());
        assert_eq!(booter.boot_count(), 1);

        assert!(session.acquire().await.is_ok());
        assert_eq!(booter.boot_count(), 2);
    }

    #[tokio::test]
    async fn test_mount_persists_snapshot() {
        let booter = FakeBooter::new();
        let session = SandboxSession::with_memory_snapshot(booter.clone());

        session.mount(&minimal_project()).await.unwrap();

        assert_eq!(session.snapshot(), Some(minimal_project()));
        let sandbox = booter.last_sandbox().unwrap();
        assert_eq!(sandbox.mounts(), vec![minimal_project()]);
    }

    #[tokio::test]
    async fn test_reload_remounts_snapshot_into_fresh_sandbox() {
        let store: Arc<dyn SnapshotStore> = Arc::new(MemorySnapshotStore::new());

        let before = FakeBooter::new();
        let session = SandboxSession::new(before.clone(), Arc::clone(&store));
        session.mount(&minimal_project()).await.unwrap();
        drop(session);

        // A new session over the same store stands in for the page after a reload.
        let after = FakeBooter::new();
        let reloaded = SandboxSession::new(after.clone(), store);
        let handle = reloaded.acquire().await.unwrap();

        let remounted = handle.last_mount().unwrap();
        let original = minimal_project().flatten();
        for (path, contents) in &original {
            assert_eq!(remounted.file_contents(path), Some(contents.as_str()));
        }
        assert_eq!(after.boot_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_remount_is_mount_failure_and_resets() {
        let store: Arc<dyn SnapshotStore> = Arc::new(MemorySnapshotStore::new());
        store.save(&minimal_project()).unwrap();

        let booter = FakeBooter::new();
        booter.fail_mounts(true);
        let session = SandboxSession::new(booter.clone(), store);

        let err = session.acquire().await.unwrap_err();
        assert!(matches!(err, Error::MountFailure { .. }));
        assert!(!session.is_live());
        assert_eq!(booter.last_sandbox().unwrap().teardowns(), 1);

        booter.fail_mounts(false);
        assert!(session.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_failed_mount_keeps_previous_snapshot() {
        let booter = FakeBooter::new();
        let session = SandboxSession::with_memory_snapshot(booter.clone());
        session.mount(&minimal_project()).await.unwrap();

        booter.fail_mounts(true);
        let other = FileTree::from_flat([("index.html", "<p/>")]).unwrap();
        assert!(matches!(
            session.mount(&other).await,
            Err(Error::MountFailure { .. })
        ));
        assert_eq!(session.snapshot(), Some(minimal_project()));
    }

    #[tokio::test]
    async fn test_release_tears_down_and_clears() {
        let booter = FakeBooter::new();
        let session = SandboxSession::with_memory_snapshot(booter.clone());
        session.mount(&minimal_project()).await.unwrap();

        session.release().await;

        assert!(!session.is_live());
        assert!(session.snapshot().is_none());
        assert_eq!(booter.last_sandbox().unwrap().teardowns(), 1);

        // Next acquire boots fresh, with nothing to remount.
        let handle = session.acquire().await.unwrap();
        assert!(handle.mounts().is_empty());
        assert_eq!(booter.boot_count(), 2);
    }

    #[tokio::test]
    async fn test_release_during_boot_discards_result() {
        let booter = FakeBooter::new();
        booter.hold_boots();
        let session = SandboxSession::with_memory_snapshot(booter.clone());

        let mut waiter = tokio_test::task::spawn(session.acquire());
        assert_pending!(waiter.poll());

        session.release().await;
        booter.open_boots();

        let result = loop {
            match waiter.poll() {
                std::task::Poll::Ready(result) => break result,
                std::task::Poll::Pending => tokio::task::yield_now().await,
            }
        };
        assert!(matches!(result, Err(Error::SandboxUnavailable { .. })));
        assert!(!session.is_live());
        assert_eq!(booter.last_sandbox().unwrap().teardowns(), 1);
    }

    #[tokio::test]
    async fn test_release_during_shared_boot_tears_down_once() {
        let booter = FakeBooter::new();
        booter.hold_boots();
        let session = SandboxSession::with_memory_snapshot(booter.clone());

        let mut waiters: Vec<_> = (0..3)
            .map(|_| tokio_test::task::spawn(session.acquire()))
            .collect();
        for waiter in waiters.iter_mut() {
            assert_pending!(waiter.poll());
        }

        session.release().await;
        booter.open_boots();

        for waiter in waiters.iter_mut() {
            let result = loop {
                match waiter.poll() {
                    std::task::Poll::Ready(result) => break result,
                    std::task::Poll::Pending => tokio::task::yield_now().await,
                }
            };
            assert!(matches!(result, Err(Error::SandboxUnavailable { .. })));
        }

        assert_eq!(booter.boot_count(), 1);
        assert_eq!(booter.last_sandbox().unwrap().teardowns(), 1);
    }

    #[tokio::test]
    async fn test_current_does_not_boot() {
        let booter = FakeBooter::new();
        let session = SandboxSession::with_memory_snapshot(booter.clone());
        assert!(session.current().is_none());
        assert_eq!(booter.boot_count(), 0);

        let mut acquire = tokio_test::task::spawn(session.acquire());
        assert_ready_ok!(acquire.poll());
        drop(acquire);
        assert!(session.current().is_some());
    }
}
