//! In-process arbitration between tasks waiting for the same lock
//!
//! Advisory file locks are not a reliable way to exclude two tasks of the same
//! process from each other (`fcntl` locks are per process, for one), so local
//! contenders queue on a per-file async mutex first and only the task at the
//! head of the queue touches the OS lock.
//!
//! Entries are created for the first local contender of a lock file and
//! removed when its last ticket is dropped, so the map only holds files that
//! somebody in this process is currently using.

use super::name::ResourceLocator;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug)]
struct WaiterEntry {
    gate: Arc<AsyncMutex<()>>,
    waiters: usize,
}

/// Process-local registry of lock files with waiting or holding tasks
#[derive(Debug, Default)]
pub struct LockRegistry {
    entries: Mutex<HashMap<PathBuf, WaiterEntry>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for this task's turn on `locator`
    ///
    /// Dropping the returned future before it resolves gives up the place in
    /// the queue.
    pub async fn enter(self: &Arc<Self>, locator: &ResourceLocator) -> LocalTicket {
        let gate = self.register(locator.path());
        let mut ticket = LocalTicket {
            registry: Arc::clone(self),
            key: locator.path().to_path_buf(),
            permit: None,
        };
        ticket.permit = Some(gate.lock_owned().await);
        ticket
    }

    /// Take the turn on `locator` only if nobody else in the process has it
    pub fn try_enter(self: &Arc<Self>, locator: &ResourceLocator) -> Option<LocalTicket> {
        let gate = self.register(locator.path());
        let mut ticket = LocalTicket {
            registry: Arc::clone(self),
            key: locator.path().to_path_buf(),
            permit: None,
        };
        ticket.permit = Some(gate.try_lock_owned().ok()?);
        Some(ticket)
    }

    /// Number of lock files with at least one local waiter or holder
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Number of local tickets (pending or granted) for `locator`
    pub fn waiters(&self, locator: &ResourceLocator) -> usize {
        self.entries()
            .get(locator.path())
            .map_or(0, |entry| entry.waiters)
    }

    fn register(&self, key: &Path) -> Arc<AsyncMutex<()>> {
        let mut entries = self.entries();
        let entry = entries
            .entry(key.to_path_buf())
            .or_insert_with(|| WaiterEntry {
                gate: Arc::new(AsyncMutex::new(())),
                waiters: 0,
            });
        entry.waiters += 1;
        Arc::clone(&entry.gate)
    }

    fn unregister(&self, key: &Path) {
        let mut entries = self.entries();
        if let Some(entry) = entries.get_mut(key) {
            entry.waiters -= 1;
            if entry.waiters == 0 {
                entries.remove(key);
            }
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<PathBuf, WaiterEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A place in the local queue for one lock file
///
/// Holds the local turn once granted. Dropping it passes the turn on and
/// unregisters the waiter.
#[derive(Debug)]
pub struct LocalTicket {
    registry: Arc<LockRegistry>,
    key: PathBuf,
    permit: Option<OwnedMutexGuard<()>>,
}

impl LocalTicket {
    /// Whether this ticket holds the local turn
    pub fn is_granted(&self) -> bool {
        self.permit.is_some()
    }
}

impl Drop for LocalTicket {
    fn drop(&mut self) {
        self.permit.take();
        self.registry.unregister(&self.key);
    }
}
