//! Lock guards for RAII-style lock management
//!
//! Guards release their lock when dropped, so the lock is given back on early
//! returns, panics and cancelled tasks alike. [`LockGuard::release`] gives it
//! back explicitly and waits until the OS lock is gone.

use super::name::ResourceLocator;
use super::registry::LocalTicket;
use super::resource::LockResource;
use super::types::HolderInfo;
use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

/// The OS lock and the local turn that together make up a held lock
#[derive(Debug)]
struct Lease {
    // Field order matters: the file lock goes before the local turn.
    resource: LockResource,
    ticket: LocalTicket,
}

impl Lease {
    fn close(self) {
        let Self {
            mut resource,
            ticket,
        } = self;
        resource.release();
        drop(ticket);
    }
}

/// Exclusive hold on a named lock
#[derive(Debug)]
pub struct LockGuard {
    locator: ResourceLocator,
    holder: HolderInfo,
    acquired: Instant,
    lease: Option<Lease>,
}

impl LockGuard {
    pub(crate) fn new(
        locator: ResourceLocator,
        resource: LockResource,
        ticket: LocalTicket,
        holder: HolderInfo,
    ) -> Self {
        Self {
            locator,
            holder,
            acquired: Instant::now(),
            lease: Some(Lease { resource, ticket }),
        }
    }

    /// Get the lock name
    pub fn name(&self) -> &str {
        self.locator.name().as_str()
    }

    /// Get the lock file path
    pub fn path(&self) -> &Path {
        self.locator.path()
    }

    /// Get the holder record written for this acquisition
    pub fn holder(&self) -> &HolderInfo {
        &self.holder
    }

    pub fn lease_id(&self) -> Uuid {
        self.holder.lease_id
    }

    /// Check if the lock is still held by this guard
    pub fn is_held(&self) -> bool {
        self.lease
            .as_ref()
            .is_some_and(|lease| lease.resource.is_locked())
    }

    /// How long the lock has been held
    pub fn held_for(&self) -> Duration {
        self.acquired.elapsed()
    }

    /// Release the lock now and wait until it is given back
    pub async fn release(mut self) {
        let Some(lease) = self.lease.take() else {
            return;
        };
        self.log_release();

        if let Err(e) = tokio::task::spawn_blocking(move || lease.close()).await {
            warn!(lock_name = %self.name(), error = %e, "Lock release task failed");
        }
    }

    fn log_release(&self) {
        info!(
            lock_name = %self.name(),
            held_ms = self.held_for().as_millis(),
            "Lock released"
        );
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(lease) = self.lease.take() else {
            return;
        };
        self.log_release();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || lease.close());
            }
            Err(_) => lease.close(),
        }
    }
}

impl fmt::Display for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lock[{}]", self.locator.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locking::name::NameResolver;
    use crate::locking::registry::LockRegistry;
    use crate::locking::resource::{Attempt, LockResource};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn held_guard(dir: &TempDir, registry: &Arc<LockRegistry>, name: &str) -> LockGuard {
        let locator = NameResolver::new(dir.path()).resolve(name).unwrap();
        let ticket = registry.try_enter(&locator).unwrap();
        let mut resource = LockResource::open(&locator).unwrap();
        assert_eq!(resource.try_acquire().unwrap(), Attempt::Acquired);
        LockGuard::new(locator, resource, ticket, HolderInfo::new(name))
    }

    #[tokio::test]
    async fn test_guard_accessors() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(LockRegistry::new());
        let guard = held_guard(&dir, &registry, "jobA");

        assert!(guard.is_held());
        assert_eq!(guard.name(), "jobA");
        assert!(guard.path().starts_with(dir.path()));
        assert_eq!(guard.lease_id(), guard.holder().lease_id);
        assert_eq!(guard.to_string(), "Lock[jobA]");
    }

    #[tokio::test]
    async fn test_explicit_release_frees_everything() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(LockRegistry::new());
        let guard = held_guard(&dir, &registry, "jobA");
        let locator = NameResolver::new(dir.path()).resolve("jobA").unwrap();

        guard.release().await;

        assert!(registry.is_empty());
        let mut resource = LockResource::open(&locator).unwrap();
        assert_eq!(resource.try_acquire().unwrap(), Attempt::Acquired);
    }

    #[test]
    fn test_drop_outside_runtime_releases_inline() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(LockRegistry::new());
        let guard = held_guard(&dir, &registry, "jobA");

        drop(guard);

        assert!(registry.is_empty());
        assert!(registry.try_enter(&NameResolver::new(dir.path()).resolve("jobA").unwrap()).is_some());
    }
}
