//! Lock manager and the async acquisition loop
//!
//! The manager owns what is shared by every lock of a process: the lock
//! directory, the defaults and the local waiter registry. A [`NamedLock`] is
//! one validated name plus its wait settings.
//!
//! Acquisition first waits for the local turn, then polls the OS lock:
//! each attempt runs on tokio's blocking pool, and between attempts the task
//! sleeps on the timer so other tasks keep running. Dropping an acquisition
//! future, cancelling its token or running out of time all leave nothing held.

use super::guard::LockGuard;
use super::name::{NameResolver, ResourceLocator};
use super::registry::{LocalTicket, LockRegistry};
use super::resource::{Attempt, LockResource};
use super::types::{HolderInfo, LockConfig, LockStatus};
use crate::config::Config;
use crate::error::{Error, Result};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shortest accepted poll interval
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Entry point for acquiring named locks
///
/// Cloning is cheap and clones share the waiter registry, so one manager per
/// process (or per lock directory) is enough.
#[derive(Debug, Clone)]
pub struct LockManager {
    config: LockConfig,
    resolver: NameResolver,
    registry: Arc<LockRegistry>,
}

impl LockManager {
    /// Create a new lock manager with the given configuration
    pub fn new(config: LockConfig) -> Self {
        Self {
            resolver: NameResolver::new(config.lock_dir.clone()),
            config,
            registry: Arc::new(LockRegistry::new()),
        }
    }

    /// Create a lock manager with default configuration
    pub fn with_defaults() -> Self {
        Self::new(LockConfig::default())
    }

    /// Create a lock manager with a custom lock directory
    pub fn with_lock_dir(dir: impl Into<PathBuf>) -> Self {
        Self::new(LockConfig::default().with_lock_dir(dir))
    }

    /// Create a lock manager from persisted settings
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.lock_config())
    }

    /// Get the configuration
    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Get the local waiter registry
    pub fn registry(&self) -> &Arc<LockRegistry> {
        &self.registry
    }

    /// Resolve a name to its lock file without touching it
    pub fn resolve(&self, name: &str) -> Result<ResourceLocator> {
        self.resolver.resolve(name)
    }

    /// Prepare a lock for `name` with the manager's defaults
    ///
    /// Fails with [`Error::InvalidName`] before any file is touched.
    pub fn named(&self, name: &str) -> Result<NamedLock> {
        let locator = self.resolve(name)?;
        Ok(NamedLock {
            manager: self.clone(),
            locator,
            poll_interval: self.config.poll_interval.max(MIN_POLL_INTERVAL),
            timeout: self.config.timeout,
        })
    }

    /// Acquire `name` with the manager's defaults
    pub async fn lock(&self, name: &str) -> Result<LockGuard> {
        self.named(name)?.acquire().await
    }
}

/// A validated lock name with its wait settings
#[derive(Debug, Clone)]
pub struct NamedLock {
    manager: LockManager,
    locator: ResourceLocator,
    poll_interval: Duration,
    timeout: Option<Duration>,
}

impl NamedLock {
    /// Give up after `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Wait for as long as it takes
    pub fn wait_forever(mut self) -> Self {
        self.timeout = None;
        self
    }

    /// Set the spacing between two attempts
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_POLL_INTERVAL);
        self
    }

    pub fn name(&self) -> &str {
        self.locator.name().as_str()
    }

    pub fn path(&self) -> &Path {
        self.locator.path()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Wait until the lock is held
    pub async fn acquire(&self) -> Result<LockGuard> {
        self.acquire_inner(None).await
    }

    /// Wait until the lock is held or `cancel` fires
    pub async fn acquire_with_cancel(&self, cancel: &CancellationToken) -> Result<LockGuard> {
        self.acquire_inner(Some(cancel)).await
    }

    /// Make a single attempt; `Ok(None)` when somebody else holds the lock
    pub async fn try_acquire(&self) -> Result<Option<LockGuard>> {
        let Some(ticket) = self.manager.registry.try_enter(&self.locator) else {
            return Ok(None);
        };

        let locator = self.locator.clone();
        let polled = run_blocking(move || {
            let resource = LockResource::open(&locator)?;
            poll_once(resource, locator.name().as_str())
        })
        .await?;

        match polled {
            Polled::Acquired(resource, holder) => {
                info!(lock_name = %self.name(), "Lock acquired");
                Ok(Some(self.guard(resource, ticket, holder)))
            }
            Polled::Busy(_) => Ok(None),
        }
    }

    /// Run `f` while holding the lock
    ///
    /// The lock is released when `f` completes, and also when the returned
    /// future is dropped or `f` panics.
    pub async fn with_lock<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let guard = self.acquire().await?;
        let output = f().await;
        guard.release().await;
        Ok(output)
    }

    /// Report whether the lock is currently held, and by whom when known
    ///
    /// The check takes a shared lock on the file for the duration of one
    /// system call. A single attempt made at that instant (`try_acquire`, or
    /// `acquire` with a zero timeout) sees the lock as busy; polling
    /// acquisitions simply retry on their next tick.
    pub async fn status(&self) -> Result<LockStatus> {
        let locator = self.locator.clone();
        run_blocking(move || LockResource::probe(&locator)).await
    }

    async fn acquire_inner(&self, cancel: Option<&CancellationToken>) -> Result<LockGuard> {
        let start = Instant::now();
        // Timeouts too large to represent mean waiting forever.
        let deadline = self.timeout.and_then(|timeout| start.checked_add(timeout));

        debug!(
            lock_name = %self.name(),
            path = %self.path().display(),
            timeout = ?self.timeout,
            "Attempting to acquire lock"
        );

        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(self.cancelled());
        }

        let ticket = self.wait_for_turn(start, deadline, cancel).await?;

        let locator = self.locator.clone();
        let mut resource = run_blocking(move || LockResource::open(&locator)).await?;

        loop {
            let name = self.name().to_string();
            match run_blocking(move || poll_once(resource, &name)).await? {
                Polled::Acquired(resource, holder) => {
                    info!(
                        lock_name = %self.name(),
                        elapsed_ms = start.elapsed().as_millis(),
                        "Lock acquired"
                    );
                    return Ok(self.guard(resource, ticket, holder));
                }
                Polled::Busy(busy) => resource = busy,
            }

            let now = Instant::now();
            let pause = match deadline {
                Some(deadline) if now >= deadline => return Err(self.timed_out(start)),
                Some(deadline) => self.poll_interval.min(deadline - now),
                None => self.poll_interval,
            };

            match cancel {
                Some(token) => {
                    tokio::select! {
                        _ = token.cancelled() => return Err(self.cancelled()),
                        _ = sleep(pause) => {}
                    }
                }
                None => sleep(pause).await,
            }
        }
    }

    /// Queue behind other tasks of this process waiting for the same file
    async fn wait_for_turn(
        &self,
        start: Instant,
        deadline: Option<Instant>,
        cancel: Option<&CancellationToken>,
    ) -> Result<LocalTicket> {
        let enter = self.manager.registry.enter(&self.locator);
        let bounded = async {
            match deadline {
                Some(deadline) => timeout_at(deadline, enter)
                    .await
                    .map_err(|_| self.timed_out(start)),
                None => Ok(enter.await),
            }
        };

        match cancel {
            Some(token) => tokio::select! {
                _ = token.cancelled() => Err(self.cancelled()),
                ticket = bounded => ticket,
            },
            None => bounded.await,
        }
    }

    fn guard(&self, resource: LockResource, ticket: LocalTicket, holder: HolderInfo) -> LockGuard {
        LockGuard::new(self.locator.clone(), resource, ticket, holder)
    }

    fn timed_out(&self, start: Instant) -> Error {
        let waited = start.elapsed();
        debug!(
            lock_name = %self.name(),
            waited_ms = waited.as_millis(),
            "Lock acquisition timed out"
        );
        Error::LockTimeout {
            name: self.name().to_string(),
            waited,
        }
    }

    fn cancelled(&self) -> Error {
        debug!(lock_name = %self.name(), "Lock acquisition cancelled");
        Error::Cancelled(self.name().to_string())
    }
}

/// Result of one lock attempt on the blocking pool
enum Polled {
    Acquired(LockResource, HolderInfo),
    Busy(LockResource),
}

fn poll_once(mut resource: LockResource, name: &str) -> Result<Polled> {
    match resource.try_acquire()? {
        Attempt::Acquired => {
            let holder = HolderInfo::new(name);
            if let Err(e) = resource.write_holder(&holder) {
                warn!(lock_name = %name, error = %e, "Failed to record lock holder");
            }
            Ok(Polled::Acquired(resource, holder))
        }
        Attempt::Busy => Ok(Polled::Busy(resource)),
    }
}

/// Run a blocking lock operation off the async worker threads
async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Other(format!("Blocking lock operation failed: {e}")))?
}
