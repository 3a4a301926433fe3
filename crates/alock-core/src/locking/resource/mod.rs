//! OS advisory lock on a lock file
//!
//! A [`LockResource`] owns one open handle on the lock file and, at most once,
//! the exclusive advisory lock on it. The lock belongs to the open handle: if
//! the process dies, the OS closes the handle and drops the lock with it, so a
//! leftover lock file never blocks anyone.
//!
//! Every method here issues blocking system calls. Async callers must run
//! them on the blocking pool.
//!
//! The platform specific parts (how a lock file is opened, checked and torn
//! down) live in the `unix` and `windows` submodules.

use super::name::ResourceLocator;
use super::types::{HolderInfo, LockStatus};
use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix as sys;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
use windows as sys;

/// How many times a lock on a replaced lock file is retried within one attempt
const MAX_STALE_RETRIES: usize = 3;

/// Outcome of a non-blocking lock attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    Acquired,
    Busy,
}

/// Lifecycle of a [`LockResource`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    /// No handle is open yet
    Unopened,
    /// Handle open, lock not held
    Unlocked,
    /// Handle open, exclusive lock held
    Locked,
    /// Released; the resource cannot be used again
    Closed,
}

/// An open lock file and the advisory lock on it
#[derive(Debug)]
pub struct LockResource {
    path: PathBuf,
    file: Option<File>,
    state: ResourceState,
}

impl LockResource {
    /// Open (creating if needed) the lock file for `locator`
    pub fn open(locator: &ResourceLocator) -> Result<Self> {
        let mut resource = Self {
            path: locator.path().to_path_buf(),
            file: None,
            state: ResourceState::Unopened,
        };
        resource.ensure_open()?;
        Ok(resource)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> ResourceState {
        self.state
    }

    pub fn is_locked(&self) -> bool {
        self.state == ResourceState::Locked
    }

    /// Try to take the exclusive lock without waiting
    pub fn try_acquire(&mut self) -> Result<Attempt> {
        match self.state {
            ResourceState::Locked => return Ok(Attempt::Acquired),
            ResourceState::Closed => {
                return Err(self.unavailable(io::Error::other("lock resource already released")));
            }
            ResourceState::Unopened | ResourceState::Unlocked => {}
        }

        for _ in 0..MAX_STALE_RETRIES {
            if !self.ensure_open()? {
                return Ok(Attempt::Busy);
            }
            let Some(file) = self.file.as_ref() else {
                return Ok(Attempt::Busy);
            };

            match FileExt::try_lock_exclusive(file) {
                Ok(()) => {}
                Err(e) if is_contended(&e) => return Ok(Attempt::Busy),
                Err(e) => return Err(self.unavailable(e)),
            }

            // The previous holder may have removed the file between our open
            // and our lock; a lock on a file nobody else can find is useless.
            match sys::still_linked(file, &self.path) {
                Ok(true) => {
                    self.state = ResourceState::Locked;
                    return Ok(Attempt::Acquired);
                }
                Ok(false) => {
                    debug!(path = %self.path.display(), "Lock file was replaced, reopening");
                    self.close_handle();
                    self.state = ResourceState::Unopened;
                }
                Err(e) => {
                    self.close_handle();
                    self.state = ResourceState::Unopened;
                    return Err(self.unavailable(e));
                }
            }
        }

        Ok(Attempt::Busy)
    }

    /// Overwrite the lock file contents with the holder record
    pub fn write_holder(&mut self, holder: &HolderInfo) -> Result<()> {
        let (ResourceState::Locked, Some(file)) = (self.state, self.file.as_mut()) else {
            return Err(Error::Other(format!(
                "cannot record holder for unlocked {}",
                self.path.display()
            )));
        };

        let json = serde_json::to_vec(holder)
            .map_err(|e| Error::Other(format!("Failed to serialize holder record: {e}")))?;
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&json)?;
        file.flush()?;
        Ok(())
    }

    /// Drop the lock (if held) and close the handle. Calling it again is a no-op.
    pub fn release(&mut self) {
        let was_locked = self.state == ResourceState::Locked;
        self.state = ResourceState::Closed;

        let Some(file) = self.file.take() else {
            return;
        };

        if was_locked {
            if let Err(e) = sys::release_locked(file, &self.path) {
                // The OS drops the lock with the handle regardless.
                warn!(path = %self.path.display(), error = %e, "Lock file cleanup failed");
            }
        }
    }

    /// Inspect a lock without taking it. Never creates or removes the file.
    ///
    /// Briefly holds a shared lock, so a concurrent exclusive attempt on a
    /// free lock can observe [`Attempt::Busy`] while this runs.
    pub fn probe(locator: &ResourceLocator) -> Result<LockStatus> {
        let path = locator.path();
        let mut file = match OpenOptions::new().read(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(LockStatus::Available),
            Err(e) if sys::is_transient_open_error(&e) => return Ok(LockStatus::Held(None)),
            Err(e) => {
                return Err(Error::ResourceUnavailable {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        };

        match FileExt::try_lock_shared(&file) {
            Ok(()) => {
                if let Err(e) = FileExt::unlock(&file) {
                    warn!(path = %path.display(), error = %e, "Failed to drop probe lock");
                }
                Ok(LockStatus::Available)
            }
            Err(e) if is_contended(&e) => {
                let mut contents = String::new();
                let holder = file
                    .read_to_string(&mut contents)
                    .ok()
                    .and_then(|_| serde_json::from_str::<HolderInfo>(&contents).ok());
                Ok(LockStatus::Held(holder))
            }
            Err(e) => Err(Error::ResourceUnavailable {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }

    /// Open the handle if needed. `Ok(false)` means the file is momentarily
    /// unopenable and the attempt should count as busy.
    fn ensure_open(&mut self) -> Result<bool> {
        if self.file.is_some() {
            return Ok(true);
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.unavailable(e))?;
        }

        match sys::open_lock_file(&self.path) {
            Ok(file) => {
                self.file = Some(file);
                self.state = ResourceState::Unlocked;
                Ok(true)
            }
            Err(e) if sys::is_transient_open_error(&e) => Ok(false),
            Err(e) => Err(self.unavailable(e)),
        }
    }

    fn close_handle(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = FileExt::unlock(&file);
        }
    }

    fn unavailable(&self, source: io::Error) -> Error {
        Error::ResourceUnavailable {
            path: self.path.clone(),
            source,
        }
    }
}

impl Drop for LockResource {
    fn drop(&mut self) {
        self.release();
    }
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locking::name::NameResolver;
    use tempfile::TempDir;

    fn locator(dir: &TempDir, name: &str) -> ResourceLocator {
        NameResolver::new(dir.path()).resolve(name).unwrap()
    }

    #[test]
    fn test_open_creates_lock_file() {
        let dir = TempDir::new().unwrap();
        let locator = locator(&dir, "open");

        let resource = LockResource::open(&locator).unwrap();
        assert_eq!(resource.state(), ResourceState::Unlocked);
        assert!(locator.path().exists());
    }

    #[test]
    fn test_open_creates_missing_lock_dir() {
        let dir = TempDir::new().unwrap();
        let locator = NameResolver::new(dir.path().join("nested/locks"))
            .resolve("deep")
            .unwrap();

        let resource = LockResource::open(&locator).unwrap();
        assert_eq!(resource.state(), ResourceState::Unlocked);
    }

    #[test]
    fn test_second_handle_is_busy() {
        let dir = TempDir::new().unwrap();
        let locator = locator(&dir, "busy");

        let mut first = LockResource::open(&locator).unwrap();
        let mut second = LockResource::open(&locator).unwrap();

        assert_eq!(first.try_acquire().unwrap(), Attempt::Acquired);
        assert_eq!(second.try_acquire().unwrap(), Attempt::Busy);
        assert!(first.is_locked());
        assert!(!second.is_locked());

        first.release();
        assert_eq!(second.try_acquire().unwrap(), Attempt::Acquired);
    }

    #[test]
    fn test_release_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let locator = locator(&dir, "idempotent");

        let mut resource = LockResource::open(&locator).unwrap();
        assert_eq!(resource.try_acquire().unwrap(), Attempt::Acquired);

        resource.release();
        resource.release();
        assert_eq!(resource.state(), ResourceState::Closed);
        assert!(resource.try_acquire().is_err());
    }

    #[test]
    fn test_release_of_unlocked_handle_keeps_holder() {
        let dir = TempDir::new().unwrap();
        let locator = locator(&dir, "waiter");

        let mut holder = LockResource::open(&locator).unwrap();
        assert_eq!(holder.try_acquire().unwrap(), Attempt::Acquired);

        let mut waiter = LockResource::open(&locator).unwrap();
        waiter.release();

        assert!(holder.is_locked());
        let mut third = LockResource::open(&locator).unwrap();
        assert_eq!(third.try_acquire().unwrap(), Attempt::Busy);
    }

    #[test]
    fn test_abandoned_handle_does_not_leave_stale_lock() {
        let dir = TempDir::new().unwrap();
        let locator = locator(&dir, "crash");

        // A holder that dies closes its handle without any cleanup.
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(locator.path())
            .unwrap();
        FileExt::try_lock_exclusive(&file).unwrap();

        let mut contender = LockResource::open(&locator).unwrap();
        assert_eq!(contender.try_acquire().unwrap(), Attempt::Busy);

        drop(file);
        assert!(locator.path().exists());
        assert_eq!(contender.try_acquire().unwrap(), Attempt::Acquired);
    }

    #[cfg(unix)]
    #[test]
    fn test_waiter_follows_replaced_lock_file() {
        let dir = TempDir::new().unwrap();
        let locator = locator(&dir, "replaced");

        let mut holder = LockResource::open(&locator).unwrap();
        assert_eq!(holder.try_acquire().unwrap(), Attempt::Acquired);

        // Opened before the holder removes the file on release.
        let mut waiter = LockResource::open(&locator).unwrap();
        holder.release();
        assert!(!locator.path().exists());

        assert_eq!(waiter.try_acquire().unwrap(), Attempt::Acquired);
        assert!(locator.path().exists());

        let mut late = LockResource::open(&locator).unwrap();
        assert_eq!(late.try_acquire().unwrap(), Attempt::Busy);
    }

    #[test]
    fn test_holder_record_and_probe() {
        let dir = TempDir::new().unwrap();
        let locator = locator(&dir, "probe");

        assert_eq!(LockResource::probe(&locator).unwrap(), LockStatus::Available);

        let mut resource = LockResource::open(&locator).unwrap();
        assert_eq!(LockResource::probe(&locator).unwrap(), LockStatus::Available);

        assert_eq!(resource.try_acquire().unwrap(), Attempt::Acquired);
        let holder = HolderInfo::new("probe");
        resource.write_holder(&holder).unwrap();

        let status = LockResource::probe(&locator).unwrap();
        assert!(status.is_held());
        #[cfg(unix)]
        assert_eq!(status, LockStatus::Held(Some(holder)));

        resource.release();
        assert_eq!(LockResource::probe(&locator).unwrap(), LockStatus::Available);
    }

    #[test]
    fn test_shared_check_only_blocks_while_it_runs() {
        let dir = TempDir::new().unwrap();
        let locator = locator(&dir, "shared-check");
        let mut contender = LockResource::open(&locator).unwrap();

        // What a status check holds for the length of one call
        let checker = OpenOptions::new().read(true).open(locator.path()).unwrap();
        FileExt::try_lock_shared(&checker).unwrap();
        assert_eq!(contender.try_acquire().unwrap(), Attempt::Busy);
        drop(checker);

        assert_eq!(LockResource::probe(&locator).unwrap(), LockStatus::Available);
        assert_eq!(contender.try_acquire().unwrap(), Attempt::Acquired);
    }

    #[test]
    fn test_write_holder_requires_lock() {
        let dir = TempDir::new().unwrap();
        let locator = locator(&dir, "unlocked-write");

        let mut resource = LockResource::open(&locator).unwrap();
        assert!(resource.write_holder(&HolderInfo::new("x")).is_err());
    }
}
