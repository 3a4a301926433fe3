//! Lock configuration and status types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Default spacing between two acquisition attempts
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Runtime configuration for a [`LockManager`](super::LockManager)
#[derive(Debug, Clone, PartialEq)]
pub struct LockConfig {
    /// Shared directory holding the lock files
    pub lock_dir: PathBuf,

    /// Retry interval when waiting for a lock
    pub poll_interval: Duration,

    /// Default timeout for lock acquisition (None = wait forever)
    pub timeout: Option<Duration>,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lock_dir: std::env::temp_dir(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
        }
    }
}

impl LockConfig {
    /// Create a config with a custom lock directory
    pub fn with_lock_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.lock_dir = dir.into();
        self
    }

    /// Set the retry interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the default timeout
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Record written into the lock file by the current holder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolderInfo {
    /// Lease identifier, unique per successful acquisition
    pub lease_id: Uuid,

    /// Logical lock name
    pub name: String,

    /// Process ID of lock holder
    pub pid: u32,

    /// Hostname of lock holder
    pub host: String,

    /// When the lock was acquired
    pub acquired_at: DateTime<Utc>,
}

impl HolderInfo {
    /// Create a holder record for the current process
    pub fn new(name: &str) -> Self {
        Self {
            lease_id: Uuid::new_v4(),
            name: name.to_string(),
            pid: std::process::id(),
            host: gethostname::gethostname().to_string_lossy().into_owned(),
            acquired_at: Utc::now(),
        }
    }
}

/// Observed state of a named lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "holder", rename_all = "snake_case")]
pub enum LockStatus {
    /// Nobody holds the lock
    Available,
    /// The lock is held; holder details when the record was readable
    Held(Option<HolderInfo>),
}

impl LockStatus {
    pub fn is_held(&self) -> bool {
        matches!(self, Self::Held(_))
    }
}

impl fmt::Display for LockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available => write!(f, "available"),
            Self::Held(Some(holder)) => write!(
                f,
                "held by pid {} on {} since {}",
                holder.pid,
                holder.host,
                holder.acquired_at.to_rfc3339()
            ),
            Self::Held(None) => write!(f, "held"),
        }
    }
}
