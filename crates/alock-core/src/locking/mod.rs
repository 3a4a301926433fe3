//! Named locks shared between processes
//!
//! This module provides a mutual-exclusion lock identified by a string: any
//! process on the host that asks for the same name in the same lock directory
//! contends for the same lock. Waiting never blocks the async runtime.
//!
//! # Architecture
//!
//! - **Names**: `NameResolver` turns a name into a lock file path
//! - **Resources**: `LockResource` wraps the OS advisory lock on that file
//! - **Registry**: `LockRegistry` queues tasks of this process per lock file
//! - **Lock Manager**: `LockManager` / `NamedLock` run the acquisition loop
//! - **Guards**: RAII-style `LockGuard` for automatic release
//!
//! # Example
//!
//! ```no_run
//! use alock_core::locking::{LockConfig, LockManager};
//! use std::time::Duration;
//!
//! # async fn example() -> alock_core::Result<()> {
//! let manager = LockManager::new(LockConfig::default());
//!
//! let guard = manager
//!     .named("nightly-build")?
//!     .with_timeout(Duration::from_secs(5))
//!     .acquire()
//!     .await?;
//!
//! // Do work while no other process holds "nightly-build"...
//!
//! guard.release().await;
//! # Ok(())
//! # }
//! ```

pub mod guard;
pub mod manager;
pub mod name;
pub mod registry;
pub mod resource;
pub mod types;

// Re-export main types
pub use guard::LockGuard;
pub use manager::{LockManager, NamedLock};
pub use name::{LockName, MAX_NAME_LEN, NameResolver, ResourceLocator};
pub use registry::{LocalTicket, LockRegistry};
pub use resource::{Attempt, LockResource, ResourceState};
pub use types::{DEFAULT_POLL_INTERVAL, HolderInfo, LockConfig, LockStatus};
