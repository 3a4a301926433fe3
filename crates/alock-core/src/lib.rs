//! alock Core Library
//!
//! Named, inter-process mutual exclusion for async Rust:
//! - Lock names resolved to files in a shared lock directory
//! - OS advisory locks that die with their holder process
//! - Polling acquisition on tokio with timeouts and cancellation
//! - RAII guards
//! - Persistent configuration

pub mod config;
pub mod error;
pub mod locking;


pub use error::{Error, Result};
pub use locking::{LockConfig, LockGuard, LockManager, LockStatus, NamedLock};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::locking::{LockConfig, LockGuard, LockManager, LockStatus, NamedLock};
    pub use tokio_util::sync::CancellationToken;
}
