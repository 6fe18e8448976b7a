//! Power-retention resource lifecycle
//!
//! [`ResourceLifecycleManager`] pairs every acquisition of the platform
//! [`WakeLockProvider`] with exactly one release. [`FileWakeLock`] is the
//! provider used by the binary.

pub mod manager;
pub mod provider;
pub mod wake_lock;

pub use manager::{ResourceHandle, ResourceLifecycleManager};
pub use provider::{ResourceError, WakeLockProvider, WakeLockToken};
pub use wake_lock::FileWakeLock;
