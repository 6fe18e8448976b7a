//! Platform power-retention API

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("wake lock '{tag}' denied: {reason}")]
    Denied { tag: String, reason: String },

    #[error("wake lock I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Opaque handle to one platform acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WakeLockToken(pub u64);

/// The scarce resource that keeps the device sampling while a session runs.
///
/// Implementations only need to honour the calls they get; pairing every
/// `acquire` with one `release` is the lifecycle manager's job.
pub trait WakeLockProvider: Send + Sync + 'static {
    fn acquire(&self, tag: &str) -> Result<WakeLockToken, ResourceError>;

    /// Give the resource back. A token that is no longer held is ignored.
    fn release(&self, token: WakeLockToken) -> Result<(), ResourceError>;
}
