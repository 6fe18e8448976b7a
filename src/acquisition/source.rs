//! Position source abstraction.
//!
//! Provides a unified trait for where position fixes come from: the simulated
//! GNSS receiver, stdin (JSON), and scripted replay. The tracking loop calls
//! [`PositionStream::next_event`] in a `select!` with cancellation.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::PositionFix;

/// Errors surfaced by position sources.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    /// The positioning capability is switched off.
    #[error("positioning is disabled on this device")]
    Unavailable,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(String),

    /// Shutting the stream down failed; the stream is unusable either way.
    #[error("position stream shutdown failed: {0}")]
    Shutdown(String),
}

/// Events produced by a position stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PositionEvent {
    /// A new fix from the platform.
    Fix(PositionFix),
    /// The platform revoked (or never granted) the positioning capability.
    Unavailable,
    /// The source has no more data (EOF for stdin/replay).
    Ended,
}

/// Cadence requested from the platform.
///
/// Delivery is best-effort: a source may deliver fewer fixes than requested,
/// but never fabricates one to fill a gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingRequest {
    /// Desired interval between fixes (ms).
    pub interval_ms: u64,
    /// Fastest interval the consumer is willing to handle (ms).
    pub min_interval_ms: u64,
    /// Longest the platform may batch fixes before delivering them (ms).
    pub max_delay_ms: u64,
    /// Prefer GNSS-grade accuracy over battery.
    pub high_accuracy: bool,
}

/// A live sequence of position events.
///
/// Streams are independent: every [`PositionSource::begin_sampling`] call
/// returns a fresh one.
#[async_trait]
pub trait PositionStream: Send {
    /// Wait for the next event.
    ///
    /// Returns `Err` only on unrecoverable source errors.
    async fn next_event(&mut self) -> Result<PositionEvent, AcquisitionError>;

    /// Stop sampling and release platform callbacks.
    async fn shutdown(&mut self) -> Result<(), AcquisitionError>;
}

/// Trait abstracting the platform positioning capability.
#[async_trait]
pub trait PositionSource: Send + Sync + 'static {
    /// Capability query consumed before a session starts.
    fn positioning_enabled(&self) -> bool;

    /// Start a new, independent stream of fixes.
    ///
    /// Returns [`AcquisitionError::Unavailable`] when positioning is off at
    /// the moment sampling should begin.
    async fn begin_sampling(
        &self,
        request: SamplingRequest,
    ) -> Result<Box<dyn PositionStream>, AcquisitionError>;

    /// Human-readable name for logging (e.g. "simulated", "stdin").
    fn source_name(&self) -> &str;
}
