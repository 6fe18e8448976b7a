//! Tracking session lifecycle
//!
//! [`TrackingSessionController`] is the single entry point used by both actor
//! roles to start and stop live tracking.

pub mod controller;
pub mod error;

pub use controller::{Collaborators, SessionEnd, SessionHandle, TrackingSessionController};
pub use error::StartError;
