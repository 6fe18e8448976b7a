//! Shared value types for the live-tracking subsystem

mod position;
mod session;

pub use position::*;
pub use session::*;
