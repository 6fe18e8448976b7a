//! Per-session data flow
//!
//! - [`LiveStateBroadcast`]: replay-latest fan-out of the live position
//! - [`TrackingLoop`]: the supervisory task that feeds it

pub mod live_state;
pub mod tracking_loop;

pub use live_state::{LiveStateBroadcast, LiveStateSubscription};
pub use tracking_loop::{LoopExit, LoopStats, TrackingLoop};
