//! LiveTrack: live courier tracking
//!
//! Continuously reports device position and heading to a backend while a
//! delivery is in progress, and keeps the latest position available to
//! in-process observers (map rendering) with minimal staleness.
//!
//! ## Architecture
//!
//! - **Acquisition**: position sources and orientation sensor registration
//! - **Processing**: motion noise filter and wrap-safe heading fusion
//! - **Pipeline**: supervisory tracking loop and the live state broadcast
//! - **Delivery**: bounded fire-and-forget reporting with one-shot fallback
//! - **Lifecycle**: power-retention resource with guaranteed release
//! - **Session**: the start/stop state machine tying it all together

pub mod acquisition;
pub mod config;
pub mod delivery;
pub mod lifecycle;
pub mod pipeline;
pub mod processing;
pub mod session;
pub mod types;

// Re-export configuration
pub use config::{ConfigError, TrackingConfig};

// Re-export commonly used types
pub use types::{
    ActorRole, HeadingSample, LiveLocationState, PositionFix, SensorKind, SessionState,
    SmoothedHeading, TrackingSession,
};

pub use acquisition::{OrientationSensors, PositionSource, PositionStream};
pub use delivery::{DeliveryOutcome, HttpReporter, LocationReporter, PublishPipeline};
pub use lifecycle::{FileWakeLock, ResourceLifecycleManager, WakeLockProvider};
pub use pipeline::LiveStateBroadcast;
pub use processing::{HeadingFusion, MotionNoiseFilter};
pub use session::{Collaborators, SessionEnd, SessionHandle, StartError, TrackingSessionController};
