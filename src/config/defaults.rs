//! System-wide default constants.
//!
//! Centralises the numbers the tracking loop, filter, fusion and delivery
//! pipeline fall back to when no `tracking.toml` overrides them.

// ============================================================================
// Sampling
// ============================================================================

/// Requested fix interval (ms).
pub const SAMPLING_INTERVAL_MS: u64 = 2_000;

/// Fastest acceptable fix interval (ms). Fixes arriving sooner are coalesced.
pub const SAMPLING_MIN_INTERVAL_MS: u64 = 1_000;

/// Maximum batching delay the platform may apply before delivering a fix (ms).
pub const SAMPLING_MAX_DELAY_MS: u64 = 4_000;

// ============================================================================
// Motion Noise Filter
// ============================================================================

/// Minimum per-axis movement before a fix counts as real motion (degrees).
///
/// 5e-5° ≈ 5.5 m of latitude; ≈ 5.5 m of longitude at the equator.
pub const MIN_MOVEMENT_DEG: f64 = 5e-5;

// ============================================================================
// Heading Fusion
// ============================================================================

/// Exponential smoothing factor applied to the shortest-path heading delta.
pub const HEADING_SMOOTHING_FACTOR: f64 = 0.05;

/// Smallest heading change worth publishing (degrees).
pub const HEADING_EMIT_THRESHOLD_DEG: f64 = 0.5;

/// Below this magnitude the gravity × geomagnetic cross product is unusable
/// (free fall or a magnetically shielded device).
pub const MIN_CROSS_PRODUCT_NORM: f64 = 0.1;

// ============================================================================
// Live State Broadcast
// ============================================================================

/// Updates a subscriber may fall behind before it is disconnected.
pub const BROADCAST_CAPACITY: usize = 64;

// ============================================================================
// Delivery
// ============================================================================

/// Backend base URL used when none is configured.
pub const DELIVERY_BASE_URL: &str = "http://127.0.0.1:8080";

/// HTTP timeout for a single delivery attempt (seconds).
pub const DELIVERY_HTTP_TIMEOUT_SECS: u64 = 10;

/// Upper bound on concurrently running delivery tasks.
pub const DELIVERY_MAX_IN_FLIGHT: usize = 8;

/// Capacity of the delivery outcome broadcast used for observability.
pub const DELIVERY_OUTCOME_CAPACITY: usize = 128;

// ============================================================================
// Lifecycle Resource
// ============================================================================

/// Hard ceiling on how long a session may hold the power-retention resource
/// (seconds). 14 400 = 4 hours.
pub const LIFECYCLE_MAX_HOLD_SECS: u64 = 14_400;

/// Tag attached to the platform resource so it is identifiable in diagnostics.
pub const LIFECYCLE_TAG: &str = "livetrack:session";

/// How long `stop()` waits for the tracking loop to wind down before aborting it.
pub const STOP_JOIN_TIMEOUT_MS: u64 = 2_000;
