//! Motion noise filter
//!
//! A stationary receiver sampled every 1–2 s wanders by a few meters. Fixes
//! that moved less than the threshold on *both* axes relative to the last
//! accepted fix are treated as jitter and dropped before they reach the
//! broadcast or the backend.

use crate::config::defaults::MIN_MOVEMENT_DEG;
use crate::types::PositionFix;

/// Per-session jitter gate.
///
/// Stateless apart from the threshold: the caller owns the last accepted fix
/// and passes it in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionNoiseFilter {
    min_movement_deg: f64,
}

impl Default for MotionNoiseFilter {
    fn default() -> Self {
        Self::new(MIN_MOVEMENT_DEG)
    }
}

impl MotionNoiseFilter {
    pub fn new(min_movement_deg: f64) -> Self {
        Self { min_movement_deg }
    }

    pub fn threshold_deg(&self) -> f64 {
        self.min_movement_deg
    }

    /// Whether `fix` represents real movement relative to `last_accepted`.
    ///
    /// The first fix of a session (no reference) is always accepted.
    pub fn accept(&self, fix: &PositionFix, last_accepted: Option<&PositionFix>) -> bool {
        let Some(last) = last_accepted else {
            return true;
        };
        let d_lat = (fix.latitude - last.latitude).abs();
        let d_lon = (fix.longitude - last.longitude).abs();
        !(d_lat < self.min_movement_deg && d_lon < self.min_movement_deg)
    }
}
