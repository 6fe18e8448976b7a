//! Position and orientation value types
//!
//! Everything here is a plain value: fixes are produced by a
//! [`PositionSource`](crate::acquisition::PositionSource), heading samples by an
//! [`OrientationSensors`](crate::acquisition::OrientationSensors) feed, and the
//! combined [`LiveLocationState`] is what in-process observers receive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Position Fix
// ============================================================================

/// A single reported device position.
///
/// Immutable once produced. Never persisted by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    /// Latitude in decimal degrees
    pub latitude: f64,
    /// Longitude in decimal degrees
    pub longitude: f64,
    /// Horizontal accuracy radius (meters, 68% confidence)
    #[serde(default)]
    pub accuracy_m: f64,
    /// Course over ground derived from motion, if the platform reports one
    #[serde(default)]
    pub motion_heading_deg: Option<f64>,
    /// When the platform captured the fix
    #[serde(default = "Utc::now")]
    pub captured_at: DateTime<Utc>,
}

impl PositionFix {
    /// Build a fix captured now with no accuracy or motion heading information.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_m: 0.0,
            motion_heading_deg: None,
            captured_at: Utc::now(),
        }
    }

    pub fn with_accuracy(mut self, accuracy_m: f64) -> Self {
        self.accuracy_m = accuracy_m;
        self
    }

    pub fn with_captured_at(mut self, captured_at: DateTime<Utc>) -> Self {
        self.captured_at = captured_at;
        self
    }

    /// Coordinates are finite and inside the WGS84 range.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

// ============================================================================
// Heading Samples
// ============================================================================

/// Raw orientation input consumed once by
/// [`HeadingFusion`](crate::processing::HeadingFusion).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HeadingSample {
    /// Fused rotation vector (unit quaternion vector part, optional scalar).
    ///
    /// When `w` is absent it is reconstructed as `sqrt(1 - x² - y² - z²)`.
    RotationVector { x: f64, y: f64, z: f64, w: Option<f64> },
    /// Accelerometer (gravity) and magnetometer readings in device coordinates.
    AccelMag {
        gravity: [f64; 3],
        geomagnetic: [f64; 3],
    },
}

impl HeadingSample {
    pub fn kind(&self) -> SensorKind {
        match self {
            HeadingSample::RotationVector { .. } => SensorKind::RotationVector,
            HeadingSample::AccelMag { .. } => SensorKind::AccelMag,
        }
    }
}

/// Orientation sensor families, in order of preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    RotationVector,
    AccelMag,
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorKind::RotationVector => write!(f, "rotation-vector"),
            SensorKind::AccelMag => write!(f, "accelerometer+magnetometer"),
        }
    }
}

/// Smoothed compass heading, always in `[0, 360)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SmoothedHeading {
    pub degrees: f64,
}

// ============================================================================
// Live Location State
// ============================================================================

/// The single most-recent value held by
/// [`LiveStateBroadcast`](crate::pipeline::LiveStateBroadcast).
///
/// `position` is `None` once a session has ended, so observers can tell a
/// stale marker from a live one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LiveLocationState {
    pub position: Option<PositionFix>,
    pub heading_deg: f64,
}

impl LiveLocationState {
    pub fn is_live(&self) -> bool {
        self.position.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fix_validity() {
        assert!(PositionFix::new(12.9716, 77.5946).is_valid());
        assert!(!PositionFix::new(91.0, 0.0).is_valid());
        assert!(!PositionFix::new(0.0, f64::NAN).is_valid());
    }

    #[test]
    fn test_fix_json_defaults() {
        let fix: PositionFix =
            serde_json::from_str(r#"{"latitude": 12.5, "longitude": 77.25}"#).unwrap();
        assert_eq!(fix.latitude, 12.5);
        assert_eq!(fix.accuracy_m, 0.0);
        assert!(fix.motion_heading_deg.is_none());
    }

    #[test]
    fn test_sample_kind() {
        let rv = HeadingSample::RotationVector { x: 0.0, y: 0.0, z: 0.0, w: Some(1.0) };
        assert_eq!(rv.kind(), SensorKind::RotationVector);
        let am = HeadingSample::AccelMag {
            gravity: [0.0, 0.0, 9.81],
            geomagnetic: [0.0, 30.0, -20.0],
        };
        assert_eq!(am.kind(), SensorKind::AccelMag);
    }
}
