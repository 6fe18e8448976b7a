//! Heading Fusion Module
//!
//! Turns raw orientation samples into a smoothed compass heading:
//! - Azimuth from a fused rotation vector (rotation-matrix decomposition)
//! - Azimuth from gravity + geomagnetic vectors (cross-product decomposition)
//! - Exponential smoothing along the shortest arc, so 359° → 1° moves +2°
//!   rather than −358°
//! - Emission gate: an update is only reported when it moved θ by more than
//!   the configured threshold
//!
//! All state lives in [`HeadingFusion`]; the type does no I/O and knows
//! nothing about sensor registration.

use crate::config::defaults::MIN_CROSS_PRODUCT_NORM;
use crate::config::HeadingConfig;
use crate::types::{HeadingSample, SmoothedHeading};

/// Smoothed heading estimator.
#[derive(Debug, Clone)]
pub struct HeadingFusion {
    alpha: f64,
    emit_threshold_deg: f64,
    /// Current smoothed angle θ, `None` until the first usable sample.
    theta: Option<f64>,
    samples_used: u64,
}

impl HeadingFusion {
    pub fn new(config: &HeadingConfig) -> Self {
        Self {
            alpha: config.smoothing_factor,
            emit_threshold_deg: config.emit_threshold_deg,
            theta: None,
            samples_used: 0,
        }
    }

    /// Feed one sample.
    ///
    /// Returns the new heading when this update moved θ by more than the
    /// emit threshold (the very first usable sample always emits). Samples
    /// from which no azimuth can be derived are ignored.
    pub fn update(&mut self, sample: &HeadingSample) -> Option<SmoothedHeading> {
        let raw = azimuth_deg(sample)?;
        self.samples_used += 1;

        // The first sample seeds θ.
        let previous = self.theta;
        let theta = match previous {
            None => raw,
            Some(prev) => normalize_deg(prev + self.alpha * shortest_delta(prev, raw)),
        };
        self.theta = Some(theta);

        match previous {
            Some(prev) if angular_distance(prev, theta) <= self.emit_threshold_deg => None,
            _ => Some(SmoothedHeading { degrees: theta }),
        }
    }

    /// Current smoothed heading regardless of the emission gate.
    pub fn heading(&self) -> Option<SmoothedHeading> {
        self.theta.map(|degrees| SmoothedHeading { degrees })
    }

    pub fn samples_used(&self) -> u64 {
        self.samples_used
    }

    pub fn reset(&mut self) {
        self.theta = None;
        self.samples_used = 0;
    }
}

// ============================================================================
// Angle Arithmetic
// ============================================================================

/// Map any finite angle into `[0, 360)`.
pub fn normalize_deg(deg: f64) -> f64 {
    let r = deg.rem_euclid(360.0);
    // rem_euclid rounds tiny negatives up to exactly 360.0
    if r >= 360.0 {
        0.0
    } else {
        r
    }
}

/// Signed shortest rotation from `from` to `to`, in `[-180, 180)`.
pub fn shortest_delta(from: f64, to: f64) -> f64 {
    (to - from + 180.0).rem_euclid(360.0) - 180.0
}

/// Unsigned distance between two headings, in `[0, 180]`.
pub fn angular_distance(a: f64, b: f64) -> f64 {
    shortest_delta(a, b).abs()
}

// ============================================================================
// Azimuth Extraction
// ============================================================================

/// Compass azimuth of a sample in `[0, 360)`, or `None` if undecidable.
pub fn azimuth_deg(sample: &HeadingSample) -> Option<f64> {
    let rad = match *sample {
        HeadingSample::RotationVector { x, y, z, w } => azimuth_from_rotation_vector(x, y, z, w)?,
        HeadingSample::AccelMag { gravity, geomagnetic } => {
            azimuth_from_accel_mag(gravity, geomagnetic)?
        }
    };
    let deg = rad.to_degrees();
    deg.is_finite().then(|| normalize_deg(deg))
}

/// Azimuth (radians) from a rotation vector.
///
/// Builds the row-major rotation matrix `R` from the quaternion and returns
/// `atan2(R[0][1], R[1][1])`.
fn azimuth_from_rotation_vector(x: f64, y: f64, z: f64, w: Option<f64>) -> Option<f64> {
    if !(x.is_finite() && y.is_finite() && z.is_finite()) {
        return None;
    }
    let w = match w {
        Some(w) if w.is_finite() => w,
        Some(_) => return None,
        None => (1.0 - x * x - y * y - z * z).max(0.0).sqrt(),
    };

    let r01 = 2.0 * x * y - 2.0 * z * w;
    let r11 = 1.0 - 2.0 * x * x - 2.0 * z * z;
    Some(r01.atan2(r11))
}

/// Azimuth (radians) from gravity and geomagnetic vectors.
///
/// `H = E × A` points east, `M = A × H` points magnetic north; the azimuth is
/// `atan2(H_y, M_y)`. Fails when `|H|` is too small (free fall, or field
/// parallel to gravity near the magnetic poles).
fn azimuth_from_accel_mag(gravity: [f64; 3], geomagnetic: [f64; 3]) -> Option<f64> {
    let [ax, ay, az] = gravity;
    let [ex, ey, ez] = geomagnetic;

    let hx = ey * az - ez * ay;
    let hy = ez * ax - ex * az;
    let hz = ex * ay - ey * ax;
    let norm_h = (hx * hx + hy * hy + hz * hz).sqrt();
    let norm_a = (ax * ax + ay * ay + az * az).sqrt();
    if !norm_h.is_finite() || norm_h < MIN_CROSS_PRODUCT_NORM || norm_a == 0.0 {
        return None;
    }

    let (hx, hy, hz) = (hx / norm_h, hy / norm_h, hz / norm_h);
    let (ax, az) = (ax / norm_a, az / norm_a);
    let my = az * hx - ax * hz;
    Some(hy.atan2(my))
}

// ============================================================================
// Sample Builders
// ============================================================================

/// Rotation vector of a device lying flat with its top edge at `azimuth_deg`.
pub fn rotation_vector_for_azimuth(azimuth_deg: f64) -> HeadingSample {
    // Azimuth is measured clockwise; the device yaw is counter-clockwise.
    let half = -azimuth_deg.to_radians() / 2.0;
    HeadingSample::RotationVector {
        x: 0.0,
        y: 0.0,
        z: half.sin(),
        w: Some(half.cos()),
    }
}

/// Accelerometer + magnetometer pair of a flat device at `azimuth_deg`.
///
/// Uses a 22 µT horizontal / 40 µT vertical field, typical mid-latitude values.
pub fn accel_mag_for_azimuth(azimuth_deg: f64) -> HeadingSample {
    let a = azimuth_deg.to_radians();
    HeadingSample::AccelMag {
        gravity: [0.0, 0.0, 9.81],
        geomagnetic: [-22.0 * a.sin(), 22.0 * a.cos(), -40.0],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fusion() -> HeadingFusion {
        HeadingFusion::new(&HeadingConfig::default())
    }

    fn assert_close(actual: f64, expected: f64, tol: f64) {
        assert!(
            angular_distance(actual, expected) <= tol,
            "expected {expected}°, got {actual}°"
        );
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_deg(-10.0), 350.0);
        assert_eq!(normalize_deg(720.0), 0.0);
        assert_eq!(normalize_deg(359.5), 359.5);
        assert_eq!(normalize_deg(-1e-15), 0.0);
    }

    #[test]
    fn test_shortest_delta_crosses_north() {
        assert_eq!(shortest_delta(358.0, 2.0), 4.0);
        assert_eq!(shortest_delta(2.0, 358.0), -4.0);
        assert_eq!(shortest_delta(90.0, 270.0), -180.0);
        assert_eq!(shortest_delta(10.0, 10.0), 0.0);
    }

    #[test]
    fn test_rotation_vector_azimuth() {
        for az in [0.0, 45.0, 90.0, 180.0, 270.0, 359.0] {
            let got = azimuth_deg(&rotation_vector_for_azimuth(az)).unwrap();
            assert_close(got, az, 1e-9);
        }
    }

    #[test]
    fn test_rotation_vector_without_scalar() {
        let HeadingSample::RotationVector { x, y, z, .. } = rotation_vector_for_azimuth(120.0) else {
            unreachable!()
        };
        let got = azimuth_deg(&HeadingSample::RotationVector { x, y, z, w: None }).unwrap();
        assert_close(got, 120.0, 1e-6);
    }

    #[test]
    fn test_accel_mag_azimuth() {
        for az in [0.0, 30.0, 90.0, 200.0, 300.0] {
            let got = azimuth_deg(&accel_mag_for_azimuth(az)).unwrap();
            assert_close(got, az, 1e-9);
        }
    }

    #[test]
    fn test_accel_mag_free_fall_rejected() {
        let sample = HeadingSample::AccelMag {
            gravity: [0.0, 0.0, 0.0],
            geomagnetic: [0.0, 22.0, -40.0],
        };
        assert!(azimuth_deg(&sample).is_none());
    }

    #[test]
    fn test_first_sample_seeds_and_emits() {
        let mut f = fusion();
        let out = f.update(&rotation_vector_for_azimuth(123.0)).unwrap();
        assert_close(out.degrees, 123.0, 1e-9);
    }

    #[test]
    fn test_wraparound_sequence_takes_short_path() {
        let mut f = fusion();
        let mut unwrapped = Vec::new();
        for raw in [358.0, 2.0, 359.0, 1.0] {
            f.update(&rotation_vector_for_azimuth(raw));
            let theta = f.heading().unwrap().degrees;
            // Never anywhere near the far side of the circle.
            assert!(angular_distance(theta, 0.0) < 5.0, "theta strayed to {theta}");
            unwrapped.push(if theta < 180.0 { theta + 360.0 } else { theta });
        }
        for pair in unwrapped.windows(2) {
            assert!(pair[1] >= pair[0], "not monotonic toward 360: {unwrapped:?}");
        }
    }

    #[test]
    fn test_converges_across_north() {
        let mut f = fusion();
        f.update(&rotation_vector_for_azimuth(350.0));
        for _ in 0..200 {
            f.update(&rotation_vector_for_azimuth(10.0));
            let theta = f.heading().unwrap().degrees;
            assert!(theta >= 350.0 || theta <= 10.0 + 1e-9, "went the long way: {theta}");
        }
        assert_close(f.heading().unwrap().degrees, 10.0, 0.01);
    }

    #[test]
    fn test_emission_gate() {
        let mut f = fusion();
        assert!(f.update(&rotation_vector_for_azimuth(90.0)).is_some());
        // 4° raw change → 0.2° smoothed, below the 0.5° gate
        assert!(f.update(&rotation_vector_for_azimuth(94.0)).is_none());
        // Slow drift never emits: every single step stays under the gate
        for _ in 0..30 {
            assert!(f.update(&rotation_vector_for_azimuth(96.0)).is_none());
        }
        let drifted = f.heading().unwrap().degrees;
        assert!(drifted > 92.0, "theta should still track the input: {drifted}");
        // 30° jump → 1.5° step, emitted
        let out = f.update(&rotation_vector_for_azimuth(drifted + 30.0)).unwrap();
        assert_close(out.degrees, drifted + 1.5, 1e-6);
    }

    #[test]
    fn test_gate_measures_step_across_north() {
        let mut f = fusion();
        f.update(&rotation_vector_for_azimuth(359.8));
        // 359.8 → 359.8 + 0.05·20.2 = 0.81°: a 1.01° step, not 359°
        let out = f.update(&rotation_vector_for_azimuth(20.0)).unwrap();
        assert_close(out.degrees, 0.81, 1e-6);
        // 0.81 → 0.81 + 0.05·(-1.61) ≈ 0.73°: a 0.08° step
        assert!(f.update(&rotation_vector_for_azimuth(359.2)).is_none());
    }

    #[test]
    fn test_reset_reseeds() {
        let mut f = fusion();
        f.update(&rotation_vector_for_azimuth(10.0));
        f.update(&rotation_vector_for_azimuth(12.0));
        f.reset();
        assert!(f.heading().is_none());
        assert_eq!(f.samples_used(), 0);
        let out = f.update(&rotation_vector_for_azimuth(200.0)).unwrap();
        assert_close(out.degrees, 200.0, 1e-9);
    }

    #[test]
    fn test_both_inputs_share_state() {
        let mut f = fusion();
        f.update(&rotation_vector_for_azimuth(180.0));
        f.update(&accel_mag_for_azimuth(200.0));
        assert_close(f.heading().unwrap().degrees, 181.0, 1e-6);
    }

    #[test]
    fn test_unusable_sample_ignored() {
        let mut f = fusion();
        let bad = HeadingSample::RotationVector { x: f64::NAN, y: 0.0, z: 0.0, w: None };
        assert!(f.update(&bad).is_none());
        assert!(f.heading().is_none());
        assert_eq!(f.samples_used(), 0);
    }
}
