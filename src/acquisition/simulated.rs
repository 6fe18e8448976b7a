//! Simulated positioning and orientation hardware
//!
//! Produces a courier driving a slowly curving route with receiver jitter,
//! plus matching orientation samples. Used by the binary when no real feed is
//! attached, and by tests that need a live, cancellable source.

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::sensors::{OrientationSensors, SensorError};
use super::source::{AcquisitionError, PositionEvent, PositionSource, PositionStream, SamplingRequest};
use crate::processing::heading_fusion::{accel_mag_for_azimuth, rotation_vector_for_azimuth};
use crate::types::{HeadingSample, PositionFix, SensorKind};

/// Meters per degree of latitude.
const METERS_PER_DEG: f64 = 111_320.0;

/// Shared route state so position and orientation stay consistent.
#[derive(Debug)]
struct Route {
    latitude: f64,
    longitude: f64,
    course_deg: f64,
}

// ============================================================================
// Position Source
// ============================================================================

/// Parameters of the simulated drive.
#[derive(Debug, Clone)]
pub struct SimulationParams {
    pub start_latitude: f64,
    pub start_longitude: f64,
    /// Ground speed (m/s); 0 simulates a parked courier.
    pub speed_mps: f64,
    /// Course change per fix (degrees).
    pub turn_rate_deg: f64,
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            start_latitude: 12.9716,
            start_longitude: 77.5946,
            speed_mps: 8.0,
            turn_rate_deg: 2.0,
        }
    }
}

/// Random-walk GNSS receiver.
///
/// The capability flag can be flipped at runtime with
/// [`set_enabled`](Self::set_enabled) to exercise revocation handling.
pub struct SimulatedSource {
    params: SimulationParams,
    enabled: Arc<AtomicBool>,
    route: Arc<Mutex<Route>>,
}

impl SimulatedSource {
    pub fn new(params: SimulationParams) -> Self {
        let route = Route {
            latitude: params.start_latitude,
            longitude: params.start_longitude,
            course_deg: 0.0,
        };
        Self {
            params,
            enabled: Arc::new(AtomicBool::new(true)),
            route: Arc::new(Mutex::new(route)),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Orientation hardware that follows this source's course.
    pub fn sensors(&self, available: &[SensorKind]) -> SimulatedSensors {
        SimulatedSensors {
            available: available.to_vec(),
            route: Arc::clone(&self.route),
            feeds: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl PositionSource for SimulatedSource {
    fn positioning_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn begin_sampling(
        &self,
        request: SamplingRequest,
    ) -> Result<Box<dyn PositionStream>, AcquisitionError> {
        if !self.positioning_enabled() {
            return Err(AcquisitionError::Unavailable);
        }
        let period = request.interval_ms.max(request.min_interval_ms).max(1);
        let mut ticker = tokio::time::interval(Duration::from_millis(period));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        Ok(Box::new(SimulatedStream {
            params: self.params.clone(),
            enabled: Arc::clone(&self.enabled),
            route: Arc::clone(&self.route),
            ticker,
            period_s: period as f64 / 1_000.0,
            jitter_m: if request.high_accuracy { 3.0 } else { 25.0 },
            stopped: false,
        }))
    }

    fn source_name(&self) -> &str {
        "simulated"
    }
}

struct SimulatedStream {
    params: SimulationParams,
    enabled: Arc<AtomicBool>,
    route: Arc<Mutex<Route>>,
    ticker: tokio::time::Interval,
    period_s: f64,
    jitter_m: f64,
    stopped: bool,
}

#[async_trait]
impl PositionStream for SimulatedStream {
    async fn next_event(&mut self) -> Result<PositionEvent, AcquisitionError> {
        if self.stopped {
            return Ok(PositionEvent::Ended);
        }
        self.ticker.tick().await;
        if !self.enabled.load(Ordering::SeqCst) {
            return Ok(PositionEvent::Unavailable);
        }

        let mut rng = rand::thread_rng();
        let mut route = self.route.lock().unwrap_or_else(|e| e.into_inner());

        let step_m = self.params.speed_mps * self.period_s;
        let course = route.course_deg.to_radians();
        let lat_scale = route.latitude.to_radians().cos().max(1e-6);
        route.latitude += step_m * course.cos() / METERS_PER_DEG;
        route.longitude += step_m * course.sin() / (METERS_PER_DEG * lat_scale);
        route.course_deg = (route.course_deg + self.params.turn_rate_deg).rem_euclid(360.0);

        let jitter_lat = rng.gen_range(-self.jitter_m..=self.jitter_m) / METERS_PER_DEG;
        let jitter_lon = rng.gen_range(-self.jitter_m..=self.jitter_m) / METERS_PER_DEG;

        let fix = PositionFix {
            latitude: route.latitude + jitter_lat,
            longitude: route.longitude + jitter_lon,
            accuracy_m: self.jitter_m,
            motion_heading_deg: (self.params.speed_mps > 0.0).then_some(route.course_deg),
            captured_at: Utc::now(),
        };
        Ok(PositionEvent::Fix(fix))
    }

    async fn shutdown(&mut self) -> Result<(), AcquisitionError> {
        self.stopped = true;
        Ok(())
    }
}

// ============================================================================
// Orientation Sensors
// ============================================================================

/// Sample period of the simulated orientation sensors.
const SENSOR_PERIOD: Duration = Duration::from_millis(100);

/// Orientation sensors that report the route course plus hand tremor.
pub struct SimulatedSensors {
    available: Vec<SensorKind>,
    route: Arc<Mutex<Route>>,
    feeds: Mutex<HashMap<SensorKind, CancellationToken>>,
}

impl SimulatedSensors {
    /// Number of sensor families currently registered.
    pub fn active_feeds(&self) -> usize {
        self.feeds.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl OrientationSensors for SimulatedSensors {
    fn is_available(&self, kind: SensorKind) -> bool {
        self.available.contains(&kind)
    }

    fn register(&self, kind: SensorKind) -> Result<mpsc::Receiver<HeadingSample>, SensorError> {
        if !self.is_available(kind) {
            return Err(SensorError::Unavailable(kind));
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| SensorError::Registration {
            kind,
            reason: e.to_string(),
        })?;

        let (tx, rx) = mpsc::channel(16);
        let token = CancellationToken::new();
        if let Some(old) = self
            .feeds
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(kind, token.clone())
        {
            old.cancel();
        }

        let route = Arc::clone(&self.route);
        runtime.spawn(async move {
            let mut ticker = tokio::time::interval(SENSOR_PERIOD);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let course = route.lock().unwrap_or_else(|e| e.into_inner()).course_deg;
                        let tremor = rand::thread_rng().gen_range(-3.0..=3.0);
                        let sample = match kind {
                            SensorKind::RotationVector => rotation_vector_for_azimuth(course + tremor),
                            SensorKind::AccelMag => accel_mag_for_azimuth(course + tremor),
                        };
                        // A full channel means the consumer is behind; drop the sample.
                        if tx.try_send(sample).is_err() && tx.is_closed() {
                            break;
                        }
                    }
                }
            }
            debug!(sensor = %kind, "Simulated sensor feed stopped");
        });

        Ok(rx)
    }

    fn unregister(&self, kind: SensorKind) {
        if let Some(token) = self
            .feeds
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&kind)
        {
            token.cancel();
        }
    }
}
