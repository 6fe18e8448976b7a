//! Orientation sensor subscriptions
//!
//! The platform sensor API is callback based; here a registration hands back a
//! channel of [`HeadingSample`]s instead, and [`SensorRegistration`] pairs
//! every `register` with exactly one `unregister` by owning the subscription.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::types::{HeadingSample, SensorKind};

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("{0} sensor is not available on this device")]
    Unavailable(SensorKind),

    #[error("failed to register {kind} sensor: {reason}")]
    Registration { kind: SensorKind, reason: String },
}

/// Platform sensor registration API.
pub trait OrientationSensors: Send + Sync + 'static {
    /// Whether the device exposes this sensor family at all.
    fn is_available(&self, kind: SensorKind) -> bool;

    /// Start delivering samples of `kind` into the returned channel.
    fn register(&self, kind: SensorKind) -> Result<mpsc::Receiver<HeadingSample>, SensorError>;

    /// Stop delivering samples of `kind`. Must tolerate a kind that is not registered.
    fn unregister(&self, kind: SensorKind);
}

/// Order in which sensor families are tried.
const PREFERENCE: [SensorKind; 2] = [SensorKind::RotationVector, SensorKind::AccelMag];

/// An open sensor subscription. Unregisters on [`close`](Self::close) or drop.
pub struct SensorRegistration {
    sensors: Arc<dyn OrientationSensors>,
    kind: SensorKind,
    rx: mpsc::Receiver<HeadingSample>,
    registered: bool,
}

impl SensorRegistration {
    /// Register the best available sensor family.
    ///
    /// The fused rotation vector is preferred; the accelerometer+magnetometer
    /// pair is the fallback. Fails only when neither can be registered.
    pub fn open_preferred(sensors: Arc<dyn OrientationSensors>) -> Result<Self, SensorError> {
        Self::open_first(sensors, &PREFERENCE)
    }

    /// Register the next family after this one, once this one went quiet.
    ///
    /// Call after [`close`](Self::close); the new registration shares the
    /// same platform API.
    pub fn open_fallback(&self) -> Result<Self, SensorError> {
        let remaining = match PREFERENCE.iter().position(|k| *k == self.kind) {
            Some(i) => &PREFERENCE[i + 1..],
            None => &[][..],
        };
        if remaining.is_empty() {
            return Err(SensorError::Unavailable(self.kind));
        }
        Self::open_first(Arc::clone(&self.sensors), remaining)
    }

    fn open_first(sensors: Arc<dyn OrientationSensors>, kinds: &[SensorKind]) -> Result<Self, SensorError> {
        let mut last_err = SensorError::Unavailable(SensorKind::AccelMag);

        for &kind in kinds {
            if !sensors.is_available(kind) {
                debug!(sensor = %kind, "Sensor not present, trying next");
                last_err = SensorError::Unavailable(kind);
                continue;
            }
            match sensors.register(kind) {
                Ok(rx) => {
                    if kind != PREFERENCE[0] {
                        info!(sensor = %kind, "Fused rotation unavailable, using fallback sensor pair");
                    }
                    return Ok(Self {
                        sensors,
                        kind,
                        rx,
                        registered: true,
                    });
                }
                Err(e) => {
                    warn!(sensor = %kind, error = %e, "Sensor registration failed");
                    last_err = e;
                }
            }
        }

        Err(last_err)
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    /// Next sample, or `None` once the platform stops delivering.
    pub async fn recv(&mut self) -> Option<HeadingSample> {
        self.rx.recv().await
    }

    /// Unregister now. Idempotent.
    pub fn close(&mut self) {
        if self.registered {
            self.registered = false;
            self.rx.close();
            self.sensors.unregister(self.kind);
            debug!(sensor = %self.kind, "Sensor unregistered");
        }
    }
}

impl Drop for SensorRegistration {
    fn drop(&mut self) {
        self.close();
    }
}
