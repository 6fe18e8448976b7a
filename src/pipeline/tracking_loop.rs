//! Supervisory tracking loop
//!
//! One loop per session. It is the only writer of the live broadcast and the
//! only producer for the publish pipeline while the session is active:
//!
//! ```text
//! PositionStream ─► MotionNoiseFilter ─► LiveStateBroadcast (sync)
//!                                    └─► PublishPipeline    (spawned)
//! SensorRegistration ─► HeadingFusion ─► LiveStateBroadcast
//! ```
//!
//! Filtering and broadcast happen in emission order on this task; only the
//! network delivery is handed off.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::live_state::LiveStateBroadcast;
use crate::acquisition::{AcquisitionError, PositionEvent, PositionStream, SensorRegistration};
use crate::delivery::PublishPipeline;
use crate::processing::{HeadingFusion, MotionNoiseFilter};
use crate::types::{DeliveryRequest, HeadingSample, PositionFix, SessionContext};

/// Why the loop stopped.
#[derive(Debug)]
pub enum LoopExit {
    /// Stop was requested.
    Cancelled,
    /// The source has no more fixes.
    Ended,
    /// Positioning was switched off mid-session.
    Revoked,
    /// The source failed.
    SourceError(AcquisitionError),
}

impl LoopExit {
    /// Whether the session ended without being asked to.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, LoopExit::Cancelled)
    }
}

impl std::fmt::Display for LoopExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopExit::Cancelled => write!(f, "stop requested"),
            LoopExit::Ended => write!(f, "position source ended"),
            LoopExit::Revoked => write!(f, "positioning revoked"),
            LoopExit::SourceError(e) => write!(f, "position source failed: {e}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub fixes_received: u64,
    pub fixes_accepted: u64,
    pub fixes_rejected: u64,
    pub heading_updates: u64,
}

pub struct TrackingLoop {
    session: SessionContext,
    filter: MotionNoiseFilter,
    fusion: HeadingFusion,
    live: LiveStateBroadcast,
    pipeline: Arc<PublishPipeline>,
    cancel_token: CancellationToken,
    last_accepted: Option<PositionFix>,
    heading_deg: Option<f64>,
    stats: LoopStats,
}

impl TrackingLoop {
    pub fn new(
        session: SessionContext,
        filter: MotionNoiseFilter,
        fusion: HeadingFusion,
        live: LiveStateBroadcast,
        pipeline: Arc<PublishPipeline>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            session,
            filter,
            fusion,
            live,
            pipeline,
            cancel_token,
            last_accepted: None,
            heading_deg: None,
            stats: LoopStats::default(),
        }
    }

    /// Drive the session until cancellation or a source failure.
    ///
    /// The stream is always shut down and the sensors always unregistered
    /// before this returns.
    pub async fn run(
        mut self,
        mut stream: Box<dyn PositionStream>,
        mut sensors: Option<SensorRegistration>,
    ) -> (LoopExit, LoopStats) {
        info!(
            session_id = %self.session.session_id,
            order_id = self.session.order_id,
            role = %self.session.role,
            heading = sensors.as_ref().map(|s| s.kind().to_string()).unwrap_or_else(|| "none".into()),
            "[TrackingLoop] Started"
        );

        let exit = loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    debug!("[TrackingLoop] Shutdown signal received");
                    break LoopExit::Cancelled;
                }
                result = stream.next_event() => {
                    match result {
                        Ok(PositionEvent::Fix(fix)) => self.on_fix(fix),
                        Ok(PositionEvent::Unavailable) => break LoopExit::Revoked,
                        Ok(PositionEvent::Ended) => break LoopExit::Ended,
                        Err(e) => break LoopExit::SourceError(e),
                    }
                }
                sample = next_sample(&mut sensors) => {
                    match sample {
                        Some(sample) => self.on_heading_sample(&sample),
                        None => sensors = sensors.take().and_then(fall_back),
                    }
                }
            }
        };

        // Teardown: each step independent of the others.
        if let Some(mut registration) = sensors.take() {
            registration.close();
        }
        if let Err(e) = stream.shutdown().await {
            warn!(error = %e, "[TrackingLoop] Position stream shutdown failed");
        }

        if exit.is_fatal() {
            warn!(session_id = %self.session.session_id, reason = %exit, "[TrackingLoop] Exited");
        } else {
            info!(session_id = %self.session.session_id, reason = %exit, "[TrackingLoop] Exited");
        }
        info!(
            received = self.stats.fixes_received,
            accepted = self.stats.fixes_accepted,
            rejected = self.stats.fixes_rejected,
            heading_updates = self.stats.heading_updates,
            "[TrackingLoop] Final statistics"
        );

        (exit, self.stats)
    }

    fn on_fix(&mut self, fix: PositionFix) {
        self.stats.fixes_received += 1;

        if !fix.is_valid() {
            warn!(
                latitude = fix.latitude,
                longitude = fix.longitude,
                "[TrackingLoop] Ignoring out-of-range fix"
            );
            self.stats.fixes_rejected += 1;
            return;
        }
        if !self.filter.accept(&fix, self.last_accepted.as_ref()) {
            self.stats.fixes_rejected += 1;
            return;
        }

        self.stats.fixes_accepted += 1;
        self.last_accepted = Some(fix);

        let heading = self.heading_deg.or(fix.motion_heading_deg);
        self.live.publish(Some(fix), heading.unwrap_or(0.0));
        self.pipeline.enqueue(DeliveryRequest {
            fix,
            heading_deg: heading,
            session: self.session,
        });
    }

    fn on_heading_sample(&mut self, sample: &HeadingSample) {
        if let Some(smoothed) = self.fusion.update(sample) {
            self.stats.heading_updates += 1;
            self.heading_deg = Some(smoothed.degrees);
            self.live.publish(self.last_accepted, smoothed.degrees);
        }
    }
}

/// Swap a sensor family that stopped delivering for the next one, if any.
fn fall_back(mut quiet: SensorRegistration) -> Option<SensorRegistration> {
    quiet.close();
    match quiet.open_fallback() {
        Ok(next) => {
            info!(from = %quiet.kind(), to = %next.kind(), "[TrackingLoop] Orientation sensor went quiet, switched");
            Some(next)
        }
        Err(e) => {
            warn!(error = %e, "[TrackingLoop] No orientation sensor left, continuing without heading");
            None
        }
    }
}

/// Next orientation sample, or never when no sensor is registered.
async fn next_sample(sensors: &mut Option<SensorRegistration>) -> Option<HeadingSample> {
    match sensors.as_mut() {
        Some(registration) => registration.recv().await,
        None => std::future::pending().await,
    }
}
