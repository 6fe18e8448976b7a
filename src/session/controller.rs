//! Tracking session controller
//!
//! Explicit state machine over one tracking session at a time:
//!
//! ```text
//! Idle ─► Starting ─► Active ─► Stopping ─► Idle
//!            └─► Failed ─► Idle
//! ```
//!
//! `start` checks preconditions, acquires the power resource, opens the
//! position stream and orientation sensors, then spawns the tracking loop.
//! The start/stop lock is not held while the position source starts, so a
//! `stop` issued meanwhile cancels the pending start and releases at once.
//! The loop task tears its own session down (pipeline, broadcast, resource)
//! when it exits, whether it was cancelled by `stop` or died on its own.
//! `stop` cancels, waits a bounded time, and falls back to aborting the task
//! and tearing down itself. The resource is always the last thing released.

use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::error::StartError;
use crate::acquisition::{AcquisitionError, OrientationSensors, PositionSource, SensorRegistration};
use crate::config::defaults::STOP_JOIN_TIMEOUT_MS;
use crate::config::TrackingConfig;
use crate::delivery::{LocationReporter, PublishPipeline};
use crate::lifecycle::{ResourceHandle, ResourceLifecycleManager};
use crate::pipeline::{LiveStateBroadcast, LoopExit, TrackingLoop};
use crate::processing::{HeadingFusion, MotionNoiseFilter};
use crate::types::{ActorRole, SessionState, TrackingSession};

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// `stop()` was called.
    Stopped,
    /// The session terminated on its own (source ended, revoked or failed).
    Failed { reason: String },
}

/// External collaborators of the controller.
pub struct Collaborators {
    pub source: Arc<dyn PositionSource>,
    pub sensors: Arc<dyn OrientationSensors>,
    pub resources: Arc<ResourceLifecycleManager>,
    pub live: LiveStateBroadcast,
    pub primary: Arc<dyn LocationReporter>,
    pub fallback: Arc<dyn LocationReporter>,
}

struct ActiveSession {
    session_id: Uuid,
    cancel: CancellationToken,
    task: JoinHandle<LoopExit>,
    resource: Arc<ResourceHandle>,
    ended: Arc<watch::Sender<Option<SessionEnd>>>,
}

enum Slot {
    /// Resource held, position source still starting.
    Starting {
        session_id: Uuid,
        cancel: CancellationToken,
        resource: Arc<ResourceHandle>,
    },
    Running(ActiveSession),
}

impl Slot {
    fn is_starting(&self, id: Uuid) -> bool {
        matches!(self, Slot::Starting { session_id, .. } if *session_id == id)
    }
}

struct Inner {
    config: TrackingConfig,
    role: ActorRole,
    source: Arc<dyn PositionSource>,
    sensors: Arc<dyn OrientationSensors>,
    resources: Arc<ResourceLifecycleManager>,
    live: LiveStateBroadcast,
    pipeline: Arc<PublishPipeline>,
    state_tx: watch::Sender<SessionState>,
    current: Mutex<Option<TrackingSession>>,
    /// Serializes start/stop. Never taken by the loop task.
    active: tokio::sync::Mutex<Option<Slot>>,
}

impl Inner {
    fn set_state(&self, next: SessionState) {
        let prev = *self.state_tx.borrow();
        if prev == next {
            return;
        }
        if !prev.can_transition_to(next) {
            warn!(from = %prev, to = %next, "[SessionController] Unexpected state transition");
        }
        if let Some(session) = self.current.lock().unwrap_or_else(|e| e.into_inner()).as_mut() {
            session.state = next;
        }
        self.state_tx.send_replace(next);
        debug!(from = %prev, to = %next, "[SessionController] State changed");
    }

    fn clear_current(&self) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    fn fail_start(&self, session_id: Uuid, err: StartError) -> StartError {
        if err.is_precondition() {
            warn!(%session_id, error = %err, "[SessionController] Start rejected");
        } else {
            error!(%session_id, error = %err, "[SessionController] Start failed");
        }
        self.set_state(SessionState::Failed);
        self.clear_current();
        self.set_state(SessionState::Idle);
        err
    }

    /// Pipeline, broadcast, then resource. Each step runs regardless of the others.
    async fn teardown(&self, resource: &ResourceHandle) {
        self.pipeline.shutdown().await;
        self.live.clear();
        resource.release();
    }
}

fn mark_ended(ended: &watch::Sender<Option<SessionEnd>>, end: SessionEnd) {
    ended.send_if_modified(|current| {
        if current.is_none() {
            *current = Some(end);
            true
        } else {
            false
        }
    });
}

/// Owns start/stop of live tracking for one actor role.
#[derive(Clone)]
pub struct TrackingSessionController {
    inner: Arc<Inner>,
}

impl TrackingSessionController {
    pub fn new(config: TrackingConfig, role: ActorRole, parts: Collaborators) -> Self {
        let profile = config.role(role);
        let pipeline = Arc::new(PublishPipeline::new(
            parts.primary,
            parts.fallback,
            profile.status.clone(),
            config.delivery.max_in_flight,
        ));
        let (state_tx, _) = watch::channel(SessionState::Idle);

        Self {
            inner: Arc::new(Inner {
                config,
                role,
                source: parts.source,
                sensors: parts.sensors,
                resources: parts.resources,
                live: parts.live,
                pipeline,
                state_tx,
                current: Mutex::new(None),
                active: tokio::sync::Mutex::new(None),
            }),
        }
    }

    pub fn role(&self) -> ActorRole {
        self.inner.role
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn current_session(&self) -> Option<TrackingSession> {
        self.inner.current.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn live(&self) -> &LiveStateBroadcast {
        &self.inner.live
    }

    pub fn pipeline(&self) -> &PublishPipeline {
        &self.inner.pipeline
    }

    /// Start tracking `order_id` on behalf of `reporter_id`.
    pub async fn start(&self, order_id: i64, reporter_id: i64) -> Result<SessionHandle, StartError> {
        let inner = &self.inner;
        let cancel = CancellationToken::new();

        let (session, resource) = {
            let mut active = inner.active.lock().await;

            match active.take() {
                Some(Slot::Starting { session_id, cancel, resource }) => {
                    *active = Some(Slot::Starting { session_id, cancel, resource });
                    return Err(StartError::SessionAlreadyActive { session_id });
                }
                Some(Slot::Running(previous)) => {
                    if !previous.task.is_finished() && self.current_session().is_some() {
                        let session_id = previous.session_id;
                        *active = Some(Slot::Running(previous));
                        return Err(StartError::SessionAlreadyActive { session_id });
                    }
                    self.reap(previous).await;
                }
                None => {}
            }

            let session = TrackingSession {
                session_id: Uuid::new_v4(),
                order_id,
                reporter_id,
                role: inner.role,
                state: SessionState::Starting,
                started_at: Utc::now(),
            };
            let session_id = session.session_id;
            *inner.current.lock().unwrap_or_else(|e| e.into_inner()) = Some(session.clone());
            inner.set_state(SessionState::Starting);
            info!(%session_id, order_id, reporter_id, role = %inner.role, "[SessionController] Starting session");

            if !inner.source.positioning_enabled() {
                return Err(inner.fail_start(session_id, StartError::PositioningDisabled));
            }

            let resource = match inner.resources.acquire(session_id) {
                Ok(handle) => Arc::new(handle),
                Err(e) => return Err(inner.fail_start(session_id, StartError::ResourceAcquisition(e))),
            };

            *active = Some(Slot::Starting {
                session_id,
                cancel: cancel.clone(),
                resource: Arc::clone(&resource),
            });
            (session, resource)
        };
        let session_id = session.session_id;

        let started = tokio::select! {
            _ = cancel.cancelled() => None,
            result = inner.source.begin_sampling(inner.config.sampling.request()) => Some(result),
        };

        let mut active = inner.active.lock().await;
        let still_ours = active.as_ref().is_some_and(|slot| slot.is_starting(session_id));
        if !still_ours {
            // `stop` took the slot and already reset the state.
            drop(active);
            info!(%session_id, "[SessionController] Start cancelled by stop");
            if let Some(Ok(mut stream)) = started {
                if let Err(e) = stream.shutdown().await {
                    warn!(error = %e, "[SessionController] Position stream shutdown failed");
                }
            }
            resource.release();
            return Err(StartError::Cancelled);
        }

        let stream = match started {
            Some(Ok(stream)) => stream,
            Some(Err(e)) => {
                *active = None;
                resource.release();
                let err = match e {
                    AcquisitionError::Unavailable => StartError::PositioningDisabled,
                    other => StartError::SourceStart(other),
                };
                return Err(inner.fail_start(session_id, err));
            }
            // Only `stop` cancels, and it takes the slot first.
            None => {
                *active = None;
                resource.release();
                return Err(inner.fail_start(session_id, StartError::Cancelled));
            }
        };

        let sensors = match SensorRegistration::open_preferred(Arc::clone(&inner.sensors)) {
            Ok(registration) => Some(registration),
            Err(e) => {
                warn!(error = %e, "[SessionController] No orientation sensor, tracking without heading");
                None
            }
        };

        let tracking = TrackingLoop::new(
            session.context(),
            MotionNoiseFilter::new(inner.config.min_movement_deg(inner.role)),
            HeadingFusion::new(&inner.config.heading),
            inner.live.clone(),
            Arc::clone(&inner.pipeline),
            cancel.clone(),
        );

        let (ended_tx, ended_rx) = watch::channel(None);
        let ended = Arc::new(ended_tx);

        // Before spawning: a loop that dies immediately moves Active → Stopping.
        inner.set_state(SessionState::Active);

        let task = {
            let inner = Arc::clone(inner);
            let resource = Arc::clone(&resource);
            let ended = Arc::clone(&ended);
            tokio::spawn(async move {
                let (exit, _stats) = tracking.run(stream, sensors).await;
                let fatal = exit.is_fatal();
                if fatal {
                    error!(%session_id, reason = %exit, "[SessionController] Session terminated abnormally");
                    inner.set_state(SessionState::Stopping);
                }
                inner.teardown(&resource).await;
                if fatal {
                    inner.clear_current();
                    inner.set_state(SessionState::Idle);
                    mark_ended(&ended, SessionEnd::Failed { reason: exit.to_string() });
                }
                exit
            })
        };

        *active = Some(Slot::Running(ActiveSession {
            session_id,
            cancel,
            task,
            resource,
            ended,
        }));
        info!(%session_id, source = inner.source.source_name(), "[SessionController] Session active");

        Ok(SessionHandle {
            session: TrackingSession {
                state: SessionState::Active,
                ..session
            },
            ended: ended_rx,
        })
    }

    /// Stop the current session. Idempotent; safe to call with no session.
    ///
    /// A session that is still starting is cancelled and its resource released
    /// without waiting for the position source.
    pub async fn stop(&self) {
        let mut active = self.inner.active.lock().await;
        match active.take() {
            Some(Slot::Starting {
                session_id,
                cancel,
                resource,
            }) => {
                info!(%session_id, "[SessionController] Stopping session that is still starting");
                self.inner.set_state(SessionState::Stopping);
                cancel.cancel();
                self.inner.live.clear();
                resource.release();
            }
            Some(Slot::Running(session)) => {
                info!(session_id = %session.session_id, "[SessionController] Stopping session");
                self.inner.set_state(SessionState::Stopping);
                self.reap(session).await;
            }
            None => debug!("[SessionController] Stop requested with no session"),
        }
        self.inner.clear_current();
        self.inner.set_state(SessionState::Idle);
    }

    /// Cancel and join a session task, tearing down by hand if it will not exit.
    async fn reap(&self, mut session: ActiveSession) {
        session.cancel.cancel();
        let timeout = Duration::from_millis(STOP_JOIN_TIMEOUT_MS);

        let clean = match tokio::time::timeout(timeout, &mut session.task).await {
            Ok(Ok(exit)) => {
                debug!(reason = %exit, "[SessionController] Tracking loop joined");
                true
            }
            Ok(Err(e)) => {
                error!(error = %e, "[SessionController] Tracking loop panicked");
                false
            }
            Err(_) => {
                warn!(
                    timeout_ms = STOP_JOIN_TIMEOUT_MS,
                    "[SessionController] Tracking loop did not exit in time, aborting"
                );
                session.task.abort();
                let _ = (&mut session.task).await;
                false
            }
        };

        if !clean {
            // The task never reached its own teardown.
            self.inner.teardown(&session.resource).await;
        }
        // Always last, idempotent if the task already released.
        session.resource.release();
        mark_ended(&session.ended, SessionEnd::Stopped);
    }
}

/// Caller's view of a started session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    session: TrackingSession,
    ended: watch::Receiver<Option<SessionEnd>>,
}

impl SessionHandle {
    pub fn session_id(&self) -> Uuid {
        self.session.session_id
    }

    pub fn order_id(&self) -> i64 {
        self.session.order_id
    }

    pub fn session(&self) -> &TrackingSession {
        &self.session
    }

    pub fn is_terminated(&self) -> bool {
        self.ended.borrow().is_some()
    }

    /// Resolve once the session has been fully torn down.
    pub async fn wait_terminated(&mut self) -> SessionEnd {
        match self.ended.wait_for(Option::is_some).await {
            Ok(end) => end.clone().unwrap_or(SessionEnd::Stopped),
            Err(_) => SessionEnd::Stopped,
        }
    }
}
