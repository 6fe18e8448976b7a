//! Publish pipeline
//!
//! Fire-and-forget delivery of accepted fixes. Every fix becomes its own
//! short task: one primary attempt, then exactly one fallback attempt if the
//! primary fails. Tasks are bounded by a semaphore; when all permits are taken
//! the new fix is dropped, since the next fix supersedes it anyway.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::client::LocationReporter;
use super::types::{DeliveryOutcome, DeliveryStats, Endpoint, LocationUpdate};
use crate::config::defaults::DELIVERY_OUTCOME_CAPACITY;
use crate::types::DeliveryRequest;

#[derive(Default)]
struct Counters {
    enqueued: AtomicU64,
    delivered_primary: AtomicU64,
    delivered_fallback: AtomicU64,
    failed: AtomicU64,
    saturated: AtomicU64,
    cancelled: AtomicU64,
}

impl Counters {
    fn record(&self, outcome: &DeliveryOutcome) {
        let counter = match outcome {
            DeliveryOutcome::Delivered { via: Endpoint::Primary, .. } => &self.delivered_primary,
            DeliveryOutcome::Delivered { via: Endpoint::Fallback, .. } => &self.delivered_fallback,
            DeliveryOutcome::Failed { .. } => &self.failed,
            DeliveryOutcome::Saturated { .. } => &self.saturated,
            DeliveryOutcome::Cancelled { .. } => &self.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> DeliveryStats {
        DeliveryStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            delivered_primary: self.delivered_primary.load(Ordering::Relaxed),
            delivered_fallback: self.delivered_fallback.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            saturated: self.saturated.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }
}

pub struct PublishPipeline {
    primary: Arc<dyn LocationReporter>,
    fallback: Arc<dyn LocationReporter>,
    status: Option<String>,
    max_in_flight: usize,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    cancel: Mutex<CancellationToken>,
    outcomes: broadcast::Sender<DeliveryOutcome>,
    counters: Arc<Counters>,
}

impl PublishPipeline {
    pub fn new(
        primary: Arc<dyn LocationReporter>,
        fallback: Arc<dyn LocationReporter>,
        status: Option<String>,
        max_in_flight: usize,
    ) -> Self {
        let max_in_flight = max_in_flight.max(1);
        let (outcomes, _) = broadcast::channel(DELIVERY_OUTCOME_CAPACITY);
        Self {
            primary,
            fallback,
            status,
            max_in_flight,
            permits: Arc::new(Semaphore::new(max_in_flight)),
            tracker: TaskTracker::new(),
            cancel: Mutex::new(CancellationToken::new()),
            outcomes,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Hand a fix to the pipeline. Returns immediately.
    ///
    /// Returns `false` when the fix was dropped because the pipeline is
    /// saturated. Must be called from within a tokio runtime.
    pub fn enqueue(&self, request: DeliveryRequest) -> bool {
        self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        let session_id = request.session.session_id;
        let order_id = request.session.order_id;

        let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
            debug!(
                %session_id,
                max_in_flight = self.max_in_flight,
                "[PublishPipeline] Saturated, dropping fix"
            );
            self.finish(DeliveryOutcome::Saturated { session_id, order_id });
            return false;
        };

        let update = LocationUpdate::from_request(&request, self.status.as_deref());
        let primary = Arc::clone(&self.primary);
        let fallback = Arc::clone(&self.fallback);
        let cancel = self.cancel.lock().unwrap_or_else(|e| e.into_inner()).clone();
        let outcomes = self.outcomes.clone();
        let counters = Arc::clone(&self.counters);

        self.tracker.spawn(async move {
            let _permit = permit;
            let outcome = tokio::select! {
                _ = cancel.cancelled() => DeliveryOutcome::Cancelled { session_id, order_id },
                outcome = deliver(primary.as_ref(), fallback.as_ref(), &update, session_id) => outcome,
            };
            counters.record(&outcome);
            let _ = outcomes.send(outcome);
        });
        true
    }

    /// Observe the terminal outcome of every enqueued fix.
    pub fn subscribe_outcomes(&self) -> broadcast::Receiver<DeliveryOutcome> {
        self.outcomes.subscribe()
    }

    pub fn stats(&self) -> DeliveryStats {
        self.counters.snapshot()
    }

    /// Deliveries currently running.
    pub fn in_flight(&self) -> usize {
        self.max_in_flight - self.permits.available_permits()
    }

    /// Cancel in-flight attempts and wait for their tasks to exit.
    ///
    /// The pipeline accepts new fixes again afterwards.
    pub async fn shutdown(&self) {
        let token = {
            let mut cancel = self.cancel.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *cancel, CancellationToken::new())
        };
        token.cancel();

        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();

        let stats = self.stats();
        info!(
            delivered = stats.delivered(),
            failed = stats.failed,
            saturated = stats.saturated,
            cancelled = stats.cancelled,
            "[PublishPipeline] Shut down"
        );
    }

    fn finish(&self, outcome: DeliveryOutcome) {
        self.counters.record(&outcome);
        let _ = self.outcomes.send(outcome);
    }
}

/// Primary attempt, then one fallback attempt.
async fn deliver(
    primary: &dyn LocationReporter,
    fallback: &dyn LocationReporter,
    update: &LocationUpdate,
    session_id: uuid::Uuid,
) -> DeliveryOutcome {
    let order_id = update.order_id;

    let primary_error = match primary.report(update).await {
        Ok(()) => {
            return DeliveryOutcome::Delivered {
                session_id,
                order_id,
                via: Endpoint::Primary,
            }
        }
        Err(e) => e,
    };
    debug!(
        endpoint = primary.endpoint(),
        error = %primary_error,
        "[PublishPipeline] Primary failed, trying fallback"
    );

    match fallback.report(update).await {
        Ok(()) => DeliveryOutcome::Delivered {
            session_id,
            order_id,
            via: Endpoint::Fallback,
        },
        Err(fallback_error) => {
            warn!(
                %session_id,
                order_id,
                primary_error = %primary_error,
                fallback_error = %fallback_error,
                "[PublishPipeline] Both endpoints failed, dropping fix"
            );
            DeliveryOutcome::Failed {
                session_id,
                order_id,
                primary_error: primary_error.to_string(),
                fallback_error: fallback_error.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::DeliveryError;
    use crate::types::{ActorRole, PositionFix, SessionContext};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use uuid::Uuid;

    enum Behavior {
        Accept,
        Reject,
        Hang,
    }

    struct FakeReporter {
        behavior: Behavior,
        calls: AtomicUsize,
    }

    impl FakeReporter {
        fn new(behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LocationReporter for FakeReporter {
        async fn report(&self, _update: &LocationUpdate) -> Result<(), DeliveryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Accept => Ok(()),
                Behavior::Reject => Err(DeliveryError::Rejected {
                    message: "nope".to_string(),
                }),
                Behavior::Hang => std::future::pending().await,
            }
        }

        fn endpoint(&self) -> &str {
            "fake"
        }
    }

    fn request() -> DeliveryRequest {
        DeliveryRequest {
            fix: PositionFix::new(12.9716, 77.5946),
            heading_deg: Some(90.0),
            session: SessionContext {
                session_id: Uuid::new_v4(),
                order_id: 42,
                reporter_id: 7,
                role: ActorRole::Delivery,
            },
        }
    }

    async fn next_outcome(rx: &mut broadcast::Receiver<DeliveryOutcome>) -> DeliveryOutcome {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("outcome timed out")
            .unwrap()
    }

    #[tokio::test]
    async fn test_primary_success_skips_fallback() {
        let primary = FakeReporter::new(Behavior::Accept);
        let fallback = FakeReporter::new(Behavior::Accept);
        let pipeline = PublishPipeline::new(primary.clone(), fallback.clone(), None, 4);
        let mut rx = pipeline.subscribe_outcomes();

        assert!(pipeline.enqueue(request()));
        let outcome = next_outcome(&mut rx).await;
        assert!(matches!(outcome, DeliveryOutcome::Delivered { via: Endpoint::Primary, .. }));
        assert_eq!(primary.calls(), 1);
        assert_eq!(fallback.calls(), 0);
    }

    #[tokio::test]
    async fn test_fallback_exactly_once() {
        let primary = FakeReporter::new(Behavior::Reject);
        let fallback = FakeReporter::new(Behavior::Accept);
        let pipeline = PublishPipeline::new(primary.clone(), fallback.clone(), None, 4);
        let mut rx = pipeline.subscribe_outcomes();

        pipeline.enqueue(request());
        let outcome = next_outcome(&mut rx).await;
        assert!(matches!(outcome, DeliveryOutcome::Delivered { via: Endpoint::Fallback, .. }));
        assert_eq!(primary.calls(), 1);
        assert_eq!(fallback.calls(), 1);
        assert_eq!(pipeline.stats().delivered_fallback, 1);
    }

    #[tokio::test]
    async fn test_both_fail_drops_fix() {
        let primary = FakeReporter::new(Behavior::Reject);
        let fallback = FakeReporter::new(Behavior::Reject);
        let pipeline = PublishPipeline::new(primary.clone(), fallback.clone(), None, 4);
        let mut rx = pipeline.subscribe_outcomes();

        pipeline.enqueue(request());
        match next_outcome(&mut rx).await {
            DeliveryOutcome::Failed { primary_error, .. } => assert!(primary_error.contains("nope")),
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(primary.calls(), 1);
        assert_eq!(fallback.calls(), 1);
        assert_eq!(pipeline.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_saturation_drops_new_fix() {
        let primary = FakeReporter::new(Behavior::Hang);
        let fallback = FakeReporter::new(Behavior::Accept);
        let pipeline = PublishPipeline::new(primary.clone(), fallback, None, 2);
        let mut rx = pipeline.subscribe_outcomes();

        assert!(pipeline.enqueue(request()));
        assert!(pipeline.enqueue(request()));
        assert!(!pipeline.enqueue(request()));
        assert_eq!(pipeline.in_flight(), 2);
        assert!(matches!(next_outcome(&mut rx).await, DeliveryOutcome::Saturated { .. }));

        pipeline.shutdown().await;
        let stats = pipeline.stats();
        assert_eq!(stats.enqueued, 3);
        assert_eq!(stats.saturated, 1);
        assert_eq!(stats.cancelled, 2);
        assert_eq!(pipeline.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_reusable_after_shutdown() {
        let pipeline = PublishPipeline::new(
            FakeReporter::new(Behavior::Accept),
            FakeReporter::new(Behavior::Accept),
            Some("out_for_delivery".to_string()),
            1,
        );
        pipeline.shutdown().await;

        let mut rx = pipeline.subscribe_outcomes();
        assert!(pipeline.enqueue(request()));
        assert!(next_outcome(&mut rx).await.is_delivered());
    }
}
