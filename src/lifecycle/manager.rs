//! Resource lifecycle manager
//!
//! Owns the single power-retention resource of the process. Every successful
//! [`acquire`](ResourceLifecycleManager::acquire) is matched by exactly one
//! effective release, whichever comes first of:
//!
//! - an explicit [`ResourceHandle::release`] (graceful stop),
//! - the handle being dropped (abnormal termination, task abort),
//! - the max-hold watchdog firing.
//!
//! Each acquisition carries a generation number, so a late release from an
//! older handle can never free a newer holder's resource.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::provider::{ResourceError, WakeLockProvider, WakeLockToken};
use crate::config::LifecycleConfig;

/// Why a holder lost the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReleaseReason {
    Released,
    Dropped,
    Timeout,
    Replaced,
}

impl std::fmt::Display for ReleaseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReleaseReason::Released => "released",
            ReleaseReason::Dropped => "handle dropped",
            ReleaseReason::Timeout => "max hold exceeded",
            ReleaseReason::Replaced => "replaced by new session",
        };
        write!(f, "{s}")
    }
}

struct Holder {
    generation: u64,
    session_id: Uuid,
    token: WakeLockToken,
    acquired_at: Instant,
    watchdog: Option<CancellationToken>,
}

#[derive(Default)]
struct Slot {
    next_generation: u64,
    holder: Option<Holder>,
}

struct Shared {
    provider: Arc<dyn WakeLockProvider>,
    slot: Mutex<Slot>,
}

impl Shared {
    /// Release `generation` if it is still the holder. Never panics.
    fn release_generation(&self, generation: u64, reason: ReleaseReason) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        match &slot.holder {
            Some(h) if h.generation == generation => {}
            _ => return false,
        }
        if let Some(holder) = slot.holder.take() {
            self.release_holder(holder, reason);
        }
        true
    }

    fn release_holder(&self, holder: Holder, reason: ReleaseReason) {
        if let Some(watchdog) = &holder.watchdog {
            watchdog.cancel();
        }
        let held_for = holder.acquired_at.elapsed();
        match self.provider.release(holder.token) {
            Ok(()) => info!(
                session_id = %holder.session_id,
                held_secs = held_for.as_secs(),
                %reason,
                "[Lifecycle] Resource released"
            ),
            Err(e) => warn!(
                session_id = %holder.session_id,
                error = %e,
                %reason,
                "[Lifecycle] Platform release failed; resource considered released"
            ),
        }
    }
}

/// Process-wide owner of the power-retention resource.
pub struct ResourceLifecycleManager {
    shared: Arc<Shared>,
    tag: String,
    max_hold: Duration,
}

impl ResourceLifecycleManager {
    pub fn new(provider: Arc<dyn WakeLockProvider>, tag: impl Into<String>, max_hold: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                provider,
                slot: Mutex::new(Slot::default()),
            }),
            tag: tag.into(),
            max_hold,
        }
    }

    pub fn from_config(provider: Arc<dyn WakeLockProvider>, config: &LifecycleConfig) -> Self {
        Self::new(provider, config.tag.clone(), config.max_hold())
    }

    /// Acquire the resource for `session_id`.
    ///
    /// A stale holder (a session that was never stopped) is released first.
    pub fn acquire(&self, session_id: Uuid) -> Result<ResourceHandle, ResourceError> {
        let mut slot = self.shared.slot.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(stale) = slot.holder.take() {
            warn!(
                stale_session = %stale.session_id,
                %session_id,
                "[Lifecycle] Replacing stale resource holder"
            );
            self.shared.release_holder(stale, ReleaseReason::Replaced);
        }

        let token = self.shared.provider.acquire(&self.tag).map_err(|e| {
            error!(%session_id, error = %e, "[Lifecycle] Resource acquisition failed");
            e
        })?;

        slot.next_generation += 1;
        let generation = slot.next_generation;
        let watchdog = self.spawn_watchdog(generation, session_id);

        slot.holder = Some(Holder {
            generation,
            session_id,
            token,
            acquired_at: Instant::now(),
            watchdog,
        });
        info!(%session_id, tag = %self.tag, "[Lifecycle] Resource acquired");

        Ok(ResourceHandle {
            shared: Arc::clone(&self.shared),
            generation,
            session_id,
            released: AtomicBool::new(false),
        })
    }

    /// Release through the manager. Same as [`ResourceHandle::release`].
    pub fn release(&self, handle: &ResourceHandle) {
        handle.release();
    }

    /// Session currently holding the resource.
    pub fn holder(&self) -> Option<Uuid> {
        self.shared
            .slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .holder
            .as_ref()
            .map(|h| h.session_id)
    }

    pub fn is_held(&self) -> bool {
        self.holder().is_some()
    }

    /// Force-release after `max_hold`. Without a runtime there is no watchdog.
    fn spawn_watchdog(&self, generation: u64, session_id: Uuid) -> Option<CancellationToken> {
        let runtime = tokio::runtime::Handle::try_current().ok()?;
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let shared = Arc::clone(&self.shared);
        let max_hold = self.max_hold;

        runtime.spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {}
                _ = tokio::time::sleep(max_hold) => {
                    if shared.release_generation(generation, ReleaseReason::Timeout) {
                        warn!(
                            %session_id,
                            max_hold_secs = max_hold.as_secs(),
                            "[Lifecycle] Session exceeded max hold, resource force-released"
                        );
                    }
                }
            }
        });
        Some(token)
    }
}

/// Proof that a session holds the resource.
///
/// Releasing is idempotent; dropping an unreleased handle releases it.
pub struct ResourceHandle {
    shared: Arc<Shared>,
    generation: u64,
    session_id: Uuid,
    released: AtomicBool,
}

impl std::fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("session_id", &self.session_id)
            .field("generation", &self.generation)
            .field("released", &self.released.load(Ordering::SeqCst))
            .finish()
    }
}

impl ResourceHandle {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Whether this handle still holds the resource (not released, not timed out).
    pub fn is_active(&self) -> bool {
        if self.released.load(Ordering::SeqCst) {
            return false;
        }
        self.shared
            .slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .holder
            .as_ref()
            .is_some_and(|h| h.generation == self.generation)
    }

    pub fn release(&self) {
        self.release_with(ReleaseReason::Released);
    }

    fn release_with(&self, reason: ReleaseReason) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        if !self.shared.release_generation(self.generation, reason) {
            debug!(session_id = %self.session_id, "[Lifecycle] Handle was already superseded");
        }
    }
}

impl Drop for ResourceHandle {
    fn drop(&mut self) {
        if !self.released.load(Ordering::SeqCst) {
            self.release_with(ReleaseReason::Dropped);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI64;

    /// Tracks outstanding acquisitions and the peak.
    #[derive(Default)]
    struct CountingProvider {
        outstanding: AtomicI64,
        peak: AtomicI64,
        acquisitions: AtomicI64,
        deny: AtomicBool,
    }

    impl WakeLockProvider for CountingProvider {
        fn acquire(&self, tag: &str) -> Result<WakeLockToken, ResourceError> {
            if self.deny.load(Ordering::SeqCst) {
                return Err(ResourceError::Denied {
                    tag: tag.to_string(),
                    reason: "test".to_string(),
                });
            }
            let n = self.outstanding.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(n, Ordering::SeqCst);
            let id = self.acquisitions.fetch_add(1, Ordering::SeqCst);
            Ok(WakeLockToken(id as u64))
        }

        fn release(&self, _token: WakeLockToken) -> Result<(), ResourceError> {
            self.outstanding.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn manager(provider: Arc<CountingProvider>, max_hold: Duration) -> ResourceLifecycleManager {
        ResourceLifecycleManager::new(provider, "test", max_hold)
    }

    #[test]
    fn test_double_release_is_single_effective_release() {
        let provider = Arc::new(CountingProvider::default());
        let mgr = manager(provider.clone(), Duration::from_secs(60));

        let handle = mgr.acquire(Uuid::new_v4()).unwrap();
        assert!(handle.is_active());
        mgr.release(&handle);
        handle.release();
        drop(handle);

        assert_eq!(provider.outstanding.load(Ordering::SeqCst), 0);
        assert!(!mgr.is_held());
    }

    #[test]
    fn test_drop_releases() {
        let provider = Arc::new(CountingProvider::default());
        let mgr = manager(provider.clone(), Duration::from_secs(60));
        {
            let _handle = mgr.acquire(Uuid::new_v4()).unwrap();
            assert_eq!(provider.outstanding.load(Ordering::SeqCst), 1);
        }
        assert_eq!(provider.outstanding.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_stale_holder_replaced_and_old_handle_inert() {
        let provider = Arc::new(CountingProvider::default());
        let mgr = manager(provider.clone(), Duration::from_secs(60));

        let old = mgr.acquire(Uuid::new_v4()).unwrap();
        let new_session = Uuid::new_v4();
        let new = mgr.acquire(new_session).unwrap();

        assert!(!old.is_active());
        assert_eq!(provider.outstanding.load(Ordering::SeqCst), 1);

        // Releasing the superseded handle must not free the new holder.
        old.release();
        assert_eq!(mgr.holder(), Some(new_session));
        assert_eq!(provider.outstanding.load(Ordering::SeqCst), 1);

        new.release();
        assert_eq!(provider.outstanding.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_denied_acquisition_holds_nothing() {
        let provider = Arc::new(CountingProvider::default());
        provider.deny.store(true, Ordering::SeqCst);
        let mgr = manager(provider.clone(), Duration::from_secs(60));

        assert!(mgr.acquire(Uuid::new_v4()).is_err());
        assert!(!mgr.is_held());
        assert_eq!(provider.outstanding.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_force_releases() {
        let provider = Arc::new(CountingProvider::default());
        let mgr = manager(provider.clone(), Duration::from_secs(10));

        let handle = mgr.acquire(Uuid::new_v4()).unwrap();
        tokio::time::sleep(Duration::from_secs(11)).await;

        assert!(!handle.is_active());
        assert_eq!(provider.outstanding.load(Ordering::SeqCst), 0);

        // Late graceful release after the timeout is a no-op.
        handle.release();
        assert_eq!(provider.outstanding.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_at_most_one_holder_under_concurrency() {
        let provider = Arc::new(CountingProvider::default());
        let mgr = Arc::new(manager(provider.clone(), Duration::from_secs(60)));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let mgr = Arc::clone(&mgr);
            tasks.push(tokio::spawn(async move {
                for _ in 0..50 {
                    let handle = mgr.acquire(Uuid::new_v4()).unwrap();
                    tokio::task::yield_now().await;
                    handle.release();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(provider.peak.load(Ordering::SeqCst), 1);
        assert_eq!(provider.outstanding.load(Ordering::SeqCst), 0);
        assert_eq!(provider.acquisitions.load(Ordering::SeqCst), 16 * 50);
    }
}
