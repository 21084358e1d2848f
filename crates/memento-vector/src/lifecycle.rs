//! Lifecycle controller for the vector store.
//!
//! Owns the store's run state and moves it along
//! `Stopped -> Starting -> Running -> IdleRunning -> Stopped`, with
//! `Starting -> Stopped` when a start fails and `IdleRunning -> Running` when
//! activity resumes. State changes happen under one internal mutex; store
//! start/stop calls are additionally serialized so a stop and a following
//! start can never overlap.
//!
//! The actual store start always runs on a spawned task. Callers that wait
//! for it can be cancelled (e.g. by a retrieval budget) without leaving the
//! controller stuck in `Starting`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use memento_core::error::MementoError;
use memento_core::events::MemoryEvent;
use memento_core::types::{StoreState, Timestamp};

use crate::store::VectorStore;

/// Idle timing for the controller.
#[derive(Debug, Clone, Copy)]
pub struct LifecycleConfig {
    /// Inactivity before `Running` becomes `IdleRunning`.
    pub idle_after: Duration,
    /// Further inactivity before `IdleRunning` stops the store.
    pub stop_after: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            idle_after: Duration::from_secs(300),
            stop_after: Duration::from_secs(900),
        }
    }
}

struct Inner {
    state: StoreState,
    last_activity: Instant,
    last_start_error: Option<String>,
}

struct Shared {
    store: Arc<dyn VectorStore>,
    config: LifecycleConfig,
    inner: Mutex<Inner>,
    /// Serializes `VectorStore::start` / `VectorStore::stop`.
    store_ops: tokio::sync::Mutex<()>,
    state_tx: watch::Sender<StoreState>,
    events: Option<broadcast::Sender<MemoryEvent>>,
}

/// Cloneable handle to the vector store lifecycle.
#[derive(Clone)]
pub struct LifecycleController {
    shared: Arc<Shared>,
}

impl LifecycleController {
    pub fn new(store: Arc<dyn VectorStore>, config: LifecycleConfig) -> Self {
        let (state_tx, _) = watch::channel(StoreState::Stopped);
        Self {
            shared: Arc::new(Shared {
                store,
                config,
                inner: Mutex::new(Inner {
                    state: StoreState::Stopped,
                    last_activity: Instant::now(),
                    last_start_error: None,
                }),
                store_ops: tokio::sync::Mutex::new(()),
                state_tx,
                events: None,
            }),
        }
    }

    /// Attach a broadcast channel for state change and activity events.
    ///
    /// Must be called before the controller is cloned.
    pub fn with_events(mut self, tx: broadcast::Sender<MemoryEvent>) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.events = Some(tx);
        }
        self
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.shared.store
    }

    pub fn state(&self) -> StoreState {
        *self.shared.state_tx.borrow()
    }

    /// Observe state changes.
    pub fn subscribe(&self) -> watch::Receiver<StoreState> {
        self.shared.state_tx.subscribe()
    }

    pub fn is_available(&self) -> bool {
        self.state().is_available()
    }

    /// Note read or write activity: resets the idle timer and wakes an idle
    /// store back to `Running`.
    pub fn record_activity(&self) {
        let Ok(mut inner) = self.shared.inner.lock() else {
            return;
        };
        inner.last_activity = Instant::now();
        if inner.state == StoreState::IdleRunning {
            self.transition(&mut inner, StoreState::Running);
        }
    }

    /// Activity signal from a user-facing surface: records activity and
    /// pre-warms a stopped store.
    pub fn signal_user_active(&self, source: &str) {
        self.record_activity();
        self.emit(MemoryEvent::UserActivity {
            source: source.to_string(),
            timestamp: Timestamp::now(),
        });
        if self.request_start() {
            info!(source, "Pre-warming vector store on user activity");
        }
    }

    /// Begin starting the store if it is stopped. Never waits.
    ///
    /// Returns true if this call initiated a start.
    pub fn request_start(&self) -> bool {
        {
            let Ok(mut inner) = self.shared.inner.lock() else {
                return false;
            };
            if inner.state != StoreState::Stopped {
                return false;
            }
            inner.last_activity = Instant::now();
            inner.last_start_error = None;
            self.transition(&mut inner, StoreState::Starting);
        }

        let this = self.clone();
        tokio::spawn(async move {
            this.run_start().await;
        });
        true
    }

    async fn run_start(&self) {
        let result = {
            let _ops = self.shared.store_ops.lock().await;
            self.shared.store.start().await
        };

        let Ok(mut inner) = self.shared.inner.lock() else {
            return;
        };
        match result {
            Ok(()) => {
                inner.last_activity = Instant::now();
                self.transition(&mut inner, StoreState::Running);
            }
            Err(e) => {
                warn!(error = %e, "Vector store failed to start");
                inner.last_start_error = Some(e.to_string());
                self.transition(&mut inner, StoreState::Stopped);
            }
        }
    }

    /// Start the store and wait until it is available.
    ///
    /// Idempotent: concurrent callers join the start already in progress,
    /// so the underlying store is started once.
    pub async fn start(&self) -> Result<(), MementoError> {
        let mut rx = self.subscribe();
        self.request_start();

        loop {
            let state = *rx.borrow_and_update();
            match state {
                StoreState::Running | StoreState::IdleRunning => return Ok(()),
                StoreState::Stopped => {
                    let reason = self
                        .shared
                        .inner
                        .lock()
                        .ok()
                        .and_then(|inner| inner.last_start_error.clone())
                        .unwrap_or_else(|| "store stopped before becoming available".into());
                    return Err(MementoError::StoreUnavailable(reason));
                }
                StoreState::Starting => {}
            }
            rx.changed()
                .await
                .map_err(|_| MementoError::Lifecycle("state channel closed".into()))?;
        }
    }

    /// Wait up to `budget` for the store to be available, starting it if
    /// needed. Returns false when the budget ran out or the start failed.
    pub async fn wait_until_available(&self, budget: Duration) -> bool {
        if self.is_available() {
            return true;
        }
        matches!(tokio::time::timeout(budget, self.start()).await, Ok(Ok(())))
    }

    /// Timer hook evaluated against the current instant.
    pub async fn ensure_stopped_if_idle(&self) -> StoreState {
        self.ensure_stopped_if_idle_at(Instant::now()).await
    }

    /// Timer hook: `Running -> IdleRunning` once `idle_after` has passed
    /// without activity, and `IdleRunning -> Stopped` after a further
    /// `stop_after`. Returns the resulting state.
    pub async fn ensure_stopped_if_idle_at(&self, now: Instant) -> StoreState {
        let idle_after = self.shared.config.idle_after;
        let stop_at = idle_after + self.shared.config.stop_after;

        // Taken first so that a start requested after this stop waits for it.
        let _ops = self.shared.store_ops.lock().await;

        {
            let Ok(mut inner) = self.shared.inner.lock() else {
                return self.state();
            };
            let idle_for = now.saturating_duration_since(inner.last_activity);

            if inner.state == StoreState::Running && idle_for >= idle_after {
                self.transition(&mut inner, StoreState::IdleRunning);
            }
            if inner.state != StoreState::IdleRunning || idle_for < stop_at {
                return inner.state;
            }
            self.transition(&mut inner, StoreState::Stopped);
        }

        if let Err(e) = self.shared.store.stop().await {
            warn!(error = %e, "Vector store stop reported an error");
        }
        StoreState::Stopped
    }

    /// Background loop invoking the idle timer hook every `interval` until
    /// `shutdown` flips to true.
    pub async fn run_idle_monitor(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "Idle monitor started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let state = self.ensure_stopped_if_idle().await;
                    debug!(state = %state, "Idle check");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("Idle monitor stopped");
    }

    fn transition(&self, inner: &mut Inner, to: StoreState) {
        let from = inner.state;
        if !from.can_transition_to(&to) {
            warn!(from = %from, to = %to, "Rejected invalid store state transition");
            return;
        }
        inner.state = to;
        self.shared.state_tx.send_replace(to);
        info!(from = %from, to = %to, "Vector store state changed");
        self.emit(MemoryEvent::StoreStateChanged {
            from,
            to,
            timestamp: Timestamp::now(),
        });
    }

    fn emit(&self, event: MemoryEvent) {
        if let Some(tx) = &self.shared.events {
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{local_store, UpsertOutcome};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use memento_core::types::{EventType, RetrievedDecision, StoredDecision};
    use memento_storage::Database;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Store that counts start calls and can be told to fail.
    struct CountingStore {
        starts: AtomicUsize,
        stops: AtomicUsize,
        fail: bool,
        delay: Duration,
        running: std::sync::atomic::AtomicBool,
    }

    impl CountingStore {
        fn new(delay: Duration, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                starts: AtomicUsize::new(0),
                stops: AtomicUsize::new(0),
                fail,
                delay,
                running: std::sync::atomic::AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl VectorStore for CountingStore {
        async fn start(&self) -> Result<(), MementoError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(MementoError::Storage("disk unavailable".into()));
            }
            self.running.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn stop(&self) -> Result<(), MementoError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            self.running.store(false, Ordering::SeqCst);
            Ok(())
        }
        fn is_running(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }
        async fn upsert(&self, _d: StoredDecision) -> Result<UpsertOutcome, MementoError> {
            Ok(UpsertOutcome::Inserted)
        }
        async fn search(
            &self,
            _q: &[f32],
            _k: usize,
            _c: Option<EventType>,
        ) -> Result<Vec<RetrievedDecision>, MementoError> {
            Ok(vec![])
        }
        async fn scan(
            &self,
            _since: Option<DateTime<Utc>>,
        ) -> Result<Vec<StoredDecision>, MementoError> {
            Ok(vec![])
        }
        async fn count(&self) -> Result<u64, MementoError> {
            Ok(0)
        }
    }

    fn config() -> LifecycleConfig {
        LifecycleConfig {
            idle_after: Duration::from_secs(60),
            stop_after: Duration::from_secs(120),
        }
    }

    #[tokio::test]
    async fn test_start_reaches_running() {
        let store = CountingStore::new(Duration::ZERO, false);
        let ctl = LifecycleController::new(store.clone(), config());
        assert_eq!(ctl.state(), StoreState::Stopped);

        ctl.start().await.unwrap();
        assert_eq!(ctl.state(), StoreState::Running);
        assert!(store.is_running());
    }

    #[tokio::test]
    async fn test_concurrent_starts_share_one_store_start() {
        let store = CountingStore::new(Duration::from_millis(50), false);
        let ctl = LifecycleController::new(store.clone(), config());

        let (a, b, c) = tokio::join!(ctl.start(), ctl.start(), ctl.start());
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(store.starts.load(Ordering::SeqCst), 1);

        // Already running: no further start.
        ctl.start().await.unwrap();
        assert_eq!(store.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_start_returns_to_stopped() {
        let store = CountingStore::new(Duration::ZERO, true);
        let ctl = LifecycleController::new(store, config());

        let err = ctl.start().await.unwrap_err();
        assert!(matches!(err, MementoError::StoreUnavailable(ref m) if m.contains("disk unavailable")));
        assert_eq!(ctl.state(), StoreState::Stopped);
    }

    #[tokio::test]
    async fn test_idle_then_stop() {
        let store = CountingStore::new(Duration::ZERO, false);
        let ctl = LifecycleController::new(store.clone(), config());
        ctl.start().await.unwrap();

        let base = Instant::now();
        assert_eq!(
            ctl.ensure_stopped_if_idle_at(base + Duration::from_secs(10)).await,
            StoreState::Running
        );
        assert_eq!(
            ctl.ensure_stopped_if_idle_at(base + Duration::from_secs(61)).await,
            StoreState::IdleRunning
        );
        assert_eq!(
            ctl.ensure_stopped_if_idle_at(base + Duration::from_secs(100)).await,
            StoreState::IdleRunning
        );
        assert_eq!(
            ctl.ensure_stopped_if_idle_at(base + Duration::from_secs(200)).await,
            StoreState::Stopped
        );
        assert_eq!(store.stops.load(Ordering::SeqCst), 1);
        assert!(!store.is_running());
    }

    #[tokio::test]
    async fn test_activity_wakes_idle_store() {
        let store = CountingStore::new(Duration::ZERO, false);
        let ctl = LifecycleController::new(store.clone(), config());
        ctl.start().await.unwrap();

        let later = Instant::now() + Duration::from_secs(61);
        assert_eq!(ctl.ensure_stopped_if_idle_at(later).await, StoreState::IdleRunning);

        ctl.record_activity();
        assert_eq!(ctl.state(), StoreState::Running);
        // The idle timer was reset, so the earlier deadline no longer applies.
        assert_eq!(
            ctl.ensure_stopped_if_idle_at(Instant::now() + Duration::from_secs(10)).await,
            StoreState::Running
        );
    }

    #[tokio::test]
    async fn test_stopped_store_is_not_stopped_again() {
        let store = CountingStore::new(Duration::ZERO, false);
        let ctl = LifecycleController::new(store.clone(), config());
        let far = Instant::now() + Duration::from_secs(10_000);
        assert_eq!(ctl.ensure_stopped_if_idle_at(far).await, StoreState::Stopped);
        assert_eq!(store.stops.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_wait_until_available_within_budget() {
        let store = CountingStore::new(Duration::from_millis(20), false);
        let ctl = LifecycleController::new(store, config());
        assert!(ctl.wait_until_available(Duration::from_secs(2)).await);
        assert!(ctl.is_available());
    }

    #[tokio::test]
    async fn test_wait_until_available_budget_exceeded() {
        let store = CountingStore::new(Duration::from_millis(500), false);
        let ctl = LifecycleController::new(store, config());

        assert!(!ctl.wait_until_available(Duration::from_millis(20)).await);
        // The start continues in the background after the caller gave up.
        assert_eq!(ctl.state(), StoreState::Starting);
        ctl.start().await.unwrap();
        assert_eq!(ctl.state(), StoreState::Running);
    }

    #[tokio::test]
    async fn test_signal_user_active_prewarms() {
        let store = CountingStore::new(Duration::ZERO, false);
        let (tx, mut rx) = broadcast::channel(16);
        let ctl = LifecycleController::new(store, config()).with_events(tx);

        ctl.signal_user_active("triage-screen");
        let mut states = ctl.subscribe();
        while !states.borrow_and_update().is_available() {
            states.changed().await.unwrap();
        }

        let mut names = Vec::new();
        while let Ok(event) = rx.try_recv() {
            names.push(event.event_name());
        }
        assert!(names.contains(&"user_activity"));
        assert!(names.contains(&"store_state_changed"));
    }

    #[tokio::test]
    async fn test_idle_monitor_shutdown() {
        let store = CountingStore::new(Duration::ZERO, false);
        let ctl = LifecycleController::new(store, config());
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn({
            let ctl = ctl.clone();
            async move { ctl.run_idle_monitor(Duration::from_millis(10), rx).await }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("idle monitor should stop on shutdown")
            .unwrap();
    }

    #[tokio::test]
    async fn test_with_local_store() {
        let store = local_store(Arc::new(Database::in_memory().unwrap()), 8, Duration::ZERO);
        let ctl = LifecycleController::new(store.clone(), config());
        ctl.start().await.unwrap();
        assert!(store.is_running());
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
