//! Tracking coordinator: owns the single tracking session of a process.
//!
//! ```text
//! NotTracking --start_foreground--------------------> Foreground
//! NotTracking --start_background (permitted)--------> Background
//! NotTracking --start_background (denied/unavailable)-> Foreground
//! Foreground | Background --stop--> NotTracking
//! ```
//!
//! Start and stop are serialized by one async lock. Each run is stamped
//! with an epoch; a dispatch that completes after its run was stopped is
//! discarded and does not touch the stored sample counter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::{JoinError, JoinSet};

use super::dispatch::{DispatchOutcome, Dispatcher};
use super::platform::{BackgroundOptions, BackgroundTasks, LocationProvider, PermissionGate};
use super::sample_source::{SampleFeed, SampleHandle, SampleSource};
use super::types::{LocationSample, TrackingMode, TrackingSession};
use crate::durable::DurableChannel;
use crate::realtime::RealtimeClient;
use crate::storage::{SessionDescriptor, SessionStore, TrackingConfig};

/// Name under which the background location task is registered.
pub const BACKGROUND_TASK_NAME: &str = "locshare-background-location";

/// Epoch value meaning "no run".
const NO_RUN: u64 = 0;

/// Everything the coordinator talks to.
pub struct Collaborators {
    pub permissions: Arc<dyn PermissionGate>,
    pub background: Arc<dyn BackgroundTasks>,
    pub provider: Arc<dyn LocationProvider>,
    pub durable: Arc<dyn DurableChannel>,
    pub realtime: Arc<RealtimeClient>,
    pub store: Arc<SessionStore>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorOptions {
    /// Interval used when background tracking falls back to foreground.
    pub default_interval_ms: u64,
    pub background_min_interval_ms: u64,
    pub distance_filter_m: f64,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self::from(&TrackingConfig::default())
    }
}

impl From<&TrackingConfig> for CoordinatorOptions {
    fn from(config: &TrackingConfig) -> Self {
        Self {
            default_interval_ms: config.default_interval_ms,
            background_min_interval_ms: config.background_min_interval_ms,
            distance_filter_m: config.distance_filter_m,
        }
    }
}

struct ActiveRun {
    session: TrackingSession,
    handle: SampleHandle,
}

pub struct TrackingCoordinator {
    permissions: Arc<dyn PermissionGate>,
    background: Arc<dyn BackgroundTasks>,
    provider: Arc<dyn LocationProvider>,
    dispatcher: Arc<Dispatcher>,
    realtime: Arc<RealtimeClient>,
    store: Arc<SessionStore>,
    options: CoordinatorOptions,
    run: Mutex<Option<ActiveRun>>,
    session: watch::Sender<Option<TrackingSession>>,
    epoch: watch::Sender<u64>,
    last_epoch: AtomicU64,
}

impl TrackingCoordinator {
    pub fn new(collaborators: Collaborators, options: CoordinatorOptions) -> Self {
        let Collaborators {
            permissions,
            background,
            provider,
            durable,
            realtime,
            store,
        } = collaborators;
        let (session, _) = watch::channel(None);
        let (epoch, _) = watch::channel(NO_RUN);

        Self {
            permissions,
            background,
            provider,
            dispatcher: Arc::new(Dispatcher::new(durable, realtime.clone())),
            realtime,
            store,
            options,
            run: Mutex::new(None),
            session,
            epoch,
            last_epoch: AtomicU64::new(NO_RUN),
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn is_tracking(&self) -> bool {
        self.session.borrow().is_some()
    }

    pub fn current_workspace_id(&self) -> Option<String> {
        self.session
            .borrow()
            .as_ref()
            .map(|s| s.workspace_id().to_string())
    }

    pub fn current_session(&self) -> Option<TrackingSession> {
        self.session.borrow().clone()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Sample every `interval_ms` while this process runs.
    ///
    /// Returns `false` only when foreground permission is denied. Calling
    /// it while already tracking leaves the running session untouched.
    pub async fn start_foreground(&self, workspace_id: &str, interval_ms: u64) -> bool {
        let mut run = self.run.lock().await;
        if run.is_some() {
            return true;
        }
        if !self.permissions.request_foreground().await.granted {
            tracing::info!(workspace_id, "foreground location permission denied");
            return false;
        }
        self.begin_foreground(&mut run, workspace_id, interval_ms).await;
        true
    }

    /// Track through the platform's background task facility.
    ///
    /// Without background permission or facility this behaves exactly like
    /// `start_foreground(workspace_id, default_interval_ms)`.
    pub async fn start_background(&self, workspace_id: &str) -> bool {
        let mut run = self.run.lock().await;
        if run.is_some() {
            return true;
        }
        if !self.permissions.request_foreground().await.granted {
            tracing::info!(workspace_id, "foreground location permission denied");
            return false;
        }

        let fallback_interval = self.options.default_interval_ms;
        if !self.permissions.request_background().await.granted {
            tracing::info!(workspace_id, "background permission denied, tracking in foreground");
            self.begin_foreground(&mut run, workspace_id, fallback_interval).await;
            return true;
        }
        if !self.background.is_available() {
            tracing::info!(workspace_id, "background tasks unavailable, tracking in foreground");
            self.begin_foreground(&mut run, workspace_id, fallback_interval).await;
            return true;
        }

        if let Err(e) = self.store.save(&SessionDescriptor::new(workspace_id)) {
            tracing::warn!(workspace_id, error = %e, "could not persist session, tracking in foreground");
            self.begin_foreground(&mut run, workspace_id, fallback_interval).await;
            return true;
        }

        let (feed, sink) = SampleSource::relay();
        let options = BackgroundOptions {
            min_interval_ms: self.options.background_min_interval_ms,
            distance_filter_m: self.options.distance_filter_m,
        };
        if let Err(e) = self.background.register(BACKGROUND_TASK_NAME, options, sink).await {
            tracing::warn!(workspace_id, error = %e, "background registration failed, tracking in foreground");
            if let Err(e) = self.store.clear() {
                tracing::warn!(error = %e, "could not clear session descriptor");
            }
            self.begin_foreground(&mut run, workspace_id, fallback_interval).await;
            return true;
        }

        self.connect_best_effort().await;
        let session = TrackingSession::new(
            workspace_id,
            TrackingMode::Background,
            self.options.background_min_interval_ms,
        );
        self.launch(&mut run, session, feed);
        true
    }

    /// Stop tracking. Idempotent.
    ///
    /// Also clears a descriptor left behind by a previous process, so a
    /// background task that outlived its session is unregistered too.
    pub async fn stop(&self) {
        let mut run = self.run.lock().await;
        self.epoch.send_replace(NO_RUN);

        let stopped = run.take().map(|mut active| {
            active.handle.stop();
            active.session
        });
        let orphaned = matches!(self.store.load(), Ok(Some(_)));
        let was_background = stopped
            .as_ref()
            .is_some_and(|s| s.mode() == TrackingMode::Background);

        if was_background || orphaned {
            if let Err(e) = self.background.unregister(BACKGROUND_TASK_NAME).await {
                tracing::warn!(error = %e, "background task unregister failed");
            }
        }
        self.realtime.unsubscribe_all();
        if let Err(e) = self.store.clear() {
            tracing::warn!(error = %e, "could not clear session descriptor");
        }
        self.session.send_replace(None);

        if let Some(session) = stopped {
            tracing::info!(
                workspace_id = session.workspace_id(),
                mode = %session.mode(),
                "tracking stopped"
            );
        }
    }

    /// Entry point for the platform's background task handler.
    ///
    /// The workspace comes from the stored descriptor, so this works in a
    /// process that never called `start_background`. Returns the number of
    /// samples dispatched.
    pub async fn deliver_background(&self, samples: Vec<LocationSample>) -> usize {
        let descriptor = match self.store.load() {
            Ok(Some(descriptor)) => descriptor,
            Ok(None) => {
                tracing::warn!(dropped = samples.len(), "background delivery without a stored session");
                return 0;
            }
            Err(e) => {
                tracing::warn!(dropped = samples.len(), error = %e, "could not read session descriptor");
                return 0;
            }
        };

        self.connect_best_effort().await;
        let mut delivered = 0;
        for sample in &samples {
            self.dispatcher
                .dispatch(&descriptor.workspace_id, sample)
                .await;
            delivered += 1;
            match self.store.increment_counter() {
                Ok(Some(_)) => {}
                Ok(None) => {
                    tracing::debug!("session cleared during background delivery");
                    break;
                }
                Err(e) => tracing::warn!(error = %e, "sample counter not updated"),
            }
        }
        delivered
    }

    // ── Internals ────────────────────────────────────────────────────

    async fn begin_foreground(&self, run: &mut Option<ActiveRun>, workspace_id: &str, interval_ms: u64) {
        let session = TrackingSession::new(workspace_id, TrackingMode::Foreground, interval_ms);
        self.connect_best_effort().await;
        let feed = SampleSource::start(session.sample_interval(), self.provider.clone());
        self.launch(run, session, feed);
    }

    async fn connect_best_effort(&self) {
        if let Err(e) = self.realtime.connect().await {
            tracing::warn!(error = %e, "realtime unavailable, continuing with durable writes only");
        }
    }

    fn launch(&self, run: &mut Option<ActiveRun>, session: TrackingSession, feed: SampleFeed) {
        let epoch = self.last_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.epoch.send_replace(epoch);

        let SampleFeed { samples, handle } = feed;
        let pump = Pump {
            dispatcher: self.dispatcher.clone(),
            store: self.store.clone(),
            workspace_id: Arc::from(session.workspace_id()),
            mode: session.mode(),
            epoch,
            epoch_rx: self.epoch.subscribe(),
        };
        tokio::spawn(pump.run(samples));

        tracing::info!(
            workspace_id = session.workspace_id(),
            mode = %session.mode(),
            interval_ms = session.sample_interval_ms(),
            "tracking started"
        );
        self.session.send_replace(Some(session.clone()));
        *run = Some(ActiveRun { session, handle });
    }
}

/// Drains one run's feed.
///
/// Dispatches start in acquisition order without waiting for earlier ones,
/// so a slow durable write never holds back sampling. Completions arrive in
/// any order and are dropped once the run is no longer current.
struct Pump {
    dispatcher: Arc<Dispatcher>,
    store: Arc<SessionStore>,
    workspace_id: Arc<str>,
    mode: TrackingMode,
    epoch: u64,
    epoch_rx: watch::Receiver<u64>,
}

impl Pump {
    fn is_current(&self) -> bool {
        *self.epoch_rx.borrow() == self.epoch
    }

    async fn run(self, mut samples: mpsc::Receiver<Vec<LocationSample>>) {
        let epoch = self.epoch;
        let mut in_flight = JoinSet::new();
        let mut epoch_rx = self.epoch_rx.clone();
        loop {
            tokio::select! {
                batch = samples.recv() => match batch {
                    Some(batch) => {
                        for sample in batch {
                            let dispatcher = self.dispatcher.clone();
                            let workspace_id = self.workspace_id.clone();
                            in_flight.spawn(async move {
                                dispatcher.dispatch(&workspace_id, &sample).await
                            });
                        }
                    }
                    None => break,
                },
                Some(done) = in_flight.join_next() => self.complete(done),
                _ = epoch_rx.wait_for(|e| *e != epoch) => break,
            }
        }
        while let Some(done) = in_flight.join_next().await {
            self.complete(done);
        }
        tracing::debug!(workspace_id = %self.workspace_id, "sample pump finished");
    }

    fn complete(&self, done: Result<DispatchOutcome, JoinError>) {
        let outcome = match done {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(workspace_id = %self.workspace_id, error = %e, "dispatch task failed");
                return;
            }
        };
        if !self.is_current() {
            tracing::debug!(
                workspace_id = %self.workspace_id,
                persisted = outcome.persisted.is_ok(),
                "stale dispatch completion discarded"
            );
            return;
        }
        if self.mode == TrackingMode::Background {
            if let Err(e) = self.store.increment_counter() {
                tracing::warn!(error = %e, "sample counter not updated");
            }
        }
    }
}
