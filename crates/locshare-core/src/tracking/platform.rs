//! Platform collaborators consumed by the tracking coordinator.
//!
//! Permission dialogs, background task registration and the raw position
//! primitive belong to the host platform. They are reached through the
//! traits in this module so the coordinator can run against a phone shim,
//! a desktop emulation or a test double alike.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::types::LocationSample;
use crate::error::TrackingError;

/// Result of a permission query or request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionStatus {
    pub granted: bool,
}

impl PermissionStatus {
    pub const GRANTED: Self = Self { granted: true };
    pub const DENIED: Self = Self { granted: false };
}

/// Foreground/background location permission API.
#[async_trait]
pub trait PermissionGate: Send + Sync {
    async fn request_foreground(&self) -> PermissionStatus;
    async fn request_background(&self) -> PermissionStatus;
}

/// Filters passed to the background task registrar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackgroundOptions {
    pub min_interval_ms: u64,
    pub distance_filter_m: f64,
}

/// The platform facility that keeps delivering samples to a named task,
/// even after the process was restarted.
#[async_trait]
pub trait BackgroundTasks: Send + Sync {
    /// Whether the platform can run background location tasks at all.
    fn is_available(&self) -> bool;

    /// Register `task_name`; every batch of samples the platform produces is
    /// pushed into `sink`.
    async fn register(
        &self,
        task_name: &str,
        options: BackgroundOptions,
        sink: mpsc::Sender<Vec<LocationSample>>,
    ) -> Result<(), TrackingError>;

    /// Unregister `task_name`. Unknown names are ignored.
    async fn unregister(&self, task_name: &str) -> Result<(), TrackingError>;
}

/// The raw position primitive.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Acquire a fix. `Ok(None)` means no fix was available this time.
    async fn current_position(&self) -> Result<Option<LocationSample>, TrackingError>;
}

/// Permissions fixed up front, typically from configuration.
#[derive(Debug, Clone, Copy)]
pub struct StaticPermissions {
    pub foreground: bool,
    pub background: bool,
}

#[async_trait]
impl PermissionGate for StaticPermissions {
    async fn request_foreground(&self) -> PermissionStatus {
        PermissionStatus {
            granted: self.foreground,
        }
    }

    async fn request_background(&self) -> PermissionStatus {
        PermissionStatus {
            granted: self.foreground && self.background,
        }
    }
}

/// A platform without background task support.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unsupported;

#[async_trait]
impl BackgroundTasks for Unsupported {
    fn is_available(&self) -> bool {
        false
    }

    async fn register(
        &self,
        task_name: &str,
        _options: BackgroundOptions,
        _sink: mpsc::Sender<Vec<LocationSample>>,
    ) -> Result<(), TrackingError> {
        Err(TrackingError::LocationUnavailable(format!(
            "background task '{task_name}' not supported on this platform"
        )))
    }

    async fn unregister(&self, _task_name: &str) -> Result<(), TrackingError> {
        Ok(())
    }
}

/// In-process emulation of a background registrar: polls a provider every
/// `min_interval_ms` and pushes single-sample batches into the sink.
pub struct TimerBackgroundTasks<P> {
    provider: std::sync::Arc<P>,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl<P: LocationProvider + 'static> TimerBackgroundTasks<P> {
    pub fn new(provider: std::sync::Arc<P>) -> Self {
        Self {
            provider,
            tasks: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl<P: LocationProvider + 'static> BackgroundTasks for TimerBackgroundTasks<P> {
    fn is_available(&self) -> bool {
        true
    }

    async fn register(
        &self,
        task_name: &str,
        options: BackgroundOptions,
        sink: mpsc::Sender<Vec<LocationSample>>,
    ) -> Result<(), TrackingError> {
        let provider = self.provider.clone();
        let period = Duration::from_millis(options.min_interval_ms.max(1));
        let task = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                match provider.current_position().await {
                    Ok(Some(sample)) => {
                        if sink.send(vec![sample]).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => tracing::debug!("background tick without a fix"),
                    Err(e) => tracing::debug!(error = %e, "background tick failed"),
                }
            }
        });

        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = tasks.insert(task_name.to_string(), task) {
            previous.abort();
        }
        Ok(())
    }

    async fn unregister(&self, task_name: &str) -> Result<(), TrackingError> {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = tasks.remove(task_name) {
            task.abort();
        }
        Ok(())
    }
}

/// A recorded coordinate used by [`ReplayProvider`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub accuracy: Option<f64>,
}

/// Cycles through a fixed list of waypoints, stamping each with the
/// current time.
pub struct ReplayProvider {
    waypoints: Vec<Waypoint>,
    cursor: AtomicUsize,
}

impl ReplayProvider {
    pub fn new(waypoints: Vec<Waypoint>) -> Self {
        Self {
            waypoints,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Load waypoints from a JSON array file.
    pub fn from_file(path: &Path) -> Result<Self, TrackingError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TrackingError::LocationUnavailable(format!("{}: {e}", path.display())))?;
        let waypoints: Vec<Waypoint> = serde_json::from_str(&content)
            .map_err(|e| TrackingError::LocationUnavailable(format!("{}: {e}", path.display())))?;
        Ok(Self::new(waypoints))
    }
}

#[async_trait]
impl LocationProvider for ReplayProvider {
    async fn current_position(&self) -> Result<Option<LocationSample>, TrackingError> {
        if self.waypoints.is_empty() {
            return Ok(None);
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.waypoints.len();
        let point = self.waypoints[index];
        Ok(Some(LocationSample {
            latitude: point.latitude,
            longitude: point.longitude,
            accuracy: point.accuracy,
            captured_at: chrono::Utc::now(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn static_background_requires_foreground() {
        let gate = StaticPermissions {
            foreground: false,
            background: true,
        };
        assert_eq!(gate.request_foreground().await, PermissionStatus::DENIED);
        assert_eq!(gate.request_background().await, PermissionStatus::DENIED);
    }

    #[tokio::test]
    async fn replay_cycles_waypoints() {
        let provider = ReplayProvider::new(vec![
            Waypoint { latitude: 1.0, longitude: 2.0, accuracy: None },
            Waypoint { latitude: 3.0, longitude: 4.0, accuracy: Some(5.0) },
        ]);
        let a = provider.current_position().await.unwrap().unwrap();
        let b = provider.current_position().await.unwrap().unwrap();
        let c = provider.current_position().await.unwrap().unwrap();
        assert_eq!((a.latitude, b.latitude, c.latitude), (1.0, 3.0, 1.0));
        assert_eq!(b.accuracy, Some(5.0));
    }

    #[tokio::test]
    async fn empty_replay_has_no_fix() {
        let provider = ReplayProvider::new(Vec::new());
        assert!(provider.current_position().await.unwrap().is_none());
    }

    #[test]
    fn replay_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("route.json");
        std::fs::write(&path, r#"[{"latitude": 48.1, "longitude": 11.5}]"#).unwrap();
        let provider = ReplayProvider::from_file(&path).unwrap();
        assert_eq!(provider.waypoints.len(), 1);

        std::fs::write(&path, "nope").unwrap();
        assert!(ReplayProvider::from_file(&path).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn timer_background_delivers_until_unregistered() {
        let provider = Arc::new(ReplayProvider::new(vec![Waypoint {
            latitude: 10.0,
            longitude: 20.0,
            accuracy: None,
        }]));
        let tasks = TimerBackgroundTasks::new(provider);
        let (tx, mut rx) = mpsc::channel(8);
        let options = BackgroundOptions {
            min_interval_ms: 1_000,
            distance_filter_m: 0.0,
        };

        tasks.register("locations", options, tx).await.unwrap();
        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].latitude, 10.0);

        tasks.unregister("locations").await.unwrap();
        assert!(rx.recv().await.is_none());
    }
}
