//! Value types shared by the tracking pipeline.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How samples are acquired for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingMode {
    /// Samples come from an in-process timer.
    Foreground,
    /// Samples are delivered by the platform's background task facility.
    Background,
}

impl fmt::Display for TrackingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackingMode::Foreground => f.write_str("foreground"),
            TrackingMode::Background => f.write_str("background"),
        }
    }
}

/// The active "sharing location for workspace X in mode Y" record.
///
/// Mode and interval are fixed at construction; changing either means
/// stopping and starting a new session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingSession {
    workspace_id: String,
    mode: TrackingMode,
    sample_interval_ms: u64,
    started_at: DateTime<Utc>,
}

impl TrackingSession {
    pub fn new(workspace_id: impl Into<String>, mode: TrackingMode, sample_interval_ms: u64) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            mode,
            sample_interval_ms,
            started_at: Utc::now(),
        }
    }

    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    pub fn mode(&self) -> TrackingMode {
        self.mode
    }

    pub fn sample_interval_ms(&self) -> u64 {
        self.sample_interval_ms
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

/// One position fix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy in meters, when the platform reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    pub captured_at: DateTime<Utc>,
}

impl LocationSample {
    /// A sample captured now.
    pub fn now(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy: None,
            captured_at: Utc::now(),
        }
    }

    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = Some(accuracy);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_exposes_fixed_fields() {
        let session = TrackingSession::new("ws-1", TrackingMode::Foreground, 3000);
        assert_eq!(session.workspace_id(), "ws-1");
        assert_eq!(session.mode(), TrackingMode::Foreground);
        assert_eq!(session.sample_interval(), Duration::from_secs(3));
    }

    #[test]
    fn sample_omits_missing_accuracy() {
        let sample = LocationSample::now(52.52, 13.405);
        let json = serde_json::to_value(sample).unwrap();
        assert!(json.get("accuracy").is_none());
        assert!(json.get("capturedAt").is_some());

        let json = serde_json::to_value(sample.with_accuracy(4.0)).unwrap();
        assert_eq!(json["accuracy"], 4.0);
    }
}
