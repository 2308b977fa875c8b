//! Workspace location destinations and payloads.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::client::{RealtimeClient, Subscription};
use crate::error::RealtimeError;
use crate::tracking::LocationSample;

/// Fire-and-forget payload for a single device update.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationUpdate {
    pub latitude: f64,
    pub longitude: f64,
}

impl From<&LocationSample> for LocationUpdate {
    fn from(sample: &LocationSample) -> Self {
        Self {
            latitude: sample.latitude,
            longitude: sample.longitude,
        }
    }
}

/// Last known position of one workspace member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberLocation {
    pub user_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub captured_at: DateTime<Utc>,
}

/// Where a device publishes its own updates.
pub fn location_destination(workspace_id: &str) -> String {
    format!("workspace/{workspace_id}/location")
}

/// Initial-state request destination and live broadcast topic.
pub fn locations_destination(workspace_id: &str) -> String {
    format!("workspace/{workspace_id}/locations")
}

/// Broadcast `sample` to the workspace, reporting why it was dropped.
pub async fn publish_location(
    client: &RealtimeClient,
    workspace_id: &str,
    sample: &LocationSample,
) -> Result<(), RealtimeError> {
    client
        .try_publish(&location_destination(workspace_id), &LocationUpdate::from(sample))
        .await
}

/// Ask the backend for every member's last known position.
pub async fn fetch_workspace_locations(
    client: &RealtimeClient,
    workspace_id: &str,
    timeout: Duration,
) -> Result<Vec<MemberLocation>, RealtimeError> {
    let reply = client
        .request(&locations_destination(workspace_id), &serde_json::json!({}), timeout)
        .await?;
    decode_locations(reply)
}

/// Invoke `handler` for every live update broadcast to the workspace.
pub fn watch_workspace_locations<F>(
    client: &RealtimeClient,
    workspace_id: &str,
    handler: F,
) -> Subscription
where
    F: Fn(Vec<MemberLocation>) + Send + Sync + 'static,
{
    client.subscribe(&locations_destination(workspace_id), move |message| {
        match decode_locations(message.payload) {
            Ok(locations) => handler(locations),
            Err(e) => tracing::warn!(destination = %message.destination, error = %e, "bad location update"),
        }
    })
}

/// Accepts either the list form or a single entry.
fn decode_locations(payload: Value) -> Result<Vec<MemberLocation>, RealtimeError> {
    if payload.is_array() {
        Ok(serde_json::from_value(payload)?)
    } else {
        Ok(vec![serde_json::from_value(payload)?])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destinations() {
        assert_eq!(location_destination("ws-1"), "workspace/ws-1/location");
        assert_eq!(locations_destination("ws-1"), "workspace/ws-1/locations");
    }

    #[test]
    fn decode_list_and_single() {
        let list = serde_json::json!([
            {"userId": "u1", "latitude": 1.0, "longitude": 2.0, "capturedAt": "2025-03-01T10:00:00Z"},
            {"userId": "u2", "latitude": 3.0, "longitude": 4.0, "capturedAt": "2025-03-01T10:00:05Z"}
        ]);
        let decoded = decode_locations(list).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[1].user_id, "u2");

        let single = serde_json::json!(
            {"userId": "u3", "latitude": 5.0, "longitude": 6.0, "capturedAt": "2025-03-01T10:00:00Z"}
        );
        assert_eq!(decode_locations(single).unwrap()[0].user_id, "u3");
    }

    #[test]
    fn decode_rejects_missing_fields() {
        let bad = serde_json::json!([{"userId": "u1"}]);
        assert!(matches!(decode_locations(bad), Err(RealtimeError::Payload(_))));
    }

    #[test]
    fn update_carries_only_coordinates() {
        let sample = LocationSample::now(1.25, 2.5).with_accuracy(3.0);
        let json = serde_json::to_value(LocationUpdate::from(&sample)).unwrap();
        assert_eq!(json, serde_json::json!({"latitude": 1.25, "longitude": 2.5}));
    }
}
