//! Durable channel: the backend write that makes a sample part of the
//! record. One attempt per sample; retries are the caller's business.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::TrackingError;
use crate::storage::BackendConfig;
use crate::tracking::LocationSample;

/// Request body of a durable write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DurableLocationRecord {
    pub workspace_id: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl DurableLocationRecord {
    pub fn new(workspace_id: &str, sample: &LocationSample) -> Self {
        Self {
            workspace_id: workspace_id.to_string(),
            latitude: sample.latitude,
            longitude: sample.longitude,
        }
    }
}

#[async_trait]
pub trait DurableChannel: Send + Sync {
    /// Persist one sample. Any failure is [`TrackingError::Persistence`].
    async fn save(&self, workspace_id: &str, sample: &LocationSample) -> Result<(), TrackingError>;
}

/// `POST {base_url}/locations` against the REST backend.
pub struct HttpDurableChannel {
    client: Client,
    endpoint: Url,
    auth_token: Option<String>,
}

impl HttpDurableChannel {
    pub fn new(
        base_url: &str,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, TrackingError> {
        // Url::join drops the last path segment unless it ends with '/'.
        let base = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let endpoint = Url::parse(&base)
            .and_then(|u| u.join("locations"))
            .map_err(|e| TrackingError::Persistence(format!("invalid backend url '{base_url}': {e}")))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TrackingError::Persistence(format!("http client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            auth_token: auth_token.filter(|t| !t.is_empty()),
        })
    }

    pub fn from_config(config: &BackendConfig) -> Result<Self, TrackingError> {
        Self::new(
            &config.base_url,
            config.auth_token.clone(),
            Duration::from_millis(config.request_timeout_ms),
        )
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl DurableChannel for HttpDurableChannel {
    async fn save(&self, workspace_id: &str, sample: &LocationSample) -> Result<(), TrackingError> {
        let record = DurableLocationRecord::new(workspace_id, sample);
        let mut request = self.client.post(self.endpoint.clone()).json(&record);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| TrackingError::Persistence(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            tracing::debug!(workspace_id, "sample persisted");
            Ok(())
        } else {
            let text = resp.text().await.unwrap_or_default();
            Err(TrackingError::Persistence(format!(
                "backend error (HTTP {status}): {text}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn sample() -> LocationSample {
        LocationSample::now(52.5, 13.4)
    }

    #[test]
    fn endpoint_keeps_base_path() {
        let channel =
            HttpDurableChannel::new("http://localhost:8080/api", None, Duration::from_secs(1)).unwrap();
        assert_eq!(channel.endpoint().as_str(), "http://localhost:8080/api/locations");

        let channel =
            HttpDurableChannel::new("http://localhost:8080/api/", None, Duration::from_secs(1)).unwrap();
        assert_eq!(channel.endpoint().as_str(), "http://localhost:8080/api/locations");
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        assert!(matches!(
            HttpDurableChannel::new("not a url", None, Duration::from_secs(1)),
            Err(TrackingError::Persistence(_))
        ));
    }

    #[tokio::test]
    async fn save_posts_record_with_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/locations")
            .match_header("authorization", "Bearer secret")
            .match_body(Matcher::Json(serde_json::json!({
                "workspaceId": "ws-1",
                "latitude": 52.5,
                "longitude": 13.4
            })))
            .with_status(201)
            .create_async()
            .await;

        let channel = HttpDurableChannel::new(
            &format!("{}/api", server.url()),
            Some("secret".into()),
            Duration::from_secs(5),
        )
        .unwrap();
        channel.save("ws-1", &sample()).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_success_status_is_persistence_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/locations")
            .with_status(503)
            .with_body("maintenance")
            .create_async()
            .await;

        let channel = HttpDurableChannel::new(&server.url(), None, Duration::from_secs(5)).unwrap();
        match channel.save("ws-1", &sample()).await {
            Err(TrackingError::Persistence(msg)) => {
                assert!(msg.contains("503"));
                assert!(msg.contains("maintenance"));
            }
            other => panic!("expected persistence error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_backend_is_persistence_error() {
        let channel =
            HttpDurableChannel::new("http://127.0.0.1:1", None, Duration::from_millis(500)).unwrap();
        assert!(matches!(
            channel.save("ws-1", &sample()).await,
            Err(TrackingError::Persistence(_))
        ));
    }

    #[tokio::test]
    async fn empty_token_sends_no_authorization() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/locations")
            .match_header("authorization", Matcher::Missing)
            .with_status(200)
            .create_async()
            .await;

        let channel =
            HttpDurableChannel::new(&server.url(), Some(String::new()), Duration::from_secs(5)).unwrap();
        channel.save("ws-1", &sample()).await.unwrap();
        mock.assert_async().await;
    }
}
