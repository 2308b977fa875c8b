//! Fan one sample out to the durable channel and the realtime broadcast.

use std::sync::Arc;

use super::types::LocationSample;
use crate::durable::DurableChannel;
use crate::error::TrackingError;
use crate::realtime::locations::publish_location;
use crate::realtime::RealtimeClient;

/// What happened to one sample.
///
/// `persisted` is the result that counts; `broadcast` is informational.
#[derive(Debug)]
pub struct DispatchOutcome {
    pub persisted: Result<(), TrackingError>,
    pub broadcast: bool,
}

pub struct Dispatcher {
    durable: Arc<dyn DurableChannel>,
    realtime: Arc<RealtimeClient>,
}

impl Dispatcher {
    pub fn new(durable: Arc<dyn DurableChannel>, realtime: Arc<RealtimeClient>) -> Self {
        Self { durable, realtime }
    }

    /// Write durably and, when the broker is connected, broadcast. The two
    /// run concurrently; neither result affects the other.
    pub async fn dispatch(&self, workspace_id: &str, sample: &LocationSample) -> DispatchOutcome {
        let persist = self.durable.save(workspace_id, sample);
        let broadcast = async {
            if !self.realtime.is_connected() {
                return false;
            }
            match publish_location(&self.realtime, workspace_id, sample).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::debug!(workspace_id, error = %e, "broadcast dropped");
                    false
                }
            }
        };

        let (persisted, broadcast) = tokio::join!(persist, broadcast);
        if let Err(e) = &persisted {
            tracing::warn!(workspace_id, error = %e, "durable write failed");
        }
        DispatchOutcome {
            persisted,
            broadcast,
        }
    }
}
