#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use locshare_core::realtime::link::{CORRELATION_ID, REPLY_TO};
use locshare_core::realtime::{Command, Connector, Delivery, Headers, Link, MemoryBroker};
use locshare_core::tracking::{
    BackgroundOptions, BackgroundTasks, LocationSample, ReplayProvider, Waypoint,
};
use locshare_core::{DurableChannel, TrackingError};
use tokio::sync::{mpsc, Semaphore};

/// A raw broker participant playing the server side.
pub struct Backend {
    link: Link,
}

impl Backend {
    /// Connect and subscribe to `destination`.
    pub async fn listen(broker: &MemoryBroker, destination: &str) -> Self {
        let link = broker.open().await.unwrap();
        link.outbound
            .send(Command::Subscribe {
                id: "backend".into(),
                destination: destination.into(),
            })
            .unwrap();
        broker.wait_for_subscribers(destination, 1).await;
        Self { link }
    }

    pub async fn next_request(&mut self) -> Delivery {
        self.link.inbound.recv().await.unwrap()
    }

    pub fn reply(&self, request: &Delivery, body: serde_json::Value) {
        let mut headers = Headers::new();
        headers.insert(
            CORRELATION_ID.into(),
            request.headers[CORRELATION_ID].clone(),
        );
        self.link
            .outbound
            .send(Command::Send {
                destination: request.headers[REPLY_TO].clone(),
                headers,
                body: body.to_string(),
            })
            .unwrap();
    }

    pub fn publish(&self, destination: &str, body: serde_json::Value) {
        self.link
            .outbound
            .send(Command::Send {
                destination: destination.into(),
                headers: Headers::new(),
                body: body.to_string(),
            })
            .unwrap();
    }
}

/// Durable channel that records workspace ids in write order.
#[derive(Default)]
pub struct RecordingDurable {
    pub writes: Mutex<Vec<String>>,
}

impl RecordingDurable {
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl DurableChannel for RecordingDurable {
    async fn save(&self, workspace_id: &str, _sample: &LocationSample) -> Result<(), TrackingError> {
        self.writes.lock().unwrap().push(workspace_id.to_string());
        Ok(())
    }
}

/// Durable channel whose writes each take `delay`.
pub struct SlowDurable {
    delay: Duration,
    started: AtomicUsize,
    finished: AtomicUsize,
}

impl SlowDurable {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            started: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
        }
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DurableChannel for SlowDurable {
    async fn save(&self, _workspace_id: &str, _sample: &LocationSample) -> Result<(), TrackingError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Durable channel whose writes block until the test releases them.
pub struct GatedDurable {
    gate: Semaphore,
    started: AtomicUsize,
    finished: AtomicUsize,
}

impl Default for GatedDurable {
    fn default() -> Self {
        Self {
            gate: Semaphore::new(0),
            started: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
        }
    }
}

impl GatedDurable {
    pub fn release(&self, writes: usize) {
        self.gate.add_permits(writes);
    }

    pub async fn wait_started(&self, count: usize) {
        while self.started.load(Ordering::SeqCst) < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    pub async fn wait_finished(&self, count: usize) {
        while self.finished.load(Ordering::SeqCst) < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}

#[async_trait]
impl DurableChannel for GatedDurable {
    async fn save(&self, _workspace_id: &str, _sample: &LocationSample) -> Result<(), TrackingError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.gate.acquire().await.unwrap().forget();
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Background registrar that hands the sink to the test.
#[derive(Default)]
pub struct CapturingTasks {
    pub sink: Mutex<Option<mpsc::Sender<Vec<LocationSample>>>>,
    pub unregistered: Mutex<Vec<String>>,
}

#[async_trait]
impl BackgroundTasks for CapturingTasks {
    fn is_available(&self) -> bool {
        true
    }

    async fn register(
        &self,
        _task_name: &str,
        _options: BackgroundOptions,
        sink: mpsc::Sender<Vec<LocationSample>>,
    ) -> Result<(), TrackingError> {
        *self.sink.lock().unwrap() = Some(sink);
        Ok(())
    }

    async fn unregister(&self, task_name: &str) -> Result<(), TrackingError> {
        self.sink.lock().unwrap().take();
        self.unregistered.lock().unwrap().push(task_name.to_string());
        Ok(())
    }
}

pub fn fixed_provider() -> Arc<ReplayProvider> {
    Arc::new(ReplayProvider::new(vec![Waypoint {
        latitude: 35.68,
        longitude: 139.76,
        accuracy: Some(5.0),
    }]))
}
