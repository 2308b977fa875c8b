//! Realtime client: one shared broker connection per instance.
//!
//! ## Connection states
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> (lost | Closing) -> Disconnected
//! ```
//!
//! Concurrent `connect()` callers share one in-flight attempt. On connection
//! loss every pending request is rejected and every active subscription is
//! dropped; callers resubscribe explicitly after reconnecting. Subscriptions
//! registered while disconnected are parked and go live on the next connect.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use super::link::{
    Command, Connector, Delivery, Headers, Link, CONTENT_TYPE, CORRELATION_ID, JSON_CONTENT_TYPE,
    REPLY_TO,
};
use crate::error::RealtimeError;

/// Subscription id reserved for the private reply destination.
const REPLY_SUBSCRIPTION_ID: &str = "reply";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

/// A message delivered to a subscription handler.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub destination: String,
    pub headers: Headers,
    pub payload: Value,
}

pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync>;

struct PendingRequest {
    deadline_at: Instant,
    timeout: Duration,
    responder: oneshot::Sender<Result<Value, RealtimeError>>,
}

struct SubscriptionEntry {
    id: String,
    handler: MessageHandler,
    /// Generation of the link the SUBSCRIBE went out on; `None` while parked.
    active_on: Option<u64>,
}

struct LiveLink {
    generation: u64,
    reply_to: String,
    outbound: mpsc::UnboundedSender<Command>,
    reader: JoinHandle<()>,
}

#[derive(Default)]
struct Shared {
    link: Option<LiveLink>,
    generation: u64,
    pending: HashMap<String, PendingRequest>,
    /// Keyed by topic.
    subscriptions: HashMap<String, SubscriptionEntry>,
    last_error: Option<RealtimeError>,
}

struct Inner {
    connector: Arc<dyn Connector>,
    shared: Mutex<Shared>,
    state: watch::Sender<ConnectionState>,
}

/// Pub/sub client with publish, subscribe and request/response.
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct RealtimeClient {
    inner: Arc<Inner>,
}

/// Handle to a topic subscription.
///
/// Becomes inactive after `unsubscribe()`, `teardown()` or connection loss.
#[derive(Clone)]
pub struct Subscription {
    id: String,
    topic: String,
    inner: Weak<Inner>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .finish()
    }
}

impl RealtimeClient {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                connector,
                shared: Mutex::new(Shared::default()),
                state,
            }),
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Receiver observing every state transition.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Number of requests awaiting a reply.
    pub fn pending_requests(&self) -> usize {
        self.inner.lock().pending.len()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Connect, or join the attempt already in flight.
    pub async fn connect(&self) -> Result<(), RealtimeError> {
        let mut changes = self.inner.state.subscribe();
        let claimed = self.inner.state.send_if_modified(|state| match state {
            ConnectionState::Disconnected | ConnectionState::Closing => {
                *state = ConnectionState::Connecting;
                true
            }
            _ => false,
        });

        if !claimed {
            return self.await_attempt(&mut changes).await;
        }

        // A teardown or a newer install while `open()` is pending bumps this.
        let generation = self.inner.lock().generation;
        tracing::debug!("opening realtime connection");
        match self.inner.connector.open().await {
            Ok(link) => {
                self.inner.install(link, generation)?;
                tracing::info!("realtime connection established");
                Ok(())
            }
            Err(e) => {
                {
                    let mut shared = self.inner.lock();
                    if shared.generation == generation {
                        shared.last_error = Some(e.clone());
                        self.inner.state.send_replace(ConnectionState::Disconnected);
                    }
                }
                tracing::warn!(error = %e, "realtime connect failed");
                Err(e)
            }
        }
    }

    async fn await_attempt(
        &self,
        changes: &mut watch::Receiver<ConnectionState>,
    ) -> Result<(), RealtimeError> {
        let settled = changes
            .wait_for(|state| *state != ConnectionState::Connecting)
            .await
            .map(|state| *state)
            .map_err(|_| RealtimeError::Connection("client dropped".into()))?;

        if settled == ConnectionState::Connected {
            return Ok(());
        }
        Err(self
            .inner
            .lock()
            .last_error
            .clone()
            .unwrap_or_else(|| RealtimeError::Connection("connect attempt failed".into())))
    }

    /// Close the connection, reject pending requests and drop every
    /// subscription, parked ones included.
    ///
    /// A connect still waiting on the broker when this runs fails with
    /// "torn down" and its link is closed.
    pub fn teardown(&self) {
        self.inner.state.send_replace(ConnectionState::Closing);
        let (link, pending) = {
            let mut shared = self.inner.lock();
            shared.generation += 1;
            shared.subscriptions.clear();
            shared.last_error = Some(RealtimeError::Connection("torn down".into()));
            let taken = (shared.link.take(), std::mem::take(&mut shared.pending));
            self.inner.state.send_replace(ConnectionState::Disconnected);
            taken
        };

        if let Some(link) = link {
            let _ = link.outbound.send(Command::Disconnect);
            link.reader.abort();
        }
        reject_all(pending, "connection closed");
        tracing::info!("realtime connection torn down");
    }

    // ── Messaging ────────────────────────────────────────────────────

    /// Fire-and-forget publish. Connects first if needed; any failure is
    /// logged and the message dropped.
    pub async fn publish<T: Serialize + ?Sized>(&self, destination: &str, payload: &T) {
        if let Err(e) = self.try_publish(destination, payload).await {
            tracing::debug!(destination, error = %e, "broadcast dropped");
        }
    }

    /// Publish, reporting why a message was dropped.
    pub async fn try_publish<T: Serialize + ?Sized>(
        &self,
        destination: &str,
        payload: &T,
    ) -> Result<(), RealtimeError> {
        let body = serde_json::to_string(payload)?;
        self.connect().await?;
        let mut headers = Headers::new();
        headers.insert(CONTENT_TYPE.into(), JSON_CONTENT_TYPE.into());
        self.inner.send(Command::Send {
            destination: destination.to_string(),
            headers,
            body,
        })
    }

    /// Request/response over pub/sub.
    ///
    /// The reply is matched solely by correlation id. On timeout the pending
    /// entry is removed, so a late reply is ignored.
    pub async fn request<T: Serialize + ?Sized>(
        &self,
        destination: &str,
        payload: &T,
        timeout: Duration,
    ) -> Result<Value, RealtimeError> {
        let body = serde_json::to_string(payload)?;
        self.connect().await?;

        let correlation_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        {
            let mut guard = self.inner.lock();
            let shared = &mut *guard;
            let link = shared
                .link
                .as_ref()
                .ok_or_else(|| RealtimeError::Connection("not connected".into()))?;

            let mut headers = Headers::new();
            headers.insert(CONTENT_TYPE.into(), JSON_CONTENT_TYPE.into());
            headers.insert(REPLY_TO.into(), link.reply_to.clone());
            headers.insert(CORRELATION_ID.into(), correlation_id.clone());

            // Registered under the same lock the reader routes replies with,
            // so a fast reply cannot overtake its own registration.
            shared.pending.insert(
                correlation_id.clone(),
                PendingRequest {
                    deadline_at: Instant::now() + timeout,
                    timeout,
                    responder: tx,
                },
            );
            let sent = link.outbound.send(Command::Send {
                destination: destination.to_string(),
                headers,
                body,
            });
            if sent.is_err() {
                shared.pending.remove(&correlation_id);
                return Err(RealtimeError::Connection("link closed".into()));
            }
        }
        tracing::debug!(destination, correlation_id = %correlation_id, "request sent");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RealtimeError::Connection("request abandoned".into())),
            Err(_) => {
                self.inner.lock().pending.remove(&correlation_id);
                tracing::debug!(correlation_id = %correlation_id, "request timed out");
                Err(RealtimeError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Invoke `handler` for every message on `topic`.
    ///
    /// Subscribing to a topic that already has a live or parked entry
    /// returns the existing handle and keeps the original handler.
    pub fn subscribe<F>(&self, topic: &str, handler: F) -> Subscription
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        let mut guard = self.inner.lock();
        let shared = &mut *guard;

        if let Some(existing) = shared.subscriptions.get(topic) {
            tracing::debug!(topic, "reusing existing subscription");
            return Subscription {
                id: existing.id.clone(),
                topic: topic.to_string(),
                inner: Arc::downgrade(&self.inner),
            };
        }

        let id = format!("sub-{}", Uuid::new_v4());
        let mut active_on = None;
        if let Some(link) = shared.link.as_ref() {
            let sent = link.outbound.send(Command::Subscribe {
                id: id.clone(),
                destination: topic.to_string(),
            });
            if sent.is_ok() {
                active_on = Some(link.generation);
            }
        }
        if active_on.is_none() {
            tracing::debug!(topic, "subscription parked until next connect");
        }

        shared.subscriptions.insert(
            topic.to_string(),
            SubscriptionEntry {
                id: id.clone(),
                handler: Arc::new(handler),
                active_on,
            },
        );
        Subscription {
            id,
            topic: topic.to_string(),
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Drop every subscription, live or parked.
    pub fn unsubscribe_all(&self) {
        let mut guard = self.inner.lock();
        let shared = &mut *guard;
        for entry in shared.subscriptions.values() {
            if let Some(link) = live_link_for(&shared.link, entry) {
                let _ = link.outbound.send(Command::Unsubscribe {
                    id: entry.id.clone(),
                });
            }
        }
        shared.subscriptions.clear();
    }
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Whether this handle is still registered, live or parked.
    pub fn is_registered(&self) -> bool {
        self.with_entry(|_, _| true).unwrap_or(false)
    }

    /// Whether the broker is currently delivering to this handle.
    pub fn is_active(&self) -> bool {
        self.with_entry(|entry, link| live_link_for(link, entry).is_some())
            .unwrap_or(false)
    }

    /// Stop deliveries. Idempotent.
    pub fn unsubscribe(&self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let mut guard = inner.lock();
        let shared = &mut *guard;
        let matches = shared
            .subscriptions
            .get(&self.topic)
            .is_some_and(|entry| entry.id == self.id);
        if !matches {
            return;
        }
        if let Some(entry) = shared.subscriptions.remove(&self.topic) {
            if let Some(link) = live_link_for(&shared.link, &entry) {
                let _ = link.outbound.send(Command::Unsubscribe { id: entry.id });
            }
            tracing::debug!(topic = %self.topic, "unsubscribed");
        }
    }

    fn with_entry<R>(&self, f: impl FnOnce(&SubscriptionEntry, &Option<LiveLink>) -> R) -> Option<R> {
        let inner = self.inner.upgrade()?;
        let shared = inner.lock();
        let entry = shared.subscriptions.get(&self.topic)?;
        (entry.id == self.id).then(|| f(entry, &shared.link))
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn send(&self, command: Command) -> Result<(), RealtimeError> {
        let shared = self.lock();
        let link = shared
            .link
            .as_ref()
            .ok_or_else(|| RealtimeError::Connection("not connected".into()))?;
        link.outbound
            .send(command)
            .map_err(|_| RealtimeError::Connection("link closed".into()))
    }

    /// Adopt a freshly opened link: reply subscription first, then every
    /// parked topic, then start routing deliveries.
    ///
    /// `expected` is the generation seen before the link was opened; if it
    /// moved on, the link is closed instead. `Connected` is published under
    /// the same lock the reader takes on loss, so a link that dies at once
    /// still ends `Disconnected`.
    fn install(self: &Arc<Self>, link: Link, expected: u64) -> Result<(), RealtimeError> {
        let Link {
            reply_to,
            outbound,
            inbound,
        } = link;

        let mut guard = self.lock();
        let shared = &mut *guard;
        if shared.generation != expected {
            let _ = outbound.send(Command::Disconnect);
            tracing::debug!("connection torn down while opening, link closed");
            return Err(RealtimeError::Connection("torn down".into()));
        }
        shared.generation += 1;
        let generation = shared.generation;
        shared.last_error = None;

        let _ = outbound.send(Command::Subscribe {
            id: REPLY_SUBSCRIPTION_ID.into(),
            destination: reply_to.clone(),
        });
        for (topic, entry) in shared.subscriptions.iter_mut() {
            if entry.active_on.is_none() {
                let _ = outbound.send(Command::Subscribe {
                    id: entry.id.clone(),
                    destination: topic.clone(),
                });
                entry.active_on = Some(generation);
            }
        }

        let reader = tokio::spawn(read_loop(Arc::downgrade(self), generation, inbound));
        if let Some(stale) = shared.link.replace(LiveLink {
            generation,
            reply_to,
            outbound,
            reader,
        }) {
            stale.reader.abort();
        }
        self.state.send_replace(ConnectionState::Connected);
        Ok(())
    }

    fn route(&self, generation: u64, delivery: Delivery) {
        if delivery.subscription == REPLY_SUBSCRIPTION_ID {
            self.resolve_reply(delivery);
            return;
        }

        let handler = {
            let shared = self.lock();
            shared
                .subscriptions
                .values()
                .find(|e| e.id == delivery.subscription && e.active_on == Some(generation))
                .map(|e| e.handler.clone())
        };
        let Some(handler) = handler else {
            tracing::debug!(subscription = %delivery.subscription, "delivery for inactive subscription dropped");
            return;
        };

        match serde_json::from_str::<Value>(&delivery.body) {
            Ok(payload) => handler(Message {
                destination: delivery.destination,
                headers: delivery.headers,
                payload,
            }),
            Err(e) => tracing::warn!(destination = %delivery.destination, error = %e, "undecodable message dropped"),
        }
    }

    fn resolve_reply(&self, delivery: Delivery) {
        let Some(correlation_id) = delivery.headers.get(CORRELATION_ID) else {
            tracing::warn!("reply without correlation id dropped");
            return;
        };
        let Some(pending) = self.lock().pending.remove(correlation_id) else {
            tracing::debug!(correlation_id = %correlation_id, "late or unknown reply ignored");
            return;
        };

        let result = if Instant::now() > pending.deadline_at {
            Err(RealtimeError::Timeout {
                timeout_ms: pending.timeout.as_millis() as u64,
            })
        } else {
            serde_json::from_str::<Value>(&delivery.body).map_err(RealtimeError::from)
        };
        let _ = pending.responder.send(result);
    }

    fn connection_lost(&self, generation: u64) {
        let pending = {
            let mut shared = self.lock();
            let current = shared.link.as_ref().map(|l| l.generation);
            if current != Some(generation) {
                return;
            }
            shared.link = None;
            shared
                .subscriptions
                .retain(|_, entry| entry.active_on.is_none());
            self.state.send_replace(ConnectionState::Disconnected);
            std::mem::take(&mut shared.pending)
        };

        tracing::warn!(rejected = pending.len(), "realtime connection lost");
        reject_all(pending, "connection lost");
    }
}

async fn read_loop(inner: Weak<Inner>, generation: u64, mut inbound: mpsc::UnboundedReceiver<Delivery>) {
    while let Some(delivery) = inbound.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        inner.route(generation, delivery);
    }
    if let Some(inner) = inner.upgrade() {
        inner.connection_lost(generation);
    }
}

fn live_link_for<'a>(link: &'a Option<LiveLink>, entry: &SubscriptionEntry) -> Option<&'a LiveLink> {
    link.as_ref()
        .filter(|l| entry.active_on == Some(l.generation))
}

fn reject_all(pending: HashMap<String, PendingRequest>, reason: &str) {
    for (_, request) in pending {
        let _ = request
            .responder
            .send(Err(RealtimeError::Connection(reason.to_string())));
    }
}
