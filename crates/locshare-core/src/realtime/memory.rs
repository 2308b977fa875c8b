//! In-process broker.
//!
//! Routes SEND commands to every link subscribed to the exact destination.
//! Used by tests and by embedders that run producer and consumer in one
//! process. Connectivity loss is simulated with [`MemoryBroker::drop_links`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::link::{Command, Connector, Delivery, Headers, Link};
use crate::error::RealtimeError;

/// A message the broker accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub destination: String,
    pub headers: Headers,
    pub body: String,
}

struct LinkState {
    deliver: mpsc::UnboundedSender<Delivery>,
    /// Subscription id -> destination.
    subscriptions: HashMap<String, String>,
}

#[derive(Default)]
struct BrokerState {
    next_link: u64,
    links: HashMap<u64, LinkState>,
    sent: Vec<SentMessage>,
}

#[derive(Default)]
struct BrokerInner {
    state: Mutex<BrokerState>,
    refuse: AtomicBool,
    opened: AtomicUsize,
    open_delay: Mutex<Option<Duration>>,
}

#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make subsequent `open()` calls fail.
    pub fn refuse_connects(&self, refuse: bool) {
        self.inner.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Delay every `open()` by `delay`.
    pub fn set_open_delay(&self, delay: Option<Duration>) {
        *self.inner.open_delay.lock().unwrap_or_else(|e| e.into_inner()) = delay;
    }

    /// Number of links successfully opened so far.
    pub fn connections_opened(&self) -> usize {
        self.inner.opened.load(Ordering::SeqCst)
    }

    /// Number of links currently open.
    pub fn live_links(&self) -> usize {
        self.lock().links.len()
    }

    /// Sever every open link, as if the network went away.
    pub fn drop_links(&self) {
        self.lock().links.clear();
    }

    pub fn subscriber_count(&self, destination: &str) -> usize {
        self.lock()
            .links
            .values()
            .flat_map(|link| link.subscriptions.values())
            .filter(|d| d.as_str() == destination)
            .count()
    }

    /// Every message accepted for `destination`, oldest first.
    pub fn sent_to(&self, destination: &str) -> Vec<SentMessage> {
        self.lock()
            .sent
            .iter()
            .filter(|m| m.destination == destination)
            .cloned()
            .collect()
    }

    /// Wait until `destination` has at least `count` subscribers.
    pub async fn wait_for_subscribers(&self, destination: &str, count: usize) {
        while self.subscriber_count(destination) < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    /// Wait until at least `count` messages were accepted for `destination`.
    pub async fn wait_for_sent(&self, destination: &str, count: usize) -> Vec<SentMessage> {
        loop {
            let sent = self.sent_to(destination);
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    fn apply(&self, link_id: u64, command: Command) -> bool {
        let mut state = self.lock();
        let state = &mut *state;
        match command {
            Command::Subscribe { id, destination } => {
                if let Some(link) = state.links.get_mut(&link_id) {
                    link.subscriptions.insert(id, destination);
                }
            }
            Command::Unsubscribe { id } => {
                if let Some(link) = state.links.get_mut(&link_id) {
                    link.subscriptions.remove(&id);
                }
            }
            Command::Send {
                destination,
                headers,
                body,
            } => {
                if !state.links.contains_key(&link_id) {
                    return false;
                }
                for link in state.links.values() {
                    for (id, subscribed) in &link.subscriptions {
                        if *subscribed == destination {
                            let _ = link.deliver.send(Delivery {
                                subscription: id.clone(),
                                destination: destination.clone(),
                                headers: headers.clone(),
                                body: body.clone(),
                            });
                        }
                    }
                }
                state.sent.push(SentMessage {
                    destination,
                    headers,
                    body,
                });
            }
            Command::Disconnect => {
                state.links.remove(&link_id);
                return false;
            }
        }
        state.links.contains_key(&link_id)
    }
}

#[async_trait]
impl Connector for MemoryBroker {
    async fn open(&self) -> Result<Link, RealtimeError> {
        let delay = *self.inner.open_delay.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.inner.refuse.load(Ordering::SeqCst) {
            return Err(RealtimeError::Connection("broker unreachable".into()));
        }

        let (outbound, mut commands) = mpsc::unbounded_channel();
        let (deliver, inbound) = mpsc::unbounded_channel();
        let link_id = {
            let mut state = self.lock();
            state.next_link += 1;
            let id = state.next_link;
            state.links.insert(
                id,
                LinkState {
                    deliver,
                    subscriptions: HashMap::new(),
                },
            );
            id
        };
        self.inner.opened.fetch_add(1, Ordering::SeqCst);

        let broker = self.clone();
        tokio::spawn(async move {
            while let Some(command) = commands.recv().await {
                if !broker.apply(link_id, command) {
                    break;
                }
            }
            broker.lock().links.remove(&link_id);
        });

        Ok(Link {
            reply_to: format!("reply/{link_id}"),
            outbound,
            inbound,
        })
    }
}
