//! Connector abstraction between the realtime client and a wire transport.
//!
//! A [`Connector`] opens a [`Link`]: an ordered outbound command channel and
//! an inbound delivery channel. The link is dead once `inbound` yields
//! `None`; the client treats that as connection loss.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::RealtimeError;

/// Header carrying the destination replies should be sent to.
pub const REPLY_TO: &str = "reply-to";
/// Header echoed from a request into its reply.
pub const CORRELATION_ID: &str = "correlation-id";
pub const CONTENT_TYPE: &str = "content-type";
pub const JSON_CONTENT_TYPE: &str = "application/json";

pub type Headers = BTreeMap<String, String>;

/// Client-to-broker operations.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Subscribe { id: String, destination: String },
    Unsubscribe { id: String },
    Send {
        destination: String,
        headers: Headers,
        body: String,
    },
    Disconnect,
}

/// A message the broker routed to one of this link's subscriptions.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Id of the subscription that matched.
    pub subscription: String,
    pub destination: String,
    pub headers: Headers,
    pub body: String,
}

/// One live broker connection.
#[derive(Debug)]
pub struct Link {
    /// Private destination for replies to this connection's requests.
    pub reply_to: String,
    pub outbound: mpsc::UnboundedSender<Command>,
    pub inbound: mpsc::UnboundedReceiver<Delivery>,
}

/// Opens broker connections.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self) -> Result<Link, RealtimeError>;
}
