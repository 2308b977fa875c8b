//! Realtime pub/sub transport.
//!
//! [`RealtimeClient`] owns the single broker connection; connectors
//! ([`StompConnector`], [`MemoryBroker`]) supply the wire.

pub mod client;
pub mod link;
pub mod locations;
pub mod memory;
pub mod stomp;

pub use client::{ConnectionState, Message, MessageHandler, RealtimeClient, Subscription};
pub use link::{Command, Connector, Delivery, Headers, Link};
pub use locations::{LocationUpdate, MemberLocation};
pub use memory::MemoryBroker;
pub use stomp::StompConnector;
