//! STOMP 1.2 over TCP.

mod connector;
pub mod frame;

pub use connector::StompConnector;
pub use frame::{decode, Frame};
