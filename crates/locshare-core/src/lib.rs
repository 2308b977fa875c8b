//! # locshare Core Library
//!
//! Real-time location sharing for workspace participants. A device samples
//! its position on a schedule, writes every sample to a durable backend and
//! broadcasts it over a pub/sub broker so other members see it with low
//! latency.
//!
//! ## Architecture
//!
//! - **Tracking Coordinator**: state machine owning the single tracking
//!   session, choosing foreground or background mode and fanning samples out
//! - **Sample Source**: timer-driven producer over the platform's location
//!   primitive, exposed as a restartable channel of samples
//! - **Durable Channel**: REST client whose successful write is the system of
//!   record for a sample
//! - **Realtime Client**: one shared broker connection with publish,
//!   subscribe and correlation-ID request/response on top of pub/sub
//! - **Session Store**: SQLite key-value record that lets a background task
//!   resumed after process death recover its workspace
//!
//! ## Key Components
//!
//! - [`TrackingCoordinator`]: start/stop tracking and dispatch samples
//! - [`RealtimeClient`]: broker connection manager
//! - [`HttpDurableChannel`]: backend writer
//! - [`SessionStore`]: durable session descriptor
//! - [`Config`]: application configuration management

pub mod durable;
pub mod error;
pub mod realtime;
pub mod storage;
pub mod tracking;

pub use durable::{DurableChannel, HttpDurableChannel};
pub use error::{ConfigError, CoreError, RealtimeError, Result, StoreError, TrackingError};
pub use realtime::{ConnectionState, RealtimeClient, Subscription};
pub use storage::{Config, SessionDescriptor, SessionStore};
pub use tracking::{
    LocationSample, TrackingCoordinator, TrackingMode, TrackingSession,
};
