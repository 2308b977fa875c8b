pub mod config;
pub mod locations;
pub mod track;

use std::sync::Arc;

use locshare_core::realtime::StompConnector;
use locshare_core::{Config, RealtimeClient};

pub(crate) type CliResult = locshare_core::Result<()>;

/// Tokio runtime for one command invocation.
pub(crate) fn runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
}

/// Realtime client speaking STOMP to the configured broker.
pub(crate) fn realtime_client(config: &Config) -> RealtimeClient {
    RealtimeClient::new(Arc::new(StompConnector::from_config(&config.broker)))
}
