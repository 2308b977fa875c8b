mod config;
pub mod session_store;

pub use config::{BackendConfig, BrokerConfig, Config, TrackingConfig};
pub use session_store::{SessionDescriptor, SessionStore, SESSION_KEY};

use std::path::PathBuf;

/// Returns `~/.config/locshare[-dev]/` based on LOCSHARE_ENV.
///
/// Set LOCSHARE_ENV=dev to use development data directory.
///
/// # Errors
/// Returns an error if creating the config directory fails.
pub fn data_dir() -> std::io::Result<PathBuf> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("LOCSHARE_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("locshare-dev")
    } else {
        base_dir.join("locshare")
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
