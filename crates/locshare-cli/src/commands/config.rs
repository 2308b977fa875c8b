use clap::Subcommand;
use locshare_core::{Config, CoreError};

use super::CliResult;

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print one setting
    Get {
        /// Dot path into config.toml: "backend.base_url", "broker.port",
        /// "tracking.default_interval_ms", ...
        key: String,
    },
    /// Change one setting and write config.toml
    Set {
        /// Dot path into config.toml
        key: String,
        /// Parsed as the setting's type (number, bool or string)
        value: String,
    },
    /// Print the backend, broker and tracking sections as JSON
    List,
    /// Overwrite config.toml with built-in defaults
    Reset,
    /// Print where config.toml lives
    Path,
}

pub fn run(action: ConfigAction) -> CliResult {
    match action {
        ConfigAction::Get { key } => {
            let value = Config::load()?
                .get(&key)
                .ok_or_else(|| CoreError::Custom(format!("unknown key: {key}")))?;
            println!("{value}");
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            println!("{key} = {}", config.get(&key).unwrap_or(value));
        }
        ConfigAction::List => {
            println!("{}", serde_json::to_string_pretty(&Config::load()?)?);
        }
        ConfigAction::Reset => {
            Config::default().save()?;
            println!("config reset to defaults");
        }
        ConfigAction::Path => {
            println!("{}", Config::path()?.display());
        }
    }
    Ok(())
}
