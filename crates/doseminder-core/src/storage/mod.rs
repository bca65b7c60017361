pub mod config;
pub mod history;

pub use config::{Config, GatewayConfig, PolicyConfig};
pub use history::{AdherenceStats, DoseLog, HistoryDb, MemoryDoseLog};

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns `~/.config/doseminder[-dev]/` based on DOSEMINDER_ENV.
///
/// Set DOSEMINDER_ENV=dev to use development data directory.
///
/// # Errors
/// Returns an error if creating the config directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("DOSEMINDER_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("doseminder-dev")
    } else {
        base_dir.join("doseminder")
    };

    std::fs::create_dir_all(&dir)
        .map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}
