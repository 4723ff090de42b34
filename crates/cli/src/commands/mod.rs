pub mod assess;
pub mod config_cmd;
pub mod doctor;

use std::path::Path;

use caduceus_config::{AppConfig, ConfigError};

/// Load the config from `path` when given, else from the default location.
/// Environment overrides apply either way.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    match path {
        Some(path) => {
            let mut config = AppConfig::load_from(path)?;
            config.apply_env(|key| std::env::var(key).ok())?;
            Ok(config)
        }
        None => AppConfig::load(),
    }
}
