//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;

use crate::config::schema::WormholeConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Path of the config file when no argument is given.
pub const CONFIG_ENV: &str = "WORMHOLE_CONFIG";
/// Shared secret; overrides `auth.secret`.
pub const SECRET_ENV: &str = "WORMHOLE_SECRET";

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Parse a TOML document, apply environment overrides and validate.
pub fn parse_config(content: &str) -> Result<WormholeConfig, ConfigError> {
    let mut config: WormholeConfig = toml::from_str(content).map_err(ConfigError::Parse)?;
    apply_env(&mut config);
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<WormholeConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    parse_config(&content)
}

/// Load from `path`, else `$WORMHOLE_CONFIG`, else defaults plus environment.
pub fn load_from_env_or(path: Option<&Path>) -> Result<WormholeConfig, ConfigError> {
    if let Some(path) = path {
        return load_config(path);
    }
    match std::env::var(CONFIG_ENV) {
        Ok(path) if !path.is_empty() => load_config(Path::new(&path)),
        _ => parse_config(""),
    }
}

fn apply_env(config: &mut WormholeConfig) {
    if let Ok(secret) = std::env::var(SECRET_ENV) {
        if !secret.is_empty() {
            config.auth.secret = secret;
        }
    }
}
