use std::{fs, io, path::Path};

use tracing::warn;
use uploadgrid_core::{CoreError, SessionConfig};

/// Session config files are a handful of numbers and patterns.
pub const MAX_CONFIG_BYTES: u64 = 64 * 1024;

#[derive(Debug)]
pub enum ConfigLoadError {
    Metadata(io::Error),
    TooLarge { size: u64, max: u64 },
    Read(io::Error),
    Parse(CoreError),
}

impl std::fmt::Display for ConfigLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigLoadError::Metadata(e) => write!(f, "metadata read failed: {e}"),
            ConfigLoadError::TooLarge { size, max } => {
                write!(f, "file too large: {size} bytes (max {max})")
            }
            ConfigLoadError::Read(e) => write!(f, "read failed: {e}"),
            ConfigLoadError::Parse(e) => write!(f, "parse failed: {e}"),
        }
    }
}

impl std::error::Error for ConfigLoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigLoadError::Metadata(e) => Some(e),
            ConfigLoadError::Read(e) => Some(e),
            ConfigLoadError::Parse(e) => Some(e),
            ConfigLoadError::TooLarge { .. } => None,
        }
    }
}

pub fn load_config_from_path(path: &Path) -> Result<SessionConfig, ConfigLoadError> {
    let meta = fs::metadata(path).map_err(ConfigLoadError::Metadata)?;
    if meta.len() > MAX_CONFIG_BYTES {
        return Err(ConfigLoadError::TooLarge {
            size: meta.len(),
            max: MAX_CONFIG_BYTES,
        });
    }

    let data = fs::read_to_string(path).map_err(ConfigLoadError::Read)?;
    SessionConfig::from_json(&data).map_err(ConfigLoadError::Parse)
}

/// Loads `path` if given, falling back to defaults when it cannot be used.
pub fn load_config(path: Option<&Path>) -> SessionConfig {
    let Some(path) = path else {
        return SessionConfig::default();
    };
    match load_config_from_path(path) {
        Ok(config) => config,
        Err(err) => {
            warn!(path = %path.display(), "ignoring session config: {}", err);
            SessionConfig::default()
        }
    }
}
