//! Environment variable overrides.

use crate::settings::parse_log_format;
use crate::{ConfigError, ConfigResult, Settings, StorageConfig};

/// Apply environment overrides on top of file settings.
///
/// `lookup` resolves a variable name to its value; the loader passes
/// `std::env::var`, tests pass a map.
pub fn apply_overrides<F>(settings: &mut Settings, lookup: F) -> ConfigResult<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = lookup("JOBTRACK_HOST") {
        settings.server.host = host;
    }
    if let Some(port) = lookup("JOBTRACK_PORT") {
        settings.server.port = port.parse().map_err(|_| ConfigError::InvalidValue {
            field: "JOBTRACK_PORT".to_string(),
            message: format!("'{}' is not a valid port", port),
        })?;
    }
    if let Some(key) = lookup("JOBTRACK_API_KEY") {
        settings.auth.api_key = Some(key);
    }

    if let Some(url) = lookup("JENKINS_URL") {
        settings.engine.url = url;
    }
    if let Some(username) = lookup("JENKINS_USERNAME") {
        settings.engine.username = Some(username);
    }
    if let Some(token) = lookup("JENKINS_TOKEN") {
        settings.engine.token = Some(token);
    }
    if let Some(password) = lookup("JENKINS_PASSWORD") {
        settings.engine.password = Some(password);
    }

    match lookup("JOBTRACK_STORAGE").as_deref() {
        Some("memory") => settings.storage = StorageConfig::Memory,
        Some("postgres") | None => {
            if let Some(url) = lookup("DATABASE_URL") {
                let max_connections = match &settings.storage {
                    StorageConfig::Postgres {
                        max_connections, ..
                    } => *max_connections,
                    StorageConfig::Memory => 10,
                };
                settings.storage = StorageConfig::Postgres {
                    url,
                    max_connections,
                };
            }
        }
        Some(other) => {
            return Err(ConfigError::InvalidValue {
                field: "JOBTRACK_STORAGE".to_string(),
                message: format!("unknown storage backend: {}", other),
            });
        }
    }

    if let Some(level) = lookup("JOBTRACK_LOG_LEVEL") {
        settings.logging.level = level;
    }
    if let Some(format) = lookup("JOBTRACK_LOG_FORMAT") {
        settings.logging.format = parse_log_format(&format)?;
    }

    Ok(())
}
