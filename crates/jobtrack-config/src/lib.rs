//! Settings for the jobtrack service.
//!
//! Settings come from an optional KDL file, then environment overrides.

pub mod env;
pub mod error;
pub mod settings;

pub use error::{ConfigError, ConfigResult};
pub use settings::{
    AuthConfig, EngineConfig, LogFormat, LoggingConfig, ServerConfig, Settings, StorageConfig,
    load, parse_settings,
};
