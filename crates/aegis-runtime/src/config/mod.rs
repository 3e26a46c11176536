//! Broker configuration with hierarchical layering.
//!
//! # Architecture
//!
//! ```text
//! Priority (highest to lowest):
//!
//! ┌──────────────────────────────────────────┐
//! │  1. Environment Variables (AEGIS_*)      │  Runtime override
//! ├──────────────────────────────────────────┤
//! │  2. Global Config (~/.aegis/config.toml) │  Device defaults
//! ├──────────────────────────────────────────┤
//! │  3. Default Values (compile-time)        │  Fallback
//! └──────────────────────────────────────────┘
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Config Field | Type |
//! |----------|--------------|------|
//! | `AEGIS_DEBUG` | `debug` | bool |
//! | `AEGIS_MANAGER_PACKAGE` | `manager_package` | String |
//! | `AEGIS_STATE_DIR` | `paths.state_dir` | PathBuf |
//! | `AEGIS_RENDEZVOUS_TIMEOUT_MS` | `services.rendezvous_timeout_ms` | u64 |
//!
//! # Example Configuration
//!
//! ```toml
//! # ~/.aegis/config.toml
//!
//! debug = false
//! manager_package = "dev.aegis.manager"
//! permission = "dev.aegis.permission.API"
//! server_version = 13
//!
//! [paths]
//! state_dir = "/data/local/tmp/aegis"
//!
//! [services]
//! runtime_path = "/system/bin/app_process"
//! starter_class = "dev.aegis.starter.ServiceStarter"
//! rendezvous_timeout_ms = 30000
//! ```

mod error;
mod loader;
mod types;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use types::{
    BrokerConfig, PathsConfig, ServicesConfig, PERMISSION_STORE_FILE,
};

/// Default global config directory.
pub fn default_config_dir() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".aegis")
}

/// Default global config file path.
pub fn default_config_path() -> std::path::PathBuf {
    default_config_dir().join("config.toml")
}
