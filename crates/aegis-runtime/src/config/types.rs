//! Configuration types.
//!
//! All types implement [`Default`] for compile-time fallback values.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Name of the permission store file inside the state directory.
pub const PERMISSION_STORE_FILE: &str = "permissions.json";

/// Main configuration structure.
///
/// This is the unified configuration after merging all layers.
///
/// # Example
///
/// ```
/// use aegis_runtime::config::BrokerConfig;
///
/// let config = BrokerConfig::default();
/// assert_eq!(config.manager_package, "dev.aegis.manager");
/// assert_eq!(config.server_version, 13);
/// assert!(!config.debug);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    /// Enable debug mode (verbose logging, debuggable user services).
    pub debug: bool,

    /// Package name of the trusted manager application.
    pub manager_package: String,

    /// Platform permission that grants API access.
    pub permission: String,

    /// API version reported to clients.
    pub server_version: u32,

    /// Path configuration.
    pub paths: PathsConfig,

    /// User service spawning configuration.
    pub services: ServicesConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            debug: false,
            manager_package: "dev.aegis.manager".into(),
            permission: "dev.aegis.permission.API".into(),
            server_version: 13,
            paths: PathsConfig::default(),
            services: ServicesConfig::default(),
        }
    }
}

impl BrokerConfig {
    /// Creates a new config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serializes to TOML string.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Deserializes from TOML string.
    ///
    /// # Errors
    ///
    /// Returns error if deserialization fails.
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }

    /// Merges another config into this one.
    ///
    /// Values from `other` override values in `self` only if they
    /// differ from the default. This enables layered configuration.
    pub fn merge(&mut self, other: &Self) {
        let default = Self::default();

        if other.debug != default.debug {
            self.debug = other.debug;
        }
        if other.manager_package != default.manager_package {
            self.manager_package = other.manager_package.clone();
        }
        if other.permission != default.permission {
            self.permission = other.permission.clone();
        }
        if other.server_version != default.server_version {
            self.server_version = other.server_version;
        }

        self.paths.merge(&other.paths);
        self.services.merge(&other.services);
    }

    /// Path of the permission store file.
    #[must_use]
    pub fn permission_store_path(&self) -> PathBuf {
        self.paths.state_dir_or_default().join(PERMISSION_STORE_FILE)
    }

    /// Class path handed to separately launched services.
    #[must_use]
    pub fn starter_path(&self) -> String {
        self.services
            .starter_path
            .clone()
            .unwrap_or_else(|| format!("/data/local/tmp/aegis/starter-v{}.dex", self.server_version))
    }
}

/// Path configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory holding persisted broker state.
    pub state_dir: Option<PathBuf>,
}

impl PathsConfig {
    fn merge(&mut self, other: &Self) {
        if other.state_dir.is_some() {
            self.state_dir = other.state_dir.clone();
        }
    }

    /// Returns the state directory, falling back to `~/.aegis/state`.
    #[must_use]
    pub fn state_dir_or_default(&self) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(|| super::default_config_dir().join("state"))
    }
}

/// User service spawning configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServicesConfig {
    /// Class path of the service starter. Derived from the server
    /// version when unset.
    pub starter_path: Option<String>,

    /// Runtime binary used to launch services.
    pub runtime_path: String,

    /// Entry class of the service starter.
    pub starter_class: String,

    /// Runtime flags added when a service is launched debuggable.
    pub debug_flags: String,

    /// How long a separately launched service may take to call back, in
    /// milliseconds. `0` waits forever.
    pub rendezvous_timeout_ms: u64,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            starter_path: None,
            runtime_path: "/system/bin/app_process".into(),
            starter_class: "dev.aegis.starter.ServiceStarter".into(),
            debug_flags: "-Xcompiler-option --debuggable \
                          -XjdwpProvider:adbconnection \
                          -XjdwpOptions:suspend=n,server=y"
                .into(),
            rendezvous_timeout_ms: 30_000,
        }
    }
}

impl ServicesConfig {
    fn merge(&mut self, other: &Self) {
        let default = Self::default();

        if other.starter_path.is_some() {
            self.starter_path = other.starter_path.clone();
        }
        if other.runtime_path != default.runtime_path {
            self.runtime_path = other.runtime_path.clone();
        }
        if other.starter_class != default.starter_class {
            self.starter_class = other.starter_class.clone();
        }
        if other.debug_flags != default.debug_flags {
            self.debug_flags = other.debug_flags.clone();
        }
        if other.rendezvous_timeout_ms != default.rendezvous_timeout_ms {
            self.rendezvous_timeout_ms = other.rendezvous_timeout_ms;
        }
    }

    /// Returns the rendezvous timeout, `None` if disabled.
    #[must_use]
    pub fn rendezvous_timeout(&self) -> Option<Duration> {
        (self.rendezvous_timeout_ms > 0).then(|| Duration::from_millis(self.rendezvous_timeout_ms))
    }
}
