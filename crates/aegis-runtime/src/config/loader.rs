//! Configuration loader with hierarchical merging.
//!
//! # Load Order
//!
//! 1. Default values (compile-time)
//! 2. Global config (`~/.aegis/config.toml` or an explicit path)
//! 3. Environment variables (`AEGIS_*`)
//!
//! Each layer overrides the previous.

use super::{default_config_path, BrokerConfig, ConfigError};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Helper macro for parsing boolean environment variables.
macro_rules! parse_env_bool {
    ($field:expr, $var:literal) => {
        if let Ok(val) = std::env::var($var) {
            $field = parse_bool(&val)
                .ok_or_else(|| ConfigError::invalid_env_var($var, "expected bool"))?;
        }
    };
}

/// Configuration loader with builder pattern.
///
/// # Example
///
/// ```
/// use aegis_runtime::config::ConfigLoader;
///
/// let config = ConfigLoader::new()
///     .skip_global_config()
///     .skip_env_vars()
///     .load()
///     .expect("defaults always load");
/// assert_eq!(config.server_version, 13);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    /// Global config file path (defaults to ~/.aegis/config.toml).
    global_config_path: Option<PathBuf>,

    /// Skip environment variable loading.
    skip_env: bool,

    /// Skip global config loading.
    skip_global: bool,
}

impl ConfigLoader {
    /// Creates a new loader with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a custom global config path.
    #[must_use]
    pub fn with_global_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.global_config_path = Some(path.into());
        self
    }

    /// Skips environment variable loading.
    ///
    /// Useful for testing with deterministic config.
    #[must_use]
    pub fn skip_env_vars(mut self) -> Self {
        self.skip_env = true;
        self
    }

    /// Skips global config loading.
    #[must_use]
    pub fn skip_global_config(mut self) -> Self {
        self.skip_global = true;
        self
    }

    /// Loads and merges configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a config file exists but cannot be parsed,
    /// or an environment variable holds an invalid value. Missing config
    /// files are silently ignored.
    pub fn load(&self) -> Result<BrokerConfig, ConfigError> {
        let mut config = BrokerConfig::default();

        if !self.skip_global {
            let global_path = self
                .global_config_path
                .clone()
                .unwrap_or_else(default_config_path);

            if let Some(global_config) = Self::load_file(&global_path)? {
                debug!(path = %global_path.display(), "Loaded global config");
                config.merge(&global_config);
            }
        }

        if !self.skip_env {
            Self::apply_env_vars(&mut config)?;
        }

        Ok(config)
    }

    /// Loads a config file, returning None if it doesn't exist.
    fn load_file(path: &Path) -> Result<Option<BrokerConfig>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
        let config =
            BrokerConfig::from_toml(&content).map_err(|e| ConfigError::parse_toml(path, e))?;

        Ok(Some(config))
    }

    /// Applies environment variable overrides.
    fn apply_env_vars(config: &mut BrokerConfig) -> Result<(), ConfigError> {
        parse_env_bool!(config.debug, "AEGIS_DEBUG");

        if let Ok(val) = std::env::var("AEGIS_MANAGER_PACKAGE") {
            config.manager_package = val;
        }

        if let Ok(val) = std::env::var("AEGIS_STATE_DIR") {
            config.paths.state_dir = Some(PathBuf::from(val));
        }

        if let Ok(val) = std::env::var("AEGIS_RENDEZVOUS_TIMEOUT_MS") {
            config.services.rendezvous_timeout_ms = val.trim().parse().map_err(|_| {
                ConfigError::invalid_env_var("AEGIS_RENDEZVOUS_TIMEOUT_MS", "expected milliseconds")
            })?;
        }

        Ok(())
    }
}

/// Parses a boolean from string.
///
/// Accepts: "true", "false", "1", "0", "yes", "no", "on", "off" (case-insensitive).
fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_config_file(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join("config.toml");
        std::fs::write(&path, content).expect("write config");
        path
    }

    #[test]
    fn load_defaults_only() {
        let config = ConfigLoader::new()
            .skip_global_config()
            .skip_env_vars()
            .load()
            .expect("load");

        assert_eq!(config, BrokerConfig::default());
    }

    #[test]
    fn load_global_config() {
        let temp = TempDir::new().expect("tempdir");
        let config_path = create_config_file(
            temp.path(),
            r#"
debug = true
manager_package = "org.example.manager"

[paths]
state_dir = "/data/aegis"

[services]
rendezvous_timeout_ms = 0
"#,
        );

        let config = ConfigLoader::new()
            .with_global_config(&config_path)
            .skip_env_vars()
            .load()
            .expect("load");

        assert!(config.debug);
        assert_eq!(config.manager_package, "org.example.manager");
        assert_eq!(config.paths.state_dir, Some(PathBuf::from("/data/aegis")));
        // Explicit 0 differs from the default, so it wins.
        assert_eq!(config.services.rendezvous_timeout_ms, 0);
    }

    #[test]
    fn missing_config_file_ok() {
        let config = ConfigLoader::new()
            .with_global_config("/nonexistent/path/config.toml")
            .skip_env_vars()
            .load()
            .expect("load");

        assert_eq!(config, BrokerConfig::default());
    }

    #[test]
    fn invalid_toml_is_reported_with_path() {
        let temp = TempDir::new().expect("tempdir");
        let config_path = create_config_file(temp.path(), "debug = [not toml");

        let err = ConfigLoader::new()
            .with_global_config(&config_path)
            .skip_env_vars()
            .load()
            .expect_err("should fail");

        assert!(matches!(err, ConfigError::ParseToml { .. }));
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn parse_bool_values() {
        assert_eq!(parse_bool("true"), Some(true));
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("1"), Some(true));
        assert_eq!(parse_bool("yes"), Some(true));
        assert_eq!(parse_bool("on"), Some(true));

        assert_eq!(parse_bool("false"), Some(false));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("no"), Some(false));
        assert_eq!(parse_bool("off"), Some(false));

        assert_eq!(parse_bool("invalid"), None);
    }
}
