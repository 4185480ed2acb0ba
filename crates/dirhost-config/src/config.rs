//! Configuration management for the dirhost application host

use dirhost_foundation::{HostError, HostResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config files checked in order; the first one found is merged
const CONFIG_FILES: [&str; 2] = ["dirhost.toml", ".dirhost/config.toml"];

/// Environment variable prefix for overrides (`DIRHOST__CACHE__DEV_MODE=true`)
const ENV_PREFIX: &str = "DIRHOST__";

/// Shorthand switch for development mode
const DEV_MODE_ENV: &str = "DIRHOST_DEV";

/// Main host configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HostConfig {
    /// Module cache configuration
    #[serde(default)]
    pub cache: CacheConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Module cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Root that request paths and ancestor candidates resolve against
    pub document_root: PathBuf,
    /// Entry-script names tried, in order, inside an application directory
    pub index_names: Vec<String>,
    /// Source-script extension that change events are filtered on
    pub script_extension: String,
    /// Module keys under this prefix belong to the host itself and are never
    /// recorded as application dependencies
    pub exclude_prefix: Option<PathBuf>,
    /// Log every eviction
    pub dev_mode: bool,
    /// Upper bound for a single instance's teardown during `stop_all`
    pub stop_timeout_ms: u64,
}

/// Log output format
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format for development
    #[default]
    Pretty,
    /// Structured JSON format for production
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            document_root: PathBuf::from("."),
            index_names: vec!["index.js".to_string()],
            script_extension: "js".to_string(),
            exclude_prefix: None,
            dev_mode: false,
            stop_timeout_ms: 5000,
        }
    }
}

impl CacheConfig {
    /// Per-instance teardown bound as a `Duration`
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl HostConfig {
    /// Load configuration relative to the current working directory
    pub fn load() -> HostResult<Self> {
        Self::load_from(Path::new("."))
    }

    /// Load configuration from files under `base_dir` and the environment
    ///
    /// Priority order (highest to lowest):
    /// 1. `DIRHOST_DEV` (forces development mode on)
    /// 2. Environment variables (`DIRHOST__*`, `__` separates nesting)
    /// 3. `dirhost.toml` or `.dirhost/config.toml`
    /// 4. Default values
    pub fn load_from(base_dir: &Path) -> HostResult<Self> {
        use figment::{
            providers::{Env, Format, Serialized, Toml},
            Figment,
        };

        let mut figment = Figment::from(Serialized::defaults(HostConfig::default()));

        for file in &CONFIG_FILES {
            let path = base_dir.join(file);
            if path.exists() {
                tracing::info!(path = %path.display(), "Loading TOML configuration");
                figment = figment.merge(Toml::file(&path));
                break;
            }
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let mut config: HostConfig = figment
            .extract()
            .map_err(|e| HostError::config(format!("Failed to load configuration: {}", e)))?;

        if dev_mode_forced() {
            config.cache.dev_mode = true;
        }

        config.validate()?;

        tracing::debug!(
            document_root = %config.cache.document_root.display(),
            dev_mode = config.cache.dev_mode,
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> HostResult<()> {
        if self.cache.index_names.is_empty() {
            return Err(HostError::config(
                "At least one index script name must be configured",
            ));
        }

        if self.cache.index_names.iter().any(|name| name.trim().is_empty()) {
            return Err(HostError::config("Index script names cannot be empty"));
        }

        if self.cache.script_extension.trim_start_matches('.').is_empty() {
            return Err(HostError::config("Script extension cannot be empty"));
        }

        if self.cache.stop_timeout_ms == 0 {
            return Err(HostError::config("Stop timeout cannot be 0"));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(HostError::config(format!(
                "Invalid log level '{}', must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        Ok(())
    }
}

fn dev_mode_forced() -> bool {
    std::env::var(DEV_MODE_ENV)
        .map(|val| val == "1" || val.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serial_test::serial;
    use tempfile::TempDir;

    fn clear_env() {
        for (key, _) in std::env::vars() {
            if key.starts_with(ENV_PREFIX) || key == DEV_MODE_ENV {
                std::env::remove_var(key);
            }
        }
    }

    #[test]
    #[serial]
    fn test_defaults_without_files() {
        clear_env();
        let dir = TempDir::new().unwrap();
        let config = HostConfig::load_from(dir.path()).unwrap();
        assert_eq!(config, HostConfig::default());
        assert_eq!(config.cache.index_names, vec!["index.js".to_string()]);
        assert_eq!(config.cache.stop_timeout().as_millis(), 5000);
    }

    #[test]
    #[serial]
    fn test_toml_file_is_merged() {
        clear_env();
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("dirhost.toml"),
            r#"
[cache]
document_root = "/srv/www"
index_names = ["main.js", "index.js"]
exclude_prefix = "/opt/dirhost"

[logging]
level = "debug"
format = "json"
"#,
        )
        .unwrap();

        let config = HostConfig::load_from(dir.path()).unwrap();
        assert_eq!(config.cache.document_root, PathBuf::from("/srv/www"));
        assert_eq!(config.cache.index_names, vec!["main.js", "index.js"]);
        assert_eq!(config.cache.exclude_prefix, Some(PathBuf::from("/opt/dirhost")));
        assert_eq!(config.cache.script_extension, "js");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        clear_env();
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".dirhost")).unwrap();
        std::fs::write(
            dir.path().join(".dirhost/config.toml"),
            "[cache]\nstop_timeout_ms = 100\n",
        )
        .unwrap();
        std::env::set_var("DIRHOST__CACHE__STOP_TIMEOUT_MS", "250");
        std::env::set_var(DEV_MODE_ENV, "1");

        let config = HostConfig::load_from(dir.path());
        clear_env();
        let config = config.unwrap();

        assert_eq!(config.cache.stop_timeout_ms, 250);
        assert!(config.cache.dev_mode);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = HostConfig::default();
        config.cache.index_names.clear();
        assert!(config.validate().is_err());

        let mut config = HostConfig::default();
        config.cache.script_extension = ".".to_string();
        assert!(config.validate().is_err());

        let mut config = HostConfig::default();
        config.cache.stop_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = HostConfig::default();
        config.logging.level = "loud".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Invalid log level 'loud'"));
    }
}
