//! Configuration Loader
//!
//! Environment-aware configuration loading: file discovery, environment detection and
//! merging of the `<environment>` section over the base document.

use super::error::{ConfigResult, ConfigurationError};
use super::ProxyConfig;
use crate::constants::env as env_vars;
use serde_yaml::Value as YamlValue;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const CONFIG_FILE_NAMES: [&str; 2] = ["switchyard-config.yaml", "switchyard-config.yml"];
const ENVIRONMENT_SECTIONS: [&str; 3] = ["development", "test", "production"];
const SENSITIVE_PATTERNS: [&str; 6] = ["password", "secret", "key", "token", "credential", "auth"];

/// Loaded configuration together with where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: ProxyConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment
    /// This is useful for testing without modifying global environment variables
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        debug!(
            environment = %environment,
            directory = %config_directory.display(),
            "Loading configuration"
        );

        let config = Self::load_and_merge_config(&config_directory, environment)?;
        config.validate()?;

        debug!(
            config = %serde_json::to_string(&Self::sanitize_config_for_logging(&config))
                .unwrap_or_else(|_| "[serialization error]".to_string()),
            "Configuration loaded"
        );
        info!(
            environment = %environment,
            bind_address = %config.server.bind_address,
            connection_mode = %config.server.connection_mode,
            default_timeout_ms = config.engine.default_timeout_ms,
            default_max_concurrency = config.engine.default_max_concurrency,
            handler_overrides = config.handlers.len(),
            "⚙️ Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Built-in defaults, used when no configuration file exists
    pub fn with_defaults(environment: &str) -> Arc<ConfigManager> {
        warn!(
            environment = %environment,
            "No configuration file found; using built-in defaults"
        );
        Arc::new(ConfigManager {
            config: ProxyConfig::default(),
            environment: environment.to_string(),
            config_directory: PathBuf::from("config"),
        })
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Configuration as JSON with secret-looking values masked, for logs and diagnostics
    pub fn sanitized(&self) -> serde_json::Value {
        Self::sanitize_config_for_logging(&self.config)
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// `SWITCHYARD_ENV`, then `APP_ENV`, then `development`
    pub fn detect_environment() -> String {
        Self::environment_from(|name| env::var(name).ok())
    }

    fn environment_from(lookup: impl Fn(&str) -> Option<String>) -> String {
        lookup(env_vars::ENVIRONMENT)
            .or_else(|| lookup(env_vars::FALLBACK_ENVIRONMENT))
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| env_vars::DEFAULT_ENVIRONMENT.to_string())
            .to_lowercase()
    }

    /// `SWITCHYARD_CONFIG_DIR`, else the nearest `config/` directory holding a
    /// configuration file, searching upwards from the working directory
    fn default_config_directory() -> PathBuf {
        if let Ok(dir) = env::var(env_vars::CONFIG_DIR) {
            return PathBuf::from(dir);
        }

        if let Ok(cwd) = env::current_dir() {
            for ancestor in cwd.ancestors() {
                let candidate = ancestor.join("config");
                if CONFIG_FILE_NAMES
                    .iter()
                    .any(|name| candidate.join(name).is_file())
                {
                    return candidate;
                }
            }
        }

        PathBuf::from("config")
    }

    fn find_config_file(config_directory: &Path) -> ConfigResult<PathBuf> {
        let mut searched_paths = Vec::new();

        for name in CONFIG_FILE_NAMES {
            let config_path = config_directory.join(name);
            searched_paths.push(config_path.clone());

            if config_path.exists() {
                debug!(path = %config_path.display(), "Found configuration file");
                return Ok(config_path);
            }
        }

        Err(ConfigurationError::config_file_not_found(searched_paths))
    }

    /// Safely read a configuration file with a size limit
    fn read_config_file_safely(path: &Path) -> ConfigResult<String> {
        const MAX_CONFIG_FILE_SIZE: u64 = 10 * 1024 * 1024;

        let metadata = std::fs::metadata(path)
            .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))?;

        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigurationError::invalid_value(
                "file_size",
                metadata.len().to_string(),
                format!(
                    "Configuration file too large ({}MB > {}MB limit)",
                    metadata.len() / (1024 * 1024),
                    MAX_CONFIG_FILE_SIZE / (1024 * 1024)
                ),
            ));
        }

        if !metadata.is_file() {
            return Err(ConfigurationError::invalid_value(
                "file_type",
                "directory or special file",
                "Configuration path must point to a regular file",
            ));
        }

        std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))
    }

    fn load_and_merge_config(
        config_directory: &Path,
        environment: &str,
    ) -> ConfigResult<ProxyConfig> {
        let config_file = Self::find_config_file(config_directory)?;
        let yaml_content = Self::read_config_file_safely(&config_file)?;

        let mut yaml_data: YamlValue = serde_yaml::from_str(&yaml_content)
            .map_err(|e| ConfigurationError::invalid_yaml(config_file.display().to_string(), e))?;

        // An empty file parses as null; treat it as an empty mapping.
        if yaml_data.is_null() {
            yaml_data = YamlValue::Mapping(Default::default());
        }

        if let Some(env_overrides) = yaml_data
            .get(YamlValue::String(environment.to_string()))
            .cloned()
        {
            debug!(environment = %environment, "Applying environment-specific overrides");
            Self::merge_yaml_values(&mut yaml_data, env_overrides);
        }

        if let YamlValue::Mapping(ref mut map) = yaml_data {
            for section in ENVIRONMENT_SECTIONS {
                map.remove(YamlValue::String(section.to_string()));
            }
            map.remove(YamlValue::String(environment.to_string()));
        }

        serde_yaml::from_value(yaml_data).map_err(|e| {
            ConfigurationError::invalid_yaml(
                config_file.display().to_string(),
                format!("Failed to deserialize configuration: {e}"),
            )
        })
    }

    /// Recursively merge YAML values (environment overrides into base config)
    fn merge_yaml_values(base: &mut YamlValue, override_value: YamlValue) {
        match (&mut *base, override_value) {
            (YamlValue::Mapping(base_map), YamlValue::Mapping(override_map)) => {
                for (key, value) in override_map {
                    if let Some(existing_value) = base_map.get_mut(&key) {
                        Self::merge_yaml_values(existing_value, value);
                    } else {
                        base_map.insert(key, value);
                    }
                }
            }
            (base_ref, override_val) => {
                *base_ref = override_val;
            }
        }
    }

    fn sanitize_config_for_logging(config: &ProxyConfig) -> serde_json::Value {
        let mut config_json = serde_json::to_value(config).unwrap_or(serde_json::Value::Null);
        Self::sanitize_json_recursive(&mut config_json, &SENSITIVE_PATTERNS);
        config_json
    }

    /// Recursively mask values whose key looks sensitive
    fn sanitize_json_recursive(value: &mut serde_json::Value, sensitive_patterns: &[&str]) {
        match value {
            serde_json::Value::Object(map) => {
                for (key, val) in map.iter_mut() {
                    let key_lower = key.to_lowercase();
                    let is_sensitive = sensitive_patterns
                        .iter()
                        .any(|pattern| key_lower.contains(pattern));

                    if !is_sensitive {
                        Self::sanitize_json_recursive(val, sensitive_patterns);
                        continue;
                    }

                    *val = match val {
                        serde_json::Value::String(s) if s.is_empty() => {
                            serde_json::Value::String("[EMPTY]".to_string())
                        }
                        serde_json::Value::String(s) => {
                            let chars: Vec<char> = s.chars().collect();
                            let masked = if chars.len() > 4 {
                                let head: String = chars[..2].iter().collect();
                                let tail: String = chars[chars.len() - 2..].iter().collect();
                                format!("{head}***{tail}")
                            } else {
                                "***".to_string()
                            };
                            serde_json::Value::String(format!("[MASKED: {masked}]"))
                        }
                        serde_json::Value::Number(n) => {
                            serde_json::Value::String(format!("[MASKED: {n}]"))
                        }
                        _ => serde_json::Value::String("[MASKED]".to_string()),
                    };
                }
            }
            serde_json::Value::Array(arr) => {
                for item in arr.iter_mut() {
                    Self::sanitize_json_recursive(item, sensitive_patterns);
                }
            }
            _ => {}
        }
    }
}
