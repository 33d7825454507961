//! Configuration Loader
//!
//! Environment-aware configuration loading. Handles YAML file discovery, environment
//! detection, environment-section merging and connection overrides from the process
//! environment.

use super::error::{ConfigResult, ConfigurationError};
use super::ProvisionerConfig;
use serde_yaml::Value as YamlValue;
use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const CONFIG_FILE_NAMES: [&str; 2] = ["testdb-config.yaml", "testdb-config.yml"];

/// Top-level keys that belong to the configuration itself; every other mapping at the top
/// level is an environment section.
const CONFIG_SECTIONS: [&str; 3] = ["databases", "migrations", "provisioning"];

const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

/// Loaded configuration together with where it came from
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: ProvisionerConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<ConfigManager> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<ConfigManager> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment.
    /// Useful for testing without modifying global environment variables.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<ConfigManager> {
        let config_directory = config_dir.unwrap_or_else(|| PathBuf::from("config"));

        debug!(
            "Loading configuration for environment '{}' from directory: {}",
            environment,
            config_directory.display()
        );

        let config_file = Self::find_config_file(&config_directory)?;
        let yaml_content = Self::read_config_file_safely(&config_file)?;
        let mut config = Self::parse_with_environment(
            &yaml_content,
            environment,
            &config_file.display().to_string(),
        )?;

        Self::apply_environment_overrides(&mut config, |key| env::var(key).ok())?;
        config.validate()?;

        let manager = ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        };

        debug!(
            "Configuration loaded successfully: {}",
            serde_json::to_string_pretty(&manager.debug_config())
                .unwrap_or_else(|_| "[serialization error]".to_string())
        );
        info!(
            environment = %environment,
            aliases = manager.config.databases.len(),
            "Provisioning configuration loaded"
        );

        Ok(manager)
    }

    /// Build a manager from an in-memory YAML document
    pub fn from_yaml_str(yaml: &str, environment: &str) -> ConfigResult<ConfigManager> {
        let config = Self::parse_with_environment(yaml, environment, "<inline>")?;
        config.validate()?;

        Ok(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory: PathBuf::from("config"),
        })
    }

    pub fn config(&self) -> &ProvisionerConfig {
        &self.config
    }

    pub fn into_config(self) -> ProvisionerConfig {
        self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Migration directory resolved against the project root (the parent of the config
    /// directory) when configured as a relative path
    pub fn migrations_directory(&self) -> PathBuf {
        let directory = &self.config.migrations.directory;
        if directory.is_absolute() {
            return directory.clone();
        }
        match self.config_directory.parent() {
            Some(root) => root.join(directory),
            None => directory.clone(),
        }
    }

    /// Configuration as JSON with credentials masked, for logging
    pub fn debug_config(&self) -> serde_json::Value {
        let mut config_json = serde_json::json!(self.config);
        Self::sanitize_json_recursive(&mut config_json);
        config_json
    }

    fn sanitize_json_recursive(value: &mut serde_json::Value) {
        const SENSITIVE_PATTERNS: [&str; 4] = ["password", "secret", "token", "credential"];

        match value {
            serde_json::Value::Object(map) => {
                for (key, val) in map.iter_mut() {
                    let key_lower = key.to_lowercase();
                    let is_sensitive = SENSITIVE_PATTERNS
                        .iter()
                        .any(|pattern| key_lower.contains(pattern));

                    if is_sensitive {
                        *val = match val {
                            serde_json::Value::String(s) if s.is_empty() => {
                                serde_json::Value::String("[EMPTY]".to_string())
                            }
                            _ => serde_json::Value::String("[MASKED]".to_string()),
                        };
                    } else {
                        Self::sanitize_json_recursive(val);
                    }
                }
            }
            serde_json::Value::Array(arr) => {
                for item in arr.iter_mut() {
                    Self::sanitize_json_recursive(item);
                }
            }
            _ => {}
        }
    }

    /// TESTDB_ENV || APP_ENV || 'test'
    fn detect_environment() -> String {
        env::var("TESTDB_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "test".to_string())
            .to_lowercase()
    }

    fn find_config_file(config_directory: &Path) -> ConfigResult<PathBuf> {
        let mut searched_paths = Vec::new();

        for name in CONFIG_FILE_NAMES {
            let config_path = config_directory.join(name);
            searched_paths.push(config_path.clone());

            if config_path.exists() {
                debug!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        Err(ConfigurationError::config_file_not_found(searched_paths))
    }

    fn read_config_file_safely(path: &Path) -> ConfigResult<String> {
        let metadata = std::fs::metadata(path)
            .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))?;

        if !metadata.is_file() {
            return Err(ConfigurationError::invalid_value(
                "file_type",
                "directory or special file",
                "Configuration path must point to a regular file",
            ));
        }

        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigurationError::invalid_value(
                "file_size",
                metadata.len().to_string(),
                format!("Configuration file exceeds {MAX_CONFIG_FILE_SIZE} bytes"),
            ));
        }

        std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))
    }

    fn parse_with_environment(
        yaml_content: &str,
        environment: &str,
        source: &str,
    ) -> ConfigResult<ProvisionerConfig> {
        let mut yaml_data: YamlValue = serde_yaml::from_str(yaml_content)
            .map_err(|e| ConfigurationError::invalid_yaml(source, e))?;

        if let Some(env_overrides) = yaml_data
            .get(YamlValue::String(environment.to_string()))
            .cloned()
        {
            debug!("Applying environment-specific overrides for: {}", environment);
            Self::merge_yaml_values(&mut yaml_data, env_overrides);
        }

        if let YamlValue::Mapping(ref mut map) = yaml_data {
            let environment_sections: Vec<YamlValue> = map
                .keys()
                .filter(|key| !key.as_str().is_some_and(|key| CONFIG_SECTIONS.contains(&key)))
                .cloned()
                .collect();
            for key in environment_sections {
                map.remove(&key);
            }
        }

        serde_yaml::from_value(yaml_data).map_err(|e| {
            ConfigurationError::invalid_yaml(
                source,
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

    /// DATABASE_HOST and DATABASE_PORT apply to every alias, so CI can point a whole run at
    /// another server without editing the file
    pub fn apply_environment_overrides<F>(
        config: &mut ProvisionerConfig,
        lookup: F,
    ) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("DATABASE_HOST");
        let port = match lookup("DATABASE_PORT") {
            Some(raw) => Some(raw.parse::<u16>().map_err(|e| {
                ConfigurationError::environment_override_error(
                    "DATABASE_PORT",
                    format!("'{raw}' is not a valid port: {e}"),
                )
            })?),
            None => None,
        };

        for database in config.databases.values_mut() {
            if let Some(host) = &host {
                database.host = host.clone();
            }
            if let Some(port) = port {
                database.port = port;
            }
        }

        Ok(())
    }
}
