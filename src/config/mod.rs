//! # Provisioning Configuration
//!
//! YAML-based configuration for the database aliases a test run provisions, where migration
//! scripts live, and the default provisioning flags.
//!
//! ## Layout
//!
//! ```yaml
//! databases:
//!   default:
//!     host: localhost
//!     port: 5432
//!     username: postgres
//!     password: postgres
//!     name: app
//!   analytics:
//!     host: localhost
//!     username: postgres
//!     name: analytics
//!     test:
//!       mirror: default
//! migrations:
//!   directory: migrations
//! provisioning:
//!   reuse_existing: false
//!   migrations_enabled: true
//! test:
//!   provisioning:
//!     verbosity: 0
//! ```
//!
//! Top-level sections named after an environment (`development`, `test`, `ci`) are merged
//! over the base document by [`ConfigManager`].

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Alias every configuration must define; the worker naming scheme is anchored on it.
pub const DEFAULT_ALIAS: &str = "default";

/// Longest database name PostgreSQL keeps intact (NAMEDATALEN - 1). Longer names are
/// truncated by the server, so two distinct names can collide.
pub const MAX_DATABASE_NAME_BYTES: usize = 63;

fn default_port() -> u16 {
    5432
}

fn default_migrations_directory() -> PathBuf {
    PathBuf::from("migrations")
}

fn default_true() -> bool {
    true
}

fn default_verbosity() -> u8 {
    1
}

/// Root configuration structure mirroring testdb-config.yaml
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProvisionerConfig {
    /// Connection parameters keyed by alias
    pub databases: BTreeMap<String, DatabaseConfig>,

    #[serde(default)]
    pub migrations: MigrationsConfig,

    /// Flag defaults; command-line options override them
    #[serde(default)]
    pub provisioning: ProvisioningDefaults,
}

/// Connection parameters for one alias
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Base (non-test) database name
    pub name: String,
    #[serde(default)]
    pub test: TestDatabaseConfig,
}

/// Test-specific overrides for an alias
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TestDatabaseConfig {
    /// Explicit test database name; defaults to `test_<name>`
    pub name: Option<String>,
    /// Alias whose physical database this alias shares instead of receiving its own
    pub mirror: Option<String>,
}

impl DatabaseConfig {
    /// Conventional name of the template database for this alias
    pub fn test_database_name(&self) -> String {
        match &self.test.name {
            Some(name) => name.clone(),
            None => format!("test_{}", self.name),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MigrationsConfig {
    #[serde(default = "default_migrations_directory")]
    pub directory: PathBuf,
    /// Modules to apply, in order. Every subdirectory of `directory` when absent.
    #[serde(default)]
    pub modules: Option<Vec<String>>,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            directory: default_migrations_directory(),
            modules: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProvisioningDefaults {
    #[serde(default)]
    pub reuse_existing: bool,
    #[serde(default)]
    pub force_create: bool,
    #[serde(default = "default_true")]
    pub migrations_enabled: bool,
    #[serde(default = "default_verbosity")]
    pub verbosity: u8,
}

impl Default for ProvisioningDefaults {
    fn default() -> Self {
        Self {
            reuse_existing: false,
            force_create: false,
            migrations_enabled: true,
            verbosity: default_verbosity(),
        }
    }
}

impl ProvisionerConfig {
    /// Validate aliases and mirror relations
    pub fn validate(&self) -> ConfigResult<()> {
        if self.databases.is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "databases",
                "provisioning configuration",
            ));
        }

        if !self.databases.contains_key(DEFAULT_ALIAS) {
            return Err(ConfigurationError::missing_required_field(
                DEFAULT_ALIAS,
                "databases",
            ));
        }

        for (alias, database) in &self.databases {
            if database.name.trim().is_empty() {
                return Err(ConfigurationError::invalid_value(
                    format!("databases.{alias}.name"),
                    database.name.clone(),
                    "database name cannot be empty",
                ));
            }
            if database.host.trim().is_empty() {
                return Err(ConfigurationError::invalid_value(
                    format!("databases.{alias}.host"),
                    database.host.clone(),
                    "host cannot be empty",
                ));
            }
            if let Some(name) = &database.test.name {
                if name.trim().is_empty() {
                    return Err(ConfigurationError::invalid_value(
                        format!("databases.{alias}.test.name"),
                        name.clone(),
                        "test database name cannot be empty",
                    ));
                }
            }

            let test_name = database.test_database_name();
            if test_name.len() > MAX_DATABASE_NAME_BYTES {
                return Err(ConfigurationError::invalid_value(
                    format!("databases.{alias}.test.name"),
                    test_name,
                    format!("test database name exceeds {MAX_DATABASE_NAME_BYTES} bytes"),
                ));
            }

            if let Some(target) = &database.test.mirror {
                if target == alias {
                    return Err(ConfigurationError::invalid_value(
                        format!("databases.{alias}.test.mirror"),
                        target.clone(),
                        "an alias cannot mirror itself",
                    ));
                }
                let Some(target_config) = self.databases.get(target) else {
                    return Err(ConfigurationError::invalid_value(
                        format!("databases.{alias}.test.mirror"),
                        target.clone(),
                        "mirror target is not a configured alias",
                    ));
                };
                if target_config.test.mirror.is_some() {
                    return Err(ConfigurationError::invalid_value(
                        format!("databases.{alias}.test.mirror"),
                        target.clone(),
                        "mirror target is itself a mirror",
                    ));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn database(name: &str) -> DatabaseConfig {
        DatabaseConfig {
            host: "localhost".to_string(),
            port: 5432,
            username: "postgres".to_string(),
            password: String::new(),
            name: name.to_string(),
            test: TestDatabaseConfig::default(),
        }
    }

    fn config_with(databases: Vec<(&str, DatabaseConfig)>) -> ProvisionerConfig {
        ProvisionerConfig {
            databases: databases
                .into_iter()
                .map(|(alias, db)| (alias.to_string(), db))
                .collect(),
            migrations: MigrationsConfig::default(),
            provisioning: ProvisioningDefaults::default(),
        }
    }

    #[test]
    fn test_database_name_defaults_to_prefixed_base_name() {
        let db = database("app");
        assert_eq!(db.test_database_name(), "test_app");

        let mut named = database("app");
        named.test.name = Some("app_ci".to_string());
        assert_eq!(named.test_database_name(), "app_ci");
    }

    #[test]
    fn validate_requires_default_alias() {
        let config = config_with(vec![("analytics", database("analytics"))]);
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::MissingRequiredField { ref field, .. } if field == "default"
        ));
    }

    #[test]
    fn validate_rejects_unknown_and_chained_mirrors() {
        let mut analytics = database("analytics");
        analytics.test.mirror = Some("reporting".to_string());
        let config = config_with(vec![("default", database("app")), ("analytics", analytics)]);
        assert!(config.validate().is_err());

        let mut analytics = database("analytics");
        analytics.test.mirror = Some("default".to_string());
        let mut replica = database("replica");
        replica.test.mirror = Some("analytics".to_string());
        let config = config_with(vec![
            ("default", database("app")),
            ("analytics", analytics),
            ("replica", replica),
        ]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_accepts_simple_mirror() {
        let mut analytics = database("analytics");
        analytics.test.mirror = Some("default".to_string());
        let config = config_with(vec![("default", database("app")), ("analytics", analytics)]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_test_names_the_server_would_truncate() {
        let mut long = database("app");
        long.test.name = Some("a".repeat(MAX_DATABASE_NAME_BYTES + 1));
        let err = config_with(vec![("default", long)]).validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::InvalidValue { ref field, .. } if field == "databases.default.test.name"
        ));

        let mut fits = database("app");
        fits.test.name = Some("a".repeat(MAX_DATABASE_NAME_BYTES));
        assert!(config_with(vec![("default", fits)]).validate().is_ok());

        let base = "b".repeat(MAX_DATABASE_NAME_BYTES - "test_".len() + 1);
        assert!(config_with(vec![("default", database(&base))]).validate().is_err());
    }

    #[test]
    fn defaults_enable_migrations() {
        let defaults = ProvisioningDefaults::default();
        assert!(defaults.migrations_enabled);
        assert!(!defaults.reuse_existing);
        assert!(!defaults.force_create);
        assert_eq!(defaults.verbosity, 1);
    }
}
