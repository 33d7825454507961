//! # Connection Registry
//!
//! Single source of truth for which physical database each alias currently points at.
//!
//! An entry's physical name moves twice over a run: from the configured base name to the
//! template name once templates are built, and (in workers) from the template name to the
//! worker's clone. Aliases that resolve to the same server and test database share one
//! physical database, and mirror aliases borrow another alias' database outright; both
//! relations are derived by [`ConnectionRegistry::unique_databases_and_mirrors`].

use crate::config::{ProvisionerConfig, DEFAULT_ALIAS, MAX_DATABASE_NAME_BYTES};
use crate::error::{ProvisioningError, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Fails for names the server would truncate to `MAX_DATABASE_NAME_BYTES`
pub fn check_database_name(name: &str) -> Result<()> {
    if name.len() > MAX_DATABASE_NAME_BYTES {
        return Err(ProvisioningError::configuration(format!(
            "database name \"{name}\" is {} bytes, longer than the {MAX_DATABASE_NAME_BYTES} bytes PostgreSQL keeps",
            name.len()
        )));
    }
    Ok(())
}

/// Server coordinates and credentials for an alias
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"[MASKED]")
            .finish()
    }
}

impl ConnectionParams {
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: String::new(),
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }
}

/// One alias' connection state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionEntry {
    pub alias: String,
    pub params: ConnectionParams,
    /// Configured (non-test) database name
    pub base_name: String,
    /// Conventional template database name
    pub test_name: String,
    /// Database the alias currently resolves to
    pub physical_name: String,
    /// Alias whose physical database this alias shares
    pub mirror_of: Option<String>,
}

impl ConnectionEntry {
    pub fn new(
        alias: impl Into<String>,
        params: ConnectionParams,
        base_name: impl Into<String>,
    ) -> Self {
        let base_name = base_name.into();
        Self {
            alias: alias.into(),
            params,
            test_name: format!("test_{base_name}"),
            physical_name: base_name.clone(),
            base_name,
            mirror_of: None,
        }
    }

    pub fn with_test_name(mut self, test_name: impl Into<String>) -> Self {
        self.test_name = test_name.into();
        self
    }

    pub fn mirroring(mut self, target: impl Into<String>) -> Self {
        self.mirror_of = Some(target.into());
        self
    }

    pub fn is_mirror(&self) -> bool {
        self.mirror_of.is_some()
    }
}

/// A physical test database and every non-mirror alias that resolves to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestDatabase {
    pub test_name: String,
    pub params: ConnectionParams,
    /// Aliases sharing this database; the first one is used for engine calls
    pub aliases: Vec<String>,
}

impl TestDatabase {
    pub fn primary_alias(&self) -> &str {
        &self.aliases[0]
    }
}

/// Physical databases to provision plus the mirror relation (mirror alias -> target alias)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabasePlan {
    pub databases: Vec<TestDatabase>,
    pub mirrors: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionRegistry {
    entries: BTreeMap<String, ConnectionEntry>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &ProvisionerConfig) -> Self {
        let mut registry = Self::new();
        for (alias, database) in &config.databases {
            let params = ConnectionParams::new(&database.host, database.port, &database.username)
                .with_password(&database.password);
            let mut entry = ConnectionEntry::new(alias, params, &database.name)
                .with_test_name(database.test_database_name());
            entry.mirror_of = database.test.mirror.clone();
            registry.insert(entry);
        }
        registry
    }

    /// Insert or replace the entry for `entry.alias`
    pub fn insert(&mut self, entry: ConnectionEntry) -> Option<ConnectionEntry> {
        self.entries.insert(entry.alias.clone(), entry)
    }

    pub fn get(&self, alias: &str) -> Option<&ConnectionEntry> {
        self.entries.get(alias)
    }

    pub fn entry(&self, alias: &str) -> Result<&ConnectionEntry> {
        self.entries
            .get(alias)
            .ok_or_else(|| ProvisioningError::configuration(format!("unknown alias '{alias}'")))
    }

    pub fn physical_name(&self, alias: &str) -> Option<&str> {
        self.entries.get(alias).map(|e| e.physical_name.as_str())
    }

    pub fn set_physical_name(&mut self, alias: &str, physical_name: impl Into<String>) -> Result<()> {
        let entry = self
            .entries
            .get_mut(alias)
            .ok_or_else(|| ProvisioningError::configuration(format!("unknown alias '{alias}'")))?;
        entry.physical_name = physical_name.into();
        Ok(())
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn entries(&self) -> impl Iterator<Item = &ConnectionEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of every entry keyed by alias
    pub fn snapshot(&self) -> BTreeMap<String, ConnectionEntry> {
        self.entries.clone()
    }

    /// Alias -> current physical name
    pub fn physical_names(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|(alias, entry)| (alias.clone(), entry.physical_name.clone()))
            .collect()
    }

    /// Group non-mirror aliases by (host, port, test name) and collect mirrors.
    ///
    /// The database holding the default alias comes first; the rest follow alias order.
    pub fn unique_databases_and_mirrors(&self) -> Result<DatabasePlan> {
        let mut plan = DatabasePlan::default();

        for entry in self.entries.values() {
            if let Some(target) = &entry.mirror_of {
                let target_entry = self.entries.get(target).ok_or_else(|| {
                    ProvisioningError::configuration(format!(
                        "alias '{}' mirrors unknown alias '{target}'",
                        entry.alias
                    ))
                })?;
                if target_entry.is_mirror() {
                    return Err(ProvisioningError::configuration(format!(
                        "alias '{}' mirrors '{target}', which is itself a mirror",
                        entry.alias
                    )));
                }
                plan.mirrors.insert(entry.alias.clone(), target.clone());
                continue;
            }

            let existing = plan.databases.iter_mut().find(|db| {
                db.test_name == entry.test_name
                    && db.params.host == entry.params.host
                    && db.params.port == entry.params.port
            });
            match existing {
                Some(database) => database.aliases.push(entry.alias.clone()),
                None => plan.databases.push(TestDatabase {
                    test_name: entry.test_name.clone(),
                    params: entry.params.clone(),
                    aliases: vec![entry.alias.clone()],
                }),
            }
        }

        for database in &mut plan.databases {
            if let Some(pos) = database.aliases.iter().position(|a| a == DEFAULT_ALIAS) {
                database.aliases.swap(0, pos);
            }
        }
        plan.databases
            .sort_by_key(|db| db.aliases.iter().all(|a| a != DEFAULT_ALIAS));

        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ConnectionParams {
        ConnectionParams::new("localhost", 5432, "postgres")
    }

    #[test]
    fn new_entry_points_at_base_name() {
        let entry = ConnectionEntry::new("default", params(), "app");
        assert_eq!(entry.physical_name, "app");
        assert_eq!(entry.test_name, "test_app");
        assert!(!entry.is_mirror());
    }

    #[test]
    fn set_physical_name_updates_only_that_alias() {
        let mut registry = ConnectionRegistry::new();
        registry.insert(ConnectionEntry::new("default", params(), "app"));
        registry.insert(ConnectionEntry::new("analytics", params(), "analytics"));

        registry.set_physical_name("default", "test_app").unwrap();
        assert_eq!(registry.physical_name("default"), Some("test_app"));
        assert_eq!(registry.physical_name("analytics"), Some("analytics"));
        assert!(registry.set_physical_name("missing", "x").is_err());
    }

    #[test]
    fn one_entry_per_alias() {
        let mut registry = ConnectionRegistry::new();
        registry.insert(ConnectionEntry::new("default", params(), "app"));
        let replaced = registry.insert(ConnectionEntry::new("default", params(), "other"));
        assert!(replaced.is_some());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.entry("default").unwrap().base_name, "other");
    }

    #[test]
    fn aliases_with_same_signature_share_a_database() {
        let mut registry = ConnectionRegistry::new();
        registry.insert(ConnectionEntry::new("default", params(), "app"));
        registry.insert(ConnectionEntry::new("other", params(), "app"));
        registry.insert(ConnectionEntry::new("analytics", params(), "analytics"));

        let plan = registry.unique_databases_and_mirrors().unwrap();
        assert_eq!(plan.databases.len(), 2);
        assert_eq!(plan.databases[0].primary_alias(), "default");
        assert_eq!(plan.databases[0].aliases, vec!["default", "other"]);
        assert_eq!(plan.databases[1].test_name, "test_analytics");
        assert!(plan.mirrors.is_empty());
    }

    #[test]
    fn same_name_on_different_hosts_is_not_shared() {
        let mut registry = ConnectionRegistry::new();
        registry.insert(ConnectionEntry::new("default", params(), "app"));
        registry.insert(ConnectionEntry::new(
            "remote",
            ConnectionParams::new("db2", 5432, "postgres"),
            "app",
        ));

        let plan = registry.unique_databases_and_mirrors().unwrap();
        assert_eq!(plan.databases.len(), 2);
    }

    #[test]
    fn mirrors_are_excluded_from_databases() {
        let mut registry = ConnectionRegistry::new();
        registry.insert(ConnectionEntry::new("default", params(), "app"));
        registry.insert(ConnectionEntry::new("analytics", params(), "analytics").mirroring("default"));

        let plan = registry.unique_databases_and_mirrors().unwrap();
        assert_eq!(plan.databases.len(), 1);
        assert_eq!(plan.mirrors.get("analytics").map(String::as_str), Some("default"));
    }

    #[test]
    fn mirror_of_unknown_alias_is_rejected() {
        let mut registry = ConnectionRegistry::new();
        registry.insert(ConnectionEntry::new("default", params(), "app"));
        registry.insert(ConnectionEntry::new("analytics", params(), "analytics").mirroring("nope"));

        let err = registry.unique_databases_and_mirrors().unwrap_err();
        assert!(matches!(err, ProvisioningError::Configuration { .. }));
    }

    #[test]
    fn debug_output_masks_password() {
        let params = params().with_password("s3cret");
        let rendered = format!("{params:?}");
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("[MASKED]"));
    }
}
