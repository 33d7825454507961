//! Per-worker clones of the template databases.

use crate::engine::DatabaseEngine;
use crate::error::{ProvisioningError, Result};
use crate::flags::ProvisioningFlags;
use crate::logging::log_provisioning_operation;
use crate::registry::{check_database_name, ConnectionEntry, ConnectionRegistry, TestDatabase};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Suffix distinguishing one worker's databases from every other worker's.
///
/// Assigned by the orchestration layer. Two live workers must never share a suffix; that is
/// not checked here.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerIdentity {
    suffix: String,
}

impl WorkerIdentity {
    /// Suffixes end up inside database names, so only ASCII alphanumerics are accepted
    pub fn new(suffix: impl Into<String>) -> Result<Self> {
        let suffix = suffix.into();
        if suffix.is_empty() {
            return Err(ProvisioningError::configuration(
                "worker suffix cannot be empty",
            ));
        }
        if !suffix.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ProvisioningError::configuration(format!(
                "worker suffix '{suffix}' must be ASCII alphanumeric"
            )));
        }
        Ok(Self { suffix })
    }

    pub fn from_index(index: u32) -> Self {
        Self {
            suffix: index.to_string(),
        }
    }

    /// Suffix from a worker token such as `gw3` or `7`: its trailing digits
    pub fn from_worker_token(token: &str) -> Result<Self> {
        let digits: String = token
            .chars()
            .rev()
            .take_while(|c| c.is_ascii_digit())
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        if digits.is_empty() {
            return Err(ProvisioningError::configuration(format!(
                "worker token '{token}' does not end in a numeric id"
            )));
        }
        Self::new(digits)
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Physical name of this worker's copy of `template`
    pub fn clone_name(&self, template: &str) -> String {
        format!("{template}_{}", self.suffix)
    }
}

impl fmt::Display for WorkerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker {}", self.suffix)
    }
}

/// Connection state of every alias in one worker after cloning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneSet {
    worker: WorkerIdentity,
    entries: BTreeMap<String, ConnectionEntry>,
    reused: Vec<String>,
}

impl CloneSet {
    pub fn worker(&self) -> &WorkerIdentity {
        &self.worker
    }

    pub fn entry(&self, alias: &str) -> Option<&ConnectionEntry> {
        self.entries.get(alias)
    }

    pub fn physical_name(&self, alias: &str) -> Option<&str> {
        self.entries.get(alias).map(|e| e.physical_name.as_str())
    }

    pub fn physical_names(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|(alias, entry)| (alias.clone(), entry.physical_name.clone()))
            .collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = &ConnectionEntry> {
        self.entries.values()
    }

    /// Clones that already existed and were kept
    pub fn reused(&self) -> &[String] {
        &self.reused
    }
}

pub struct WorkerCloneProvisioner {
    engine: Arc<dyn DatabaseEngine>,
}

impl WorkerCloneProvisioner {
    pub fn new(engine: Arc<dyn DatabaseEngine>) -> Self {
        Self { engine }
    }

    /// Clone each template once and repoint its aliases (mirrors included) at the clone.
    ///
    /// Template names come from configuration, never from the registry's current physical
    /// names. The templates must already exist: cloning a missing template fails with an
    /// engine error. Clone names longer than PostgreSQL keeps are rejected before any engine
    /// call. On any failure the registry is left as it was.
    pub async fn clone_for_worker(
        &self,
        registry: &mut ConnectionRegistry,
        identity: &WorkerIdentity,
        flags: &ProvisioningFlags,
    ) -> Result<CloneSet> {
        let plan = registry.unique_databases_and_mirrors()?;
        for database in &plan.databases {
            check_database_name(&identity.clone_name(&database.test_name))?;
        }

        info!(
            worker = %identity.suffix(),
            databases = plan.databases.len(),
            mirrors = plan.mirrors.len(),
            "Cloning template databases for worker"
        );

        let mut staged: Vec<(&TestDatabase, String)> = Vec::with_capacity(plan.databases.len());
        let mut reused = Vec::new();
        for database in &plan.databases {
            let target = identity.clone_name(&database.test_name);
            match self.clone_one(database, &target, flags).await {
                Ok(true) => reused.push(target.clone()),
                Ok(false) => {}
                Err(err) => {
                    if !staged.is_empty() {
                        let finished: Vec<&str> =
                            staged.iter().map(|(_, name)| name.as_str()).collect();
                        warn!(
                            worker = %identity.suffix(),
                            clones = ?finished,
                            "Worker setup aborted; clones already created are left for teardown"
                        );
                    }
                    return Err(err);
                }
            }
            staged.push((database, target));
        }

        for (database, target) in &staged {
            for alias in &database.aliases {
                registry.set_physical_name(alias, target)?;
            }
        }
        for (mirror, target_alias) in &plan.mirrors {
            let clone_name = registry.entry(target_alias)?.physical_name.clone();
            registry.set_physical_name(mirror, clone_name)?;
        }

        Ok(CloneSet {
            worker: identity.clone(),
            entries: registry.snapshot(),
            reused,
        })
    }

    /// Returns whether an existing clone was reused
    async fn clone_one(
        &self,
        database: &TestDatabase,
        target: &str,
        flags: &ProvisioningFlags,
    ) -> Result<bool> {
        let alias = database.primary_alias();
        let template = database.test_name.as_str();
        let params = &database.params;

        let exists = self
            .engine
            .database_exists(params, target)
            .await
            .map_err(|e| ProvisioningError::engine("inspect", target, e))?;

        if exists {
            if flags.reuses_existing() {
                log_provisioning_operation("reuse", Some(alias), target, "existing", None);
                return Ok(true);
            }
            log_provisioning_operation("destroy", Some(alias), target, "stale", None);
            self.engine
                .drop_database(params, target)
                .await
                .map_err(|e| ProvisioningError::engine("destroy", target, e))?;
        }

        self.engine
            .clone_database(params, template, target)
            .await
            .map_err(|e| ProvisioningError::engine("clone", target, e))?;
        log_provisioning_operation("clone", Some(alias), target, "cloned", Some(template));
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_token_yields_trailing_digits() {
        assert_eq!(WorkerIdentity::from_worker_token("gw3").unwrap().suffix(), "3");
        assert_eq!(WorkerIdentity::from_worker_token("gw12").unwrap().suffix(), "12");
        assert_eq!(WorkerIdentity::from_worker_token("7").unwrap().suffix(), "7");
        assert!(WorkerIdentity::from_worker_token("master").is_err());
    }

    #[test]
    fn suffix_must_be_non_empty_and_alphanumeric() {
        assert!(WorkerIdentity::new("").is_err());
        assert!(WorkerIdentity::new("a-b").is_err());
        assert!(WorkerIdentity::new("a\"b").is_err());
        assert_eq!(WorkerIdentity::new("w2").unwrap().suffix(), "w2");
    }

    #[tokio::test]
    async fn overlong_clone_names_are_rejected_before_cloning() {
        use crate::config::MAX_DATABASE_NAME_BYTES;
        use crate::engine::MemoryEngine;
        use crate::registry::ConnectionParams;

        let template = "a".repeat(MAX_DATABASE_NAME_BYTES - 1);
        let mut registry = ConnectionRegistry::new();
        let params = ConnectionParams::new("localhost", 5432, "postgres");
        registry.insert(ConnectionEntry::new("default", params, "app").with_test_name(template));
        let before = registry.clone();
        let engine = MemoryEngine::new();

        let err = WorkerCloneProvisioner::new(Arc::new(engine.clone()))
            .clone_for_worker(
                &mut registry,
                &WorkerIdentity::from_index(3),
                &ProvisioningFlags::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisioningError::Configuration { .. }));
        assert!(engine.calls().is_empty());
        assert_eq!(registry, before);
    }

    #[test]
    fn clone_name_appends_suffix() {
        let identity = WorkerIdentity::from_index(3);
        assert_eq!(identity.clone_name("test_default"), "test_default_3");
        assert_eq!(identity.to_string(), "worker 3");
    }
}
