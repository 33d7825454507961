//! Template database construction.

use crate::engine::DatabaseEngine;
use crate::error::{ProvisioningError, Result};
use crate::flags::ProvisioningFlags;
use crate::logging::log_provisioning_operation;
use crate::migrations::{SchemaBuildStrategy, SchemaPlan};
use crate::registry::{check_database_name, ConnectionEntry, ConnectionRegistry, TestDatabase};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Connection state of every alias once templates exist. Workers clone from these names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSet {
    entries: BTreeMap<String, ConnectionEntry>,
    created: Vec<String>,
    reused: Vec<String>,
}

impl TemplateSet {
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

    /// Templates built from scratch by this run
    pub fn created(&self) -> &[String] {
        &self.created
    }

    /// Templates that already existed and were kept
    pub fn reused(&self) -> &[String] {
        &self.reused
    }
}

enum TemplateAction {
    Created,
    Reused,
}

pub struct TemplateProvisioner {
    engine: Arc<dyn DatabaseEngine>,
    strategy: SchemaBuildStrategy,
}

impl TemplateProvisioner {
    pub fn new(engine: Arc<dyn DatabaseEngine>, strategy: SchemaBuildStrategy) -> Self {
        Self { engine, strategy }
    }

    pub fn strategy(&self) -> &SchemaBuildStrategy {
        &self.strategy
    }

    /// Build every template database, then point each alias at its template.
    ///
    /// Returns only after all databases are done. The first engine failure aborts the whole
    /// set and leaves the registry untouched. Disabled migrations require the empty-schema
    /// strategy.
    pub async fn build_templates(
        &self,
        registry: &mut ConnectionRegistry,
        flags: &ProvisioningFlags,
    ) -> Result<TemplateSet> {
        if !flags.migrations_enabled && !self.strategy.is_empty_schema() {
            return Err(ProvisioningError::configuration(
                "migrations are disabled but the schema strategy runs migrations",
            ));
        }
        let plan = registry.unique_databases_and_mirrors()?;
        for database in &plan.databases {
            check_database_name(&database.test_name)?;
        }
        let schema = self.strategy.plan(flags.verbosity)?;

        info!(
            databases = plan.databases.len(),
            mirrors = plan.mirrors.len(),
            reuse_existing = flags.reuses_existing(),
            empty_schema = schema.empty_schema,
            "Building template databases"
        );

        let mut created = Vec::new();
        let mut reused = Vec::new();
        for database in &plan.databases {
            match self.build_one(database, &schema, flags).await? {
                TemplateAction::Created => created.push(database.test_name.clone()),
                TemplateAction::Reused => reused.push(database.test_name.clone()),
            }
        }

        for database in &plan.databases {
            for alias in &database.aliases {
                registry.set_physical_name(alias, &database.test_name)?;
            }
        }
        for (mirror, target) in &plan.mirrors {
            let target_name = registry.entry(target)?.physical_name.clone();
            debug!(alias = %mirror, target = %target, "Mirror alias shares template");
            registry.set_physical_name(mirror, target_name)?;
        }

        Ok(TemplateSet {
            entries: registry.snapshot(),
            created,
            reused,
        })
    }

    async fn build_one(
        &self,
        database: &TestDatabase,
        schema: &SchemaPlan,
        flags: &ProvisioningFlags,
    ) -> Result<TemplateAction> {
        let alias = database.primary_alias();
        let name = database.test_name.as_str();
        let params = &database.params;

        let exists = self
            .engine
            .database_exists(params, name)
            .await
            .map_err(|e| ProvisioningError::engine("inspect", name, e))?;

        let action = if exists && flags.reuses_existing() {
            log_provisioning_operation("reuse", Some(alias), name, "existing", None);
            TemplateAction::Reused
        } else {
            if exists {
                log_provisioning_operation("destroy", Some(alias), name, "stale", None);
                self.engine
                    .drop_database(params, name)
                    .await
                    .map_err(|e| ProvisioningError::engine("destroy", name, e))?;
            }
            self.engine
                .create_database(params, name)
                .await
                .map_err(|e| ProvisioningError::engine("create", name, e))?;
            log_provisioning_operation("create", Some(alias), name, "created", None);
            TemplateAction::Created
        };

        let report = self
            .engine
            .build_schema(params, name, schema)
            .await
            .map_err(|e| ProvisioningError::engine("build schema for", name, e))?;

        if schema.verbosity > 0 {
            info!(
                alias = %alias,
                database = %name,
                applied = report.applied.len(),
                empty_schema = report.empty_schema,
                "Template schema ready"
            );
        }

        Ok(action)
    }
}
