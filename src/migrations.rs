//! # Migration Policy
//!
//! Selects how template databases get their schema.
//!
//! ## Overview
//!
//! Migrations are discovered from a directory tree with one subdirectory per module, each
//! holding timestamped SQL files: `<root>/<module>/YYYYMMDDHHMMSS_description.sql`.
//!
//! - [`SchemaBuildStrategy::Normal`] applies every outstanding file, module by module, in
//!   version order.
//! - [`SchemaBuildStrategy::EmptySchema`] answers every module lookup with "present, no
//!   migrations" and forces verbosity to zero, so a template is created with nothing but the
//!   bookkeeping table.
//!
//! [`MigrationPolicy`] is the per-process switch between the two. It is an explicit value
//! handed to the provisioners, never process-global state.

use crate::error::{ProvisioningError, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Table recording applied migrations in every provisioned database
pub const BOOKKEEPING_TABLE: &str = "testdb_schema_migrations";

/// Represents a single migration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub module: String,
    /// Version timestamp (YYYYMMDDHHMMSS format)
    pub version: String,
    /// Human-readable migration name
    pub name: String,
    pub path: PathBuf,
}

/// Where migration scripts live and which modules to apply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationSource {
    root: PathBuf,
    modules: Option<Vec<String>>,
}

impl MigrationSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            modules: None,
        }
    }

    /// Restrict (and order) the modules applied instead of discovering them
    pub fn with_modules(mut self, modules: Vec<String>) -> Self {
        self.modules = Some(modules);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Configured modules, or every subdirectory of the root in name order
    pub fn module_names(&self) -> Result<Vec<String>> {
        if let Some(modules) = &self.modules {
            return Ok(modules.clone());
        }

        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut modules = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(|e| read_error(&self.root, e))? {
            let entry = entry.map_err(|e| read_error(&self.root, e))?;
            if entry.path().is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    modules.push(name.to_string());
                }
            }
        }
        modules.sort();
        Ok(modules)
    }

    /// Migrations of one module in version order, `None` when the module has no directory
    pub fn discover_module(&self, module: &str) -> Result<Option<Vec<Migration>>> {
        let module_dir = self.root.join(module);
        if !module_dir.is_dir() {
            return Ok(None);
        }

        let mut migrations = BTreeMap::new();
        for entry in fs::read_dir(&module_dir).map_err(|e| read_error(&module_dir, e))? {
            let entry = entry.map_err(|e| read_error(&module_dir, e))?;
            let path = entry.path();

            if path.is_file() && path.extension().map(|s| s == "sql").unwrap_or(false) {
                if let Some(filename) = path.file_stem().and_then(|s| s.to_str()) {
                    if let Some((version, name)) = parse_migration_filename(filename) {
                        migrations.insert(
                            version.clone(),
                            Migration {
                                module: module.to_string(),
                                version,
                                name,
                                path,
                            },
                        );
                    }
                }
            }
        }

        Ok(Some(migrations.into_values().collect()))
    }
}

fn read_error(path: &Path, err: std::io::Error) -> ProvisioningError {
    ProvisioningError::configuration(format!(
        "cannot read migrations at {}: {err}",
        path.display()
    ))
}

/// Parse `YYYYMMDDHHMMSS_migration_name` into (version, name)
pub fn parse_migration_filename(filename: &str) -> Option<(String, String)> {
    if filename.len() < 15 || !filename.is_char_boundary(14) {
        return None;
    }

    let (version_part, name_part) = filename.split_at(14);
    if !version_part.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let name = name_part.strip_prefix('_').unwrap_or(name_part).replace('_', " ");
    Some((version_part.to_string(), name))
}

/// How schema construction runs for a freshly created database
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaBuildStrategy {
    /// Run migration scripts from the source
    Normal(MigrationSource),
    /// Skip every script; modules still resolve, to nothing
    EmptySchema { modules: Vec<String> },
}

/// Ordered modules with the migrations to apply for each
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaPlan {
    pub modules: Vec<(String, Vec<Migration>)>,
    pub verbosity: u8,
    pub empty_schema: bool,
}

impl SchemaPlan {
    pub fn migration_count(&self) -> usize {
        self.modules.iter().map(|(_, migrations)| migrations.len()).sum()
    }
}

impl SchemaBuildStrategy {
    pub fn is_empty_schema(&self) -> bool {
        matches!(self, Self::EmptySchema { .. })
    }

    pub fn requested_modules(&self) -> Result<Vec<String>> {
        match self {
            Self::Normal(source) => source.module_names(),
            Self::EmptySchema { modules } => Ok(modules.clone()),
        }
    }

    /// Whether migrations exist for `module`. Always true for the empty schema.
    pub fn has_migrations_module(&self, module: &str) -> Result<bool> {
        Ok(self.migration_module(module)?.is_some())
    }

    /// Migrations registered for `module`
    pub fn migration_module(&self, module: &str) -> Result<Option<Vec<Migration>>> {
        match self {
            Self::Normal(source) => source.discover_module(module),
            Self::EmptySchema { .. } => Ok(Some(Vec::new())),
        }
    }

    pub fn effective_verbosity(&self, requested: u8) -> u8 {
        match self {
            Self::Normal(_) => requested,
            Self::EmptySchema { .. } => 0,
        }
    }

    /// Resolve every requested module into a plan the engine can execute
    pub fn plan(&self, verbosity: u8) -> Result<SchemaPlan> {
        let mut modules = Vec::new();
        for module in self.requested_modules()? {
            let migrations = self.migration_module(&module)?.ok_or_else(|| {
                ProvisioningError::configuration(format!(
                    "migration module '{module}' has no directory under the migrations root"
                ))
            })?;
            modules.push((module, migrations));
        }

        Ok(SchemaPlan {
            modules,
            verbosity: self.effective_verbosity(verbosity),
            empty_schema: self.is_empty_schema(),
        })
    }
}

/// Per-process choice between running migrations and building empty schemas
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationPolicy {
    migrations_enabled: bool,
}

impl Default for MigrationPolicy {
    fn default() -> Self {
        Self {
            migrations_enabled: true,
        }
    }
}

impl MigrationPolicy {
    pub fn new(migrations_enabled: bool) -> Self {
        Self { migrations_enabled }
    }

    /// Switch to the empty-schema strategy for the rest of this policy's life.
    /// Calling it again changes nothing.
    pub fn disable(&mut self) {
        self.migrations_enabled = false;
    }

    pub fn is_disabled(&self) -> bool {
        !self.migrations_enabled
    }

    pub fn strategy(&self, source: &MigrationSource) -> Result<SchemaBuildStrategy> {
        if self.migrations_enabled {
            Ok(SchemaBuildStrategy::Normal(source.clone()))
        } else {
            Ok(SchemaBuildStrategy::EmptySchema {
                modules: source.module_names()?,
            })
        }
    }
}
