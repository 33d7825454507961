//! Registry and coordinator builders shared by the integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use testdb_coordinator::{
    ConnectionEntry, ConnectionParams, ConnectionRegistry, LifecycleCoordinator, MemoryEngine,
    MigrationSource, SchemaBuildStrategy,
};

pub fn local_params() -> ConnectionParams {
    ConnectionParams::new("localhost", 5432, "postgres").with_password("postgres")
}

/// Builder for registries of (alias, base database name) pairs
pub struct RegistryBuilder {
    entries: Vec<ConnectionEntry>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn with_alias(mut self, alias: &str, base_name: &str) -> Self {
        self.entries
            .push(ConnectionEntry::new(alias, local_params(), base_name));
        self
    }

    pub fn with_mirror(mut self, alias: &str, base_name: &str, target: &str) -> Self {
        self.entries
            .push(ConnectionEntry::new(alias, local_params(), base_name).mirroring(target));
        self
    }

    pub fn build(self) -> ConnectionRegistry {
        let mut registry = ConnectionRegistry::new();
        for entry in self.entries {
            registry.insert(entry);
        }
        registry
    }
}

/// `default` and `analytics`, templates `test_default` and `test_analytics`
pub fn default_and_analytics() -> ConnectionRegistry {
    RegistryBuilder::new()
        .with_alias("default", "default")
        .with_alias("analytics", "analytics")
        .build()
}

/// `analytics` mirrors `default`
pub fn mirrored_analytics() -> ConnectionRegistry {
    RegistryBuilder::new()
        .with_alias("default", "default")
        .with_mirror("analytics", "analytics", "default")
        .build()
}

pub fn write_migration(root: &Path, module: &str, file: &str) {
    let dir = root.join(module);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(file), "SELECT 1;").unwrap();
}

/// Migration tree with `core` (users, orders) and `billing` (invoices)
pub fn migrations_tree() -> TempDir {
    let root = tempfile::tempdir().unwrap();
    write_migration(root.path(), "core", "20240101000000_create_users.sql");
    write_migration(root.path(), "core", "20240102000000_create_orders.sql");
    write_migration(root.path(), "billing", "20240103000000_create_invoices.sql");
    root
}

pub fn normal_strategy(root: &Path) -> SchemaBuildStrategy {
    SchemaBuildStrategy::Normal(MigrationSource::new(root))
}

pub fn empty_strategy() -> SchemaBuildStrategy {
    SchemaBuildStrategy::EmptySchema {
        modules: vec!["core".to_string(), "billing".to_string()],
    }
}

/// Coordinator over a shared in-memory server
pub fn coordinator(
    engine: &MemoryEngine,
    registry: ConnectionRegistry,
    migrations: &Path,
) -> LifecycleCoordinator {
    LifecycleCoordinator::new(
        Arc::new(engine.clone()),
        registry,
        MigrationSource::new(migrations),
    )
}
