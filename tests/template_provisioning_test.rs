//! Template provisioning against the in-memory engine.

mod common;

use common::*;
use std::sync::Arc;
use testdb_coordinator::migrations::BOOKKEEPING_TABLE;
use testdb_coordinator::{
    DatabaseEngine, EngineCall, MemoryEngine, ProvisioningError, ProvisioningFlags,
    SchemaBuildStrategy, TemplateProvisioner,
};

fn provisioner(engine: &MemoryEngine, strategy: SchemaBuildStrategy) -> TemplateProvisioner {
    TemplateProvisioner::new(Arc::new(engine.clone()), strategy)
}

#[tokio::test]
async fn builds_one_template_per_alias_with_migrations() {
    let engine = MemoryEngine::new();
    let migrations = migrations_tree();
    let mut registry = default_and_analytics();

    let templates = provisioner(&engine, normal_strategy(migrations.path()))
        .build_templates(&mut registry, &ProvisioningFlags::default())
        .await
        .expect("templates should build");

    assert_eq!(templates.physical_name("default"), Some("test_default"));
    assert_eq!(templates.physical_name("analytics"), Some("test_analytics"));
    assert_eq!(registry.physical_name("default"), Some("test_default"));
    assert_eq!(templates.created(), ["test_default", "test_analytics"]);
    assert!(templates.reused().is_empty());

    let tables = engine.tables("test_default").unwrap();
    assert!(tables.contains(&"create_users".to_string()));
    assert!(tables.contains(&"create_orders".to_string()));
    assert!(tables.contains(&"create_invoices".to_string()));
}

#[tokio::test]
async fn force_create_rebuilds_even_when_reuse_requested() {
    let engine = MemoryEngine::new();
    let params = local_params();
    engine.create_database(&params, "test_default").await.unwrap();
    engine.insert_row("test_default", "users", "stale").unwrap();

    let flags = ProvisioningFlags::default()
        .with_keep_existing(true)
        .with_force_create(true);
    let mut registry = RegistryBuilder::new().with_alias("default", "default").build();
    engine.clear_calls();

    let templates = provisioner(&engine, empty_strategy())
        .build_templates(&mut registry, &flags)
        .await
        .unwrap();

    assert_eq!(templates.created(), ["test_default"]);
    assert!(engine.rows("test_default", "users").is_none());
    assert!(engine.calls().contains(&EngineCall::Drop {
        database: "test_default".to_string()
    }));
}

#[tokio::test]
async fn reuse_keeps_existing_template_data() {
    let engine = MemoryEngine::new();
    let migrations = migrations_tree();
    let flags = ProvisioningFlags::default().with_keep_existing(true);

    let mut registry = default_and_analytics();
    provisioner(&engine, normal_strategy(migrations.path()))
        .build_templates(&mut registry, &flags)
        .await
        .unwrap();
    engine.insert_row("test_default", "create_users", "alice").unwrap();
    engine.clear_calls();

    let mut registry = default_and_analytics();
    let templates = provisioner(&engine, normal_strategy(migrations.path()))
        .build_templates(&mut registry, &flags)
        .await
        .expect("second build with reuse should succeed");

    assert_eq!(templates.reused(), ["test_default", "test_analytics"]);
    assert!(templates.created().is_empty());
    assert_eq!(
        engine.rows("test_default", "create_users").unwrap(),
        vec!["alice"]
    );
    assert!(engine
        .calls()
        .iter()
        .all(|call| !matches!(call, EngineCall::Create { .. } | EngineCall::Drop { .. })));
}

#[tokio::test]
async fn existing_template_is_destroyed_without_reuse() {
    let engine = MemoryEngine::new();
    let params = local_params();
    engine.create_database(&params, "test_default").await.unwrap();
    engine.insert_row("test_default", "users", "stale").unwrap();

    let mut registry = RegistryBuilder::new().with_alias("default", "default").build();
    provisioner(&engine, empty_strategy())
        .build_templates(&mut registry, &ProvisioningFlags::default())
        .await
        .unwrap();

    assert!(engine.rows("test_default", "users").is_none());
}

#[tokio::test]
async fn empty_schema_runs_no_migrations() {
    let engine = MemoryEngine::new();
    let mut registry = default_and_analytics();

    provisioner(&engine, empty_strategy())
        .build_templates(&mut registry, &ProvisioningFlags::default().with_migrations(false))
        .await
        .unwrap();

    for database in ["test_default", "test_analytics"] {
        assert_eq!(
            engine.tables(database).unwrap(),
            vec![BOOKKEEPING_TABLE.to_string()]
        );
        assert!(engine.rows(database, BOOKKEEPING_TABLE).unwrap().is_empty());
    }
    assert!(engine.calls().iter().all(|call| match call {
        EngineCall::BuildSchema { migrations, .. } => *migrations == 0,
        _ => true,
    }));
}

#[tokio::test]
async fn engine_failure_aborts_without_repointing_aliases() {
    let engine = MemoryEngine::new();
    engine.fail_on("create", "test_analytics", "permission denied to create database");
    let mut registry = default_and_analytics();

    let err = provisioner(&engine, empty_strategy())
        .build_templates(&mut registry, &ProvisioningFlags::default())
        .await
        .unwrap_err();

    assert!(err.is_engine_error());
    assert!(err
        .to_string()
        .starts_with("permission denied to create database"));
    assert_eq!(registry.physical_name("default"), Some("default"));
    assert_eq!(registry.physical_name("analytics"), Some("analytics"));
}

#[tokio::test]
async fn missing_migration_module_fails_before_touching_the_server() {
    let engine = MemoryEngine::new();
    let migrations = migrations_tree();
    let strategy = SchemaBuildStrategy::Normal(
        testdb_coordinator::MigrationSource::new(migrations.path())
            .with_modules(vec!["core".to_string(), "ghost".to_string()]),
    );
    let mut registry = default_and_analytics();

    let err = provisioner(&engine, strategy)
        .build_templates(&mut registry, &ProvisioningFlags::default())
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisioningError::Configuration { .. }));
    assert!(engine.calls().is_empty());
}

#[tokio::test]
async fn disabled_migrations_require_empty_schema_strategy() {
    let engine = MemoryEngine::new();
    let migrations = migrations_tree();
    let mut registry = default_and_analytics();

    let err = provisioner(&engine, normal_strategy(migrations.path()))
        .build_templates(&mut registry, &ProvisioningFlags::default().with_migrations(false))
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisioningError::Configuration { .. }));
    assert!(engine.calls().is_empty());
    assert_eq!(registry.physical_name("default"), Some("default"));
}

#[tokio::test]
async fn overlong_template_name_fails_before_touching_the_server() {
    let engine = MemoryEngine::new();
    let mut registry = RegistryBuilder::new()
        .with_alias("default", &"x".repeat(60))
        .build();

    let err = provisioner(&engine, empty_strategy())
        .build_templates(&mut registry, &ProvisioningFlags::default())
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisioningError::Configuration { .. }));
    assert!(engine.calls().is_empty());
}

#[tokio::test]
async fn mirror_shares_the_target_template() {
    let engine = MemoryEngine::new();
    let mut registry = mirrored_analytics();

    let templates = provisioner(&engine, empty_strategy())
        .build_templates(&mut registry, &ProvisioningFlags::default())
        .await
        .unwrap();

    assert_eq!(templates.physical_name("analytics"), Some("test_default"));
    assert_eq!(engine.databases(), vec!["test_default".to_string()]);
}

#[tokio::test]
async fn aliases_with_same_database_build_once() {
    let engine = MemoryEngine::new();
    let mut registry = RegistryBuilder::new()
        .with_alias("default", "app")
        .with_alias("replica", "app")
        .build();

    let templates = provisioner(&engine, empty_strategy())
        .build_templates(&mut registry, &ProvisioningFlags::default())
        .await
        .unwrap();

    let creates = engine
        .calls()
        .into_iter()
        .filter(|call| matches!(call, EngineCall::Create { .. }))
        .count();
    assert_eq!(creates, 1);
    assert_eq!(templates.physical_name("replica"), Some("test_app"));
}
