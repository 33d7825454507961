#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # testdb-coordinator
//!
//! Isolated PostgreSQL test databases for parallel test runs.
//!
//! ## Overview
//!
//! A parallel test run has one controller process and N worker processes. The controller
//! builds one *template* database per configured alias, once. Every worker then clones each
//! template into its own database (`test_app` -> `test_app_3`) and repoints its aliases at
//! the clone, so no two workers ever write to the same physical database.
//!
//! ## Module Organization
//!
//! - [`registry`] - alias -> connection parameters and current physical database
//! - [`flags`] - reuse / force-create / migrations / verbosity options
//! - [`migrations`] - migration discovery and the normal vs empty-schema strategy
//! - [`engine`] - create / drop / clone / schema primitives (PostgreSQL and in-memory)
//! - [`provisioning`] - template construction and per-worker cloning
//! - [`coordinator`] - lifecycle entry points selected by [`ExecutionMode`]
//! - [`config`] - YAML configuration with environment overrides
//! - [`logging`] - structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use testdb_coordinator::{
//!     ConfigManager, ConnectionRegistry, ExecutionMode, LifecycleCoordinator,
//!     MigrationSource, PostgresEngine, ProvisioningFlags,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let registry = ConnectionRegistry::from_config(manager.config());
//! let migrations = MigrationSource::new(manager.migrations_directory());
//! let flags = ProvisioningFlags::from(&manager.config().provisioning);
//!
//! let mut coordinator =
//!     LifecycleCoordinator::new(Arc::new(PostgresEngine::new()), registry, migrations);
//! let mode = ExecutionMode::from_signals(true, Some("gw3"))?;
//! let outcome = coordinator.run(&mode, &flags).await?;
//! println!("{:?}", outcome.physical_names());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod flags;
pub mod logging;
pub mod migrations;
pub mod provisioning;
pub mod registry;

pub use config::{ConfigManager, ConfigurationError, ProvisionerConfig};
pub use coordinator::{ExecutionMode, LifecycleCoordinator, SetupOutcome};
pub use engine::{DatabaseEngine, EngineCall, MemoryEngine, PostgresEngine, SchemaReport};
pub use error::{EngineError, ProvisioningError, Result};
pub use flags::ProvisioningFlags;
pub use migrations::{MigrationPolicy, MigrationSource, SchemaBuildStrategy};
pub use provisioning::{
    CloneSet, TemplateProvisioner, TemplateSet, WorkerCloneProvisioner, WorkerIdentity,
};
pub use registry::{ConnectionEntry, ConnectionParams, ConnectionRegistry};
