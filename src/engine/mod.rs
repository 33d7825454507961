//! # Database Engine Primitives
//!
//! The coordinator never talks SQL directly. It drives a [`DatabaseEngine`], which exposes
//! exactly the primitives test provisioning needs: existence checks, create, drop, clone
//! from a template, and schema construction from a [`SchemaPlan`].
//!
//! - [`postgres`] - PostgreSQL implementation over sqlx
//! - [`memory`] - in-process implementation that records every call, used for dry runs and
//!   the test suite

pub mod memory;
pub mod postgres;

use crate::error::EngineError;
use crate::migrations::SchemaPlan;
use crate::registry::ConnectionParams;
use async_trait::async_trait;

pub use memory::{EngineCall, MemoryEngine};
pub use postgres::PostgresEngine;

/// Outcome of a schema construction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaReport {
    pub database: String,
    /// `module/version` of every migration applied by this call
    pub applied: Vec<String>,
    pub empty_schema: bool,
}

#[async_trait]
pub trait DatabaseEngine: Send + Sync {
    async fn database_exists(
        &self,
        params: &ConnectionParams,
        name: &str,
    ) -> Result<bool, EngineError>;

    async fn create_database(&self, params: &ConnectionParams, name: &str)
        -> Result<(), EngineError>;

    /// Drop `name`; dropping a database that does not exist succeeds
    async fn drop_database(&self, params: &ConnectionParams, name: &str) -> Result<(), EngineError>;

    /// Create `target` as a copy of `template`. Atomic from the caller's point of view and
    /// fails when `template` does not exist.
    async fn clone_database(
        &self,
        params: &ConnectionParams,
        template: &str,
        target: &str,
    ) -> Result<(), EngineError>;

    /// Apply outstanding migrations of `plan` to `name`, creating the bookkeeping table first
    async fn build_schema(
        &self,
        params: &ConnectionParams,
        name: &str,
        plan: &SchemaPlan,
    ) -> Result<SchemaReport, EngineError>;
}
