//! PostgreSQL engine.
//!
//! Database-level statements (create, drop, clone) run on a connection to the server's
//! maintenance database; schema construction connects to the target database itself.
//! `CREATE DATABASE ... TEMPLATE` refuses to run while anything else is connected to the
//! template, so every connection opened here is closed before the call returns.

use super::{DatabaseEngine, SchemaReport};
use crate::error::EngineError;
use crate::migrations::{SchemaPlan, BOOKKEEPING_TABLE};
use crate::registry::ConnectionParams;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{Connection, Executor, Row};
use std::collections::HashSet;
use tracing::{debug, info};

const DEFAULT_MAINTENANCE_DATABASE: &str = "postgres";

#[derive(Debug, Clone)]
pub struct PostgresEngine {
    maintenance_database: String,
}

impl Default for PostgresEngine {
    fn default() -> Self {
        Self {
            maintenance_database: DEFAULT_MAINTENANCE_DATABASE.to_string(),
        }
    }
}

impl PostgresEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Database to connect to for create/drop/clone statements
    pub fn with_maintenance_database(mut self, database: impl Into<String>) -> Self {
        self.maintenance_database = database.into();
        self
    }

    fn connect_options(params: &ConnectionParams, database: &str) -> PgConnectOptions {
        let options = PgConnectOptions::new()
            .host(&params.host)
            .port(params.port)
            .username(&params.username)
            .database(database);
        if params.password.is_empty() {
            options
        } else {
            options.password(&params.password)
        }
    }

    async fn maintenance_connection(
        &self,
        params: &ConnectionParams,
    ) -> Result<PgConnection, EngineError> {
        let options = Self::connect_options(params, &self.maintenance_database);
        Ok(PgConnection::connect_with(&options).await?)
    }

    async fn execute_on_server(
        &self,
        params: &ConnectionParams,
        statement: &str,
    ) -> Result<(), EngineError> {
        debug!(statement = %statement, host = %params.host, "Executing database statement");
        let mut conn = self.maintenance_connection(params).await?;
        let result = (&mut conn).execute(sqlx::raw_sql(statement)).await;
        conn.close().await?;
        result?;
        Ok(())
    }
}

/// Quote an identifier for interpolation into DDL
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[async_trait]
impl DatabaseEngine for PostgresEngine {
    async fn database_exists(
        &self,
        params: &ConnectionParams,
        name: &str,
    ) -> Result<bool, EngineError> {
        let mut conn = self.maintenance_connection(params).await?;
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM pg_database WHERE datname = $1)",
        )
        .bind(name)
        .fetch_one(&mut conn)
        .await;
        conn.close().await?;
        Ok(exists?)
    }

    async fn create_database(
        &self,
        params: &ConnectionParams,
        name: &str,
    ) -> Result<(), EngineError> {
        self.execute_on_server(params, &format!("CREATE DATABASE {}", quote_identifier(name)))
            .await
    }

    async fn drop_database(&self, params: &ConnectionParams, name: &str) -> Result<(), EngineError> {
        self.execute_on_server(
            params,
            &format!("DROP DATABASE IF EXISTS {}", quote_identifier(name)),
        )
        .await
    }

    async fn clone_database(
        &self,
        params: &ConnectionParams,
        template: &str,
        target: &str,
    ) -> Result<(), EngineError> {
        self.execute_on_server(
            params,
            &format!(
                "CREATE DATABASE {} WITH TEMPLATE {}",
                quote_identifier(target),
                quote_identifier(template)
            ),
        )
        .await
    }

    async fn build_schema(
        &self,
        params: &ConnectionParams,
        name: &str,
        plan: &SchemaPlan,
    ) -> Result<SchemaReport, EngineError> {
        let mut conn = PgConnection::connect_with(&Self::connect_options(params, name)).await?;
        let result = apply_plan(&mut conn, name, plan).await;
        conn.close().await?;
        result
    }
}

async fn apply_plan(
    conn: &mut PgConnection,
    database: &str,
    plan: &SchemaPlan,
) -> Result<SchemaReport, EngineError> {
    let create_bookkeeping = format!(
        "CREATE TABLE IF NOT EXISTS {BOOKKEEPING_TABLE} (
            module VARCHAR(255) NOT NULL,
            version VARCHAR(14) NOT NULL,
            applied_at TIMESTAMP WITHOUT TIME ZONE DEFAULT NOW(),
            PRIMARY KEY (module, version)
        )"
    );
    (&mut *conn)
        .execute(sqlx::raw_sql(&create_bookkeeping))
        .await?;

    let applied: HashSet<(String, String)> =
        sqlx::query(&format!("SELECT module, version FROM {BOOKKEEPING_TABLE}"))
            .fetch_all(&mut *conn)
            .await?
            .into_iter()
            .map(|row| (row.get::<String, _>("module"), row.get::<String, _>("version")))
            .collect();

    let mut report = SchemaReport {
        database: database.to_string(),
        applied: Vec::new(),
        empty_schema: plan.empty_schema,
    };

    for (module, migrations) in &plan.modules {
        for migration in migrations {
            if applied.contains(&(module.clone(), migration.version.clone())) {
                continue;
            }

            if plan.verbosity > 0 {
                info!(
                    database = %database,
                    module = %module,
                    version = %migration.version,
                    "Applying migration: {}",
                    migration.name
                );
            }

            let sql = tokio::fs::read_to_string(&migration.path).await?;
            let mut tx = conn.begin().await?;
            (&mut *tx).execute(sqlx::raw_sql(&sql)).await?;
            sqlx::query(&format!(
                "INSERT INTO {BOOKKEEPING_TABLE} (module, version) VALUES ($1, $2)"
            ))
            .bind(module)
            .bind(&migration.version)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;

            report.applied.push(format!("{module}/{}", migration.version));
        }
    }

    Ok(report)
}
