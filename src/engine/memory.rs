//! In-process engine.
//!
//! Keeps databases as plain maps behind a shared lock so several coordinators (a controller
//! and its workers) can be pointed at the same simulated server. Every primitive call is
//! recorded, and failures can be injected per operation and database name.
//!
//! Schema construction treats each migration as creating one table named after the
//! migration (`create users` -> `create_users`) and records it in the bookkeeping table.

use super::{DatabaseEngine, SchemaReport};
use crate::error::EngineError;
use crate::migrations::{SchemaPlan, BOOKKEEPING_TABLE};
use crate::registry::ConnectionParams;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A recorded engine primitive invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Exists { database: String },
    Create { database: String },
    Drop { database: String },
    Clone { template: String, target: String },
    BuildSchema { database: String, migrations: usize },
}

impl EngineCall {
    fn operation(&self) -> &'static str {
        match self {
            Self::Exists { .. } => "exists",
            Self::Create { .. } => "create",
            Self::Drop { .. } => "drop",
            Self::Clone { .. } => "clone",
            Self::BuildSchema { .. } => "build_schema",
        }
    }

    /// The database the call creates or acts on
    fn database(&self) -> &str {
        match self {
            Self::Exists { database }
            | Self::Create { database }
            | Self::Drop { database }
            | Self::BuildSchema { database, .. } => database.as_str(),
            Self::Clone { target, .. } => target.as_str(),
        }
    }
}

/// Table name -> rows
type Tables = BTreeMap<String, Vec<String>>;

#[derive(Debug, Default)]
struct MemoryState {
    databases: BTreeMap<String, Tables>,
    calls: Vec<EngineCall>,
    failures: Vec<(String, String, String)>,
}

impl MemoryState {
    fn record(&mut self, call: EngineCall) -> Result<(), EngineError> {
        let injected = self
            .failures
            .iter()
            .find(|(operation, database, _)| {
                operation == call.operation() && database == call.database()
            })
            .map(|(_, _, message)| message.clone());
        self.calls.push(call);
        match injected {
            Some(message) => Err(EngineError::Database(message)),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryEngine {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `operation` (`exists`, `create`, `drop`, `clone`, `build_schema`) fail for
    /// `database` with `message`. For clones the database is the clone target.
    pub fn fail_on(&self, operation: &str, database: &str, message: &str) {
        self.state.lock().failures.push((
            operation.to_string(),
            database.to_string(),
            message.to_string(),
        ));
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn clone_calls(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                EngineCall::Clone { template, target } => Some((template, target)),
                _ => None,
            })
            .collect()
    }

    pub fn databases(&self) -> Vec<String> {
        self.state.lock().databases.keys().cloned().collect()
    }

    pub fn contains(&self, database: &str) -> bool {
        self.state.lock().databases.contains_key(database)
    }

    /// Table names of `database`, bookkeeping table included
    pub fn tables(&self, database: &str) -> Option<Vec<String>> {
        self.state
            .lock()
            .databases
            .get(database)
            .map(|tables| tables.keys().cloned().collect())
    }

    pub fn rows(&self, database: &str, table: &str) -> Option<Vec<String>> {
        self.state
            .lock()
            .databases
            .get(database)
            .and_then(|tables| tables.get(table).cloned())
    }

    /// Append a row to a table, creating the table when needed
    pub fn insert_row(&self, database: &str, table: &str, row: &str) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        let tables = state
            .databases
            .get_mut(database)
            .ok_or_else(|| EngineError::MissingDatabase {
                name: database.to_string(),
            })?;
        tables.entry(table.to_string()).or_default().push(row.to_string());
        Ok(())
    }
}

#[async_trait]
impl DatabaseEngine for MemoryEngine {
    async fn database_exists(
        &self,
        _params: &ConnectionParams,
        name: &str,
    ) -> Result<bool, EngineError> {
        let mut state = self.state.lock();
        state.record(EngineCall::Exists {
            database: name.to_string(),
        })?;
        Ok(state.databases.contains_key(name))
    }

    async fn create_database(
        &self,
        _params: &ConnectionParams,
        name: &str,
    ) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        state.record(EngineCall::Create {
            database: name.to_string(),
        })?;
        if state.databases.contains_key(name) {
            return Err(EngineError::DatabaseExists {
                name: name.to_string(),
            });
        }
        state.databases.insert(name.to_string(), Tables::new());
        Ok(())
    }

    async fn drop_database(&self, _params: &ConnectionParams, name: &str) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        state.record(EngineCall::Drop {
            database: name.to_string(),
        })?;
        state.databases.remove(name);
        Ok(())
    }

    async fn clone_database(
        &self,
        _params: &ConnectionParams,
        template: &str,
        target: &str,
    ) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        state.record(EngineCall::Clone {
            template: template.to_string(),
            target: target.to_string(),
        })?;
        let source = state
            .databases
            .get(template)
            .cloned()
            .ok_or_else(|| EngineError::MissingDatabase {
                name: template.to_string(),
            })?;
        if state.databases.contains_key(target) {
            return Err(EngineError::DatabaseExists {
                name: target.to_string(),
            });
        }
        state.databases.insert(target.to_string(), source);
        Ok(())
    }

    async fn build_schema(
        &self,
        _params: &ConnectionParams,
        name: &str,
        plan: &SchemaPlan,
    ) -> Result<SchemaReport, EngineError> {
        let mut state = self.state.lock();
        state.record(EngineCall::BuildSchema {
            database: name.to_string(),
            migrations: plan.migration_count(),
        })?;
        let tables = state
            .databases
            .get_mut(name)
            .ok_or_else(|| EngineError::MissingDatabase {
                name: name.to_string(),
            })?;

        let mut report = SchemaReport {
            database: name.to_string(),
            applied: Vec::new(),
            empty_schema: plan.empty_schema,
        };

        let bookkeeping = tables.entry(BOOKKEEPING_TABLE.to_string()).or_default();
        let mut created = Vec::new();
        for (module, migrations) in &plan.modules {
            for migration in migrations {
                let key = format!("{module}/{}", migration.version);
                if bookkeeping.contains(&key) {
                    continue;
                }
                bookkeeping.push(key.clone());
                created.push(migration.name.replace(' ', "_"));
                report.applied.push(key);
            }
        }
        for table in created {
            tables.entry(table).or_default();
        }

        Ok(report)
    }
}
