//! Error types for test database provisioning.
//!
//! Every provisioning failure is fatal to the calling process. The coordinator never retries
//! and never keeps partial state around, so these types only need to carry enough context for
//! the test run to abort with the engine's own message up front.

use crate::config::ConfigurationError;
use thiserror::Error;

/// Failure reported by a [`DatabaseEngine`](crate::engine::DatabaseEngine) primitive.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("{0}")]
    Database(String),
    #[error("database \"{name}\" does not exist")]
    MissingDatabase { name: String },
    #[error("database \"{name}\" already exists")]
    DatabaseExists { name: String },
    #[error("migration io error: {0}")]
    Io(String),
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        match err.as_database_error() {
            Some(db_err) => EngineError::Database(db_err.message().to_string()),
            None => EngineError::Database(err.to_string()),
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io(err.to_string())
    }
}

/// Errors surfaced by the provisioning lifecycle hooks.
#[derive(Debug, Error)]
pub enum ProvisioningError {
    /// Contradictory or missing flags, aliases or worker identity.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// The underlying engine rejected a create, clone, drop or schema step.
    #[error("{message} (while trying to {operation} database \"{database}\")")]
    Engine {
        operation: String,
        database: String,
        message: String,
    },

    /// The configuration file could not be loaded or validated.
    #[error(transparent)]
    Config(#[from] ConfigurationError),
}

impl ProvisioningError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn engine(operation: &str, database: &str, source: EngineError) -> Self {
        Self::Engine {
            operation: operation.to_string(),
            database: database.to_string(),
            message: source.to_string(),
        }
    }

    /// Whether this error came from the database engine rather than configuration.
    pub fn is_engine_error(&self) -> bool {
        matches!(self, Self::Engine { .. })
    }
}

pub type Result<T> = std::result::Result<T, ProvisioningError>;
