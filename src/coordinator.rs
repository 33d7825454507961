//! # Lifecycle Coordinator
//!
//! The entry points a test orchestrator calls: once at session start in the solo or
//! controller process, and once per worker process.
//!
//! ```text
//! Solo        -> build templates, tests run against them
//! Controller  -> build templates, then the orchestrator starts workers
//! Worker(id)  -> clone every template to <template>_<suffix>
//! ```
//!
//! The role is decided by the orchestrator and handed in as an [`ExecutionMode`]; nothing is
//! inferred from database state. Ordering between the controller finishing and workers
//! starting is the orchestrator's job: a worker that starts early fails with the engine's
//! "template does not exist" error.

use crate::config::DEFAULT_ALIAS;
use crate::engine::DatabaseEngine;
use crate::error::{ProvisioningError, Result};
use crate::flags::ProvisioningFlags;
use crate::logging::log_error;
use crate::migrations::{MigrationPolicy, MigrationSource};
use crate::provisioning::{
    CloneSet, TemplateProvisioner, TemplateSet, WorkerCloneProvisioner, WorkerIdentity,
};
use crate::registry::ConnectionRegistry;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Role of the current process in the test run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Single process; templates are used directly
    Solo,
    /// Distributed run, before any worker exists
    Controller,
    /// Distributed run, one of the workers
    Worker(WorkerIdentity),
}

impl ExecutionMode {
    /// Decide the role from the orchestrator's two signals
    pub fn from_signals(distributed: bool, worker_token: Option<&str>) -> Result<Self> {
        match (distributed, worker_token) {
            (false, None) => Ok(Self::Solo),
            (false, Some(token)) => Err(ProvisioningError::configuration(format!(
                "worker token '{token}' given but distributed execution is not active"
            ))),
            (true, None) => Ok(Self::Controller),
            (true, Some(token)) => Ok(Self::Worker(WorkerIdentity::from_worker_token(token)?)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Solo => "solo",
            Self::Controller => "controller",
            Self::Worker(_) => "worker",
        }
    }
}

/// What a setup call produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupOutcome {
    Templates(TemplateSet),
    Clones(CloneSet),
}

impl SetupOutcome {
    pub fn physical_names(&self) -> BTreeMap<String, String> {
        match self {
            Self::Templates(templates) => templates.physical_names(),
            Self::Clones(clones) => clones.physical_names(),
        }
    }
}

pub struct LifecycleCoordinator {
    engine: Arc<dyn DatabaseEngine>,
    registry: ConnectionRegistry,
    migrations: MigrationSource,
    policy: MigrationPolicy,
}

impl LifecycleCoordinator {
    pub fn new(
        engine: Arc<dyn DatabaseEngine>,
        registry: ConnectionRegistry,
        migrations: MigrationSource,
    ) -> Self {
        Self {
            engine,
            registry,
            migrations,
            policy: MigrationPolicy::default(),
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn into_registry(self) -> ConnectionRegistry {
        self.registry
    }

    pub fn migration_policy(&self) -> &MigrationPolicy {
        &self.policy
    }

    /// Dispatch on the process role
    pub async fn run(&mut self, mode: &ExecutionMode, flags: &ProvisioningFlags) -> Result<SetupOutcome> {
        match mode {
            ExecutionMode::Solo => self.setup_for_session(flags).await.map(SetupOutcome::Templates),
            ExecutionMode::Controller => self
                .setup_for_controller(flags)
                .await
                .map(SetupOutcome::Templates),
            ExecutionMode::Worker(identity) => self
                .setup_for_worker(identity, flags)
                .await
                .map(SetupOutcome::Clones),
        }
    }

    /// Solo run: build templates and keep using them for the whole session
    pub async fn setup_for_session(&mut self, flags: &ProvisioningFlags) -> Result<TemplateSet> {
        self.build_templates("solo", flags).await
    }

    /// Distributed run, controller side: build templates before any worker starts
    pub async fn setup_for_controller(&mut self, flags: &ProvisioningFlags) -> Result<TemplateSet> {
        self.build_templates("controller", flags).await
    }

    /// Distributed run, worker side: clone the controller's templates for this worker
    pub async fn setup_for_worker(
        &mut self,
        identity: &WorkerIdentity,
        flags: &ProvisioningFlags,
    ) -> Result<CloneSet> {
        self.apply_migration_flag(flags);
        self.registry.entry(DEFAULT_ALIAS)?;

        info!(worker = %identity.suffix(), "Worker database setup starting");
        let provisioner = WorkerCloneProvisioner::new(Arc::clone(&self.engine));
        let result = provisioner
            .clone_for_worker(&mut self.registry, identity, flags)
            .await;

        match &result {
            Ok(clones) => info!(
                worker = %identity.suffix(),
                databases = ?clones.physical_names(),
                "Worker database setup complete"
            ),
            Err(err) => log_error("worker", "clone_for_worker", &err.to_string(), None),
        }
        result
    }

    async fn build_templates(&mut self, role: &str, flags: &ProvisioningFlags) -> Result<TemplateSet> {
        self.apply_migration_flag(flags);

        info!(
            role = %role,
            migrations_enabled = !self.policy.is_disabled(),
            "Template database setup starting"
        );
        let strategy = self.policy.strategy(&self.migrations)?;
        let provisioner = TemplateProvisioner::new(Arc::clone(&self.engine), strategy);
        let result = provisioner.build_templates(&mut self.registry, flags).await;

        match &result {
            Ok(templates) => info!(
                role = %role,
                created = templates.created().len(),
                reused = templates.reused().len(),
                "Template database setup complete"
            ),
            Err(err) => log_error(role, "build_templates", &err.to_string(), None),
        }
        result
    }

    fn apply_migration_flag(&mut self, flags: &ProvisioningFlags) {
        if !flags.migrations_enabled {
            self.policy.disable();
        }
    }
}
