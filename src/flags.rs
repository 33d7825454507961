//! Provisioning flags supplied by the test orchestration layer.

use crate::config::ProvisioningDefaults;
use serde::{Deserialize, Serialize};

/// Options controlling how template and clone databases are (re)built.
///
/// `force_create` wins over `keep_existing`: reuse is only honored when forced creation was
/// not requested. Use [`ProvisioningFlags::reuses_existing`] instead of reading
/// `keep_existing` directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningFlags {
    pub keep_existing: bool,
    pub force_create: bool,
    pub migrations_enabled: bool,
    pub verbosity: u8,
}

impl Default for ProvisioningFlags {
    fn default() -> Self {
        Self {
            keep_existing: false,
            force_create: false,
            migrations_enabled: true,
            verbosity: 1,
        }
    }
}

impl From<&ProvisioningDefaults> for ProvisioningFlags {
    fn from(defaults: &ProvisioningDefaults) -> Self {
        Self {
            keep_existing: defaults.reuse_existing,
            force_create: defaults.force_create,
            migrations_enabled: defaults.migrations_enabled,
            verbosity: defaults.verbosity,
        }
    }
}

impl ProvisioningFlags {
    /// Whether existing databases should be reused rather than destroyed and rebuilt
    pub fn reuses_existing(&self) -> bool {
        self.keep_existing && !self.force_create
    }

    pub fn with_keep_existing(mut self, keep_existing: bool) -> Self {
        self.keep_existing = keep_existing;
        self
    }

    pub fn with_force_create(mut self, force_create: bool) -> Self {
        self.force_create = force_create;
        self
    }

    pub fn with_migrations(mut self, migrations_enabled: bool) -> Self {
        self.migrations_enabled = migrations_enabled;
        self
    }

    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn force_create_takes_precedence_over_keep_existing() {
        let flags = ProvisioningFlags::default()
            .with_keep_existing(true)
            .with_force_create(true);
        assert!(!flags.reuses_existing());

        let flags = ProvisioningFlags::default().with_keep_existing(true);
        assert!(flags.reuses_existing());

        assert!(!ProvisioningFlags::default().reuses_existing());
    }

    #[test]
    fn flags_follow_configured_defaults() {
        let defaults = ProvisioningDefaults {
            reuse_existing: true,
            force_create: false,
            migrations_enabled: false,
            verbosity: 3,
        };
        let flags = ProvisioningFlags::from(&defaults);
        assert!(flags.keep_existing);
        assert!(!flags.migrations_enabled);
        assert_eq!(flags.verbosity, 3);
    }
}
