//! Registry configuration.
//!
//! ```toml
//! [shared]
//! log_level = "info"
//! service_name = "frame-grabber"
//!
//! [registry]
//! default_permissions = "640"
//! key_attempts = 16
//! cleanup_on_exit = true
//! ```

use serde::{Deserialize, Serialize};
use shmkit::config::{ConfigError, SharedConfig};
use shmkit::shm::consts::LENGTH_MAX;
use shmkit::shm::flags::parse_permissions;

/// Settings of the shared manager (`[registry]` section).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Octal permission string used when a create call passes none
    pub default_permissions: String,
    /// Largest element count accepted by the create helpers
    pub max_element_count: usize,
    /// Random System-V keys tried before a keyless create gives up
    pub key_attempts: u32,
    /// Register the manager with the process exit hook on construction
    pub cleanup_on_exit: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            default_permissions: "660".to_string(),
            max_element_count: LENGTH_MAX,
            key_attempts: 64,
            cleanup_on_exit: true,
        }
    }
}

impl RegistryConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// `ConfigError::ValidationError` for an unparsable permission string,
    /// a zero or oversized element cap, or zero key attempts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if parse_permissions(&self.default_permissions).is_none() {
            return Err(ConfigError::ValidationError(format!(
                "default_permissions {:?} is not an octal mode",
                self.default_permissions
            )));
        }
        if self.max_element_count == 0 || self.max_element_count > LENGTH_MAX {
            return Err(ConfigError::ValidationError(format!(
                "max_element_count must be within 1..={LENGTH_MAX}"
            )));
        }
        if self.key_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "key_attempts cannot be zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Parsed default permission bits.
    pub fn permissions(&self) -> u32 {
        parse_permissions(&self.default_permissions)
            .unwrap_or(shmkit::shm::consts::DEFAULT_PERMISSIONS)
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShmConfig {
    /// Common settings
    #[serde(default)]
    pub shared: SharedConfig,
    /// Registry settings
    #[serde(default)]
    pub registry: RegistryConfig,
}

impl ShmConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        self.registry.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shmkit::config::{ConfigLoader, LogLevel};

    #[test]
    fn defaults_are_valid() {
        let config = ShmConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.registry.permissions(), 0o660);
        assert_eq!(config.registry.max_element_count, LENGTH_MAX);
    }

    #[test]
    fn partial_registry_section_keeps_defaults() {
        let config = ShmConfig::parse(
            r#"
            [shared]
            log_level = "debug"
            service_name = "reader"

            [registry]
            default_permissions = "0640"
            "#,
        )
        .unwrap();
        assert_eq!(config.shared.log_level, LogLevel::Debug);
        assert_eq!(config.registry.permissions(), 0o640);
        assert_eq!(config.registry.key_attempts, 64);
        assert!(config.registry.cleanup_on_exit);
    }

    #[test]
    fn rejects_bad_values() {
        let mut config = RegistryConfig {
            default_permissions: "rw-rw----".to_string(),
            ..RegistryConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));

        config.default_permissions = "600".to_string();
        config.key_attempts = 0;
        assert!(config.validate().is_err());

        config.key_attempts = 1;
        config.max_element_count = 0;
        assert!(config.validate().is_err());
    }
}
