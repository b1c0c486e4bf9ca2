//! Simulator configuration

use crate::{SimError, SimResult};
use lachesis_consensus::EngineConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Multi-validator simulation configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Times an unanswerable request is requeued before it is dropped
    pub max_request_retries: u32,
    /// Rounds an event may sit in a defer queue before it is reported stalled
    pub max_defer_rounds: u64,
    /// Configuration shared by the reference engine and every instance
    pub engine: EngineConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            max_request_retries: 8,
            max_defer_rounds: 16,
            engine: EngineConfig::default(),
        }
    }
}

impl SimConfig {
    /// Create a new simulator configuration
    pub fn new(engine: EngineConfig) -> Self {
        Self {
            engine,
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> SimResult<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let config: SimConfig = toml::from_str(&content)
            .map_err(|e| SimError::Config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> SimResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| SimError::Config(format!("Failed to serialize config: {}", e)))?;
        fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> SimResult<()> {
        self.engine.validate()?;

        if self.max_defer_rounds == 0 {
            return Err(SimError::Config(
                "Max defer rounds must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Set the request retry budget
    pub fn with_max_request_retries(mut self, retries: u32) -> Self {
        self.max_request_retries = retries;
        self
    }

    /// Set the stall bound for deferred events
    pub fn with_max_defer_rounds(mut self, rounds: u64) -> Self {
        self.max_defer_rounds = rounds;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = SimConfig::default();
        assert_eq!(config.max_request_retries, 8);
        assert_eq!(config.max_defer_rounds, 16);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let config = SimConfig::default().with_max_defer_rounds(0);
        assert!(config.validate().is_err());

        let config = SimConfig::new(EngineConfig::new(0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: SimConfig = toml::from_str(
            r#"
            max_request_retries = 2

            [engine]
            field_of_view = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.max_request_retries, 2);
        assert_eq!(config.max_defer_rounds, 16);
        assert_eq!(config.engine.field_of_view, 3);
        assert_eq!(config.engine.liveness_threshold, 8);
    }

    #[test]
    fn test_file_operations() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sim.toml");

        let config = SimConfig::default()
            .with_max_request_retries(3)
            .with_max_defer_rounds(4);
        config.save_to_file(&path).unwrap();

        let loaded = SimConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
