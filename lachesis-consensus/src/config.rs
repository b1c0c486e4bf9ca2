//! Engine configuration

use crate::{ConsensusError, ConsensusResult};
use lachesis_core::Timestamp;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Single-validator engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Creators first seen at or before this timestamp join as initial validators
    pub field_of_view: Timestamp,
    /// Undecided frames above `frame_to_decide` before a liveness stall is reported
    pub liveness_threshold: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            field_of_view: 5,
            liveness_threshold: 8,
        }
    }
}

impl EngineConfig {
    /// Create a new engine configuration
    pub fn new(field_of_view: Timestamp) -> Self {
        Self {
            field_of_view,
            ..Self::default()
        }
    }

    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> ConsensusResult<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| ConsensusError::Config(format!("Failed to read config file: {}", e)))?;

        let config: EngineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> ConsensusResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), content)
            .map_err(|e| ConsensusError::Config(format!("Failed to write config file: {}", e)))?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConsensusResult<()> {
        if self.field_of_view == 0 {
            return Err(ConsensusError::Config(
                "Field of view must cover at least the first round".to_string(),
            ));
        }

        if self.liveness_threshold == 0 {
            return Err(ConsensusError::Config(
                "Liveness threshold must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Set the liveness threshold
    pub fn with_liveness_threshold(mut self, frames: u64) -> Self {
        self.liveness_threshold = frames;
        self
    }
}
