//! Dead letter storage and lifecycle configuration

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use super::error::ValidationError;

#[derive(Debug, Clone, Deserialize)]
pub struct DeadLetterConfig {
    #[serde(default)]
    pub backend: DeadLetterBackend,

    /// Directory for the file backend
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// Entries whose last failure is older than this are purged
    #[serde(default = "default_retention")]
    pub retention_secs: u64,

    /// Seconds between janitor runs
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeadLetterBackend {
    #[default]
    Memory,
    File,
}

impl DeadLetterConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.backend == DeadLetterBackend::File && self.directory.is_none() {
            return Err(ValidationError::MissingRequired("DEAD_LETTER__DIRECTORY"));
        }
        if self.retention_secs == 0 {
            return Err(ValidationError::MustBePositive("dead_letter.retention_secs"));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ValidationError::MustBePositive("dead_letter.sweep_interval_secs"));
        }
        Ok(())
    }
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self {
            backend: DeadLetterBackend::default(),
            directory: None,
            retention_secs: default_retention(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_retention() -> u64 {
    7 * 24 * 3600
}

fn default_sweep_interval() -> u64 {
    3600
}
