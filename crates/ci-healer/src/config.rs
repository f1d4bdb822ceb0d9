//! Healer configuration.
//!
//! Every field has a default, so an empty file (or no file) yields the
//! built-in policy, oracle settings and a threshold of 7. The oracle API key
//! is deliberately absent: it is passed to the orchestrator at construction.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{HealerError, HealerResult};
use crate::executor::ExecutorConfig;
use crate::oracle::OracleConfig;
use crate::orchestrator::DEFAULT_CONFIDENCE_THRESHOLD;
use crate::policy::PolicyConfig;
use crate::types::{LOG_TAIL_CHARS, MAX_CONFIDENCE};

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealerConfig {
    /// Analysis oracle transport
    pub oracle: OracleConfig,
    /// Command allow/deny lists
    pub policy: PolicyConfig,
    /// Process execution
    pub executor: ExecutorConfig,
    /// Minimum confidence (0-10) before fixes run
    pub confidence_threshold: u8,
}

impl Default for HealerConfig {
    fn default() -> Self {
        Self {
            oracle: OracleConfig::default(),
            policy: PolicyConfig::default(),
            executor: ExecutorConfig::default(),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }
}

impl HealerConfig {
    /// Load configuration from a `.toml` file, or JSON for any other extension.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, does not parse, or holds
    /// out-of-range values.
    pub fn load(path: &Path) -> HealerResult<Self> {
        let text = std::fs::read_to_string(path)?;

        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

        let config: Self = if is_toml {
            toml::from_str(&text)
                .map_err(|e| HealerError::Config(format!("{}: {e}", path.display())))?
        } else {
            serde_json::from_str(&text)
                .map_err(|e| HealerError::Config(format!("{}: {e}", path.display())))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`HealerError::Config`] describing the first invalid value.
    pub fn validate(&self) -> HealerResult<()> {
        if self.confidence_threshold > MAX_CONFIDENCE {
            return Err(HealerError::Config(format!(
                "confidence_threshold must be between 0 and {MAX_CONFIDENCE}, got {}",
                self.confidence_threshold
            )));
        }
        if self.oracle.endpoint.trim().is_empty() {
            return Err(HealerError::Config("oracle.endpoint must not be empty".to_string()));
        }
        if self.oracle.max_tokens == 0 {
            return Err(HealerError::Config("oracle.max_tokens must be positive".to_string()));
        }
        if self.oracle.log_tail_chars > LOG_TAIL_CHARS {
            // Contexts only keep LOG_TAIL_CHARS of logs
            return Err(HealerError::Config(format!(
                "oracle.log_tail_chars must be at most {LOG_TAIL_CHARS}, got {}",
                self.oracle.log_tail_chars
            )));
        }
        if !(0.0..=1.0).contains(&self.oracle.temperature) {
            return Err(HealerError::Config(format!(
                "oracle.temperature must be between 0.0 and 1.0, got {}",
                self.oracle.temperature
            )));
        }
        Ok(())
    }
}
