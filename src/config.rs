//! Configuration management for the Flywheel engine.
//!
//! Every threshold the processing logic uses lives in [`FlywheelConfig`] and
//! is injected into the engine, so deployments (and tests) can tune them.
//!
//! # Example flywheel.toml
//!
//! ```toml
//! success_threshold = 0.75
//! auto_apply_threshold = 0.85
//! decay_step = 0.1
//! clamp_learning_confidence = true
//! default_max_retries = 3
//! handler_timeout_secs = 120
//! stale_after_secs = 600
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{FlywheelError, Result};

/// Name of the configuration file inside the data directory.
pub const CONFIG_FILE: &str = "flywheel.toml";

/// Hard upper bound on queue page sizes.
pub const QUEUE_LIMIT_CEILING: usize = 200;

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlywheelConfig {
    /// Effective confidence at or above which a task completes automatically (default: 0.7).
    #[serde(default = "default_success_threshold")]
    pub success_threshold: f64,

    /// Learning confidence at or above which the top learning is applied (default: 0.8).
    #[serde(default = "default_auto_apply_threshold")]
    pub auto_apply_threshold: f64,

    /// Confidence removed from an applied learning when the handler fails (default: 0.1).
    #[serde(default = "default_decay_step")]
    pub decay_step: f64,

    /// Keep decayed learning confidence inside [0, 1] (default: true).
    #[serde(default = "default_true")]
    pub clamp_learning_confidence: bool,

    /// Confidence assigned to a freshly synthesized learning (default: 0.5).
    #[serde(default = "default_seed_confidence")]
    pub learning_seed_confidence: f64,

    /// Retry budget for tasks created without one (default: 3).
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,

    /// Priority for tasks created without one (default: 3).
    #[serde(default = "default_priority")]
    pub default_priority: u8,

    /// Number of learnings fetched per lookup (default: 10).
    #[serde(default = "default_learning_match_limit")]
    pub learning_match_limit: usize,

    /// Queue page size when the caller does not ask for one (default: 50).
    #[serde(default = "default_queue_limit")]
    pub queue_limit_default: usize,

    /// Largest queue page a caller may request (default: 200).
    #[serde(default = "default_queue_limit_max")]
    pub queue_limit_max: usize,

    /// Wall-clock budget for one handler invocation, 0 to disable (default: 300).
    #[serde(default = "default_handler_timeout_secs")]
    pub handler_timeout_secs: u64,

    /// Age after which an in-flight task is considered stranded (default: 900).
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,

    /// Age after which a human claim is released back to the queue (default: 86400).
    #[serde(default = "default_human_stale_after_secs")]
    pub human_stale_after_secs: u64,
}

fn default_success_threshold() -> f64 {
    0.7
}

fn default_auto_apply_threshold() -> f64 {
    0.8
}

fn default_decay_step() -> f64 {
    0.1
}

fn default_true() -> bool {
    true
}

fn default_seed_confidence() -> f64 {
    0.5
}

fn default_max_retries() -> u32 {
    3
}

fn default_priority() -> u8 {
    3
}

fn default_learning_match_limit() -> usize {
    10
}

fn default_queue_limit() -> usize {
    50
}

fn default_queue_limit_max() -> usize {
    QUEUE_LIMIT_CEILING
}

fn default_handler_timeout_secs() -> u64 {
    300
}

fn default_stale_after_secs() -> u64 {
    900
}

fn default_human_stale_after_secs() -> u64 {
    86_400
}

impl Default for FlywheelConfig {
    fn default() -> Self {
        Self {
            success_threshold: default_success_threshold(),
            auto_apply_threshold: default_auto_apply_threshold(),
            decay_step: default_decay_step(),
            clamp_learning_confidence: true,
            learning_seed_confidence: default_seed_confidence(),
            default_max_retries: default_max_retries(),
            default_priority: default_priority(),
            learning_match_limit: default_learning_match_limit(),
            queue_limit_default: default_queue_limit(),
            queue_limit_max: default_queue_limit_max(),
            handler_timeout_secs: default_handler_timeout_secs(),
            stale_after_secs: default_stale_after_secs(),
            human_stale_after_secs: default_human_stale_after_secs(),
        }
    }
}

impl FlywheelConfig {
    /// Load configuration from `flywheel.toml` in `data_dir`.
    ///
    /// A missing file yields the defaults; a malformed or invalid file is an
    /// error.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let path = Self::config_path(data_dir);
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        let config: FlywheelConfig = toml::from_str(&content)
            .map_err(|e| FlywheelError::config_with_path(e.to_string(), path.clone()))?;
        config.validate()?;
        Ok(config)
    }

    /// Path of the configuration file for a data directory.
    #[must_use]
    pub fn config_path(data_dir: &Path) -> PathBuf {
        data_dir.join(CONFIG_FILE)
    }

    /// Check every value is usable.
    pub fn validate(&self) -> Result<()> {
        let unit_fields = [
            ("success_threshold", self.success_threshold),
            ("auto_apply_threshold", self.auto_apply_threshold),
            ("learning_seed_confidence", self.learning_seed_confidence),
        ];
        for (name, value) in unit_fields {
            if !(0.0..=1.0).contains(&value) {
                return Err(FlywheelError::invalid_config(
                    name,
                    format!("must be within [0, 1], got {value}"),
                ));
            }
        }

        if !self.decay_step.is_finite() || self.decay_step < 0.0 {
            return Err(FlywheelError::invalid_config(
                "decay_step",
                format!("must be a non-negative number, got {}", self.decay_step),
            ));
        }

        if !(1..=5).contains(&self.default_priority) {
            return Err(FlywheelError::invalid_config(
                "default_priority",
                format!("must be between 1 and 5, got {}", self.default_priority),
            ));
        }

        if self.queue_limit_max == 0 || self.queue_limit_max > QUEUE_LIMIT_CEILING {
            return Err(FlywheelError::invalid_config(
                "queue_limit_max",
                format!(
                    "must be between 1 and {QUEUE_LIMIT_CEILING}, got {}",
                    self.queue_limit_max
                ),
            ));
        }

        if self.queue_limit_default == 0 || self.queue_limit_default > self.queue_limit_max {
            return Err(FlywheelError::invalid_config(
                "queue_limit_default",
                format!(
                    "must be between 1 and queue_limit_max ({}), got {}",
                    self.queue_limit_max, self.queue_limit_default
                ),
            ));
        }

        if self.learning_match_limit == 0 {
            return Err(FlywheelError::invalid_config(
                "learning_match_limit",
                "must be at least 1",
            ));
        }

        Ok(())
    }

    /// Handler budget, `None` when disabled.
    #[must_use]
    pub fn handler_timeout(&self) -> Option<Duration> {
        (self.handler_timeout_secs > 0).then(|| Duration::from_secs(self.handler_timeout_secs))
    }

    /// Age after which `ai_processing` and `learning` tasks are swept.
    #[must_use]
    pub fn stale_after(&self) -> chrono::Duration {
        seconds(self.stale_after_secs)
    }

    /// Age after which a `human_processing` claim is released.
    #[must_use]
    pub fn human_stale_after(&self) -> chrono::Duration {
        seconds(self.human_stale_after_secs)
    }

    /// Clamp a requested queue size into the allowed range.
    #[must_use]
    pub fn queue_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.queue_limit_default)
            .clamp(1, self.queue_limit_max)
    }
}

fn seconds(secs: u64) -> chrono::Duration {
    // chrono panics past i64::MAX milliseconds
    let max = i64::MAX / 1000;
    chrono::Duration::seconds(i64::try_from(secs).unwrap_or(max).min(max))
}
