//! Pipeline configuration.

use crate::errors::NodeflowError;
use crate::flow::ExecutionPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a pipeline runs its parallel-eligible nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Parallel-eligible nodes run on worker threads.
    #[default]
    Asynchronous,
    /// Every node runs on the calling thread, in registration order.
    Synchronous,
}

impl ExecutionMode {
    /// Returns the fan-out policy this mode selects.
    #[must_use]
    pub fn policy(self) -> ExecutionPolicy {
        match self {
            Self::Asynchronous => ExecutionPolicy::ParallelThreads,
            Self::Synchronous => ExecutionPolicy::SequentialFixedOrder,
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Asynchronous => write!(f, "asynchronous"),
            Self::Synchronous => write!(f, "synchronous"),
        }
    }
}

/// Configuration for a [`Pipeline`](super::Pipeline).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Name used for the composite flow and in log fields.
    pub name: String,
    /// Execution mode of the fan-out stage.
    pub execution_mode: ExecutionMode,
    /// Explicit fan-out policy, overriding the one `execution_mode` selects.
    pub fan_out_policy: Option<ExecutionPolicy>,
    /// Size of a dedicated worker pool. The global rayon pool is used when unset.
    pub worker_threads: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            name: "pipeline".to_string(),
            execution_mode: ExecutionMode::default(),
            fan_out_policy: None,
            worker_threads: None,
        }
    }
}

impl PipelineConfig {
    /// Creates a default configuration with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Parses a configuration from JSON. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or the result fails
    /// [`PipelineConfig::validate`].
    pub fn from_json(json: &str) -> Result<Self, NodeflowError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the execution mode.
    #[must_use]
    pub fn with_execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }

    /// Sets an explicit fan-out policy.
    #[must_use]
    pub fn with_fan_out_policy(mut self, policy: ExecutionPolicy) -> Self {
        self.fan_out_policy = Some(policy);
        self
    }

    /// Uses a dedicated pool of `threads` workers.
    #[must_use]
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = Some(threads);
        self
    }

    /// Returns the policy the fan-out stage runs under.
    #[must_use]
    pub fn fan_out_policy(&self) -> ExecutionPolicy {
        self.fan_out_policy.unwrap_or_else(|| self.execution_mode.policy())
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty or `worker_threads` is zero.
    pub fn validate(&self) -> Result<(), NodeflowError> {
        if self.name.trim().is_empty() {
            return Err(NodeflowError::invalid_config("pipeline name must not be empty"));
        }
        if self.worker_threads == Some(0) {
            return Err(NodeflowError::invalid_config(
                "worker_threads must be at least 1",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.name, "pipeline");
        assert_eq!(config.fan_out_policy(), ExecutionPolicy::ParallelThreads);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_synchronous_mode_is_fixed_order() {
        let config = PipelineConfig::new("sync").with_execution_mode(ExecutionMode::Synchronous);
        assert_eq!(config.fan_out_policy(), ExecutionPolicy::SequentialFixedOrder);
    }

    #[test]
    fn test_explicit_policy_overrides_mode() {
        let config = PipelineConfig::default()
            .with_execution_mode(ExecutionMode::Synchronous)
            .with_fan_out_policy(ExecutionPolicy::SequentialRandomOrder);
        assert_eq!(config.fan_out_policy(), ExecutionPolicy::SequentialRandomOrder);
    }

    #[test]
    fn test_zero_worker_threads_rejected() {
        let err = PipelineConfig::default().with_worker_threads(0).validate().unwrap_err();
        assert!(err.to_string().contains("worker_threads"));
    }

    #[test]
    fn test_empty_name_rejected() {
        assert!(PipelineConfig::new("  ").validate().is_err());
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = PipelineConfig::from_json(
            r#"{"name": "convert", "execution_mode": "synchronous", "worker_threads": 2}"#,
        )
        .unwrap();

        assert_eq!(
            config,
            PipelineConfig::new("convert")
                .with_execution_mode(ExecutionMode::Synchronous)
                .with_worker_threads(2)
        );
    }

    #[test]
    fn test_from_json_with_policy() {
        let config =
            PipelineConfig::from_json(r#"{"fan_out_policy": "sequential_random_order"}"#).unwrap();
        assert_eq!(config.fan_out_policy(), ExecutionPolicy::SequentialRandomOrder);
    }

    #[test]
    fn test_from_json_rejects_invalid() {
        assert!(matches!(
            PipelineConfig::from_json(r#"{"worker_threads": 0}"#),
            Err(NodeflowError::InvalidConfig(_))
        ));
        assert!(matches!(
            PipelineConfig::from_json("{"),
            Err(NodeflowError::Serialization(_))
        ));
    }
}
