//! Error types for the nodeflow crate.
//!
//! Node failures are not errors in this sense: they are data, carried as
//! [`NodeError`](crate::core::NodeError) values in the result map. The types
//! here cover misconfiguration and runtime plumbing failures that prevent a
//! pipeline from being built or awaited at all.

use thiserror::Error;

/// The main error type for nodeflow operations.
#[derive(Debug, Error)]
pub enum NodeflowError {
    /// The pipeline configuration is invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The dedicated worker thread pool could not be created.
    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// The blocking pipeline task could not be joined.
    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl NodeflowError {
    /// Creates an invalid configuration error.
    #[must_use]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_display() {
        let err = NodeflowError::invalid_config("worker_threads must be at least 1");
        assert_eq!(
            err.to_string(),
            "Invalid configuration: worker_threads must be at least 1"
        );
    }

    #[test]
    fn test_serialization_from() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: NodeflowError = parse_err.into();
        assert!(matches!(err, NodeflowError::Serialization(_)));
        assert!(err.to_string().starts_with("Serialization error"));
    }
}
