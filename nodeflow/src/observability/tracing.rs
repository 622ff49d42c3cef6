//! Tracing setup and timing helpers.

use crate::errors::NodeflowError;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

/// Filter used when neither `RUST_LOG` nor an explicit filter is given.
pub const DEFAULT_FILTER: &str = "info";

/// Installs a global `fmt` subscriber.
///
/// `filter` takes precedence over `RUST_LOG`; with neither set,
/// [`DEFAULT_FILTER`] is used. Returns `Ok(false)` if a global subscriber was
/// already installed.
///
/// # Errors
///
/// Returns [`NodeflowError::InvalidConfig`] if `filter` cannot be parsed.
pub fn init_tracing(filter: Option<&str>) -> Result<bool, NodeflowError> {
    let filter = match filter {
        Some(directives) => EnvFilter::try_new(directives)
            .map_err(|e| NodeflowError::invalid_config(format!("invalid log filter: {e}")))?,
        None => {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
        }
    };

    Ok(tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .try_init()
        .is_ok())
}

/// A simple timer for measuring node and pipeline durations.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    name: String,
}

impl SpanTimer {
    /// Starts a new span timer.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Returns the span name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Finishes the span and returns the duration.
    #[must_use]
    pub fn finish(self) -> f64 {
        self.elapsed_ms()
    }
}
