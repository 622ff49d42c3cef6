//! Fractional progress reporting.

use parking_lot::Mutex;
use std::sync::Arc;

/// Callback receiving overall progress in `[0.0, 1.0]`.
pub type ProgressCallback = Arc<dyn Fn(f32) + Send + Sync>;

/// Splits `1.0` evenly across a fixed number of units of work and reports
/// the completed fraction as units finish.
///
/// Reported values never decrease and never leave `[0.0, 1.0]`.
pub struct ProgressReporter {
    callback: Option<ProgressCallback>,
    unit_weight: f32,
    state: Mutex<ProgressState>,
}

#[derive(Debug, Default)]
struct ProgressState {
    completed_units: usize,
    last_reported: f32,
}

impl ProgressReporter {
    /// Creates a reporter for `total_units` units of work.
    #[must_use]
    pub fn new(total_units: usize, callback: Option<ProgressCallback>) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let unit_weight = 1.0 / total_units.max(1) as f32;
        Self {
            callback,
            unit_weight,
            state: Mutex::new(ProgressState::default()),
        }
    }

    /// Reports progress within the current unit.
    pub fn report_partial(&self, fraction: f32) {
        let mut state = self.state.lock();
        #[allow(clippy::cast_precision_loss)]
        let value = (state.completed_units as f32 + fraction.clamp(0.0, 1.0)) * self.unit_weight;
        self.emit(&mut state, value);
    }

    /// Marks the current unit as finished.
    pub fn complete_unit(&self) {
        let mut state = self.state.lock();
        state.completed_units += 1;
        #[allow(clippy::cast_precision_loss)]
        let value = state.completed_units as f32 * self.unit_weight;
        self.emit(&mut state, value);
    }

    /// Returns the last reported value.
    #[must_use]
    pub fn current(&self) -> f32 {
        self.state.lock().last_reported
    }

    fn emit(&self, state: &mut ProgressState, value: f32) {
        let value = value.clamp(0.0, 1.0);
        if value <= state.last_reported {
            return;
        }
        state.last_reported = value;
        if let Some(callback) = &self.callback {
            callback(value);
        }
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("unit_weight", &self.unit_weight)
            .field("current", &self.current())
            .finish()
    }
}
