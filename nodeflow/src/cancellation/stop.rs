//! Stop source and stop token for cooperative cancellation.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

/// A callback type for stop notifications.
pub type StopCallback = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct StopState {
    /// Whether a stop has been requested.
    stopped: AtomicBool,
    /// Callbacks to invoke when the stop is requested.
    callbacks: RwLock<Vec<StopCallback>>,
}

impl StopState {
    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn register(&self, callback: StopCallback) {
        {
            let mut callbacks = self.callbacks.write();
            if !self.is_stopped() {
                callbacks.push(callback);
                return;
            }
        }
        // Already stopped, invoke immediately
        invoke_guarded(&callback);
    }
}

fn invoke_guarded(callback: &StopCallback) {
    if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        callback();
    })) {
        warn!("Stop callback panicked: {:?}", e);
    }
}

/// The owning side of a stop latch.
///
/// Only the holder of a `StopSource` can request a stop. Nodes receive a
/// [`StopToken`] instead, which can observe the latch but never set it.
#[derive(Clone, Default)]
pub struct StopSource {
    state: Arc<StopState>,
}

impl StopSource {
    /// Creates a new stop source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a stop.
    ///
    /// This is idempotent: only the first call flips the latch and invokes
    /// the registered callbacks. Returns true for that first call.
    /// Panics in callbacks are logged and suppressed.
    pub fn request_stop(&self) -> bool {
        if self
            .state
            .stopped
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        let callbacks = std::mem::take(&mut *self.state.callbacks.write());
        for callback in &callbacks {
            invoke_guarded(callback);
        }
        true
    }

    /// Returns whether a stop has been requested.
    #[must_use]
    pub fn is_stop_requested(&self) -> bool {
        self.state.is_stopped()
    }

    /// Creates a read-only token observing this source.
    #[must_use]
    pub fn create_token(&self) -> StopToken {
        StopToken {
            state: Some(self.state.clone()),
        }
    }
}

impl std::fmt::Debug for StopSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopSource")
            .field("stop_requested", &self.is_stop_requested())
            .finish()
    }
}

/// A cheap, cloneable, read-only view of a [`StopSource`].
///
/// A default-constructed token is detached: it never reports a stop.
#[derive(Clone, Default)]
pub struct StopToken {
    state: Option<Arc<StopState>>,
}

impl StopToken {
    /// Creates a token that is not attached to any source.
    #[must_use]
    pub fn detached() -> Self {
        Self::default()
    }

    /// Returns whether the source has requested a stop.
    #[must_use]
    pub fn is_stop_requested(&self) -> bool {
        self.state.as_ref().is_some_and(|s| s.is_stopped())
    }

    /// Registers a callback to be invoked when the stop is requested.
    ///
    /// If the stop was already requested, the callback is invoked immediately.
    /// Detached tokens drop the callback.
    pub fn on_stop<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        if let Some(state) = &self.state {
            state.register(Box::new(callback));
        }
    }
}

impl std::fmt::Debug for StopToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopToken")
            .field("attached", &self.state.is_some())
            .field("stop_requested", &self.is_stop_requested())
            .finish()
    }
}
