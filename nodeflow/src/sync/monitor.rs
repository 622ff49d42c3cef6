//! Mutex-guarded ownership of a shared value.

use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::ops::{Deref, DerefMut};

/// Exclusive owner of a value that is shared across threads.
///
/// The value can only be reached through [`Monitor::lock`], which returns a
/// guard holding the mutex for as long as it lives.
#[derive(Default)]
pub struct Monitor<T> {
    value: Mutex<T>,
}

impl<T> Monitor<T> {
    /// Creates a monitor owning `value`.
    pub fn new(value: T) -> Self {
        Self {
            value: Mutex::new(value),
        }
    }

    /// Locks the monitor, blocking until the mutex is available.
    pub fn lock(&self) -> MonitorGuard<'_, T> {
        MonitorGuard {
            guard: self.value.lock(),
        }
    }

    /// Runs `f` with exclusive access to the value.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.lock())
    }

    /// Consumes the monitor and returns the value.
    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T: Default> Monitor<T> {
    /// Moves the value out, leaving `T::default()` behind.
    pub fn claim(&self) -> T {
        std::mem::take(&mut *self.lock())
    }
}

impl<T: fmt::Debug> fmt::Debug for Monitor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value.try_lock() {
            Some(value) => f.debug_struct("Monitor").field("value", &*value).finish(),
            None => f.debug_struct("Monitor").field("value", &"<locked>").finish(),
        }
    }
}

/// Scoped access to the value inside a [`Monitor`].
///
/// Dropping the guard releases the mutex.
pub struct MonitorGuard<'a, T> {
    guard: MutexGuard<'a, T>,
}

impl<T> Deref for MonitorGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for MonitorGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}
