//! Cooperative cancellation primitives.
//!
//! A [`StopSource`] owns the latch and is the only side allowed to request a
//! stop. [`StopToken`]s are cheap read-only views handed to nodes.

mod stop;

pub use stop::{StopCallback, StopSource, StopToken};
