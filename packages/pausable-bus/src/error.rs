//! Structured errors for pausable buses.
//!
//! A pausable bus never inspects messages and never intercepts failures of
//! the wrapped dispatch engine. Handler errors stay with the engine's own
//! error handlers. The only error raised here is backpressure from a bounded
//! replay queue.
//!
//! # Example
//!
//! ```ignore
//! use pausable_bus::PauseError;
//!
//! match bus.publish(event).await {
//!     Ok(()) => {}
//!     Err(PauseError::QueueFull { capacity }) => {
//!         tracing::warn!(capacity, "bus paused and replay queue is full");
//!     }
//! }
//! ```

use thiserror::Error;

/// Errors returned by [`PausableBus`](crate::PausableBus) publish calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PauseError {
    /// The bus is paused and its bounded replay queue is full.
    ///
    /// The message was not accepted and will not be replayed.
    #[error("replay queue is full (capacity {capacity})")]
    QueueFull {
        /// Configured queue capacity.
        capacity: usize,
    },
}
