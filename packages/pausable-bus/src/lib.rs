//! # Pausable Bus
//!
//! A pause/resume layer for message buses: suspend delivery, buffer what
//! arrives meanwhile, and replay it in arrival order once resumed.
//!
//! ## Core Concepts
//!
//! - [`MessageBus`] = the dispatch engine being decorated (listeners,
//!   routing, workers, error handlers all live there)
//! - [`PausableBus`] = the decorator that decides *when* messages reach it
//! - [`PostCommand`] = deferred publication, choosing sync or async later
//! - [`Publication`] = handle to an asynchronous delivery
//!
//! ## Architecture
//!
//! ```text
//! Caller
//!   │
//!   ▼ publish() / publish_async() / post()
//! PausableBus ── state? ──────────────────────────┐
//!   │                                             │
//!   │ Paused                                      │ Active
//!   ▼                                             ▼
//! ReplayQueue ──── resume() / resume_async() ──► MessageBus
//!                                                 │
//!                                                 ▼
//!                                             handlers
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Exactly once** - every accepted message reaches the wrapped bus once
//! 2. **Arrival order** - buffered messages replay in the order they came in
//! 3. **No stranding** - the queue is only non-empty while paused or draining
//! 4. **Idempotent controls** - `pause()` on a paused bus and `resume()` on an
//!    active bus do nothing
//!
//! ## Example
//!
//! ```ignore
//! use pausable_bus::{PausableBus, PauseConfig};
//!
//! let bus = PausableBus::with_config(engine, PauseConfig::from_env()?);
//!
//! bus.pause();
//! bus.publish(OrderPlaced { id }).await?;               // buffered
//! let publication = bus.post(OrderShipped { id }).asynchronously()?;
//! assert!(publication.is_queued());
//!
//! bus.resume().await;                                   // replayed in order
//! ```
//!
//! ## What This Is Not
//!
//! This crate does **not** match listeners, run worker pools, or decide how
//! handler errors are reported. Those belong to the wrapped [`MessageBus`].

mod bus;
mod command;
mod config;
mod error;
mod pausable;
mod queue;
mod state;

// Publication handles (tracker/handle pairs for async delivery)
pub mod publication;

// Testing utilities (feature-gated)
#[cfg(any(test, feature = "testing"))]
pub mod testing;


// Re-export the dispatch engine contract
pub use bus::MessageBus;

// Re-export decorator types
pub use command::PostCommand;
pub use pausable::{PausableBus, PubSubPause};
pub use queue::PauseSnapshot;
pub use state::PauseState;

// Re-export publication types
pub use publication::{Publication, PublicationId, PublicationStatus, PublicationTracker};

// Re-export configuration and errors
pub use config::{PauseConfig, QUEUE_CAPACITY_VAR, START_PAUSED_VAR};
pub use error::PauseError;

// Re-export commonly used external types
pub use async_trait::async_trait;
