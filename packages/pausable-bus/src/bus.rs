//! The dispatch engine a [`PausableBus`](crate::PausableBus) decorates.
//!
//! [`MessageBus`] is the minimal publish/subscribe contract consumed by the
//! pause layer. Listener matching, worker pools, and error-handler policy
//! all live behind it; the pause layer only decides *when* a message reaches
//! the engine.
//!
//! # Implementing
//!
//! ```ignore
//! use pausable_bus::{async_trait, MessageBus, PublicationTracker};
//!
//! struct Engine { /* listeners, workers, ... */ }
//!
//! #[async_trait]
//! impl MessageBus<OrderEvent> for Engine {
//!     type Listener = Arc<dyn OrderListener>;
//!     type ErrorHandler = Arc<dyn ErrorHandler>;
//!     type Runtime = EngineRuntime;
//!
//!     async fn publish(&self, message: OrderEvent) {
//!         for listener in self.matching(&message) {
//!             listener.handle(&message).await;
//!         }
//!     }
//!
//!     fn publish_async(&self, message: OrderEvent, publication: PublicationTracker) {
//!         publication.scheduled();
//!         self.workers.submit(message, publication);
//!     }
//!
//!     // ...
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::publication::PublicationTracker;

/// Publish/subscribe contract of a message dispatch engine.
///
/// Handler failures are the engine's concern: they are routed to its own
/// error handlers and never surface through this trait.
#[async_trait]
pub trait MessageBus<M>: Send + Sync
where
    M: Send + 'static,
{
    /// What [`subscribe`](Self::subscribe) registers.
    type Listener: Send;
    /// Entry of the engine's error-handler registry.
    type ErrorHandler;
    /// Engine-specific runtime/introspection data.
    type Runtime;

    /// Deliver `message` to every matching handler and return once all ran.
    async fn publish(&self, message: M);

    /// Submit `message` for asynchronous delivery without waiting on
    /// handlers. Progress is reported through `publication`.
    fn publish_async(&self, message: M, publication: PublicationTracker);

    /// Like [`publish_async`](Self::publish_async) with a submission
    /// timeout. Engines without timed submission ignore the timeout.
    fn publish_async_timeout(
        &self,
        message: M,
        timeout: Duration,
        publication: PublicationTracker,
    ) {
        let _ = timeout;
        self.publish_async(message, publication);
    }

    fn subscribe(&self, listener: Self::Listener);

    /// Returns true if the listener was registered.
    fn unsubscribe(&self, listener: &Self::Listener) -> bool;

    /// Stop the engine's internal execution resources.
    fn shutdown(&self);

    /// Returns true while asynchronous publications are still in flight.
    fn has_pending_messages(&self) -> bool;

    fn error_handlers(&self) -> Vec<Self::ErrorHandler>;

    fn runtime(&self) -> &Self::Runtime;
}

#[async_trait]
impl<M, B> MessageBus<M> for Arc<B>
where
    M: Send + 'static,
    B: MessageBus<M>,
{
    type Listener = B::Listener;
    type ErrorHandler = B::ErrorHandler;
    type Runtime = B::Runtime;

    async fn publish(&self, message: M) {
        (**self).publish(message).await
    }

    fn publish_async(&self, message: M, publication: PublicationTracker) {
        (**self).publish_async(message, publication)
    }

    fn publish_async_timeout(
        &self,
        message: M,
        timeout: Duration,
        publication: PublicationTracker,
    ) {
        (**self).publish_async_timeout(message, timeout, publication)
    }

    fn subscribe(&self, listener: Self::Listener) {
        (**self).subscribe(listener)
    }

    fn unsubscribe(&self, listener: &Self::Listener) -> bool {
        (**self).unsubscribe(listener)
    }

    fn shutdown(&self) {
        (**self).shutdown()
    }

    fn has_pending_messages(&self) -> bool {
        (**self).has_pending_messages()
    }

    fn error_handlers(&self) -> Vec<Self::ErrorHandler> {
        (**self).error_handlers()
    }

    fn runtime(&self) -> &Self::Runtime {
        (**self).runtime()
    }
}
