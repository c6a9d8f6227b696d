//! Deferred publication: pick the delivery mode after choosing the message.
//!
//! ```ignore
//! bus.post(event).now().await?;                      // synchronous
//! bus.post(event).asynchronously()?;                 // asynchronous
//! bus.post(event).asynchronously_with_timeout(d)?;   // asynchronous, timed
//! ```
//!
//! Every mode goes through the [`PausableBus`], so a paused bus buffers the
//! message exactly as the direct call would.

use std::time::Duration;

use crate::bus::MessageBus;
use crate::error::PauseError;
use crate::pausable::PausableBus;
use crate::publication::Publication;

/// A message bound to a bus, waiting for a delivery mode.
///
/// Each delivery method consumes the command.
#[must_use = "a post command does nothing until a delivery method is called"]
pub struct PostCommand<'a, M, B> {
    bus: &'a PausableBus<M, B>,
    message: M,
}

impl<'a, M, B> PostCommand<'a, M, B>
where
    M: Send + 'static,
    B: MessageBus<M>,
{
    pub(crate) fn new(bus: &'a PausableBus<M, B>, message: M) -> Self {
        Self { bus, message }
    }

    pub fn message(&self) -> &M {
        &self.message
    }

    /// Same as [`PausableBus::publish`].
    pub async fn now(self) -> Result<(), PauseError> {
        self.bus.publish(self.message).await
    }

    /// Same as [`PausableBus::publish_async`].
    pub fn asynchronously(self) -> Result<Publication, PauseError> {
        self.bus.publish_async(self.message)
    }

    /// Same as [`PausableBus::publish_async_timeout`].
    pub fn asynchronously_with_timeout(
        self,
        timeout: Duration,
    ) -> Result<Publication, PauseError> {
        self.bus.publish_async_timeout(self.message, timeout)
    }
}
