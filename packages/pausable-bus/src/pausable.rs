//! The pause/resume decorator.
//!
//! [`PausableBus`] wraps any [`MessageBus`] and can suspend outbound
//! delivery. Messages published while paused are buffered and replayed in
//! arrival order when the bus is resumed.
//!
//! ```text
//! publish ──► paused? ──no──► wrapped bus
//!                │
//!               yes
//!                ▼
//!           replay queue ──resume()──► wrapped bus (in order)
//! ```
//!
//! # Guarantees
//!
//! - **Exactly-once forwarding**: every accepted message reaches the wrapped
//!   bus once, however many pause/resume cycles happen in between
//! - **Per-producer FIFO**: messages from one task are delivered in the order
//!   they were published, including across a resume
//! - **Full drain**: a `pause()` during a resume does not cut short the batch
//!   being replayed; anything still buffered afterwards waits for the next
//!   resume
//! - **Blocking publish**: on an active bus, [`PausableBus::publish`] returns
//!   only after the wrapped bus handled the message. While a resume is still
//!   replaying, it first waits for that replay to end
//!
//! # Replay and nested publishes
//!
//! Handlers run by a synchronous [`PausableBus::resume`] may publish to the
//! same bus. Such nested publishes are appended behind the buffer instead of
//! waiting for the replay that is running them, and a nested `resume()`
//! returns at once. This is tracked per task, so handlers the wrapped bus
//! runs on other tasks get the regular waiting behavior.
//!
//! # Timeouts
//!
//! A timeout given to [`PausableBus::publish_async_timeout`] does not run
//! while the message is buffered. It travels with the message and is handed
//! to the wrapped bus when [`PausableBus::resume_async`] replays it, so the
//! clock starts at replay. [`PausableBus::resume`] replays through the
//! synchronous path, which has no timeout.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, trace, warn};

use crate::bus::MessageBus;
use crate::command::PostCommand;
use crate::config::PauseConfig;
use crate::error::PauseError;
use crate::publication::{self, Publication};
use crate::queue::{Admission, Drain, Origin, Pending, PauseSnapshot, ReplayQueue, Resume};
use crate::state::PauseState;

tokio::task_local! {
    /// Set while the current task replays buffered messages.
    static REPLAYING: ();
}

fn in_replay() -> bool {
    REPLAYING.try_with(|_| ()).is_ok()
}

/// Pause/resume capability of a publish/subscribe bus.
#[async_trait]
pub trait PubSubPause: Send + Sync {
    /// Suspend delivery. Further calls before a resume have no effect.
    ///
    /// Returns true if the bus was active.
    fn pause(&self) -> bool;

    /// Resume delivery and replay everything buffered since the pause, in
    /// arrival order. Does nothing if the bus is not paused.
    async fn resume(&self);

    fn is_paused(&self) -> bool;
}

/// A [`MessageBus`] decorator that can pause delivery and replay later.
///
/// # Example
///
/// ```ignore
/// use pausable_bus::PausableBus;
///
/// let bus = PausableBus::new(engine);
///
/// bus.pause();
/// bus.publish(Event::A).await?;    // buffered
/// bus.publish(Event::B).await?;    // buffered
///
/// bus.resume().await;              // engine sees A, then B
/// ```
pub struct PausableBus<M, B> {
    inner: B,
    queue: ReplayQueue<M>,
}

impl<M, B> PausableBus<M, B>
where
    M: Send + 'static,
    B: MessageBus<M>,
{
    /// Wrap `inner` with an unbounded replay queue, starting active.
    pub fn new(inner: B) -> Self {
        Self::with_config(inner, PauseConfig::default())
    }

    pub fn with_config(inner: B, config: PauseConfig) -> Self {
        Self {
            queue: ReplayQueue::new(config.initial_state(), config.queue_capacity),
            inner,
        }
    }

    /// The wrapped bus.
    pub fn inner(&self) -> &B {
        &self.inner
    }

    /// Unwrap the decorator. Buffered messages are dropped.
    pub fn into_inner(self) -> B {
        let queued = self.queue.len();
        if queued > 0 {
            warn!(queued, "discarding queued messages");
        }
        self.inner
    }

    // -------------------------------------------------------------------------
    // Publishing
    // -------------------------------------------------------------------------

    /// Publish `message` and wait for its handlers.
    ///
    /// If the bus is paused the message is buffered and this returns at once.
    /// While a resume is still replaying, this waits for the replay to end
    /// before delivering, so the message never overtakes the buffer.
    pub async fn publish(&self, message: M) -> Result<(), PauseError> {
        let mut pending = Pending::publish(message);
        let may_wait = !in_replay();

        loop {
            let drained = self.queue.drained();
            match self.queue.offer(pending, may_wait) {
                Admission::Queued => return Ok(()),
                Admission::Forward(next) => {
                    self.inner.publish(next.message).await;
                    return Ok(());
                }
                Admission::Busy(next) => {
                    trace!("replay in progress, waiting to publish");
                    pending = next;
                    drained.await;
                }
                Admission::Full(_) => return Err(self.queue_full()),
            }
        }
    }

    /// Publish `message` through the wrapped bus's asynchronous path.
    ///
    /// While paused, the returned publication stays `Queued` and then
    /// follows the message through its replay.
    pub fn publish_async(&self, message: M) -> Result<Publication, PauseError> {
        self.submit_async(message, None)
    }

    /// Like [`publish_async`](Self::publish_async) with a submission timeout.
    ///
    /// See the module docs for how the timeout applies to buffered messages.
    pub fn publish_async_timeout(
        &self,
        message: M,
        timeout: Duration,
    ) -> Result<Publication, PauseError> {
        self.submit_async(message, Some(timeout))
    }

    /// Start a deferred publication of `message`.
    ///
    /// ```ignore
    /// bus.post(event).now().await?;
    /// let publication = bus.post(event).asynchronously()?;
    /// ```
    pub fn post(&self, message: M) -> PostCommand<'_, M, B> {
        PostCommand::new(self, message)
    }

    fn submit_async(
        &self,
        message: M,
        timeout: Option<Duration>,
    ) -> Result<Publication, PauseError> {
        let (tracker, publication) = publication::channel();

        match self
            .queue
            .offer(Pending::publish_async(message, timeout, tracker), true)
        {
            Admission::Queued => Ok(publication),
            Admission::Forward(pending) | Admission::Busy(pending) => {
                self.forward_async(pending);
                Ok(publication)
            }
            Admission::Full(_) => Err(self.queue_full()),
        }
    }

    fn queue_full(&self) -> PauseError {
        let capacity = self.queue.capacity().unwrap_or_default();
        warn!(capacity, "bus paused and replay queue full, rejecting message");
        PauseError::QueueFull { capacity }
    }

    // -------------------------------------------------------------------------
    // Pause / resume
    // -------------------------------------------------------------------------

    /// Suspend delivery. Idempotent.
    ///
    /// Returns true if the bus was active.
    pub fn pause(&self) -> bool {
        match self.queue.pause() {
            Some(queued) => {
                info!(queued, "pausing message publication");
                true
            }
            None => false,
        }
    }

    /// Resume delivery, replaying buffered messages through the wrapped
    /// bus's synchronous `publish`. Returns once the replay is done.
    ///
    /// Does nothing if the bus is not paused. If a previous resume is still
    /// replaying, that resume delivers the buffer and this waits for it.
    ///
    /// Dropping the returned future mid-replay leaves unreplayed messages in
    /// the queue and the bus paused. A publication whose replay was cut
    /// short reports `Expired`.
    pub async fn resume(&self) {
        let drain = match self.queue.resume() {
            Resume::NotPaused => return,
            Resume::Joined { queued } => {
                info!(queued, "resuming message publication, replay already running");
                if !in_replay() {
                    self.queue.wait_drained().await;
                }
                return;
            }
            Resume::Started { queued, drain } => {
                info!(queued, "resuming message publication");
                drain
            }
        };

        REPLAYING
            .scope((), async move {
                let mut replayed = 0usize;
                for pending in drain {
                    self.forward_sync(pending).await;
                    replayed += 1;
                }
                debug!(replayed, "replay finished");
            })
            .await
    }

    /// Resume delivery, replaying buffered messages through the wrapped
    /// bus's asynchronous path. Does not wait on handlers, nor on a replay
    /// already running.
    pub fn resume_async(&self) {
        let drain: Drain<'_, M> = match self.queue.resume() {
            Resume::NotPaused => return,
            Resume::Joined { queued } => {
                info!(queued, "resuming message publication, replay already running");
                return;
            }
            Resume::Started { queued, drain } => {
                info!(queued, "resuming message publication");
                drain
            }
        };

        let mut replayed = 0usize;
        for pending in drain {
            self.forward_async(pending);
            replayed += 1;
        }
        debug!(replayed, "replay handed off");
    }

    async fn forward_sync(&self, pending: Pending<M>) {
        log_replay(&pending);
        match pending.origin {
            Origin::Publish => self.inner.publish(pending.message).await,
            Origin::PublishAsync { publication, .. } => {
                publication.running();
                self.inner.publish(pending.message).await;
                publication.finished();
            }
        }
    }

    fn forward_async(&self, pending: Pending<M>) {
        match pending.origin {
            Origin::Publish => {
                let (tracker, _) = publication::channel();
                self.inner.publish_async(pending.message, tracker);
            }
            Origin::PublishAsync {
                timeout: Some(timeout),
                publication,
            } => self
                .inner
                .publish_async_timeout(pending.message, timeout, publication),
            Origin::PublishAsync {
                timeout: None,
                publication,
            } => self.inner.publish_async(pending.message, publication),
        }
    }

    // -------------------------------------------------------------------------
    // State
    // -------------------------------------------------------------------------

    /// Non-blocking snapshot of the pause state.
    pub fn state(&self) -> PauseState {
        self.queue.state()
    }

    pub fn is_paused(&self) -> bool {
        self.state().is_paused()
    }

    /// Number of messages waiting for replay.
    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    pub fn snapshot(&self) -> PauseSnapshot {
        self.queue.snapshot()
    }

    // -------------------------------------------------------------------------
    // Pass-through
    // -------------------------------------------------------------------------

    pub fn subscribe(&self, listener: B::Listener) {
        self.inner.subscribe(listener)
    }

    pub fn unsubscribe(&self, listener: &B::Listener) -> bool {
        self.inner.unsubscribe(listener)
    }

    /// Shut down the wrapped bus. Buffered messages stay buffered.
    pub fn shutdown(&self) {
        self.inner.shutdown()
    }

    pub fn has_pending_messages(&self) -> bool {
        self.inner.has_pending_messages()
    }

    pub fn error_handlers(&self) -> Vec<B::ErrorHandler> {
        self.inner.error_handlers()
    }

    pub fn runtime(&self) -> &B::Runtime {
        self.inner.runtime()
    }
}

fn log_replay<M>(pending: &Pending<M>) {
    let waited_ms = (Utc::now() - pending.queued_at).num_milliseconds();
    trace!(waited_ms, "replaying message");
}

#[async_trait]
impl<M, B> PubSubPause for PausableBus<M, B>
where
    M: Send + 'static,
    B: MessageBus<M>,
{
    fn pause(&self) -> bool {
        PausableBus::pause(self)
    }

    async fn resume(&self) {
        PausableBus::resume(self).await
    }

    fn is_paused(&self) -> bool {
        PausableBus::is_paused(self)
    }
}

impl<M, B: fmt::Display> fmt::Display for PausableBus<M, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | paused={}",
            self.inner,
            self.queue.state().is_paused()
        )
    }
}

impl<M, B> fmt::Debug for PausableBus<M, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.queue.snapshot();
        f.debug_struct("PausableBus")
            .field("state", &snapshot.state)
            .field("queued", &snapshot.queued)
            .field("draining", &snapshot.draining)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publication::PublicationStatus;
    use crate::publication::PublicationTracker;
    use crate::testing::{DeliveryMode, RecordingBus};
    use std::sync::{Arc, OnceLock, Weak};

    type TestBus = PausableBus<&'static str, RecordingBus<&'static str>>;

    fn bus() -> (TestBus, RecordingBus<&'static str>) {
        let recorder = RecordingBus::new();
        (PausableBus::new(recorder.clone()), recorder)
    }

    #[tokio::test]
    async fn test_publish_while_active_forwards_immediately() {
        let (bus, recorder) = bus();

        bus.publish("C").await.unwrap();

        assert_eq!(recorder.messages(), vec!["C"]);
        assert_eq!(recorder.modes(), vec![DeliveryMode::Sync]);
        assert_eq!(bus.queued_len(), 0);
    }

    #[tokio::test]
    async fn test_pause_buffers_and_resume_replays_in_order() {
        let (bus, recorder) = bus();

        bus.pause();
        bus.publish("A").await.unwrap();
        bus.publish("B").await.unwrap();
        assert!(recorder.messages().is_empty());
        assert_eq!(bus.queued_len(), 2);

        bus.resume().await;

        assert_eq!(recorder.messages(), vec!["A", "B"]);
        assert_eq!(recorder.modes(), vec![DeliveryMode::Sync, DeliveryMode::Sync]);
        assert!(!bus.is_paused());
        assert_eq!(bus.queued_len(), 0);
    }

    #[tokio::test]
    async fn test_pause_is_idempotent() {
        let (bus, recorder) = bus();

        assert!(bus.pause());
        bus.publish("A").await.unwrap();
        assert!(!bus.pause());
        assert!(!bus.pause());
        assert_eq!(bus.queued_len(), 1);

        bus.resume().await;
        assert_eq!(recorder.messages(), vec!["A"]);
    }

    #[tokio::test]
    async fn test_resume_when_active_is_noop() {
        let (bus, recorder) = bus();

        bus.resume().await;
        bus.resume_async();

        assert_eq!(recorder.delivered_count(), 0);
        assert_eq!(bus.state(), PauseState::Active);
    }

    #[tokio::test]
    async fn test_resume_async_replays_through_async_path() {
        let (bus, recorder) = bus();

        bus.pause();
        let publication = bus.publish_async("D").unwrap();
        assert_eq!(publication.status(), PublicationStatus::Queued);

        bus.resume_async();

        assert_eq!(publication.completed().await, PublicationStatus::Finished);
        assert_eq!(recorder.messages(), vec!["D"]);
        assert_eq!(recorder.modes(), vec![DeliveryMode::Async]);
    }

    #[tokio::test]
    async fn test_queued_async_publication_finishes_on_sync_resume() {
        let (bus, recorder) = bus();

        bus.pause();
        let publication = bus.publish_async("D").unwrap();
        bus.resume().await;

        assert!(publication.is_finished());
        assert_eq!(recorder.modes(), vec![DeliveryMode::Sync]);
    }

    #[tokio::test]
    async fn test_timeout_is_applied_on_async_replay() {
        let (bus, recorder) = bus();
        let timeout = Duration::from_secs(5);

        bus.pause();
        let publication = bus.publish_async_timeout("T", timeout).unwrap();
        bus.resume_async();
        publication.completed().await;

        assert_eq!(recorder.modes(), vec![DeliveryMode::AsyncTimeout(timeout)]);
    }

    #[tokio::test]
    async fn test_publish_async_while_active_uses_live_handle() {
        let (bus, recorder) = bus();

        let publication = bus.publish_async("live").unwrap();
        assert_ne!(publication.status(), PublicationStatus::Queued);
        assert_eq!(publication.completed().await, PublicationStatus::Finished);
        assert_eq!(recorder.messages(), vec!["live"]);
    }

    #[tokio::test]
    async fn test_sync_messages_replay_async_on_resume_async() {
        let (bus, recorder) = bus();

        bus.pause();
        bus.publish("S").await.unwrap();
        bus.resume_async();

        assert!(recorder.wait_for(1, Duration::from_secs(1)).await);
        assert_eq!(recorder.modes(), vec![DeliveryMode::Async]);
    }

    #[tokio::test]
    async fn test_bounded_queue_rejects_when_full() {
        let recorder = RecordingBus::new();
        let bus = PausableBus::with_config(
            recorder.clone(),
            PauseConfig::new().with_queue_capacity(1),
        );

        bus.pause();
        bus.publish("a").await.unwrap();
        assert_eq!(
            bus.publish("b").await,
            Err(PauseError::QueueFull { capacity: 1 })
        );
        assert!(matches!(
            bus.publish_async("c"),
            Err(PauseError::QueueFull { capacity: 1 })
        ));

        bus.resume().await;
        assert_eq!(recorder.messages(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_start_paused_config() {
        let recorder = RecordingBus::new();
        let bus = PausableBus::with_config(
            recorder.clone(),
            PauseConfig::new().with_start_paused(true),
        );

        assert!(bus.is_paused());
        bus.publish("early").await.unwrap();
        assert_eq!(recorder.delivered_count(), 0);

        bus.resume().await;
        assert_eq!(recorder.messages(), vec!["early"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancelled_resume_requeues_unreplayed_messages() {
        let recorder = RecordingBus::new().with_handler_delay(Duration::from_millis(50));
        let bus = Arc::new(PausableBus::new(recorder.clone()));

        bus.pause();
        for m in ["a", "b", "c"] {
            bus.publish(m).await.unwrap();
        }

        // Cancel while "a" is being handled
        let _ = tokio::time::timeout(Duration::from_millis(20), bus.resume()).await;

        assert!(bus.is_paused());
        assert_eq!(bus.queued_len(), 2);
        assert_eq!(recorder.messages(), vec!["a"]);

        recorder.set_handler_delay(Duration::ZERO);
        bus.resume().await;
        assert_eq!(recorder.messages(), vec!["a", "b", "c"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_publish_during_replay_waits_for_its_own_delivery() {
        let recorder = RecordingBus::new().with_handler_delay(Duration::from_millis(100));
        let bus = Arc::new(PausableBus::new(recorder.clone()));

        bus.pause();
        bus.publish("a").await.unwrap();

        let resumer = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.resume().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!bus.is_paused());

        bus.publish("x").await.unwrap();

        // Returned only after the replay ended and "x" itself was handled
        assert_eq!(recorder.messages(), vec!["a", "x"]);
        assert!(!bus.snapshot().draining);
        resumer.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_capacity_bounds_async_publishes_during_replay() {
        let recorder = RecordingBus::new().with_handler_delay(Duration::from_millis(50));
        let bus = Arc::new(PausableBus::with_config(
            recorder.clone(),
            PauseConfig::new().with_queue_capacity(2),
        ));

        bus.pause();
        bus.publish("a").await.unwrap();
        bus.publish("b").await.unwrap();

        let resumer = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.resume().await })
        };
        // "a" is being handled, "b" still buffered
        tokio::time::sleep(Duration::from_millis(10)).await;

        let queued = bus.publish_async("c").unwrap();
        assert_eq!(queued.status(), PublicationStatus::Queued);
        assert_eq!(
            bus.publish_async("d").unwrap_err(),
            PauseError::QueueFull { capacity: 2 }
        );
        assert!(bus.queued_len() <= 2);

        resumer.await.unwrap();
        assert_eq!(queued.completed().await, PublicationStatus::Finished);
        assert_eq!(recorder.messages(), vec!["a", "b", "c"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_joining_resume_waits_for_running_replay() {
        let recorder = RecordingBus::new().with_handler_delay(Duration::from_millis(50));
        let bus = Arc::new(PausableBus::new(recorder.clone()));

        bus.pause();
        bus.publish("a").await.unwrap();

        let first = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.resume().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        bus.pause();
        bus.publish("m").await.unwrap();
        bus.resume().await;

        assert_eq!(recorder.messages(), vec!["a", "m"]);
        assert_eq!(bus.queued_len(), 0);
        first.await.unwrap();
    }

    /// Engine whose handler for "a" publishes again through the decorator.
    struct Relay {
        bus: OnceLock<Weak<PausableBus<&'static str, Arc<Relay>>>>,
        recorder: RecordingBus<&'static str>,
    }

    #[async_trait]
    impl MessageBus<&'static str> for Relay {
        type Listener = ();
        type ErrorHandler = ();
        type Runtime = ();

        async fn publish(&self, message: &'static str) {
            self.recorder.publish(message).await;
            if message == "a" {
                if let Some(bus) = self.bus.get().and_then(Weak::upgrade) {
                    bus.publish("from-handler").await.unwrap();
                    bus.pause();
                    bus.resume().await;
                }
            }
        }

        fn publish_async(&self, message: &'static str, publication: PublicationTracker) {
            self.recorder.publish_async(message, publication)
        }

        fn subscribe(&self, _listener: ()) {}

        fn unsubscribe(&self, _listener: &()) -> bool {
            false
        }

        fn shutdown(&self) {}

        fn has_pending_messages(&self) -> bool {
            false
        }

        fn error_handlers(&self) -> Vec<()> {
            Vec::new()
        }

        fn runtime(&self) -> &() {
            &()
        }
    }

    #[tokio::test]
    async fn test_publish_from_replayed_handler_does_not_deadlock() {
        let recorder = RecordingBus::new();
        let relay = Arc::new(Relay {
            bus: OnceLock::new(),
            recorder: recorder.clone(),
        });
        let bus = Arc::new(PausableBus::new(relay.clone()));
        let _ = relay.bus.set(Arc::downgrade(&bus));

        bus.pause();
        bus.publish("a").await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), bus.resume())
            .await
            .expect("replay deadlocked on a publish from its own handler");

        assert_eq!(recorder.messages(), vec!["a", "from-handler"]);
        assert_eq!(bus.queued_len(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancelled_resume_expires_in_flight_publication() {
        let recorder = RecordingBus::new().with_handler_delay(Duration::from_millis(50));
        let bus = PausableBus::new(recorder.clone());

        bus.pause();
        let in_flight = bus.publish_async("a").unwrap();
        let waiting = bus.publish_async("b").unwrap();

        let _ = tokio::time::timeout(Duration::from_millis(20), bus.resume()).await;

        assert_eq!(in_flight.completed().await, PublicationStatus::Expired);
        assert!(waiting.is_queued());
        assert!(bus.is_paused());

        recorder.set_handler_delay(Duration::ZERO);
        bus.resume().await;
        assert_eq!(waiting.completed().await, PublicationStatus::Finished);
    }

    #[tokio::test]
    async fn test_pass_through() {
        let recorder = RecordingBus::new().with_error_handler("log");
        let bus = PausableBus::new(recorder.clone());

        let listener = RecordingBus::<&'static str>::listener(|_| {});
        bus.subscribe(listener.clone());
        assert_eq!(recorder.listener_count(), 1);
        assert!(bus.unsubscribe(&listener));
        assert!(!bus.unsubscribe(&listener));

        assert_eq!(bus.error_handlers(), vec!["log"]);
        assert_eq!(bus.runtime().name, recorder.runtime().name);
        assert!(!bus.has_pending_messages());

        bus.shutdown();
        assert!(recorder.is_shutdown());
    }

    #[tokio::test]
    async fn test_pubsub_pause_trait_object() {
        let (bus, recorder) = bus();
        let control: &dyn PubSubPause = &bus;

        assert!(control.pause());
        assert!(control.is_paused());
        bus.publish("x").await.unwrap();
        control.resume().await;

        assert!(!control.is_paused());
        assert_eq!(recorder.messages(), vec!["x"]);
    }

    #[test]
    fn test_display_and_debug() {
        let (bus, _) = bus();
        bus.pause();

        assert!(bus.to_string().ends_with("| paused=true"));
        let debug = format!("{:?}", bus);
        assert!(debug.contains("PausableBus"));
        assert!(debug.contains("Paused"));
    }
}
