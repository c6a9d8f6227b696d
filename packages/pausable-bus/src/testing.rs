//! Testing utilities for code built on pausable buses.
//!
//! # Feature Flag
//!
//! This module is only available with the `testing` feature:
//!
//! ```toml
//! [dev-dependencies]
//! pausable-bus = { version = "0.1", features = ["testing"] }
//! ```
//!
//! # RecordingBus
//!
//! [`RecordingBus`] is an in-memory [`MessageBus`] that records every
//! delivery it receives, in order, together with the path it came through.
//! Clones share the same recording, so a test can keep one clone and hand
//! the other to a [`PausableBus`](crate::PausableBus):
//!
//! ```ignore
//! use pausable_bus::testing::{DeliveryMode, RecordingBus};
//! use pausable_bus::PausableBus;
//!
//! let recorder = RecordingBus::new();
//! let bus = PausableBus::new(recorder.clone());
//!
//! bus.pause();
//! bus.publish("A").await?;
//! bus.resume().await;
//!
//! assert_eq!(recorder.messages(), vec!["A"]);
//! assert_eq!(recorder.modes(), vec![DeliveryMode::Sync]);
//! ```
//!
//! Asynchronous publications are run on spawned tokio tasks, so they need a
//! tokio runtime.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::bus::MessageBus;
use crate::publication::PublicationTracker;

/// Path a message took into the [`RecordingBus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// `publish`
    Sync,
    /// `publish_async`
    Async,
    /// `publish_async_timeout` with the given timeout
    AsyncTimeout(Duration),
}

/// One recorded delivery.
#[derive(Debug, Clone)]
pub struct Delivery<M> {
    pub message: M,
    pub mode: DeliveryMode,
    pub at: Instant,
}

/// Listener registered on a [`RecordingBus`]; called for every delivery.
pub type Listener<M> = Arc<dyn Fn(&M) + Send + Sync>;

/// Runtime info reported by [`RecordingBus::runtime`](MessageBus::runtime).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingRuntime {
    pub name: String,
}

struct Shared<M> {
    deliveries: Mutex<Vec<Delivery<M>>>,
    listeners: Mutex<Vec<Listener<M>>>,
    error_handlers: Mutex<Vec<&'static str>>,
    handler_delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    shutdown: AtomicBool,
    delivered: Notify,
    runtime: RecordingRuntime,
}

/// Lock a mutex, recovering from poison.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<M> Shared<M>
where
    M: Clone + Send + Sync + 'static,
{
    /// Record the delivery, then simulate handler execution.
    async fn deliver(&self, message: M, mode: DeliveryMode) {
        lock(&self.deliveries).push(Delivery {
            message: message.clone(),
            mode,
            at: Instant::now(),
        });
        self.delivered.notify_waiters();

        let delay = *lock(&self.handler_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let listeners = lock(&self.listeners).clone();
        for listener in listeners {
            listener(&message);
        }
    }
}

/// In-memory [`MessageBus`] that records deliveries.
pub struct RecordingBus<M> {
    shared: Arc<Shared<M>>,
}

impl<M> Clone for RecordingBus<M> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<M> RecordingBus<M>
where
    M: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::named("recording-bus")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                deliveries: Mutex::new(Vec::new()),
                listeners: Mutex::new(Vec::new()),
                error_handlers: Mutex::new(Vec::new()),
                handler_delay: Mutex::new(Duration::ZERO),
                in_flight: AtomicUsize::new(0),
                shutdown: AtomicBool::new(false),
                delivered: Notify::new(),
                runtime: RecordingRuntime { name: name.into() },
            }),
        }
    }

    /// Make every handler run take `delay`.
    pub fn with_handler_delay(self, delay: Duration) -> Self {
        self.set_handler_delay(delay);
        self
    }

    pub fn set_handler_delay(&self, delay: Duration) {
        *lock(&self.shared.handler_delay) = delay;
    }

    /// Add an entry to the reported error-handler registry.
    pub fn with_error_handler(self, name: &'static str) -> Self {
        lock(&self.shared.error_handlers).push(name);
        self
    }

    /// Wrap a closure as a listener.
    pub fn listener(f: impl Fn(&M) + Send + Sync + 'static) -> Listener<M> {
        Arc::new(f)
    }

    pub fn deliveries(&self) -> Vec<Delivery<M>> {
        lock(&self.shared.deliveries).clone()
    }

    /// Delivered messages, in delivery order.
    pub fn messages(&self) -> Vec<M> {
        lock(&self.shared.deliveries)
            .iter()
            .map(|d| d.message.clone())
            .collect()
    }

    pub fn modes(&self) -> Vec<DeliveryMode> {
        lock(&self.shared.deliveries)
            .iter()
            .map(|d| d.mode)
            .collect()
    }

    pub fn delivered_count(&self) -> usize {
        lock(&self.shared.deliveries).len()
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.shared.listeners).len()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Wait until at least `count` deliveries were recorded.
    ///
    /// Returns false on timeout.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                // Register for notification BEFORE checking count
                let notified = self.shared.delivered.notified();

                if self.delivered_count() >= count {
                    return;
                }

                notified.await;
            }
        })
        .await
        .is_ok()
    }

    fn spawn_delivery(&self, message: M, mode: DeliveryMode, publication: PublicationTracker) {
        publication.scheduled();
        self.shared.in_flight.fetch_add(1, Ordering::AcqRel);

        let shared = self.shared.clone();
        tokio::spawn(async move {
            publication.running();
            let run = shared.deliver(message, mode);

            let completed = match mode {
                DeliveryMode::AsyncTimeout(timeout) => {
                    tokio::time::timeout(timeout, run).await.is_ok()
                }
                _ => {
                    run.await;
                    true
                }
            };

            if completed {
                publication.finished();
            } else {
                publication.expired();
            }
            shared.in_flight.fetch_sub(1, Ordering::AcqRel);
        });
    }
}

impl<M> Default for RecordingBus<M>
where
    M: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<M> MessageBus<M> for RecordingBus<M>
where
    M: Clone + Send + Sync + 'static,
{
    type Listener = Listener<M>;
    type ErrorHandler = &'static str;
    type Runtime = RecordingRuntime;

    async fn publish(&self, message: M) {
        self.shared.deliver(message, DeliveryMode::Sync).await;
    }

    fn publish_async(&self, message: M, publication: PublicationTracker) {
        self.spawn_delivery(message, DeliveryMode::Async, publication);
    }

    fn publish_async_timeout(
        &self,
        message: M,
        timeout: Duration,
        publication: PublicationTracker,
    ) {
        self.spawn_delivery(message, DeliveryMode::AsyncTimeout(timeout), publication);
    }

    fn subscribe(&self, listener: Listener<M>) {
        lock(&self.shared.listeners).push(listener);
    }

    fn unsubscribe(&self, listener: &Listener<M>) -> bool {
        let mut listeners = lock(&self.shared.listeners);
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
    }

    fn has_pending_messages(&self) -> bool {
        self.shared.in_flight.load(Ordering::Acquire) > 0
    }

    fn error_handlers(&self) -> Vec<&'static str> {
        lock(&self.shared.error_handlers).clone()
    }

    fn runtime(&self) -> &RecordingRuntime {
        &self.shared.runtime
    }
}

impl<M> fmt::Display for RecordingBus<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (deliveries={})",
            self.shared.runtime.name,
            lock(&self.shared.deliveries).len()
        )
    }
}

impl<M> fmt::Debug for RecordingBus<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingBus")
            .field("name", &self.shared.runtime.name)
            .field("deliveries", &lock(&self.shared.deliveries).len())
            .field("listeners", &lock(&self.shared.listeners).len())
            .finish()
    }
}
