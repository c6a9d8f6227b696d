//! Replay queue: pause state plus the buffer of messages held while paused.
//!
//! The routing decision ("queue or forward") and the pause/resume
//! transitions are taken under one lock. That closes the check-then-act
//! window between reading the pause state and appending to the buffer:
//!
//! - every append that completes before `resume` flips the state is drained
//!   by that resume;
//! - no append can land in the buffer after the drain has finished while the
//!   bus is active.
//!
//! # Drain Protocol
//!
//! ```text
//! resume() ─► state = Active, draining = true
//!    │
//!    └─► loop:
//!          batch = buffer length                 (lock)
//!          pop and replay `batch` messages        (lock per pop)
//!          stop when paused or buffer empty       (lock, draining = false)
//! ```
//!
//! Messages stay in the buffer until they are popped for replay, so the
//! buffer length (and the capacity bound) always covers everything not yet
//! handed to the wrapped bus. A `pause()` mid-drain never truncates the
//! batch being replayed; whatever is still buffered when the batch ends
//! stays queued for the next resume.
//!
//! While `draining` is set on an active bus, a synchronous publish is told
//! to wait ([`Admission::Busy`]) until the drain ends and then try again, so
//! it neither overtakes the buffer nor returns before its handlers ran.
//! Asynchronous publishes are appended behind the buffer, within capacity.
//!
//! # Invariant
//!
//! The buffer is non-empty only while the bus is paused or a drain is in
//! progress. A drain that is dropped before it finishes (e.g. a cancelled
//! `resume()` future) re-pauses the bus if messages are left, to keep this
//! invariant.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::publication::PublicationTracker;
use crate::state::{PauseFlag, PauseState};

/// How a buffered message entered the bus.
#[derive(Debug)]
pub(crate) enum Origin {
    /// Synchronous `publish`.
    Publish,
    /// `publish_async`, with the tracker behind the caller's handle.
    PublishAsync {
        timeout: Option<Duration>,
        publication: PublicationTracker,
    },
}

/// A message waiting for delivery.
#[derive(Debug)]
pub(crate) struct Pending<M> {
    pub(crate) message: M,
    pub(crate) origin: Origin,
    pub(crate) queued_at: DateTime<Utc>,
}

impl<M> Pending<M> {
    pub(crate) fn publish(message: M) -> Self {
        Self {
            message,
            origin: Origin::Publish,
            queued_at: Utc::now(),
        }
    }

    pub(crate) fn publish_async(
        message: M,
        timeout: Option<Duration>,
        publication: PublicationTracker,
    ) -> Self {
        Self {
            message,
            origin: Origin::PublishAsync {
                timeout,
                publication,
            },
            queued_at: Utc::now(),
        }
    }
}

/// Outcome of offering a message to the queue.
#[derive(Debug)]
pub(crate) enum Admission<M> {
    /// Buffered for replay.
    Queued,
    /// Bus is active and idle: the caller delivers it now.
    Forward(Pending<M>),
    /// A drain is running on an active bus: wait for it to end, then offer
    /// again.
    Busy(Pending<M>),
    /// The bounded buffer is full.
    Full(Pending<M>),
}

/// Outcome of a resume request.
pub(crate) enum Resume<'a, M> {
    /// The bus was already active.
    NotPaused,
    /// Another resume is still draining; it will replay the buffer.
    Joined { queued: usize },
    /// This caller owns the drain.
    Started { queued: usize, drain: Drain<'a, M> },
}

/// Point-in-time view of a pausable bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PauseSnapshot {
    pub state: PauseState,
    /// Messages buffered for replay.
    pub queued: usize,
    /// A resume is currently replaying the buffer.
    pub draining: bool,
}

#[derive(Debug)]
struct Inner<M> {
    state: PauseState,
    draining: bool,
    entries: VecDeque<Pending<M>>,
}

#[derive(Debug)]
pub(crate) struct ReplayQueue<M> {
    inner: Mutex<Inner<M>>,
    flag: PauseFlag,
    capacity: Option<usize>,
    drained: Notify,
}

impl<M> ReplayQueue<M> {
    pub(crate) fn new(initial: PauseState, capacity: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: initial,
                draining: false,
                entries: VecDeque::new(),
            }),
            flag: PauseFlag::new(initial),
            capacity,
            drained: Notify::new(),
        }
    }

    /// Acquire the queue lock, recovering from poison if necessary.
    fn lock(&self) -> MutexGuard<'_, Inner<M>> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            warn!("replay queue mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn set_state(&self, inner: &mut Inner<M>, state: PauseState) {
        inner.state = state;
        self.flag.store(state);
    }

    /// Non-blocking snapshot of the pause state.
    pub(crate) fn state(&self) -> PauseState {
        self.flag.load()
    }

    pub(crate) fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub(crate) fn snapshot(&self) -> PauseSnapshot {
        let inner = self.lock();
        PauseSnapshot {
            state: inner.state,
            queued: inner.entries.len(),
            draining: inner.draining,
        }
    }

    /// Notification fired whenever a drain ends.
    ///
    /// Create it *before* the check it guards: it is woken by any drain that
    /// ends after it was created, even if not yet polled.
    pub(crate) fn drained(&self) -> Notified<'_> {
        self.drained.notified()
    }

    /// Wait until no drain is running.
    pub(crate) async fn wait_drained(&self) {
        loop {
            let notified = self.drained();
            let draining = self.lock().draining;
            if !draining {
                return;
            }
            notified.await;
        }
    }

    /// Decide whether `pending` is buffered, delivered by the caller, or
    /// must wait for a running drain.
    ///
    /// With `may_wait` false a synchronous publish during a drain is
    /// appended instead of reported [`Admission::Busy`]; used for publishes
    /// issued from inside the replay itself.
    pub(crate) fn offer(&self, pending: Pending<M>, may_wait: bool) -> Admission<M> {
        let mut inner = self.lock();

        if !inner.state.is_paused() {
            if !inner.draining {
                return Admission::Forward(pending);
            }
            if may_wait && matches!(pending.origin, Origin::Publish) {
                return Admission::Busy(pending);
            }
        }

        if let Some(capacity) = self.capacity {
            if inner.entries.len() >= capacity {
                return Admission::Full(pending);
            }
        }

        if let Origin::PublishAsync { publication, .. } = &pending.origin {
            publication.queued();
        }
        inner.entries.push_back(pending);
        Admission::Queued
    }

    /// Active → Paused. Returns the buffer depth if a transition happened.
    pub(crate) fn pause(&self) -> Option<usize> {
        let mut inner = self.lock();
        if inner.state.is_paused() {
            return None;
        }
        self.set_state(&mut inner, PauseState::Paused);
        Some(inner.entries.len())
    }

    /// Paused → Active, claiming the drain unless one is already running.
    pub(crate) fn resume(&self) -> Resume<'_, M> {
        let mut inner = self.lock();
        if !inner.state.is_paused() {
            return Resume::NotPaused;
        }
        self.set_state(&mut inner, PauseState::Active);

        let queued = inner.entries.len();
        if inner.draining {
            return Resume::Joined { queued };
        }
        inner.draining = true;

        Resume::Started {
            queued,
            drain: Drain {
                queue: self,
                remaining: 0,
                finished: false,
            },
        }
    }

    /// Pop the next message of the current batch, starting a new batch when
    /// the current one is done. Ends the drain when paused or empty.
    fn pop(&self, remaining: &mut usize) -> Option<Pending<M>> {
        let mut inner = self.lock();

        if *remaining == 0 {
            if inner.state.is_paused() || inner.entries.is_empty() {
                self.end_drain(&mut inner);
                return None;
            }
            *remaining = inner.entries.len();
            debug!(batch = *remaining, "replaying queued messages");
        }

        match inner.entries.pop_front() {
            Some(pending) => {
                *remaining -= 1;
                Some(pending)
            }
            None => {
                self.end_drain(&mut inner);
                None
            }
        }
    }

    fn end_drain(&self, inner: &mut Inner<M>) {
        inner.draining = false;
        self.drained.notify_waiters();
    }

    /// End a drain that was dropped before finishing.
    fn abandon_drain(&self) {
        let mut inner = self.lock();
        self.end_drain(&mut inner);

        if inner.entries.is_empty() {
            return;
        }
        if !inner.state.is_paused() {
            self.set_state(&mut inner, PauseState::Paused);
        }
        warn!(
            queued = inner.entries.len(),
            "replay interrupted, bus paused with messages still queued"
        );
    }
}

/// Iterator over buffered messages for the resume that owns the drain.
///
/// Yields messages in arrival order until the buffer is empty or the bus is
/// paused again between batches. Dropping it early leaves unreplayed
/// messages in the queue and the bus paused.
pub(crate) struct Drain<'a, M> {
    queue: &'a ReplayQueue<M>,
    remaining: usize,
    finished: bool,
}

impl<M> Iterator for Drain<'_, M> {
    type Item = Pending<M>;

    fn next(&mut self) -> Option<Pending<M>> {
        if self.finished {
            return None;
        }
        let next = self.queue.pop(&mut self.remaining);
        self.finished = next.is_none();
        next
    }
}

impl<M> Drop for Drain<'_, M> {
    fn drop(&mut self) {
        if !self.finished {
            self.queue.abandon_drain();
        }
    }
}
