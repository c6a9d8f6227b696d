//! Publication handles for asynchronous delivery.
//!
//! An asynchronous publication is split in two halves created together by
//! [`channel`]:
//!
//! - [`PublicationTracker`] is handed to whoever performs the delivery. It
//!   moves the publication through its lifecycle.
//! - [`Publication`] is handed to the caller. It observes the lifecycle and
//!   can be awaited until the delivery is done.
//!
//! ```text
//! Initialized ─► Queued ─► Scheduled ─► Running ─► Finished
//!      │            │          │
//!      └────────────┴──────────┴──────────────────► Expired
//! ```
//!
//! `Queued` is only used by [`PausableBus`](crate::PausableBus) for messages
//! buffered while paused. Once a publication reaches a terminal status
//! (`Finished` or `Expired`) further updates are ignored.
//!
//! # Example
//!
//! ```ignore
//! let mut publication = bus.publish_async(OrderPlaced { id });
//! // ...
//! let status = publication.completed().await;
//! assert_eq!(status, PublicationStatus::Finished);
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

/// Unique identifier of a publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PublicationId(Uuid);

impl PublicationId {
    /// Create a new random publication ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID value.
    pub fn into_inner(self) -> Uuid {
        self.0
    }
}

impl Default for PublicationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PublicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublicationStatus {
    /// Created, not yet handed to anyone.
    Initialized,
    /// Buffered by a paused bus, waiting for resume.
    Queued,
    /// Accepted by the dispatch engine, waiting for a worker.
    Scheduled,
    /// Handlers are running.
    Running,
    /// All handlers ran.
    Finished,
    /// The delivery timed out before it could run.
    Expired,
}

impl PublicationStatus {
    /// Returns true for statuses that will never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, PublicationStatus::Finished | PublicationStatus::Expired)
    }
}

impl fmt::Display for PublicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PublicationStatus::Initialized => "initialized",
            PublicationStatus::Queued => "queued",
            PublicationStatus::Scheduled => "scheduled",
            PublicationStatus::Running => "running",
            PublicationStatus::Finished => "finished",
            PublicationStatus::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// Create a linked tracker/handle pair in status `Initialized`.
pub fn channel() -> (PublicationTracker, Publication) {
    let id = PublicationId::new();
    let created_at = Utc::now();
    let (tx, rx) = watch::channel(PublicationStatus::Initialized);
    (
        PublicationTracker { id, tx },
        Publication { id, created_at, rx },
    )
}

/// Write side of a publication.
///
/// Dropping the tracker before it reached a terminal status marks the
/// publication `Expired`, so [`Publication::completed`] always ends in a
/// terminal status.
#[derive(Debug)]
pub struct PublicationTracker {
    id: PublicationId,
    tx: watch::Sender<PublicationStatus>,
}

impl PublicationTracker {
    /// ID shared with the linked [`Publication`].
    pub fn id(&self) -> PublicationId {
        self.id
    }

    /// Current status.
    pub fn status(&self) -> PublicationStatus {
        *self.tx.borrow()
    }

    /// Move to `status`. Ignored once the publication is terminal.
    ///
    /// Returns true if the status changed.
    pub fn set(&self, status: PublicationStatus) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_terminal() || *current == status {
                return false;
            }
            *current = status;
            true
        })
    }

    pub fn queued(&self) -> bool {
        self.set(PublicationStatus::Queued)
    }

    pub fn scheduled(&self) -> bool {
        self.set(PublicationStatus::Scheduled)
    }

    pub fn running(&self) -> bool {
        self.set(PublicationStatus::Running)
    }

    pub fn finished(&self) -> bool {
        self.set(PublicationStatus::Finished)
    }

    pub fn expired(&self) -> bool {
        self.set(PublicationStatus::Expired)
    }
}

impl Drop for PublicationTracker {
    fn drop(&mut self) {
        self.expired();
    }
}

/// Read side of a publication, returned to callers of asynchronous publish.
///
/// Cloning is cheap; all clones observe the same publication.
#[derive(Debug, Clone)]
pub struct Publication {
    id: PublicationId,
    created_at: DateTime<Utc>,
    rx: watch::Receiver<PublicationStatus>,
}

impl Publication {
    pub fn id(&self) -> PublicationId {
        self.id
    }

    /// When the publication was created (not when it was delivered).
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Snapshot of the current status.
    pub fn status(&self) -> PublicationStatus {
        *self.rx.borrow()
    }

    pub fn is_queued(&self) -> bool {
        self.status() == PublicationStatus::Queued
    }

    pub fn is_running(&self) -> bool {
        self.status() == PublicationStatus::Running
    }

    pub fn is_finished(&self) -> bool {
        self.status() == PublicationStatus::Finished
    }

    pub fn is_expired(&self) -> bool {
        self.status() == PublicationStatus::Expired
    }

    /// Wait until the publication reaches a terminal status.
    ///
    pub async fn completed(&self) -> PublicationStatus {
        let mut rx = self.rx.clone();
        loop {
            let status = *rx.borrow_and_update();
            if status.is_terminal() {
                return status;
            }
            if rx.changed().await.is_err() {
                return *rx.borrow();
            }
        }
    }
}
