//! Pause state of a [`PausableBus`](crate::PausableBus).
//!
//! The state is binary: [`PauseState::Active`] forwards every publication to
//! the wrapped bus, [`PauseState::Paused`] buffers it for later replay.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

/// Routing state of a pausable bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseState {
    /// Publications are forwarded immediately.
    #[default]
    Active,
    /// Publications are buffered until the bus is resumed.
    Paused,
}

impl PauseState {
    /// Returns true for [`PauseState::Paused`].
    pub fn is_paused(self) -> bool {
        matches!(self, PauseState::Paused)
    }

    fn from_flag(paused: bool) -> Self {
        if paused {
            PauseState::Paused
        } else {
            PauseState::Active
        }
    }
}

impl fmt::Display for PauseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PauseState::Active => write!(f, "active"),
            PauseState::Paused => write!(f, "paused"),
        }
    }
}

/// Lock-free mirror of the pause state.
///
/// Written only while the replay queue lock is held, read from anywhere.
/// All accesses are `SeqCst` so a transition is visible to every thread as
/// soon as the writer returns.
#[derive(Debug, Default)]
pub(crate) struct PauseFlag(AtomicBool);

impl PauseFlag {
    pub(crate) fn new(state: PauseState) -> Self {
        Self(AtomicBool::new(state.is_paused()))
    }

    pub(crate) fn load(&self) -> PauseState {
        PauseState::from_flag(self.0.load(Ordering::SeqCst))
    }

    pub(crate) fn store(&self, state: PauseState) {
        self.0.store(state.is_paused(), Ordering::SeqCst);
    }
}
