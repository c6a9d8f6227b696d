//! Configuration for pausable buses.

use std::env;

use anyhow::{Context, Result};
use dotenvy::dotenv;

use crate::state::PauseState;

/// Environment variable holding the replay queue capacity (unset = unbounded).
pub const QUEUE_CAPACITY_VAR: &str = "PAUSABLE_BUS_QUEUE_CAPACITY";

/// Environment variable selecting whether a new bus starts paused.
pub const START_PAUSED_VAR: &str = "PAUSABLE_BUS_START_PAUSED";

/// Settings for a [`PausableBus`](crate::PausableBus).
///
/// The default is an unbounded replay queue and an active bus.
///
/// # Example
///
/// ```ignore
/// let config = PauseConfig::new()
///     .with_queue_capacity(10_000)
///     .with_start_paused(true);
/// let bus = PausableBus::with_config(engine, config);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PauseConfig {
    /// Maximum number of buffered messages. `None` means unbounded.
    pub queue_capacity: Option<usize>,
    /// Start in [`PauseState::Paused`] instead of `Active`.
    pub start_paused: bool,
}

impl PauseConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let queue_capacity = match env::var(QUEUE_CAPACITY_VAR) {
            Ok(raw) if !raw.trim().is_empty() => Some(
                raw.trim()
                    .parse::<usize>()
                    .with_context(|| format!("{QUEUE_CAPACITY_VAR} must be a valid number"))?,
            ),
            _ => None,
        };

        let start_paused = match env::var(START_PAUSED_VAR) {
            Ok(raw) => parse_flag(&raw)
                .with_context(|| format!("{START_PAUSED_VAR} must be true or false"))?,
            Err(_) => false,
        };

        Ok(Self {
            queue_capacity,
            start_paused,
        })
    }

    /// Bound the replay queue. Publishing to a full, paused bus fails with
    /// [`PauseError::QueueFull`](crate::PauseError::QueueFull).
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    pub fn with_start_paused(mut self, paused: bool) -> Self {
        self.start_paused = paused;
        self
    }

    pub(crate) fn initial_state(&self) -> PauseState {
        if self.start_paused {
            PauseState::Paused
        } else {
            PauseState::Active
        }
    }
}

fn parse_flag(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => anyhow::bail!("unrecognized flag value {other:?}"),
    }
}
