//! Shared setup for integration tests.

use pausable_bus::testing::RecordingBus;
use pausable_bus::{PausableBus, PauseConfig};

/// Message type used across the integration tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderEvent {
    Placed(u32),
    Shipped(u32),
}

pub type TestBus = PausableBus<OrderEvent, RecordingBus<OrderEvent>>;

/// Initialize tracing once per test binary.
///
/// Uses try_init() to avoid panicking if already initialized.
/// Run tests with: RUST_LOG=debug cargo test -- --nocapture
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A pausable bus over a fresh recorder, plus a handle on the recorder.
pub fn setup() -> (TestBus, RecordingBus<OrderEvent>) {
    setup_with(PauseConfig::default())
}

pub fn setup_with(config: PauseConfig) -> (TestBus, RecordingBus<OrderEvent>) {
    init_tracing();
    let recorder = RecordingBus::named("orders");
    (PausableBus::with_config(recorder.clone(), config), recorder)
}
