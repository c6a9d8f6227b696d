// Demo: pause a bus, buffer a few messages, then replay them
//
// Configure with PAUSABLE_BUS_QUEUE_CAPACITY / PAUSABLE_BUS_START_PAUSED and
// RUST_LOG (e.g. RUST_LOG=debug,pausable_bus=trace).
//
// Run with: cargo run -p pausable-bus --features demo --bin pause-demo

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use pausable_bus::{async_trait, MessageBus, PausableBus, PauseConfig, PublicationTracker};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Dispatch engine that just logs what it receives.
#[derive(Debug, Default)]
struct LoggingBus {
    delivered: AtomicUsize,
}

#[async_trait]
impl MessageBus<String> for LoggingBus {
    type Listener = ();
    type ErrorHandler = ();
    type Runtime = ();

    async fn publish(&self, message: String) {
        let n = self.delivered.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(n, %message, "delivered");
    }

    fn publish_async(&self, message: String, publication: PublicationTracker) {
        let n = self.delivered.fetch_add(1, Ordering::SeqCst) + 1;
        publication.running();
        tracing::info!(n, %message, id = %publication.id(), "delivered asynchronously");
        publication.finished();
    }

    fn subscribe(&self, _listener: ()) {}

    fn unsubscribe(&self, _listener: &()) -> bool {
        false
    }

    fn shutdown(&self) {
        tracing::info!("shutting down");
    }

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

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,pausable_bus=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = PauseConfig::from_env().context("Failed to load configuration")?;
    tracing::info!(?config, "Configuration loaded");

    let bus = PausableBus::with_config(LoggingBus::default(), config);

    bus.publish("before pause".to_string()).await?;

    bus.pause();
    for i in 1..=3 {
        bus.publish(format!("buffered #{i}")).await?;
    }
    let publication = bus
        .post("buffered async".to_string())
        .asynchronously_with_timeout(Duration::from_secs(1))?;
    tracing::info!(snapshot = ?bus.snapshot(), status = %publication.status(), "paused");

    bus.resume_async();
    tracing::info!(status = %publication.completed().await, "async publication done");

    bus.pause();
    bus.post("buffered sync".to_string()).now().await?;
    bus.resume().await;

    tracing::info!(
        snapshot = ?bus.snapshot(),
        delivered = bus.inner().delivered.load(Ordering::SeqCst),
        "done"
    );
    bus.shutdown();

    Ok(())
}
