//! Monitor Example with the In-Memory Source
//!
//! Runs a monitor over an in-process source, mutates a few documents and
//! prints every normalized event through a console destination. No
//! database or webhook is needed.
//!
//! # Running the Example
//!
//! ```bash
//! cargo run -p docwatch-sources --example memory_monitor
//! ```

use async_trait::async_trait;
use docwatch_core::config::MonitorConfig;
use docwatch_core::destination::{Destination, DestinationError, DestinationMetadata};
use docwatch_core::event::NormalizedEvent;
use docwatch_core::monitor::Monitor;
use docwatch_sources::memory::MemorySource;
use serde_json::json;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Prints each event as a JSON line
struct ConsoleDestination;

#[async_trait]
impl Destination for ConsoleDestination {
    async fn send_event(&self, event: &NormalizedEvent) -> Result<(), DestinationError> {
        let line = serde_json::to_string(event)
            .map_err(|e| DestinationError::serialization(e, "failed to encode event"))?;
        println!("{line}");
        Ok(())
    }

    fn metadata(&self) -> DestinationMetadata {
        DestinationMetadata::new("Console", "console")
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let source = Arc::new(MemorySource::new());
    source.insert(
        "users",
        "alice",
        json!({"name": "Alice", "age": 30}).as_object().cloned().unwrap_or_default(),
    );

    let config = MonitorConfig::builder()
        .startup_delay(Duration::ZERO)
        .exclude_collection("sessions")
        .build()?;
    let monitor = Monitor::new(config, source.clone(), Some(Arc::new(ConsoleDestination)))?;
    monitor.start().await?;
    info!(collections = ?monitor.watched_collections(), "Watching");

    // Alice was present at subscription time, so her update is the first event
    source.update(
        "users",
        "alice",
        json!({"name": "Alice", "age": 31}).as_object().cloned().unwrap_or_default(),
    );
    source.insert(
        "users",
        "bob",
        json!({"name": "Bob"}).as_object().cloned().unwrap_or_default(),
    );
    source.remove("users", "bob");

    tokio::time::sleep(Duration::from_millis(200)).await;
    monitor.stop().await;

    let stats = monitor.stats();
    info!(
        events = stats.events_recorded,
        delivered = stats.deliveries_succeeded,
        "Done"
    );
    Ok(())
}
