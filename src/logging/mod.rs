pub mod event;
pub mod sinks;

pub use event::EventRecord;
pub use sinks::{EventLogger, EventSink, SinkRegistry};

use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the diagnostic tracing subscriber.
///
/// A no-op when a global subscriber is already installed, so hosts and tests
/// may call it more than once.
pub fn init_logging(level: &str, format: &str) -> Result<()> {
    if tracing::dispatcher::has_been_set() {
        tracing::debug!("Log subscriber already installed");
        return Ok(());
    }

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = match format {
        "json" => registry.with(fmt::layer().json()).try_init(),
        "pretty" => registry.with(fmt::layer().pretty()).try_init(),
        _ => registry.with(fmt::layer()).try_init(),
    };

    installed.map_err(|e| anyhow!("Failed to install log subscriber: {}", e))
}
