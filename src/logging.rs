use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "backlink_recovery=info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install a compact human-readable subscriber
///
/// `RUST_LOG` overrides the default `backlink_recovery=info` filter.
///
/// # Errors
///
/// Returns an error if a global subscriber is already set.
pub fn init_tracing() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false)
                .compact(),
        )
        .try_init()?;

    info!("Error recovery logging initialized");
    Ok(())
}

/// Install a JSON subscriber for log shipping
///
/// # Errors
///
/// Returns an error if a global subscriber is already set.
pub fn init_json_tracing() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .flatten_event(true),
        )
        .try_init()?;

    info!("Error recovery JSON logging initialized");
    Ok(())
}
