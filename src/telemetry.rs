use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init(config: &LoggingConfig) -> Result<(), tracing_subscriber::util::TryInitError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let subscriber = tracing_subscriber::registry().with(env_filter);

    if config.format.eq_ignore_ascii_case("json") {
        subscriber
            .with(fmt::layer().json().with_current_span(true).with_target(true))
            .try_init()?;
    } else {
        subscriber
            .with(fmt::layer().pretty().with_target(true))
            .try_init()?;
    }

    info!(level = %config.level, format = %config.format, "tracing initialized");
    Ok(())
}
