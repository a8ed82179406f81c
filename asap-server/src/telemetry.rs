//! Tracing subscriber setup for the server binary.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogFormat;
use crate::error::StartupError;

const DEFAULT_FILTER: &str = "asap_server=info,tower_http=info,info";

/// Install the global subscriber.
///
/// The filter comes from `RUST_LOG` when set. Call once, before any
/// tracing happens.
pub fn init_tracing(format: LogFormat) -> Result<(), StartupError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let registry = tracing_subscriber::registry().with(env_filter);

    let result = match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };
    result.map_err(|e| StartupError::Telemetry(e.to_string()))?;

    tracing::info!(format = ?format, "Tracing initialized");
    Ok(())
}
