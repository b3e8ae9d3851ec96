use eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::models::LoggingConfig;

/// Initialize tracing from the `[logging]` config section: JSON lines when
/// `json` is set, compact console output otherwise.
///
/// `RUST_LOG`, when set, takes precedence over the configured level.
pub fn init_tracing_with_config(logging: &LoggingConfig) -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&logging.level)
            .wrap_err_with(|| format!("Invalid log level: {}", logging.level))?,
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    let result = if logging.json {
        Registry::default()
            .with(env_filter)
            .with(fmt_layer.json().with_current_span(true).with_span_list(true))
            .try_init()
    } else {
        Registry::default()
            .with(env_filter)
            .with(fmt_layer.compact().with_ansi(true))
            .try_init()
    };
    result.wrap_err("Failed to install tracing subscriber")?;

    tracing::debug!(level = %logging.level, json = logging.json, "logging initialized");
    Ok(())
}

/// Configure tracing for specific components
pub fn configure_component_tracing(component: &str) -> tracing::Span {
    tracing::info_span!("component", name = component)
}

/// Span covering one intercepted exchange, from resolution to delivery.
pub fn create_exchange_span(transport: &str, method: &str, url: &str) -> tracing::Span {
    tracing::info_span!(
        "exchange",
        transport = transport,
        http.method = method,
        http.url = url,
        http.status_code = tracing::field::Empty,
    )
}
