//! Logging setup.

use tracing::info;
use tracing_subscriber::{filter::EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, Registry};

use crate::error::{AffinityError, Result};

/// Configuration for log output.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Log level filter used when `RUST_LOG` is unset.
    pub log_level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: false,
        }
    }
}

/// Install the global tracing subscriber.
pub fn init_tracing(config: &TracingConfig) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = Registry::default().with(env_filter);

    let installed = if config.json {
        subscriber
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(true)
                    .json(),
            )
            .try_init()
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .compact(),
            )
            .try_init()
    };
    installed.map_err(|e| AffinityError::Configuration(format!("Failed to install logger: {}", e)))?;

    info!("Tracing initialization completed");
    Ok(())
}
