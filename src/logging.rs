//! Tracing subscriber setup.
//!
//! `RUST_LOG` wins when set; otherwise the configured `application.log_level`
//! applies to this crate and `warn` to everything else.

use crate::config::{ApplicationSettings, LogFormat};
use crate::error::{NodeError, NodeResult};
use tracing_subscriber::EnvFilter;

/// Filter directives for the configured level.
pub fn filter_for(settings: &ApplicationSettings) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,epoch2_node={level},tower_http={level}",
            level = settings.log_level
        ))
    })
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init(settings: &ApplicationSettings) -> NodeResult<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter_for(settings))
        .with_target(true);

    let installed = match settings.log_format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().with_current_span(true).try_init(),
    };
    installed.map_err(|e| NodeError::Configuration(format!("failed to initialize logging: {e}")))
}
