//! Custom error types for the node.
//!
//! This module defines the primary error type, `NodeError`, for the whole crate.
//! Using the `thiserror` crate, it gives one consistent way to report the
//! failures that can happen outside of an action handler: loading settings,
//! binding the listener, talking to the instrument at startup, and rejecting
//! requests before they reach the dispatcher.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically a malformed TOML file or
//!   an environment variable that does not deserialize into the expected type.
//! - **`Configuration`**: Semantic errors in settings that parse but are logically
//!   wrong (port 0, a zero poll interval).
//! - **`Io`**: Wraps `std::io::Error`, covering listener and artifact file I/O.
//! - **`Driver`**: Failures reported by the instrument driver outside of an action
//!   (initialisation, shutdown).
//! - **`ModuleBusy`**: The single-flight lock could not be taken.
//! - **`MalformedRequest`**: The transport handed over an action that could not be
//!   parsed. These never touch the module status.
//!
//! Errors raised *inside* an action handler are not `NodeError`s: handlers
//! report expected failures through their `StepResult` and let anything else
//! escape as `anyhow::Error`, which the dispatcher treats as unexpected.

use crate::status::ModuleStatus;
use thiserror::Error;

/// Convenience alias for results using the node error type.
pub type NodeResult<T> = std::result::Result<T, NodeError>;

/// Failures outside an action handler.
#[derive(Error, Debug)]
pub enum NodeError {
    /// Settings could not be extracted.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Settings parsed but failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Listener or artifact file I/O.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Instrument fault during initialisation or shutdown.
    #[error("Instrument driver error: {0}")]
    Driver(String),

    /// The action lock is held, or the module is not IDLE.
    #[error("Couldn't run action because Module Status is currently {0}")]
    ModuleBusy(ModuleStatus),

    /// An action request that could not be parsed.
    #[error("Malformed action request: {0}")]
    MalformedRequest(String),
}

impl NodeError {
    /// Wraps an opaque driver fault, keeping its full context chain.
    pub fn driver(err: anyhow::Error) -> Self {
        NodeError::Driver(format!("{:#}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = NodeError::Driver("reader not responding".to_string());
        assert_eq!(
            err.to_string(),
            "Instrument driver error: reader not responding"
        );
    }

    #[test]
    fn test_busy_error_names_status() {
        let err = NodeError::ModuleBusy(ModuleStatus::Busy);
        assert_eq!(
            err.to_string(),
            "Couldn't run action because Module Status is currently BUSY"
        );
    }

    #[test]
    fn test_driver_error_keeps_context() {
        let err = anyhow::anyhow!("port closed").context("failed to configure reader");
        let err = NodeError::driver(err);
        assert!(err.to_string().contains("failed to configure reader"));
        assert!(err.to_string().contains("port closed"));
    }
}
