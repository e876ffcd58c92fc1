//! REST control node for the BioTek Epoch 2 plate reader.
//!
//! An orchestrator polls `/state` and submits actions to `/action`. At most
//! one action runs at a time: the module status doubles as the action lock
//! (see [`status`]), the [`action::ActionDispatcher`] routes admitted
//! requests to their handlers, and the [`action::ExperimentWorkflow`] drives
//! a plate read from experiment file to exported results.
//!
//! The instrument itself is reached only through the [`driver`] traits.

pub mod about;
pub mod action;
pub mod config;
pub mod driver;
pub mod error;
pub mod logging;
pub mod node;
pub mod server;
pub mod status;

pub use error::{NodeError, NodeResult};
pub use node::Node;
