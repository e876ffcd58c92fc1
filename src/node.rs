//! The node: one instrument, one status cell, one dispatcher.
//!
//! A `Node` is built once at startup and shared (behind an `Arc`) by every
//! HTTP handler. Status reads never touch the action lock, so `/state` stays
//! responsive while a long plate read holds BUSY.

use crate::action::{ActionDispatcher, ActionRequest, CancelSignal, ExperimentWorkflow};
use crate::config::Settings;
use crate::driver::PlateReader;
use crate::error::{NodeError, NodeResult};
use crate::status::{ModuleStatus, StatusCell};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Shared state of a running node.
pub struct Node {
    settings: Settings,
    status: StatusCell,
    reader: Arc<dyn PlateReader>,
    dispatcher: ActionDispatcher,
    cancel: CancelSignal,
}

impl Node {
    /// Builds a node in INIT; call [`Node::initialize`] before serving actions.
    pub fn new(settings: Settings, reader: Arc<dyn PlateReader>) -> Self {
        let status = StatusCell::new(ModuleStatus::Init);
        let cancel = CancelSignal::new();
        let workflow = ExperimentWorkflow::new(settings.experiment.clone(), cancel.clone());
        let dispatcher = ActionDispatcher::new(Arc::clone(&reader), status.clone(), workflow);
        Self {
            settings,
            status,
            reader,
            dispatcher,
            cancel,
        }
    }

    /// Settings the node was built with.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Current module status, read without taking the action lock.
    pub fn status(&self) -> ModuleStatus {
        self.status.get()
    }

    /// Connects the instrument: INIT → IDLE, or INIT → ERROR on failure.
    ///
    /// A failed initialisation is logged and reflected in the status, but the
    /// node stays up so `/state` and `/about` remain reachable.
    pub async fn initialize(&self) -> ModuleStatus {
        let instrument = &self.settings.instrument;
        info!(
            simulate = instrument.simulate,
            com_port = instrument.com_port,
            reader_type = instrument.reader_type,
            "initializing plate reader"
        );
        match self.reader.initialize(instrument).await {
            Ok(()) => {
                self.status.compare_and_set(ModuleStatus::Init, ModuleStatus::Idle);
                info!("plate reader ready");
            }
            Err(err) => {
                error!(error = %NodeError::driver(err), "plate reader initialization failed");
                self.status.set(ModuleStatus::Error);
            }
        }
        self.status.get()
    }

    /// Runs one action to completion; the outcome is in `request.result`.
    pub async fn handle_action(&self, request: &mut ActionRequest) {
        self.dispatcher.handle(request).await;
    }

    /// Signals an in-flight plate read to abort. Returns `false` when no
    /// plate read is waiting, including while a carrier move holds BUSY.
    pub fn cancel_action(&self) -> bool {
        let cancelled = self.cancel.cancel();
        if cancelled {
            warn!("cancel requested for in-flight plate read");
        }
        cancelled
    }

    /// Administrative recovery to IDLE. Refused while an action is running.
    pub fn reset(&self) -> NodeResult<ModuleStatus> {
        self.status.reset()
    }

    /// Releases the instrument connection.
    pub async fn shutdown(&self) -> NodeResult<()> {
        info!("shutting down plate reader");
        self.reader.shutdown().await.map_err(NodeError::driver)
    }
}
