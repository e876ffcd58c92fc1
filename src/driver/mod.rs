//! Instrument driver capability.
//!
//! The orchestration core only ever talks to the plate reader through the
//! traits in this module. They mirror the layering of the vendor automation
//! API: a [`PlateReader`] opens an [`Experiment`], the experiment hands out
//! [`Plate`]s, and starting a read on a plate yields a [`ReadMonitor`] that is
//! polled until the physical read is finished.
//!
//! All methods return `anyhow::Result`: driver faults are opaque here, and it
//! is up to the caller to decide whether a given fault is an expected
//! operational failure or an unexpected one.
//!
//! # Implementations
//!
//! - [`SimulatedPlateReader`]: in-process simulation used with `--simulate`
//! - [`DisconnectedPlateReader`]: stands in when no hardware driver is linked
//! - [`MockPlateReader`]: scripted test double with a call journal

pub mod mock;
pub mod simulated;

use crate::config::InstrumentSettings;
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

pub use mock::{DriverCall, MockPlateReader};
pub use simulated::SimulatedPlateReader;

/// Top-level handle on the plate reader.
#[async_trait]
pub trait PlateReader: Send + Sync {
    /// Configure the serial reader and test communication.
    async fn initialize(&self, settings: &InstrumentSettings) -> Result<()>;

    /// Retract the plate carrier into the reader.
    async fn carrier_in(&self) -> Result<()>;

    /// Extend the plate carrier out of the reader.
    async fn carrier_out(&self) -> Result<()>;

    /// Open an experiment definition file.
    ///
    /// The returned handle must be closed with [`Experiment::close`].
    async fn open_experiment(&self, path: &Path) -> Result<Box<dyn Experiment>>;

    /// Release the instrument connection.
    async fn shutdown(&self) -> Result<()>;
}

/// An opened experiment definition.
#[async_trait]
pub trait Experiment: Send + Sync {
    /// Number of plates configured in the experiment.
    async fn plate_count(&self) -> Result<usize>;

    /// Plate by 1-based index, as the vendor API numbers them.
    async fn plate(&self, index: usize) -> Result<Box<dyn Plate>>;

    /// Close the experiment, discarding any unsaved state.
    async fn close(&self) -> Result<()>;
}

/// One plate within an experiment.
#[async_trait]
pub trait Plate: Send + Sync {
    /// Start reading the plate. `None` means the reader refused to start.
    async fn start_read(&self) -> Result<Option<Box<dyn ReadMonitor>>>;

    /// Names of the file exports configured in the experiment.
    async fn file_export_names(&self) -> Result<Vec<String>>;

    /// Export results with the default export format.
    async fn file_export(&self, dest: &Path) -> Result<()>;

    /// Export results using a named export definition.
    async fn file_export_ex(&self, export_name: &str, dest: &Path) -> Result<()>;
}

/// Progress and error state of an in-progress plate read.
#[async_trait]
pub trait ReadMonitor: Send + Sync {
    /// Whether the reader is still reading the plate.
    async fn read_in_progress(&self) -> Result<bool>;

    /// Number of errors the read has reported.
    async fn errors_count(&self) -> Result<usize>;

    /// Error message by 0-based index.
    async fn error_message(&self, index: usize) -> Result<String>;
}

/// Builds the driver selected by the instrument settings.
pub fn connect(settings: &InstrumentSettings) -> Arc<dyn PlateReader> {
    if settings.simulate {
        Arc::new(SimulatedPlateReader::new())
    } else {
        Arc::new(DisconnectedPlateReader)
    }
}

/// Reader used when hardware control is requested but this build carries no
/// vendor driver. Every command fails, so initialisation leaves the node in
/// ERROR while the HTTP surface stays reachable.
#[derive(Debug, Default)]
pub struct DisconnectedPlateReader;

const NO_DRIVER: &str = "no hardware driver available in this build; run with --simulate true";

#[async_trait]
impl PlateReader for DisconnectedPlateReader {
    async fn initialize(&self, settings: &InstrumentSettings) -> Result<()> {
        bail!("cannot open reader on COM{}: {}", settings.com_port, NO_DRIVER)
    }

    async fn carrier_in(&self) -> Result<()> {
        bail!(NO_DRIVER)
    }

    async fn carrier_out(&self) -> Result<()> {
        bail!(NO_DRIVER)
    }

    async fn open_experiment(&self, _path: &Path) -> Result<Box<dyn Experiment>> {
        bail!(NO_DRIVER)
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}
