//! Simulated Plate Reader
//!
//! Stands in for the physical Epoch 2 when the node runs with `--simulate`.
//! All timing uses `tokio::time::sleep`, never `std::thread::sleep`, so a
//! simulated carrier move never blocks a runtime worker.
//!
//! # Behaviour
//!
//! - Carrier moves take 500ms
//! - Experiments open from any existing file and always hold one plate
//! - A read stays in progress for a fixed number of polls (default 3)
//! - Exports write a 96-well absorbance table as CSV

use super::{Experiment, Plate, PlateReader, ReadMonitor};
use crate::config::InstrumentSettings;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, info};

const CARRIER_MOVE: Duration = Duration::from_millis(500);
const ROWS: [char; 8] = ['A', 'B', 'C', 'D', 'E', 'F', 'G', 'H'];

/// Position of the plate carrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CarrierPosition {
    /// Retracted inside the reader
    In,
    /// Extended for plate loading
    Out,
}

/// Simulated Epoch 2 reader
pub struct SimulatedPlateReader {
    carrier: Arc<Mutex<CarrierPosition>>,
    initialized: Arc<Mutex<bool>>,
    read_polls: usize,
}

impl SimulatedPlateReader {
    /// Create a reader whose plate reads finish after 3 polls
    pub fn new() -> Self {
        Self::with_read_polls(3)
    }

    /// Create a reader whose plate reads stay in progress for `read_polls` polls
    pub fn with_read_polls(read_polls: usize) -> Self {
        Self {
            carrier: Arc::new(Mutex::new(CarrierPosition::In)),
            initialized: Arc::new(Mutex::new(false)),
            read_polls,
        }
    }

    /// Where the last carrier move left the carrier.
    pub fn carrier_position(&self) -> CarrierPosition {
        *self.carrier.lock()
    }

    async fn move_carrier(&self, target: CarrierPosition) -> Result<()> {
        if !*self.initialized.lock() {
            bail!("SimulatedPlateReader: reader not initialized");
        }
        debug!(?target, "SimulatedPlateReader: moving carrier");
        sleep(CARRIER_MOVE).await;
        *self.carrier.lock() = target;
        Ok(())
    }
}

impl Default for SimulatedPlateReader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlateReader for SimulatedPlateReader {
    async fn initialize(&self, settings: &InstrumentSettings) -> Result<()> {
        info!(
            reader_type = settings.reader_type,
            com_port = settings.com_port,
            baud_rate = settings.baud_rate,
            "SimulatedPlateReader: reader communication OK"
        );
        *self.initialized.lock() = true;
        Ok(())
    }

    async fn carrier_in(&self) -> Result<()> {
        self.move_carrier(CarrierPosition::In).await
    }

    async fn carrier_out(&self) -> Result<()> {
        self.move_carrier(CarrierPosition::Out).await
    }

    async fn open_experiment(&self, path: &Path) -> Result<Box<dyn Experiment>> {
        if !*self.initialized.lock() {
            bail!("SimulatedPlateReader: reader not initialized");
        }
        tokio::fs::metadata(path)
            .await
            .with_context(|| format!("cannot open experiment '{}'", path.display()))?;
        info!(path = %path.display(), "SimulatedPlateReader: experiment opened");
        Ok(Box::new(SimulatedExperiment {
            path: path.to_path_buf(),
            read_polls: self.read_polls,
        }))
    }

    async fn shutdown(&self) -> Result<()> {
        *self.initialized.lock() = false;
        info!("SimulatedPlateReader: disconnected");
        Ok(())
    }
}

struct SimulatedExperiment {
    path: PathBuf,
    read_polls: usize,
}

#[async_trait]
impl Experiment for SimulatedExperiment {
    async fn plate_count(&self) -> Result<usize> {
        Ok(1)
    }

    async fn plate(&self, index: usize) -> Result<Box<dyn Plate>> {
        if index != 1 {
            bail!("plate index {} out of range (1..=1)", index);
        }
        Ok(Box::new(SimulatedPlate {
            read_polls: self.read_polls,
        }))
    }

    async fn close(&self) -> Result<()> {
        debug!(path = %self.path.display(), "SimulatedPlateReader: experiment closed");
        Ok(())
    }
}

struct SimulatedPlate {
    read_polls: usize,
}

impl SimulatedPlate {
    async fn write_table(&self, dest: &Path, header: &str) -> Result<()> {
        let mut csv = format!("{header}\nWell,OD600\n");
        for (r, row) in ROWS.iter().enumerate() {
            for col in 1..=12 {
                let od = 0.05 + 0.01 * (r * 12 + col) as f64;
                let _ = writeln!(csv, "{row}{col},{od:.3}");
            }
        }
        tokio::fs::write(dest, csv)
            .await
            .with_context(|| format!("failed to write export to '{}'", dest.display()))
    }
}

#[async_trait]
impl Plate for SimulatedPlate {
    async fn start_read(&self) -> Result<Option<Box<dyn ReadMonitor>>> {
        info!("SimulatedPlateReader: plate read started");
        Ok(Some(Box::new(SimulatedReadMonitor {
            remaining_polls: Mutex::new(self.read_polls),
        })))
    }

    async fn file_export_names(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn file_export(&self, dest: &Path) -> Result<()> {
        self.write_table(dest, "# simulated export").await
    }

    async fn file_export_ex(&self, export_name: &str, dest: &Path) -> Result<()> {
        self.write_table(dest, &format!("# simulated export: {export_name}"))
            .await
    }
}

struct SimulatedReadMonitor {
    remaining_polls: Mutex<usize>,
}

#[async_trait]
impl ReadMonitor for SimulatedReadMonitor {
    async fn read_in_progress(&self) -> Result<bool> {
        let mut remaining = self.remaining_polls.lock();
        if *remaining == 0 {
            return Ok(false);
        }
        *remaining -= 1;
        Ok(true)
    }

    async fn errors_count(&self) -> Result<usize> {
        Ok(0)
    }

    async fn error_message(&self, index: usize) -> Result<String> {
        bail!("no read error at index {}", index)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
