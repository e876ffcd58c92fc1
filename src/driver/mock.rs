//! Scripted plate reader for tests.
//!
//! `MockPlateReader` behaves according to a small script (plate count, read
//! errors, configured exports, injected faults) and records every driver call
//! in a shared journal, so tests can assert exactly what the orchestration
//! core asked the instrument to do.
//!
//! # Example
//!
//! ```rust,ignore
//! let reader = MockPlateReader::new().with_plate_count(2);
//! // ... run an action against `reader` ...
//! assert_eq!(reader.count(|c| matches!(c, DriverCall::CloseExperiment)), 1);
//! assert_eq!(reader.count(|c| matches!(c, DriverCall::StartRead(_))), 0);
//! ```

use super::{Experiment, Plate, PlateReader, ReadMonitor};
use crate::config::InstrumentSettings;
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One recorded driver invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    /// `PlateReader::initialize`
    Initialize,
    /// `PlateReader::carrier_in`
    CarrierIn,
    /// `PlateReader::carrier_out`
    CarrierOut,
    /// `PlateReader::shutdown`
    Shutdown,
    /// `PlateReader::open_experiment` with the requested path
    OpenExperiment(PathBuf),
    /// `Experiment::plate_count`
    PlateCount,
    /// `Experiment::plate` with its 1-based index
    Plate(usize),
    /// `Plate::start_read` on the given plate
    StartRead(usize),
    /// `ReadMonitor::read_in_progress`
    PollRead,
    /// `ReadMonitor::errors_count`
    ErrorsCount,
    /// `ReadMonitor::error_message` with its index
    ErrorMessage(usize),
    /// `Plate::file_export_names`
    FileExportNames,
    /// `Plate::file_export` with its destination
    FileExport(PathBuf),
    /// `Plate::file_export_ex` with export name and destination
    FileExportEx(String, PathBuf),
    /// `Experiment::close`
    CloseExperiment,
}

#[derive(Debug, Clone)]
struct Script {
    plate_count: usize,
    open_error: Option<String>,
    refuse_read: bool,
    polls_until_done: usize,
    read_errors: Vec<String>,
    export_names: Vec<String>,
    export_error: Option<String>,
    carrier_error: Option<String>,
    initialize_error: Option<String>,
    panic_on_carrier: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            plate_count: 1,
            open_error: None,
            refuse_read: false,
            polls_until_done: 0,
            read_errors: Vec::new(),
            export_names: Vec::new(),
            export_error: None,
            carrier_error: None,
            initialize_error: None,
            panic_on_carrier: false,
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    script: Script,
    journal: Mutex<Vec<DriverCall>>,
}

impl Shared {
    fn record(&self, call: DriverCall) {
        self.journal.lock().push(call);
    }
}

/// Scripted plate reader with a call journal.
///
/// Clones share the same journal, so a test can keep one clone for
/// assertions while the node owns another.
#[derive(Debug, Clone, Default)]
pub struct MockPlateReader {
    shared: Arc<Shared>,
}

impl MockPlateReader {
    /// One plate, a read that finishes on the first poll, no errors, no exports.
    pub fn new() -> Self {
        Self::default()
    }

    fn edit(mut self, f: impl FnOnce(&mut Script)) -> Self {
        let mut script = self.shared.script.clone();
        f(&mut script);
        self.shared = Arc::new(Shared {
            script,
            journal: Mutex::new(Vec::new()),
        });
        self
    }

    /// Experiments report this many plates.
    pub fn with_plate_count(self, count: usize) -> Self {
        self.edit(|s| s.plate_count = count)
    }

    /// `open_experiment` fails with this message.
    pub fn with_open_error(self, message: &str) -> Self {
        let message = message.to_string();
        self.edit(|s| s.open_error = Some(message))
    }

    /// `start_read` returns no monitor.
    pub fn refusing_read(self) -> Self {
        self.edit(|s| s.refuse_read = true)
    }

    /// The read reports "in progress" for this many polls. `usize::MAX` never finishes.
    pub fn with_polls_until_done(self, polls: usize) -> Self {
        self.edit(|s| s.polls_until_done = polls)
    }

    /// The finished read reports these errors, in order.
    pub fn with_read_errors(self, errors: &[&str]) -> Self {
        let errors = errors.iter().map(|e| e.to_string()).collect();
        self.edit(|s| s.read_errors = errors)
    }

    /// Exports configured in the experiment.
    pub fn with_export_names(self, names: &[&str]) -> Self {
        let names = names.iter().map(|n| n.to_string()).collect();
        self.edit(|s| s.export_names = names)
    }

    /// Both export calls fail with this message.
    pub fn with_export_error(self, message: &str) -> Self {
        let message = message.to_string();
        self.edit(|s| s.export_error = Some(message))
    }

    /// Carrier commands fail with this message.
    pub fn with_carrier_error(self, message: &str) -> Self {
        let message = message.to_string();
        self.edit(|s| s.carrier_error = Some(message))
    }

    /// Carrier commands panic.
    pub fn panicking_on_carrier(self) -> Self {
        self.edit(|s| s.panic_on_carrier = true)
    }

    /// `initialize` fails with this message.
    pub fn with_initialize_error(self, message: &str) -> Self {
        let message = message.to_string();
        self.edit(|s| s.initialize_error = Some(message))
    }

    /// Snapshot of every call recorded so far.
    pub fn journal(&self) -> Vec<DriverCall> {
        self.shared.journal.lock().clone()
    }

    /// Number of recorded calls matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&DriverCall) -> bool) -> usize {
        self.shared
            .journal
            .lock()
            .iter()
            .filter(|call| predicate(call))
            .count()
    }

    #[allow(clippy::panic)]
    async fn carrier(&self, call: DriverCall) -> Result<()> {
        self.shared.record(call);
        let script = &self.shared.script;
        if script.panic_on_carrier {
            panic!("MockPlateReader: carrier motor stalled");
        }
        match &script.carrier_error {
            Some(message) => Err(anyhow!(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PlateReader for MockPlateReader {
    async fn initialize(&self, _settings: &InstrumentSettings) -> Result<()> {
        self.shared.record(DriverCall::Initialize);
        match &self.shared.script.initialize_error {
            Some(message) => Err(anyhow!(message.clone())),
            None => Ok(()),
        }
    }

    async fn carrier_in(&self) -> Result<()> {
        self.carrier(DriverCall::CarrierIn).await
    }

    async fn carrier_out(&self) -> Result<()> {
        self.carrier(DriverCall::CarrierOut).await
    }

    async fn open_experiment(&self, path: &Path) -> Result<Box<dyn Experiment>> {
        self.shared
            .record(DriverCall::OpenExperiment(path.to_path_buf()));
        if let Some(message) = &self.shared.script.open_error {
            bail!("{}", message);
        }
        Ok(Box::new(MockExperiment {
            shared: Arc::clone(&self.shared),
        }))
    }

    async fn shutdown(&self) -> Result<()> {
        self.shared.record(DriverCall::Shutdown);
        Ok(())
    }
}

struct MockExperiment {
    shared: Arc<Shared>,
}

#[async_trait]
impl Experiment for MockExperiment {
    async fn plate_count(&self) -> Result<usize> {
        self.shared.record(DriverCall::PlateCount);
        Ok(self.shared.script.plate_count)
    }

    async fn plate(&self, index: usize) -> Result<Box<dyn Plate>> {
        self.shared.record(DriverCall::Plate(index));
        if index == 0 || index > self.shared.script.plate_count {
            bail!("plate index {} out of range", index);
        }
        Ok(Box::new(MockPlate {
            index,
            shared: Arc::clone(&self.shared),
        }))
    }

    async fn close(&self) -> Result<()> {
        self.shared.record(DriverCall::CloseExperiment);
        Ok(())
    }
}

struct MockPlate {
    index: usize,
    shared: Arc<Shared>,
}

impl MockPlate {
    async fn export(&self, dest: &Path, label: &str) -> Result<()> {
        if let Some(message) = &self.shared.script.export_error {
            bail!("{}", message);
        }
        tokio::fs::write(dest, format!("mock export: {label}\n")).await?;
        Ok(())
    }
}

#[async_trait]
impl Plate for MockPlate {
    async fn start_read(&self) -> Result<Option<Box<dyn ReadMonitor>>> {
        self.shared.record(DriverCall::StartRead(self.index));
        if self.shared.script.refuse_read {
            return Ok(None);
        }
        Ok(Some(Box::new(MockReadMonitor {
            remaining_polls: Mutex::new(self.shared.script.polls_until_done),
            shared: Arc::clone(&self.shared),
        })))
    }

    async fn file_export_names(&self) -> Result<Vec<String>> {
        self.shared.record(DriverCall::FileExportNames);
        Ok(self.shared.script.export_names.clone())
    }

    async fn file_export(&self, dest: &Path) -> Result<()> {
        self.shared
            .record(DriverCall::FileExport(dest.to_path_buf()));
        self.export(dest, "default").await
    }

    async fn file_export_ex(&self, export_name: &str, dest: &Path) -> Result<()> {
        self.shared.record(DriverCall::FileExportEx(
            export_name.to_string(),
            dest.to_path_buf(),
        ));
        self.export(dest, export_name).await
    }
}

struct MockReadMonitor {
    remaining_polls: Mutex<usize>,
    shared: Arc<Shared>,
}

#[async_trait]
impl ReadMonitor for MockReadMonitor {
    async fn read_in_progress(&self) -> Result<bool> {
        self.shared.record(DriverCall::PollRead);
        let mut remaining = self.remaining_polls.lock();
        if *remaining == 0 {
            return Ok(false);
        }
        if *remaining != usize::MAX {
            *remaining -= 1;
        }
        Ok(true)
    }

    async fn errors_count(&self) -> Result<usize> {
        self.shared.record(DriverCall::ErrorsCount);
        Ok(self.shared.script.read_errors.len())
    }

    async fn error_message(&self, index: usize) -> Result<String> {
        self.shared.record(DriverCall::ErrorMessage(index));
        self.shared
            .script
            .read_errors
            .get(index)
            .cloned()
            .ok_or_else(|| anyhow!("no read error at index {}", index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_journal_shared_between_clones() {
        let reader = MockPlateReader::new();
        let observer = reader.clone();

        reader.carrier_in().await.unwrap();
        reader.carrier_out().await.unwrap();

        assert_eq!(
            observer.journal(),
            vec![DriverCall::CarrierIn, DriverCall::CarrierOut]
        );
    }

    #[tokio::test]
    async fn test_scripted_read_errors() {
        let reader = MockPlateReader::new()
            .with_polls_until_done(1)
            .with_read_errors(&["lid open", "lamp failure"]);

        let experiment = reader.open_experiment(Path::new("a.prt")).await.unwrap();
        let plate = experiment.plate(1).await.unwrap();
        let monitor = plate.start_read().await.unwrap().unwrap();

        assert!(monitor.read_in_progress().await.unwrap());
        assert!(!monitor.read_in_progress().await.unwrap());
        assert_eq!(monitor.errors_count().await.unwrap(), 2);
        assert_eq!(monitor.error_message(1).await.unwrap(), "lamp failure");
        assert!(monitor.error_message(2).await.is_err());
    }

    #[tokio::test]
    async fn test_carrier_error_is_reported() {
        let reader = MockPlateReader::new().with_carrier_error("carrier jammed");
        let err = reader.carrier_in().await.unwrap_err();
        assert_eq!(err.to_string(), "carrier jammed");
        assert_eq!(reader.count(|c| *c == DriverCall::CarrierIn), 1);
    }
}
