//! `run_experiment`: open an experiment, read its single plate, export results.
//!
//! # Workflow
//!
//! ```text
//! experiment_file_path ──► open ──► plate count == 1? ──► start read
//!                                                            │
//!                         close ◄── export ◄── no errors ◄── poll until done
//! ```
//!
//! Expected failures (bad argument, unreadable experiment, wrong plate count,
//! refused read, read errors, timeout, cancel, failed export) are written to
//! the request's result and the handler returns `Ok`. Any other driver fault
//! is returned as `Err` for the dispatcher to classify as unexpected.
//!
//! Once opened, the experiment is closed on every path, exactly once.
//!
//! # Export selection
//!
//! With no export configured in the experiment, the default export is written
//! to a fresh `.csv` and its path returned in `action_msg`. Otherwise only the
//! *first* configured export is used, and the result is marked as a file so
//! the transport streams its bytes. Further configured exports are ignored.
//!
//! Default-export files are never streamed, so they accumulate. With
//! `export_retention` set, files this node wrote that are older than the
//! retention are removed before each export.

use super::request::ActionRequest;
use super::result::{StepResult, StepStatus};
use crate::config::ExperimentSettings;
use crate::driver::{Experiment, Plate, PlateReader, ReadMonitor};
use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, warn};

/// Argument naming the experiment definition to run.
pub const EXPERIMENT_FILE_PATH: &str = "experiment_file_path";

const EXPORT_PREFIX: &str = "epoch2-";
const EXPORT_SUFFIX: &str = ".csv";

/// Administrative abort for an in-flight plate read.
///
/// Backed by a generation counter: a waiter only reacts to cancels issued
/// after it subscribed, so a stale cancel never aborts the next action.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    tx: Arc<watch::Sender<u64>>,
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSignal {
    /// Signal with no waiters.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self { tx: Arc::new(tx) }
    }

    /// Registers a waiter; it sees only cancels issued from now on.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.tx.subscribe()
    }

    /// Cancels every current waiter. Returns `false`, and records nothing,
    /// when no plate read is waiting to be cancelled.
    pub fn cancel(&self) -> bool {
        if self.tx.receiver_count() == 0 {
            return false;
        }
        self.tx.send_modify(|generation| *generation += 1);
        true
    }
}

/// How the wait for a plate read ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadWait {
    Completed,
    TimedOut,
    Cancelled,
}

/// Experiment handle that is closed exactly once.
///
/// [`OpenExperiment::close`] consumes the handle. If it is dropped unclosed
/// (a panic unwinding through the workflow), the close is handed to the
/// runtime instead.
struct OpenExperiment {
    inner: Option<Box<dyn Experiment>>,
    path: PathBuf,
}

impl OpenExperiment {
    fn new(inner: Box<dyn Experiment>, path: &Path) -> Self {
        Self {
            inner: Some(inner),
            path: path.to_path_buf(),
        }
    }

    fn handle(&self) -> Option<&dyn Experiment> {
        self.inner.as_deref()
    }

    async fn close(mut self) {
        if let Some(inner) = self.inner.take() {
            match inner.close().await {
                Ok(()) => debug!(path = %self.path.display(), "experiment closed"),
                Err(err) => warn!(
                    path = %self.path.display(),
                    error = %format!("{err:#}"),
                    "failed to close experiment"
                ),
            }
        }
    }
}

impl Drop for OpenExperiment {
    fn drop(&mut self) {
        let Some(inner) = self.inner.take() else {
            return;
        };
        warn!(path = %self.path.display(), "experiment dropped while open; closing in background");
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                if let Err(err) = inner.close().await {
                    warn!(error = %format!("{err:#}"), "background experiment close failed");
                }
            });
        }
    }
}

/// Handler for `run_experiment`.
#[derive(Debug, Clone)]
pub struct ExperimentWorkflow {
    settings: ExperimentSettings,
    cancel: CancelSignal,
}

impl ExperimentWorkflow {
    /// Workflow tuned by `settings`, aborted through `cancel`.
    pub fn new(settings: ExperimentSettings, cancel: CancelSignal) -> Self {
        Self { settings, cancel }
    }

    /// Runs the experiment named by `experiment_file_path`.
    ///
    /// Expected failures are written to `request.result` and return `Ok`.
    pub async fn run(&self, reader: &dyn PlateReader, request: &mut ActionRequest) -> Result<()> {
        let path = match request.required_str(EXPERIMENT_FILE_PATH) {
            Ok(path) => PathBuf::from(path),
            Err(err) => {
                request.result = StepResult::failed(err.to_string());
                return Ok(());
            }
        };
        let cancelled = self.cancel.subscribe();

        let experiment = match reader.open_experiment(&path).await {
            Ok(experiment) => OpenExperiment::new(experiment, &path),
            Err(err) => {
                request.result =
                    StepResult::failed(format!("Failed to open experiment file: {err:#}"));
                return Ok(());
            }
        };
        info!(path = %path.display(), "opened experiment");

        let outcome = match experiment.handle() {
            Some(handle) => self.read_and_export(handle, request, cancelled).await,
            None => Ok(()),
        };
        experiment.close().await;
        outcome
    }

    async fn read_and_export(
        &self,
        experiment: &dyn Experiment,
        request: &mut ActionRequest,
        cancelled: watch::Receiver<u64>,
    ) -> Result<()> {
        let plate_count = experiment.plate_count().await?;
        if plate_count == 0 {
            request.result = StepResult::failed("No plates found in experiment file");
            return Ok(());
        }
        if plate_count > 1 {
            request.result = StepResult::failed(format!(
                "Only one plate per experiment supported, found {plate_count}"
            ));
            return Ok(());
        }

        let plate = experiment.plate(1).await?;
        let Some(monitor) = plate.start_read().await? else {
            request.result = StepResult::failed("Failed to start plate read");
            return Ok(());
        };
        info!("started plate read");

        match self.wait_for_read(monitor.as_ref(), cancelled).await? {
            ReadWait::Completed => {}
            ReadWait::TimedOut => {
                let timeout = self.settings.read_timeout.unwrap_or_default();
                warn!(?timeout, "plate read timed out");
                request.result =
                    StepResult::failed(format!("Plate read timed out after {timeout:?}"));
                return Ok(());
            }
            ReadWait::Cancelled => {
                warn!("plate read cancelled");
                request.result = StepResult::failed("Plate read cancelled");
                return Ok(());
            }
        }

        let errors = monitor.errors_count().await?;
        if errors > 0 {
            let mut result = StepResult::failed("Errors occurred during plate read: ");
            for index in 0..errors {
                let message = monitor.error_message(index).await?;
                warn!(index, %message, "plate read error");
                result.append_log(&message);
            }
            request.result = result;
            return Ok(());
        }
        info!("plate read completed");

        self.export(plate.as_ref(), request).await
    }

    /// Polls until the read finishes, the optional deadline passes, or a cancel arrives.
    async fn wait_for_read(
        &self,
        monitor: &dyn ReadMonitor,
        mut cancelled: watch::Receiver<u64>,
    ) -> Result<ReadWait> {
        // A timeout too large to represent is no deadline at all.
        let deadline = self
            .settings
            .read_timeout
            .and_then(|t| Instant::now().checked_add(t));

        loop {
            if !monitor.read_in_progress().await? {
                return Ok(ReadWait::Completed);
            }

            let expired = async {
                match deadline {
                    Some(deadline) => sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = sleep(self.settings.poll_interval) => {}
                Ok(()) = cancelled.changed() => return Ok(ReadWait::Cancelled),
                _ = expired => return Ok(ReadWait::TimedOut),
            }
        }
    }

    async fn export(&self, plate: &dyn Plate, request: &mut ActionRequest) -> Result<()> {
        let names = plate.file_export_names().await?;

        if let Some(max_age) = self.settings.export_retention {
            let dir = self
                .settings
                .export_dir
                .clone()
                .unwrap_or_else(std::env::temp_dir);
            sweep_exports(&dir, max_age).await;
        }

        let dest = match self.export_path() {
            Ok(dest) => dest,
            Err(err) => {
                request.result =
                    StepResult::failed(format!("Failed to create export file: {err:#}"));
                return Ok(());
            }
        };

        let exported = match names.first() {
            None => {
                debug!(dest = %dest.display(), "no configured file exports, using default export");
                plate.file_export(&dest).await
            }
            Some(first) => {
                if names.len() > 1 {
                    debug!(
                        used = %first,
                        ignored = names.len() - 1,
                        "multiple file exports configured, returning only the first"
                    );
                }
                plate.file_export_ex(first, &dest).await
            }
        };

        if let Err(err) = exported {
            if let Err(remove_err) = tokio::fs::remove_file(&dest).await {
                debug!(dest = %dest.display(), error = %remove_err, "could not remove partial export");
            }
            request.result = StepResult::failed(format!("Failed to export plate results: {err:#}"));
            return Ok(());
        }

        let dest = dest.to_string_lossy().to_string();
        info!(artifact = %dest, "exported plate results");
        if names.is_empty() {
            request.result = StepResult::succeeded(dest);
        } else {
            request.result = StepResult::new(StepStatus::Succeeded, dest.clone(), dest);
            request.result_is_file = true;
        }
        Ok(())
    }

    /// Fresh, persisted `.csv` path for an export.
    fn export_path(&self) -> Result<PathBuf> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(EXPORT_PREFIX).suffix(EXPORT_SUFFIX);
        let file = match &self.settings.export_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        Ok(file.into_temp_path().keep()?)
    }
}

/// Removes export artifacts in `dir` older than `max_age`. Only files named
/// like this node's exports are touched. Returns how many were removed.
async fn sweep_exports(dir: &Path, max_age: Duration) -> usize {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) => {
            debug!(dir = %dir.display(), error = %err, "cannot scan export directory");
            return 0;
        }
    };

    let mut removed = 0;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        if !name.starts_with(EXPORT_PREFIX) || !name.ends_with(EXPORT_SUFFIX) {
            continue;
        }
        let age = match entry.metadata().await.and_then(|m| m.modified()) {
            Ok(modified) => modified.elapsed().unwrap_or_default(),
            Err(_) => continue,
        };
        if age > max_age && tokio::fs::remove_file(entry.path()).await.is_ok() {
            removed += 1;
        }
    }

    if removed > 0 {
        info!(removed, dir = %dir.display(), "removed expired export artifacts");
    }
    removed
}
