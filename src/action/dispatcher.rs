//! Routes an action request to its handler under the single-flight lock.
//!
//! Every exit is normalised into the request's [`StepResult`]:
//!
//! | Outcome                      | Result     | Module status after |
//! |------------------------------|------------|---------------------|
//! | unknown action name          | `failed`   | unchanged           |
//! | lock not available           | `failed`   | unchanged           |
//! | handler returned `Ok`        | as written | IDLE                |
//! | handler returned `Err`       | `failed`   | ERROR               |
//! | handler panicked             | `failed`   | ERROR               |
//!
//! The dispatcher never retries and never overwrites a result the handler
//! wrote on the `Ok` path.

use super::carrier;
use super::experiment::ExperimentWorkflow;
use super::request::ActionRequest;
use super::result::StepResult;
use crate::driver::PlateReader;
use crate::status::StatusCell;
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, info_span, warn, Instrument};

/// The closed set of actions this node understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// `carrier_in`
    CarrierIn,
    /// `carrier_out`
    CarrierOut,
    /// `run_experiment`
    RunExperiment,
}

impl Action {
    /// Every supported action, in the order advertised by `/about`.
    pub const ALL: [Action; 3] = [Action::CarrierIn, Action::CarrierOut, Action::RunExperiment];

    /// Name used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::CarrierIn => "carrier_in",
            Action::CarrierOut => "carrier_out",
            Action::RunExperiment => "run_experiment",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action name outside the supported set.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown action: {0}")]
pub struct UnknownAction(pub String);

impl FromStr for Action {
    type Err = UnknownAction;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|action| action.as_str() == name)
            .ok_or_else(|| UnknownAction(name.to_string()))
    }
}

/// Runs admitted actions against the instrument.
pub struct ActionDispatcher {
    reader: Arc<dyn PlateReader>,
    status: StatusCell,
    workflow: ExperimentWorkflow,
}

impl ActionDispatcher {
    /// Dispatcher guarding `reader` with `status` as the action lock.
    pub fn new(reader: Arc<dyn PlateReader>, status: StatusCell, workflow: ExperimentWorkflow) -> Self {
        Self {
            reader,
            status,
            workflow,
        }
    }

    /// Handles one request, leaving its outcome in `request.result`.
    pub async fn handle(&self, request: &mut ActionRequest) {
        let action = match request.name.parse::<Action>() {
            Ok(action) => action,
            Err(err) => {
                warn!(action_id = %request.id, action = %request.name, "rejected unknown action");
                request.result = StepResult::failed(err.to_string());
                return;
            }
        };

        let guard = match self.status.try_acquire() {
            Ok(guard) => guard,
            Err(err) => {
                warn!(action_id = %request.id, %action, "action rejected: {}", err);
                request.result = StepResult::failed(err.to_string());
                return;
            }
        };

        let span = info_span!("action", action_id = %request.id, %action);
        async move {
            info!("action started");
            let outcome = AssertUnwindSafe(self.invoke(action, request))
                .catch_unwind()
                .await;

            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(format!("{err:#}")),
                Err(panic) => Some(panic_message(panic.as_ref())),
            };

            match failure {
                None => {
                    info!(response = %request.result.action_response, "action finished");
                    drop(guard);
                }
                Some(reason) => {
                    error!(%reason, "action failed unexpectedly, module status set to ERROR");
                    request.result = StepResult::failed(format!("Step failed: {reason}"));
                    guard.fault();
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn invoke(&self, action: Action, request: &mut ActionRequest) -> anyhow::Result<()> {
        let reader = self.reader.as_ref();
        match action {
            Action::CarrierIn => carrier::carrier_in(reader, request).await,
            Action::CarrierOut => carrier::carrier_out(reader, request).await,
            Action::RunExperiment => self.workflow.run(reader, request).await,
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panic: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panic: {message}")
    } else {
        "panic with non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::experiment::CancelSignal;
    use crate::action::result::StepStatus;
    use crate::config::ExperimentSettings;
    use crate::driver::{DriverCall, MockPlateReader};
    use crate::status::ModuleStatus;
    use serde_json::Map;
    use tracing_test::traced_test;

    fn dispatcher(reader: &MockPlateReader) -> (ActionDispatcher, StatusCell) {
        let status = StatusCell::new(ModuleStatus::Idle);
        let workflow = ExperimentWorkflow::new(ExperimentSettings::default(), CancelSignal::new());
        (
            ActionDispatcher::new(Arc::new(reader.clone()), status.clone(), workflow),
            status,
        )
    }

    fn request(name: &str) -> ActionRequest {
        ActionRequest::new(name, Map::new()).unwrap()
    }

    #[test]
    fn test_action_names_round_trip() {
        for action in Action::ALL {
            assert_eq!(action.as_str().parse::<Action>(), Ok(action));
        }
        assert_eq!(
            "home".parse::<Action>(),
            Err(UnknownAction("home".to_string()))
        );
    }

    #[tokio::test]
    async fn test_success_returns_to_idle() {
        let reader = MockPlateReader::new();
        let (dispatcher, status) = dispatcher(&reader);

        let mut req = request("carrier_in");
        dispatcher.handle(&mut req).await;

        assert_eq!(req.result, StepResult::succeeded("Moved Carrier In"));
        assert_eq!(status.get(), ModuleStatus::Idle);
    }

    #[tokio::test]
    async fn test_unknown_action_leaves_status_alone() {
        let reader = MockPlateReader::new();
        let (dispatcher, status) = dispatcher(&reader);

        for initial in [ModuleStatus::Idle, ModuleStatus::Error] {
            status.set(initial);
            let mut req = request("home");
            dispatcher.handle(&mut req).await;

            assert_eq!(req.result.action_response, StepStatus::Failed);
            assert!(req.result.action_log.contains("home"));
            assert_eq!(status.get(), initial);
        }
        assert!(reader.journal().is_empty());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_unknown_action_is_logged() {
        let reader = MockPlateReader::new();
        let (dispatcher, _) = dispatcher(&reader);

        let mut req = request("home");
        dispatcher.handle(&mut req).await;

        assert!(logs_contain("rejected unknown action"));
        assert!(logs_contain("home"));
    }

    #[tokio::test]
    async fn test_busy_rejects_without_driver_calls() {
        let reader = MockPlateReader::new();
        let (dispatcher, status) = dispatcher(&reader);
        status.set(ModuleStatus::Busy);

        let mut req = request("carrier_out");
        dispatcher.handle(&mut req).await;

        assert_eq!(req.result.action_response, StepStatus::Failed);
        assert_eq!(
            req.result.action_log,
            "Couldn't run action because Module Status is currently BUSY"
        );
        assert_eq!(status.get(), ModuleStatus::Busy);
        assert!(reader.journal().is_empty());
    }

    #[tokio::test]
    async fn test_handler_error_faults_module() {
        let reader = MockPlateReader::new().with_carrier_error("carrier jammed");
        let (dispatcher, status) = dispatcher(&reader);

        let mut req = request("carrier_in");
        dispatcher.handle(&mut req).await;

        assert_eq!(req.result.action_response, StepStatus::Failed);
        assert_eq!(req.result.action_log, "Step failed: carrier jammed");
        assert_eq!(status.get(), ModuleStatus::Error);

        let mut next = request("carrier_out");
        dispatcher.handle(&mut next).await;
        assert!(next.result.action_log.contains("ERROR"));
        assert_eq!(reader.count(|c| *c == DriverCall::CarrierOut), 0);
    }

    #[tokio::test]
    async fn test_handler_panic_is_caught_and_faults_module() {
        let reader = MockPlateReader::new().panicking_on_carrier();
        let (dispatcher, status) = dispatcher(&reader);

        let mut req = request("carrier_in");
        dispatcher.handle(&mut req).await;

        assert_eq!(req.result.action_response, StepStatus::Failed);
        assert!(req.result.action_log.contains("carrier motor stalled"));
        assert_eq!(status.get(), ModuleStatus::Error);
    }

    #[tokio::test]
    async fn test_expected_failure_does_not_fault_module() {
        let reader = MockPlateReader::new();
        let (dispatcher, status) = dispatcher(&reader);

        let mut req = request("run_experiment");
        dispatcher.handle(&mut req).await;

        assert_eq!(req.result.action_response, StepStatus::Failed);
        assert!(req.result.action_log.contains("experiment_file_path"));
        assert_eq!(status.get(), ModuleStatus::Idle);
        assert!(reader.journal().is_empty());
    }
}
