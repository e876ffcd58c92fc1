//! Action orchestration: request parsing, dispatch under the action lock,
//! and the handlers themselves.

pub mod carrier;
pub mod dispatcher;
pub mod experiment;
pub mod request;
pub mod result;

pub use dispatcher::{Action, ActionDispatcher, UnknownAction};
pub use experiment::{CancelSignal, ExperimentWorkflow, EXPERIMENT_FILE_PATH};
pub use request::{ActionQuery, ActionRequest, ArgumentError};
pub use result::{StepResult, StepStatus};
