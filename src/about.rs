//! Capability descriptor served on `GET /about`.

use crate::action::{Action, EXPERIMENT_FILE_PATH};
use serde::Serialize;

/// Static description of the node for orchestrators.
#[derive(Debug, Clone, Serialize)]
pub struct About {
    /// Module name
    pub name: &'static str,
    /// Instrument model
    pub model: &'static str,
    /// Protocol spoken on the REST surface
    pub interface: &'static str,
    /// Crate version
    pub version: &'static str,
    /// One-line summary
    pub description: &'static str,
    /// Supported actions, in dispatch order
    pub actions: Vec<ActionDescriptor>,
    /// Always empty; the node manages no resources
    pub resource_pools: Vec<String>,
}

/// One supported action.
#[derive(Debug, Clone, Serialize)]
pub struct ActionDescriptor {
    /// Wire name passed as `action_handle`
    pub name: &'static str,
    /// What the action does
    pub description: &'static str,
    /// Arguments read from `action_vars`
    pub args: Vec<ArgDescriptor>,
    /// Uploaded files the action accepts; none
    pub files: Vec<String>,
}

/// One action argument.
#[derive(Debug, Clone, Serialize)]
pub struct ArgDescriptor {
    /// Key in `action_vars`
    pub name: &'static str,
    /// Expected JSON type
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Value used when the argument is absent
    pub default: Option<String>,
    /// Whether the action fails without it
    pub required: bool,
    /// What the argument means
    pub description: &'static str,
}

impl ActionDescriptor {
    fn for_action(action: Action) -> Self {
        let (description, args) = match action {
            Action::CarrierIn => ("Retract the plate carrier into the reader", Vec::new()),
            Action::CarrierOut => ("Extend the plate carrier out of the reader", Vec::new()),
            Action::RunExperiment => (
                "Run an experiment file and return the exported plate results",
                vec![ArgDescriptor {
                    name: EXPERIMENT_FILE_PATH,
                    kind: "str",
                    default: None,
                    required: true,
                    description: "Path of the experiment file on the reader host",
                }],
            ),
        };
        Self {
            name: action.as_str(),
            description,
            args,
            files: Vec::new(),
        }
    }
}

impl About {
    /// Descriptor for this build.
    pub fn describe() -> Self {
        Self {
            name: "epoch2_module",
            model: "BioTek Epoch 2 Plate Reader",
            interface: "wei_rest_node",
            version: env!("CARGO_PKG_VERSION"),
            description: "Module for automating the Epoch 2 platereader.",
            actions: Action::ALL.into_iter().map(ActionDescriptor::for_action).collect(),
            resource_pools: Vec::new(),
        }
    }
}
