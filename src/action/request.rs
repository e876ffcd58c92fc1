//! Inbound action requests and their rendering back to the transport.

use super::result::StepResult;
use crate::error::{NodeError, NodeResult};
use axum::{
    http::{header, HeaderMap, HeaderName, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Header carrying `action_response` on file results.
pub const HEADER_ACTION_RESPONSE: &str = "x-wei-action_response";
/// Header carrying `action_log` on file results.
pub const HEADER_ACTION_LOG: &str = "x-wei-action_log";
/// Header carrying `action_msg` on file results.
pub const HEADER_ACTION_MSG: &str = "x-wei-action_msg";

/// Query parameters of `POST /action`.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ActionQuery {
    /// Name of the action to run
    pub action_handle: Option<String>,
    /// JSON object, URL-encoded
    pub action_vars: Option<String>,
}

/// Problems with a handler's expected argument.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArgumentError {
    /// Key absent or null
    #[error("Missing required argument '{0}'")]
    Missing(String),

    /// Present with the wrong JSON type
    #[error("Argument '{key}' must be a {expected}")]
    WrongType {
        /// Argument name
        key: String,
        /// Expected JSON type
        expected: &'static str,
    },

    /// Blank string
    #[error("Argument '{0}' must not be empty")]
    Empty(String),
}

/// One inbound action, owned by the request flow until its response is sent.
#[derive(Debug, Clone)]
pub struct ActionRequest {
    /// Correlates log lines of one action
    pub id: Uuid,
    /// Action name as requested
    pub name: String,
    /// Named arguments
    pub args: Map<String, Value>,
    /// Outcome, written by the handler
    pub result: StepResult,
    /// Stream the artifact at `result.action_msg` instead of JSON
    pub result_is_file: bool,
}

impl ActionRequest {
    /// Request with a fresh id. An empty name is malformed.
    pub fn new(name: impl Into<String>, args: Map<String, Value>) -> NodeResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(NodeError::MalformedRequest(
                "Expected an action_handle, but none was provided.".to_string(),
            ));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            name,
            args,
            result: StepResult::default(),
            result_is_file: false,
        })
    }

    /// Builds a request from `action_handle` / `action_vars` query parameters.
    ///
    /// A missing `action_vars` means no arguments; when present it must be a
    /// JSON object.
    pub fn from_query(query: &ActionQuery) -> NodeResult<Self> {
        let name = query.action_handle.as_deref().unwrap_or_default();
        let args = match query.action_vars.as_deref().map(str::trim) {
            None | Some("") => Map::new(),
            Some(raw) => match serde_json::from_str::<Value>(raw) {
                Ok(Value::Object(map)) => map,
                Ok(Value::Null) => Map::new(),
                Ok(other) => {
                    return Err(NodeError::MalformedRequest(format!(
                        "action_vars must be a JSON object, got {}",
                        json_type_name(&other)
                    )))
                }
                Err(err) => {
                    return Err(NodeError::MalformedRequest(format!(
                        "action_vars is not valid JSON: {}",
                        err
                    )))
                }
            },
        };
        Self::new(name, args)
    }

    /// Required, non-empty string argument.
    pub fn required_str(&self, key: &str) -> Result<&str, ArgumentError> {
        match self.args.get(key) {
            None | Some(Value::Null) => Err(ArgumentError::Missing(key.to_string())),
            Some(Value::String(s)) if s.trim().is_empty() => {
                Err(ArgumentError::Empty(key.to_string()))
            }
            Some(Value::String(s)) => Ok(s),
            Some(_) => Err(ArgumentError::WrongType {
                key: key.to_string(),
                expected: "string",
            }),
        }
    }

    /// Renders the result for the transport.
    ///
    /// File results stream the artifact bytes with the result fields in
    /// `x-wei-*` headers. If the artifact cannot be read, a failed JSON
    /// result is sent instead.
    pub async fn render(self) -> Response {
        if !self.result_is_file {
            return Json(self.result).into_response();
        }

        let path = Path::new(&self.result.action_msg);
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                if let Err(err) = tokio::fs::remove_file(path).await {
                    debug!(path = %path.display(), error = %err, "could not remove streamed artifact");
                }
                let mut headers = result_headers(&self.result);
                headers.insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("application/octet-stream"),
                );
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    if let Some(value) = header_value(&format!("attachment; filename=\"{name}\"")) {
                        headers.insert(header::CONTENT_DISPOSITION, value);
                    }
                }
                (headers, bytes).into_response()
            }
            Err(err) => {
                warn!(
                    action_id = %self.id,
                    path = %path.display(),
                    error = %err,
                    "failed to read result artifact"
                );
                Json(StepResult::failed(format!(
                    "Failed to read result file '{}': {}",
                    path.display(),
                    err
                )))
                .into_response()
            }
        }
    }
}

fn result_headers(result: &StepResult) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let fields = [
        (HEADER_ACTION_RESPONSE, result.action_response.as_str()),
        (HEADER_ACTION_LOG, result.action_log.as_str()),
        (HEADER_ACTION_MSG, result.action_msg.as_str()),
    ];
    for (name, value) in fields {
        if let Some(value) = header_value(value) {
            headers.insert(HeaderName::from_static(name), value);
        }
    }
    headers
}

/// Header-safe rendering of free text: anything outside visible ASCII becomes a space.
fn header_value(text: &str) -> Option<HeaderValue> {
    let cleaned: String = text
        .chars()
        .map(|c| if c == ' ' || c.is_ascii_graphic() { c } else { ' ' })
        .collect();
    HeaderValue::from_str(&cleaned).ok()
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
