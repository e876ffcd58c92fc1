//! Shared helpers for driving the node over its HTTP surface.

#![allow(dead_code)]

use axum::body::{to_bytes, Body};
use axum::http::{Request, Response};
use epoch2_node::config::Settings;
use epoch2_node::driver::MockPlateReader;
use epoch2_node::{server, Node};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

/// Initialised node over a mock reader, polling every millisecond.
pub async fn test_node(reader: &MockPlateReader, export_dir: &Path) -> Arc<Node> {
    let mut settings = Settings::default();
    settings.experiment.poll_interval = Duration::from_millis(1);
    settings.experiment.export_dir = Some(export_dir.to_path_buf());
    let node = Arc::new(Node::new(settings, Arc::new(reader.clone())));
    node.initialize().await;
    node
}

pub async fn send(node: &Arc<Node>, method: &str, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    server::router(Arc::clone(node))
        .oneshot(request)
        .await
        .unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// `POST /action` URI for a handle and JSON arguments.
pub fn action_uri(handle: &str, vars: Option<&Value>) -> String {
    match vars {
        Some(vars) => format!(
            "/action?action_handle={handle}&action_vars={}",
            percent_encode(&vars.to_string())
        ),
        None => format!("/action?action_handle={handle}"),
    }
}

fn percent_encode(raw: &str) -> String {
    raw.bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (b as char).to_string()
            }
            _ => format!("%{b:02X}"),
        })
        .collect()
}

pub async fn state(node: &Arc<Node>) -> String {
    let value = body_json(send(node, "GET", "/state").await).await;
    value["State"].as_str().unwrap().to_string()
}
