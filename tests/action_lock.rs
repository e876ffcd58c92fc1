//! Single-flight behaviour while a long plate read holds the lock.

mod common;

use axum::http::StatusCode;
use common::{action_uri, body_json, send, state, test_node};
use epoch2_node::action::{ActionRequest, StepStatus};
use epoch2_node::config::Settings;
use epoch2_node::driver::{DriverCall, MockPlateReader};
use epoch2_node::status::ModuleStatus;
use epoch2_node::Node;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

fn experiment_vars() -> Value {
    json!({ "experiment_file_path": "C:\\assays\\kinetic.prt" })
}

/// Waits until the mock has been polled `polls` times, i.e. the read is in flight.
async fn wait_for_polls(reader: &MockPlateReader, polls: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while reader.count(|c| *c == DriverCall::PollRead) < polls {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_concurrent_action_rejected_while_busy_then_cancelled() {
    let dir = tempfile::tempdir().unwrap();
    let reader = MockPlateReader::new().with_polls_until_done(usize::MAX);
    let node = test_node(&reader, dir.path()).await;

    let running = {
        let node = Arc::clone(&node);
        let uri = action_uri("run_experiment", Some(&experiment_vars()));
        tokio::spawn(async move { body_json(send(&node, "POST", &uri).await).await })
    };
    wait_for_polls(&reader, 3).await;

    // status reads never wait on the lock
    assert_eq!(state(&node).await, "BUSY");

    let rejected = body_json(send(&node, "POST", &action_uri("carrier_in", None)).await).await;
    assert_eq!(rejected["action_response"], "failed");
    assert_eq!(
        rejected["action_log"],
        "Couldn't run action because Module Status is currently BUSY"
    );
    assert_eq!(reader.count(|c| *c == DriverCall::CarrierIn), 0);

    let reset = send(&node, "POST", "/admin/reset").await;
    assert_eq!(reset.status(), StatusCode::CONFLICT);

    let cancel = body_json(send(&node, "POST", "/admin/cancel").await).await;
    assert_eq!(cancel, json!({ "cancelled": true }));

    let result = running.await.unwrap();
    assert_eq!(result["action_response"], "failed");
    assert_eq!(result["action_log"], "Plate read cancelled");
    assert_eq!(reader.count(|c| *c == DriverCall::CloseExperiment), 1);
    assert_eq!(state(&node).await, "IDLE");
}

#[tokio::test]
async fn test_read_timeout_releases_lock() {
    let dir = tempfile::tempdir().unwrap();
    let reader = MockPlateReader::new().with_polls_until_done(usize::MAX);

    let mut settings = Settings::default();
    settings.experiment.poll_interval = Duration::from_millis(5);
    settings.experiment.read_timeout = Some(Duration::from_millis(50));
    settings.experiment.export_dir = Some(dir.path().to_path_buf());
    let node = Node::new(settings, Arc::new(reader.clone()));
    node.initialize().await;

    let Value::Object(args) = experiment_vars() else {
        unreachable!()
    };
    let mut request = ActionRequest::new("run_experiment", args).unwrap();
    node.handle_action(&mut request).await;

    assert_eq!(request.result.action_response, StepStatus::Failed);
    assert!(request.result.action_log.contains("timed out"));
    assert_eq!(reader.count(|c| *c == DriverCall::CloseExperiment), 1);
    assert_eq!(node.status(), ModuleStatus::Idle);
}

#[tokio::test]
async fn test_wrong_plate_count_never_starts_read() {
    let dir = tempfile::tempdir().unwrap();

    for plates in [0, 2] {
        let reader = MockPlateReader::new().with_plate_count(plates);
        let node = test_node(&reader, dir.path()).await;

        let uri = action_uri("run_experiment", Some(&experiment_vars()));
        let result = body_json(send(&node, "POST", &uri).await).await;

        assert_eq!(result["action_response"], "failed");
        assert_eq!(reader.count(|c| matches!(c, DriverCall::StartRead(_))), 0);
        assert_eq!(reader.count(|c| *c == DriverCall::CloseExperiment), 1);
        assert_eq!(state(&node).await, "IDLE");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_requests_never_overlap() {
    let dir = tempfile::tempdir().unwrap();
    let reader = MockPlateReader::new().with_polls_until_done(20);
    let node = test_node(&reader, dir.path()).await;

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let node = Arc::clone(&node);
            tokio::spawn(async move {
                let Value::Object(args) = experiment_vars() else {
                    unreachable!()
                };
                let mut request = ActionRequest::new("run_experiment", args).unwrap();
                node.handle_action(&mut request).await;
                request.result
            })
        })
        .collect();

    let mut succeeded = 0;
    for task in tasks {
        let result = task.await.unwrap();
        if result.action_response == StepStatus::Succeeded {
            succeeded += 1;
        } else {
            assert!(result.action_log.contains("Module Status is currently BUSY"));
        }
    }

    assert!(succeeded >= 1);
    assert_eq!(
        reader.count(|c| matches!(c, DriverCall::OpenExperiment(_))),
        succeeded
    );
    assert_eq!(node.status(), ModuleStatus::Idle);

    // every open is closed before the next one
    let mut open = false;
    for call in reader.journal() {
        match call {
            DriverCall::OpenExperiment(_) => {
                assert!(!open, "two experiments open at once");
                open = true;
            }
            DriverCall::CloseExperiment => open = false,
            _ => {}
        }
    }
}
