//! HTTP transport for the node.
//!
//! | Route                 | Behaviour                                          |
//! |-----------------------|----------------------------------------------------|
//! | `GET /state`          | `{"State": "<status>"}`, never takes the lock       |
//! | `GET /about`          | capability descriptor                              |
//! | `GET /resources`      | placeholder                                        |
//! | `POST /action`        | run one action, JSON result or streamed artifact   |
//! | `POST /admin/reset`   | ERROR → IDLE, 409 while BUSY                       |
//! | `POST /admin/cancel`  | abort an in-flight plate read                      |
//!
//! Action outcomes are always HTTP 200 with a result body; only the admin
//! routes use status codes.

use crate::about::About;
use crate::action::{ActionQuery, ActionRequest, StepResult};
use crate::error::NodeResult;
use crate::node::Node;
use crate::status::ModuleStatus;
use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

#[derive(Debug, Serialize)]
struct StateResponse {
    #[serde(rename = "State")]
    state: ModuleStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct CancelResponse {
    cancelled: bool,
}

/// Builds the router over a shared node.
pub fn router(node: Arc<Node>) -> Router {
    Router::new()
        .route("/state", get(state))
        .route("/about", get(about))
        .route("/resources", get(resources))
        .route("/action", post(action))
        .route("/admin/reset", post(reset))
        .route("/admin/cancel", post(cancel))
        .layer(TraceLayer::new_for_http())
        .with_state(node)
}

/// Serves until Ctrl-C or SIGTERM, then returns so the caller can shut the
/// instrument down.
pub async fn serve(listener: TcpListener, node: Arc<Node>) -> NodeResult<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "epoch2 node listening");
    axum::serve(listener, router(node))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn state(State(node): State<Arc<Node>>) -> Json<StateResponse> {
    Json(StateResponse {
        state: node.status(),
        error: None,
    })
}

async fn about() -> Json<About> {
    Json(About::describe())
}

async fn resources() -> &'static str {
    "resources"
}

async fn action(
    State(node): State<Arc<Node>>,
    query: Result<Query<ActionQuery>, QueryRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => {
            let reason = rejection.body_text();
            warn!(error = %reason, "unparseable action query");
            return Json(StepResult::failed(format!("Invalid action request: {reason}")))
                .into_response();
        }
    };

    let mut request = match ActionRequest::from_query(&query) {
        Ok(request) => request,
        Err(err) => {
            warn!(error = %err, "malformed action request");
            return Json(StepResult::failed(err.to_string())).into_response();
        }
    };

    // Detached so a client disconnect cannot abort an admitted action.
    let task = tokio::spawn(async move {
        node.handle_action(&mut request).await;
        request
    });

    match task.await {
        Ok(request) => request.render().await,
        Err(err) => {
            error!(error = %err, "action task did not complete");
            Json(StepResult::failed(format!("Step failed: {err}"))).into_response()
        }
    }
}

async fn reset(State(node): State<Arc<Node>>) -> (StatusCode, Json<StateResponse>) {
    match node.reset() {
        Ok(state) => (StatusCode::OK, Json(StateResponse { state, error: None })),
        Err(err) => (
            StatusCode::CONFLICT,
            Json(StateResponse {
                state: node.status(),
                error: Some(err.to_string()),
            }),
        ),
    }
}

async fn cancel(State(node): State<Arc<Node>>) -> Json<CancelResponse> {
    Json(CancelResponse {
        cancelled: node.cancel_action(),
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}
