//! Defines the Axum API routes and handlers.

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tokio::sync::mpsc::Sender;
use tokio::sync::oneshot;

use crate::config::ConfigError;
use crate::print_job::StartRequest;
use crate::printer::MonitorError;
use crate::web::models::{StartResponse, StopResponse};
use crate::web::printer_channel::MonitorRequest;

pub type AppState = Sender<MonitorRequest>;

/// Creates the Axum router with all the API endpoints.
pub fn create_router(monitor_tx: AppState) -> Router {
    Router::new()
        .route("/api/v1/start", post(start_job))
        .route("/api/v1/stop", post(stop_job))
        .route("/api/v1/status", get(get_status))
        .with_state(monitor_tx)
}

fn json_error(message: &str, status: StatusCode) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

fn monitor_error(error: &MonitorError) -> Response {
    let status = match error {
        MonitorError::InvalidRequest(_) | MonitorError::Config(ConfigError::DisallowedJob(_)) => {
            StatusCode::BAD_REQUEST
        }
        MonitorError::Busy(_) => StatusCode::CONFLICT,
        MonitorError::NoJob => StatusCode::NOT_FOUND,
        MonitorError::Gateway(_) => StatusCode::BAD_GATEWAY,
        MonitorError::Config(_) | MonitorError::Control(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    json_error(&error.to_string(), status)
}

/// Send a request to the state machine task and wait for its reply.
async fn ask<T>(monitor_tx: &AppState, build: impl FnOnce(oneshot::Sender<T>) -> MonitorRequest) -> Result<T, Response> {
    let (resp_tx, resp_rx) = oneshot::channel();
    if monitor_tx.send(build(resp_tx)).await.is_err() {
        return Err(json_error("Monitor is not running", StatusCode::SERVICE_UNAVAILABLE));
    }
    resp_rx
        .await
        .map_err(|_| json_error("Monitor dropped the request", StatusCode::INTERNAL_SERVER_ERROR))
}

/// Handler to start a job and begin monitoring it.
async fn start_job(
    State(monitor_tx): State<AppState>,
    payload: Result<Json<StartRequest>, JsonRejection>,
) -> Response {
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return json_error(&rejection.body_text(), StatusCode::BAD_REQUEST),
    };
    let result = ask(&monitor_tx, |respond_to| MonitorRequest::Start {
        request: payload,
        respond_to,
    })
    .await;
    match result {
        Ok(Ok(session)) => Json(StartResponse {
            status: "monitoring",
            session,
        })
        .into_response(),
        Ok(Err(e)) => monitor_error(&e),
        Err(response) => response,
    }
}

async fn stop_job(State(monitor_tx): State<AppState>) -> Response {
    match ask(&monitor_tx, |respond_to| MonitorRequest::Stop { respond_to }).await {
        Ok(Ok(())) => Json(StopResponse { status: "stopped" }).into_response(),
        Ok(Err(e)) => monitor_error(&e),
        Err(response) => response,
    }
}

/// Handler to get the current monitor state.
async fn get_status(State(monitor_tx): State<AppState>) -> Response {
    match ask(&monitor_tx, |respond_to| MonitorRequest::GetStatus { respond_to }).await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(response) => response,
    }
}
