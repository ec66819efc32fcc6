use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    routing::{get, post},
};
use std::sync::Arc;
use tracing::info;

use crate::monitor::check_task::CheckOutcome;
use crate::monitor::scheduler::SchedulerStatus;
use crate::web::models::{ScanResponse, SchedulerStartRequest, SchedulerStopResponse};
use crate::web::{AppError, AppState};

pub fn create_monitoring_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/scheduler", get(scheduler_status))
        .route("/scheduler/start", post(start_scheduler))
        .route("/scheduler/stop", post(stop_scheduler))
        .route("/scheduler/restart", post(restart_scheduler))
        .route("/scan", post(run_scan))
        .route("/services/{id}/check", post(check_service))
}

/// An empty body means "no explicit schedule".
fn parse_start_request(body: &Bytes) -> Result<SchedulerStartRequest, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(SchedulerStartRequest::default());
    }
    serde_json::from_slice(body).map_err(|e| AppError::InvalidInput(format!("Invalid request body: {e}")))
}

#[axum::debug_handler]
async fn scheduler_status(State(app_state): State<Arc<AppState>>) -> Json<SchedulerStatus> {
    Json(app_state.scheduler.status().await)
}

#[axum::debug_handler]
async fn start_scheduler(
    State(app_state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<SchedulerStatus>, AppError> {
    let request = parse_start_request(&body)?;
    let status = app_state
        .scheduler
        .start(request.schedule.as_deref(), Some(&app_state.monitor))
        .await?;
    Ok(Json(status))
}

#[axum::debug_handler]
async fn stop_scheduler(State(app_state): State<Arc<AppState>>) -> Json<SchedulerStopResponse> {
    let was_running = app_state.scheduler.stop().await;
    Json(SchedulerStopResponse {
        was_running,
        status: app_state.scheduler.status().await,
    })
}

#[axum::debug_handler]
async fn restart_scheduler(
    State(app_state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<SchedulerStatus>, AppError> {
    let request = parse_start_request(&body)?;
    let status = app_state
        .scheduler
        .restart(request.schedule.as_deref(), Some(&app_state.monitor))
        .await?;
    Ok(Json(status))
}

#[axum::debug_handler]
async fn run_scan(State(app_state): State<Arc<AppState>>) -> Result<Json<ScanResponse>, AppError> {
    info!("Operator triggered a monitoring scan.");
    let (summary, report) = app_state
        .scheduler
        .runner()
        .run_scan_now(&app_state.monitor)
        .await?;
    Ok(Json(ScanResponse { summary, report }))
}

#[axum::debug_handler]
async fn check_service(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<Json<CheckOutcome>, AppError> {
    info!(service_id = id, "Operator triggered a service check.");
    let outcome = app_state
        .scheduler
        .runner()
        .run_check_now(&app_state.monitor, id)
        .await?;
    Ok(Json(outcome))
}
