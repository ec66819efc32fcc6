use axum::{
    Json, Router,
    extract::{Path, State},
    routing::put,
};
use std::sync::Arc;
use tracing::info;

use crate::db::{MonitoringUpdate, ServicePatch};
use crate::web::models::MonitoringUpdateResponse;
use crate::web::{AppError, AppState};

pub fn create_service_router() -> Router<Arc<AppState>> {
    Router::new().route("/{id}/monitoring", put(update_monitoring))
}

/// Saves the monitoring configuration of a service. A check is only queued
/// here; it runs at the next scheduled or operator-triggered drain.
#[axum::debug_handler]
async fn update_monitoring(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    Json(payload): Json<MonitoringUpdate>,
) -> Result<Json<MonitoringUpdateResponse>, AppError> {
    payload.validate().map_err(AppError::InvalidInput)?;

    let patch = ServicePatch {
        monitoring: Some(payload),
        ..Default::default()
    };
    let service = app_state.monitor.store.update_service(id, patch).await?;
    let check_queued = app_state.service_hook.on_service_saved(&service);
    info!(service_id = id, check_queued, "Service monitoring configuration updated.");

    Ok(Json(MonitoringUpdateResponse {
        service,
        check_queued,
    }))
}
