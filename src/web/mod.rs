use axum::{Router, http::Method, routing::get};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::monitor::MonitorContext;
use crate::monitor::hooks::ServiceChangeHook;
use crate::monitor::host::ContextProvider;
use crate::monitor::jobs::{JobOptions, JobQueue};
use crate::monitor::scheduler::Scheduler;
use crate::web::routes::*;

pub mod error;
pub mod models;
pub mod routes;

pub use error::AppError;

#[derive(Clone)]
pub struct AppState {
    pub monitor: MonitorContext,
    pub scheduler: Arc<Scheduler>,
    /// Enqueue-only: request handlers never drain the job queue themselves.
    pub service_hook: ServiceChangeHook,
}

impl AppState {
    /// Wires the job queue, scheduler and save hook around one context.
    /// Scheduler firings acquire their context from `provider`.
    pub fn new(
        monitor: MonitorContext,
        job_options: JobOptions,
        provider: Arc<dyn ContextProvider>,
        default_schedule: Option<String>,
    ) -> Self {
        let (enqueuer, runner) = JobQueue::new(job_options);
        let scheduler =
            Scheduler::new(Arc::new(runner), provider).with_default_schedule(default_schedule);
        Self {
            monitor,
            scheduler: Arc::new(scheduler),
            service_hook: ServiceChangeHook::new(enqueuer),
        }
    }
}

async fn health_check_handler() -> &'static str {
    "OK"
}

pub fn create_axum_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(vec![Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health_check_handler))
        .nest("/api/monitoring", monitor_routes::create_monitoring_router())
        .nest("/api/services", service_routes::create_service_router())
        .with_state(app_state)
        .layer(cors)
}
