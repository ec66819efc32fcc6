//! The monitoring engine: probes, status resolution, per-service checks,
//! scans, the job queue and the cron-driven scheduler.

pub mod check_task;
pub mod cron;
pub mod hooks;
pub mod host;
pub mod jobs;
pub mod probe;
pub mod scan;
pub mod scheduler;
pub mod status;

use std::sync::Arc;
use thiserror::Error;

use crate::db::{ServiceStore, StoreError};
use cron::CronError;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Invalid schedule: {0}")]
    Schedule(#[from] CronError),
    #[error("Host context unavailable: {0}")]
    ContextUnavailable(String),
}

/// Everything a scan or check needs from the host application.
#[derive(Clone)]
pub struct MonitorContext {
    pub store: Arc<dyn ServiceStore>,
}

impl MonitorContext {
    pub fn new(store: Arc<dyn ServiceStore>) -> Self {
        Self { store }
    }
}

impl std::fmt::Debug for MonitorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorContext").finish_non_exhaustive()
    }
}
