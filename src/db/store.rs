use async_trait::async_trait;
use sea_orm::DbErr;
use thiserror::Error;

use crate::db::models::{GlobalSettings, MonitoredService, ServiceFilter, ServicePatch};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Service {0} not found")]
    NotFound(i32),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
    #[error("Service {0} is in maintenance")]
    InMaintenance(i32),
}

impl StoreError {
    /// Whether retrying the same call could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Database(_))
    }
}

impl From<DbErr> for StoreError {
    fn from(err: DbErr) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::InvalidRecord(err.to_string())
    }
}

/// Record store for monitored services and global settings.
///
/// The monitoring engine only ever reads records and writes the monitoring
/// sub-fields (and the overall status) of existing ones.
#[async_trait]
pub trait ServiceStore: Send + Sync {
    async fn find_services(&self, filter: &ServiceFilter)
    -> Result<Vec<MonitoredService>, StoreError>;

    async fn find_service_by_id(&self, id: i32) -> Result<MonitoredService, StoreError>;

    /// Applies `patch` in a single write and returns the updated record.
    ///
    /// A patch with `skip_in_maintenance` set fails with
    /// [`StoreError::InMaintenance`] when the stored status is `maintenance`
    /// at write time, and nothing is written.
    async fn update_service(
        &self,
        id: i32,
        patch: ServicePatch,
    ) -> Result<MonitoredService, StoreError>;

    async fn find_global_settings(&self) -> Result<GlobalSettings, StoreError>;
}
