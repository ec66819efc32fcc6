//! SeaORM-backed data access for the monitoring engine.
//!
//! The free functions in the sub-modules hold the queries; [`SeaOrmStore`]
//! exposes them through the [`ServiceStore`] trait.

pub mod service_monitor_service;
pub mod settings_service;

use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::DatabaseConnection;

use crate::db::models::{GlobalSettings, MonitoredService, ServiceFilter, ServicePatch};
use crate::db::store::{ServiceStore, StoreError};

#[derive(Clone)]
pub struct SeaOrmStore {
    // Arc keeps the store `Clone` even when sea-orm's `mock` feature
    // (enabled for tests) makes `DatabaseConnection` non-`Clone`.
    db: Arc<DatabaseConnection>,
}

impl SeaOrmStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db: Arc::new(db) }
    }
}

#[async_trait]
impl ServiceStore for SeaOrmStore {
    async fn find_services(
        &self,
        filter: &ServiceFilter,
    ) -> Result<Vec<MonitoredService>, StoreError> {
        service_monitor_service::find_services(&self.db, filter).await
    }

    async fn find_service_by_id(&self, id: i32) -> Result<MonitoredService, StoreError> {
        service_monitor_service::find_service_by_id(&self.db, id).await
    }

    async fn update_service(
        &self,
        id: i32,
        patch: ServicePatch,
    ) -> Result<MonitoredService, StoreError> {
        service_monitor_service::update_service(&self.db, id, patch).await
    }

    async fn find_global_settings(&self) -> Result<GlobalSettings, StoreError> {
        settings_service::get_global_settings(&self.db).await
    }
}
