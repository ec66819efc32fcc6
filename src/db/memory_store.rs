//! In-process [`ServiceStore`] backed by a map.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

use crate::db::models::{GlobalSettings, MonitoredService, ServiceFilter, ServicePatch};
use crate::db::store::{ServiceStore, StoreError};

#[derive(Default)]
pub struct MemoryStore {
    services: RwLock<HashMap<i32, MonitoredService>>,
    settings: RwLock<GlobalSettings>,
    unavailable: AtomicBool,
    updates: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_services(services: impl IntoIterator<Item = MonitoredService>) -> Self {
        let map = services.into_iter().map(|s| (s.id, s)).collect();
        Self {
            services: RwLock::new(map),
            ..Default::default()
        }
    }

    pub async fn get(&self, id: i32) -> Option<MonitoredService> {
        self.services.read().await.get(&id).cloned()
    }

    pub async fn set_global_settings(&self, settings: GlobalSettings) {
        *self.settings.write().await = settings;
    }

    /// Makes every call fail with a database error until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of successful `update_service` calls so far.
    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Database("store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ServiceStore for MemoryStore {
    async fn find_services(
        &self,
        filter: &ServiceFilter,
    ) -> Result<Vec<MonitoredService>, StoreError> {
        self.ensure_available()?;
        let services = self.services.read().await;
        let mut found: Vec<MonitoredService> = services
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        found.sort_by_key(|s| s.id);
        Ok(found)
    }

    async fn find_service_by_id(&self, id: i32) -> Result<MonitoredService, StoreError> {
        self.ensure_available()?;
        self.services
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn update_service(
        &self,
        id: i32,
        patch: ServicePatch,
    ) -> Result<MonitoredService, StoreError> {
        self.ensure_available()?;
        let mut services = self.services.write().await;
        let service = services.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if !patch.permits(service) {
            return Err(StoreError::InMaintenance(id));
        }
        patch.apply_to(service);
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(service.clone())
    }

    async fn find_global_settings(&self) -> Result<GlobalSettings, StoreError> {
        self.ensure_available()?;
        Ok(self.settings.read().await.clone())
    }
}
