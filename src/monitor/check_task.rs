//! Checks a single service: load, probe, resolve, persist.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Serialize, Serializer};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::db::enums::ServiceStatus;
use crate::db::{ServicePatch, ServiceStore, StoreError};
use crate::monitor::probe::{self, CheckResult, ProbeInput};
use crate::monitor::status;

/// Per-service async mutexes so checks of one record never interleave.
///
/// An entry lives only while a check holds or waits for it.
#[derive(Clone, Default)]
pub struct ServiceLocks {
    locks: Arc<DashMap<i32, Arc<Mutex<()>>>>,
}

impl ServiceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, service_id: i32) -> ServiceLockGuard {
        let lock = self
            .locks
            .entry(service_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;
        ServiceLockGuard {
            locks: self.locks.clone(),
            service_id,
            guard: Some(guard),
        }
    }

    /// Number of services with a check holding or waiting for their lock.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

pub struct ServiceLockGuard {
    locks: Arc<DashMap<i32, Arc<Mutex<()>>>>,
    service_id: i32,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ServiceLockGuard {
    fn drop(&mut self) {
        self.guard.take();
        // A count of one means only the map refers to the mutex.
        self.locks
            .remove_if(&self.service_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckReport {
    pub service_id: i32,
    pub service_name: String,
    pub result: CheckResult,
    pub previous_status: ServiceStatus,
    /// Status derived from the failure count, before the transition gate.
    pub computed_status: ServiceStatus,
    pub status: ServiceStatus,
    pub consecutive_failures: i32,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum CheckOutcome {
    Checked(CheckReport),
    NotEnabled { service_id: i32 },
    Misconfigured { service_id: i32, reason: String },
    InMaintenance { service_id: i32 },
    StoreFailure {
        #[serde(serialize_with = "serialize_display")]
        error: StoreError,
    },
}

impl CheckOutcome {
    /// The store error, if the check failed on infrastructure.
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            CheckOutcome::StoreFailure { error } => Some(error),
            _ => None,
        }
    }
}

fn serialize_display<S: Serializer>(error: &StoreError, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

/// Runs one check for `service_id` and persists the outcome in a single
/// update. Never returns an error: store problems come back as
/// [`CheckOutcome::StoreFailure`].
pub async fn check_service(
    store: &dyn ServiceStore,
    locks: &ServiceLocks,
    service_id: i32,
) -> CheckOutcome {
    let _guard = locks.acquire(service_id).await;

    let service = match store.find_service_by_id(service_id).await {
        Ok(service) => service,
        Err(error) => {
            warn!(service_id, error = %error, "Failed to load service for check.");
            return CheckOutcome::StoreFailure { error };
        }
    };

    if service.status == ServiceStatus::Maintenance {
        debug!(service_id, "Service is in maintenance, skipping check.");
        return CheckOutcome::InMaintenance { service_id };
    }
    if !service.monitoring.enabled {
        debug!(service_id, "Monitoring is not enabled for service.");
        return CheckOutcome::NotEnabled { service_id };
    }

    let input = match ProbeInput::from_config(&service.monitoring) {
        Ok(input) => input,
        Err(issue) => {
            warn!(service_id, reason = %issue, "Service monitoring is misconfigured.");
            return CheckOutcome::Misconfigured {
                service_id,
                reason: issue.to_string(),
            };
        }
    };

    let result = probe::probe(&input).await;
    let resolution = status::resolve(
        service.status,
        service.monitoring.consecutive_failures,
        service.monitoring.failure_threshold,
        &result,
    );
    let checked_at = Utc::now();
    // The record may have changed while the probe ran. The store refuses the
    // write if it is now in maintenance, and the gated status does not
    // depend on the status read above.
    let patch = ServicePatch::check_result(
        resolution.write_status,
        checked_at,
        result.success,
        resolution.consecutive_failures,
    );

    let updated = match store.update_service(service_id, patch).await {
        Ok(updated) => updated,
        Err(StoreError::InMaintenance(_)) => {
            debug!(service_id, "Service entered maintenance during check, result discarded.");
            return CheckOutcome::InMaintenance { service_id };
        }
        Err(error) => {
            warn!(service_id, error = %error, "Failed to persist check result.");
            return CheckOutcome::StoreFailure { error };
        }
    };

    if updated.status != service.status {
        info!(
            service_id,
            service = %service.name,
            from = %service.status,
            to = %updated.status,
            consecutive_failures = resolution.consecutive_failures,
            "Service status changed."
        );
    } else {
        debug!(
            service_id,
            success = result.success,
            consecutive_failures = resolution.consecutive_failures,
            error = result.error.as_deref().unwrap_or(""),
            "Service checked."
        );
    }

    CheckOutcome::Checked(CheckReport {
        service_id,
        service_name: updated.name,
        result,
        previous_status: service.status,
        computed_status: resolution.computed_status,
        status: updated.status,
        consecutive_failures: resolution.consecutive_failures,
        checked_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::enums::CheckStatus;
    use crate::db::{MemoryStore, MonitoredService, MonitoringConfig, MonitoringUpdate};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn http_server(status_line: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    let response =
                        format!("HTTP/1.1 {status_line}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
                    let _ = socket.write_all(response.as_bytes()).await;
                });
            }
        });
        port
    }

    /// Answers every request with `status_line` after moving the stored
    /// service to `status_during_check`.
    async fn http_server_changing_status(
        store: Arc<MemoryStore>,
        service_id: i32,
        status_during_check: ServiceStatus,
        status_line: &'static str,
    ) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let patch = ServicePatch {
                    status: Some(status_during_check),
                    ..Default::default()
                };
                store.update_service(service_id, patch).await.unwrap();
                let response =
                    format!("HTTP/1.1 {status_line}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        port
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn healthy_http_service_stays_operational() {
        let port = http_server("200 OK").await;
        let store = MemoryStore::with_services([MonitoredService::new(
            1,
            "web",
            MonitoringConfig::http(format!("http://127.0.0.1:{port}/health")),
        )]);

        let outcome = check_service(&store, &ServiceLocks::new(), 1).await;
        let report = match outcome {
            CheckOutcome::Checked(report) => report,
            other => panic!("expected a check, got {other:?}"),
        };
        assert!(report.result.success);
        assert_eq!(report.result.status_code, Some(200));
        assert_eq!(report.status, ServiceStatus::Operational);

        let stored = store.get(1).await.unwrap();
        assert_eq!(stored.monitoring.consecutive_failures, 0);
        assert_eq!(stored.monitoring.last_check_status, CheckStatus::Success);
        assert!(stored.monitoring.last_checked_at.is_some());
        assert_eq!(store.update_count(), 1);
    }

    #[tokio::test]
    async fn hanging_endpoint_counts_one_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        let mut config = MonitoringConfig::http(format!("http://127.0.0.1:{port}/slow"));
        config.timeout_seconds = 5;
        let store = MemoryStore::with_services([MonitoredService::new(4, "slow", config)]);

        let outcome = check_service(&store, &ServiceLocks::new(), 4).await;
        let report = match outcome {
            CheckOutcome::Checked(report) => report,
            other => panic!("expected a check, got {other:?}"),
        };
        assert_eq!(report.result.error.as_deref(), Some("Request timeout after 5000ms"));
        assert_eq!(report.consecutive_failures, 1);
        assert_eq!(report.computed_status, ServiceStatus::Degraded);
        assert_eq!(
            store.get(4).await.unwrap().monitoring.last_check_status,
            CheckStatus::Failed
        );
    }

    #[tokio::test]
    async fn repeated_failures_escalate_to_major_and_keep_counting() {
        let port = closed_port().await;
        let mut config = MonitoringConfig::tcp("127.0.0.1", port);
        config.timeout_seconds = 1;
        let store = MemoryStore::with_services([MonitoredService::new(7, "db", config)]);
        let locks = ServiceLocks::new();

        let mut statuses = Vec::new();
        for _ in 0..4 {
            check_service(&store, &locks, 7).await;
            let stored = store.get(7).await.unwrap();
            statuses.push((stored.status, stored.monitoring.consecutive_failures));
        }

        // The first two failures stay below threshold, so the gate holds the
        // stored status.
        assert_eq!(
            statuses,
            vec![
                (ServiceStatus::Operational, 1),
                (ServiceStatus::Operational, 2),
                (ServiceStatus::Major, 3),
                (ServiceStatus::Major, 4),
            ]
        );
    }

    #[tokio::test]
    async fn success_clears_major() {
        let port = http_server("200 OK").await;
        let mut service = MonitoredService::new(
            3,
            "api",
            MonitoringConfig::http(format!("http://127.0.0.1:{port}/")),
        )
        .with_status(ServiceStatus::Major);
        service.monitoring.consecutive_failures = 5;
        let store = MemoryStore::with_services([service]);

        check_service(&store, &ServiceLocks::new(), 3).await;

        let stored = store.get(3).await.unwrap();
        assert_eq!(stored.status, ServiceStatus::Operational);
        assert_eq!(stored.monitoring.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn maintenance_service_is_not_touched() {
        let service = MonitoredService::new(2, "cdn", MonitoringConfig::ping("127.0.0.1"))
            .with_status(ServiceStatus::Maintenance);
        let store = MemoryStore::with_services([service.clone()]);

        let outcome = check_service(&store, &ServiceLocks::new(), 2).await;
        assert_eq!(outcome, CheckOutcome::InMaintenance { service_id: 2 });
        assert_eq!(store.get(2).await.unwrap(), service);
        assert_eq!(store.update_count(), 0);
    }

    #[tokio::test]
    async fn maintenance_set_during_check_is_preserved() {
        let store = Arc::new(MemoryStore::with_services([MonitoredService::new(
            1,
            "web",
            MonitoringConfig::http("http://127.0.0.1:1/"),
        )]));
        let port = http_server_changing_status(
            store.clone(),
            1,
            ServiceStatus::Maintenance,
            "500 Internal Server Error",
        )
        .await;
        let patch = ServicePatch {
            monitoring: Some(MonitoringUpdate {
                url: Some(format!("http://127.0.0.1:{port}/")),
                failure_threshold: Some(1),
                ..Default::default()
            }),
            ..Default::default()
        };
        store.update_service(1, patch).await.unwrap();

        let outcome = check_service(store.as_ref(), &ServiceLocks::new(), 1).await;
        assert_eq!(outcome, CheckOutcome::InMaintenance { service_id: 1 });

        let stored = store.get(1).await.unwrap();
        assert_eq!(stored.status, ServiceStatus::Maintenance);
        assert_eq!(stored.monitoring.consecutive_failures, 0);
        assert!(stored.monitoring.last_checked_at.is_none());
        assert_eq!(stored.monitoring.last_check_status, CheckStatus::Pending);
    }

    #[tokio::test]
    async fn success_restores_operational_after_concurrent_status_change() {
        let store = Arc::new(MemoryStore::with_services([MonitoredService::new(
            1,
            "web",
            MonitoringConfig::http("http://127.0.0.1:1/"),
        )]));
        let port =
            http_server_changing_status(store.clone(), 1, ServiceStatus::Degraded, "200 OK").await;
        let patch = ServicePatch {
            monitoring: Some(MonitoringUpdate {
                url: Some(format!("http://127.0.0.1:{port}/")),
                ..Default::default()
            }),
            ..Default::default()
        };
        store.update_service(1, patch).await.unwrap();

        let report = match check_service(store.as_ref(), &ServiceLocks::new(), 1).await {
            CheckOutcome::Checked(report) => report,
            other => panic!("expected a check, got {other:?}"),
        };
        assert_eq!(report.status, ServiceStatus::Operational);
        assert_eq!(store.get(1).await.unwrap().status, ServiceStatus::Operational);
    }

    #[tokio::test]
    async fn lock_entries_are_released_after_checks() {
        let port = closed_port().await;
        let mut config = MonitoringConfig::tcp("127.0.0.1", port);
        config.timeout_seconds = 1;
        let store = Arc::new(MemoryStore::with_services([MonitoredService::new(8, "db", config)]));
        let locks = ServiceLocks::new();

        let held = locks.acquire(8).await;
        let waiting = tokio::spawn({
            let store = store.clone();
            let locks = locks.clone();
            async move { check_service(store.as_ref(), &locks, 8).await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(locks.len(), 1);
        assert!(store.get(8).await.unwrap().monitoring.last_checked_at.is_none());

        drop(held);
        assert!(matches!(waiting.await.unwrap(), CheckOutcome::Checked(_)));
        assert!(locks.is_empty());

        check_service(store.as_ref(), &locks, 8).await;
        check_service(store.as_ref(), &locks, 99).await;
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn disabled_and_misconfigured_services_are_not_probed() {
        let mut disabled = MonitoredService::new(1, "a", MonitoringConfig::ping("127.0.0.1"));
        disabled.monitoring.enabled = false;
        let mut missing_host = MonitoredService::new(2, "b", MonitoringConfig::tcp("x", 80));
        missing_host.monitoring.host = None;
        let store = MemoryStore::with_services([disabled, missing_host]);
        let locks = ServiceLocks::new();

        assert_eq!(
            check_service(&store, &locks, 1).await,
            CheckOutcome::NotEnabled { service_id: 1 }
        );
        assert!(matches!(
            check_service(&store, &locks, 2).await,
            CheckOutcome::Misconfigured { service_id: 2, .. }
        ));
        assert_eq!(store.update_count(), 0);
        assert!(store.get(2).await.unwrap().monitoring.last_checked_at.is_none());
    }

    #[tokio::test]
    async fn store_errors_become_outcomes() {
        let store = MemoryStore::new();
        let outcome = check_service(&store, &ServiceLocks::new(), 99).await;
        assert_eq!(outcome.store_error(), Some(&StoreError::NotFound(99)));

        store.set_unavailable(true);
        let outcome = check_service(&store, &ServiceLocks::new(), 99).await;
        assert!(outcome.store_error().is_some_and(StoreError::is_retryable));
    }
}
