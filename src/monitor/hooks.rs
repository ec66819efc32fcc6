use tracing::debug;

use crate::db::MonitoredService;
use crate::db::enums::ServiceStatus;
use crate::monitor::jobs::JobEnqueuer;

/// Reacts to service records being saved.
///
/// Holds only the enqueue capability, so a save never waits on a probe.
#[derive(Clone)]
pub struct ServiceChangeHook {
    enqueuer: JobEnqueuer,
}

impl ServiceChangeHook {
    pub fn new(enqueuer: JobEnqueuer) -> Self {
        Self { enqueuer }
    }

    /// Queues a check for a saved service with monitoring enabled. Returns
    /// whether a check was queued.
    pub fn on_service_saved(&self, service: &MonitoredService) -> bool {
        if !service.monitoring.enabled || service.status == ServiceStatus::Maintenance {
            debug!(service_id = service.id, "Saved service is not monitored, nothing to queue.");
            return false;
        }
        self.enqueuer.enqueue_check(service.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MonitoringConfig;
    use crate::monitor::jobs::{JobOptions, JobQueue};

    #[test]
    fn only_monitored_services_are_queued() {
        let (enqueuer, _runner) = JobQueue::new(JobOptions::default());
        let hook = ServiceChangeHook::new(enqueuer.clone());

        let enabled = MonitoredService::new(1, "api", MonitoringConfig::ping("10.0.0.1"));
        let mut disabled = MonitoredService::new(2, "db", MonitoringConfig::ping("10.0.0.2"));
        disabled.monitoring.enabled = false;
        let maintenance = MonitoredService::new(3, "cdn", MonitoringConfig::ping("10.0.0.3"))
            .with_status(ServiceStatus::Maintenance);

        assert!(hook.on_service_saved(&enabled));
        assert!(!hook.on_service_saved(&enabled));
        assert!(!hook.on_service_saved(&disabled));
        assert!(!hook.on_service_saved(&maintenance));
        assert_eq!(enqueuer.pending_checks(), 1);
    }
}
