//! Finds eligible services that are due and queues a check for each.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::db::{ServiceFilter, ServiceStore, StoreError};
use crate::monitor::jobs::JobEnqueuer;
use crate::monitor::probe::ProbeInput;

/// A service is due when at least `interval_seconds` have passed since its
/// last executed check. Services never checked are always due.
pub fn is_due(last_checked_at: Option<DateTime<Utc>>, interval_seconds: i32, now: DateTime<Utc>) -> bool {
    match last_checked_at {
        None => true,
        Some(last) => (now - last).num_milliseconds() >= i64::from(interval_seconds) * 1000,
    }
}

/// Whole seconds until the service becomes due, rounded up.
pub fn remaining_wait(
    last_checked_at: Option<DateTime<Utc>>,
    interval_seconds: i32,
    now: DateTime<Utc>,
) -> i64 {
    let Some(last) = last_checked_at else {
        return 0;
    };
    let remaining_ms = i64::from(interval_seconds) * 1000 - (now - last).num_milliseconds();
    if remaining_ms <= 0 {
        0
    } else {
        (remaining_ms + 999) / 1000
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "camelCase")]
pub enum SkipReason {
    Misconfigured { detail: String },
    #[serde(rename_all = "camelCase")]
    TooSoon { remaining_seconds: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedService {
    pub id: i32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedService {
    pub id: i32,
    pub name: String,
    #[serde(flatten)]
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    pub total_eligible: usize,
    pub queued_count: usize,
    pub queued: Vec<QueuedService>,
    pub skipped_count: usize,
    pub skipped: Vec<SkippedService>,
    pub maintenance_count: usize,
}

/// Scans all monitoring-enabled services outside maintenance.
///
/// Checks are only enqueued here; they run when the queue is drained.
pub async fn run_scan(
    store: &dyn ServiceStore,
    enqueuer: &JobEnqueuer,
    now: DateTime<Utc>,
) -> Result<ScanSummary, StoreError> {
    let eligible = store.find_services(&ServiceFilter::eligible()).await?;
    let maintenance_count = store
        .find_services(&ServiceFilter::in_maintenance())
        .await?
        .len();

    let mut summary = ScanSummary {
        total_eligible: eligible.len(),
        maintenance_count,
        ..Default::default()
    };

    for service in eligible {
        let monitoring = &service.monitoring;
        if let Err(issue) = ProbeInput::from_config(monitoring) {
            summary.skipped.push(SkippedService {
                id: service.id,
                name: service.name,
                reason: SkipReason::Misconfigured {
                    detail: issue.to_string(),
                },
            });
            continue;
        }

        if is_due(monitoring.last_checked_at, monitoring.interval_seconds, now) {
            enqueuer.enqueue_check(service.id);
            summary.queued.push(QueuedService {
                id: service.id,
                name: service.name,
            });
        } else {
            let remaining_seconds =
                remaining_wait(monitoring.last_checked_at, monitoring.interval_seconds, now);
            debug!(service_id = service.id, remaining_seconds, "Service not due yet.");
            summary.skipped.push(SkippedService {
                id: service.id,
                name: service.name,
                reason: SkipReason::TooSoon { remaining_seconds },
            });
        }
    }

    summary.queued_count = summary.queued.len();
    summary.skipped_count = summary.skipped.len();
    info!(
        total_eligible = summary.total_eligible,
        queued = summary.queued_count,
        skipped = summary.skipped_count,
        maintenance = summary.maintenance_count,
        "Monitoring scan complete."
    );
    Ok(summary)
}
