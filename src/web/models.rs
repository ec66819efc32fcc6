use serde::{Deserialize, Serialize};

use crate::db::MonitoredService;
use crate::monitor::jobs::DrainReport;
use crate::monitor::scan::ScanSummary;
use crate::monitor::scheduler::SchedulerStatus;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStartRequest {
    pub schedule: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStopResponse {
    pub was_running: bool,
    pub status: SchedulerStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResponse {
    pub summary: ScanSummary,
    pub report: DrainReport,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringUpdateResponse {
    pub service: MonitoredService,
    /// Whether a check was queued for the next drain.
    pub check_queued: bool,
}
