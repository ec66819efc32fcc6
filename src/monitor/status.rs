//! Maps consecutive failures to a service status and decides when a newly
//! computed status may replace the stored one.

use crate::db::enums::ServiceStatus;
use crate::monitor::probe::CheckResult;

pub fn next_failure_count(previous: i32, result: &CheckResult) -> i32 {
    if result.success {
        0
    } else {
        previous.max(0).saturating_add(1)
    }
}

pub fn status_for_failures(failures: i32, threshold: i32) -> ServiceStatus {
    let threshold = threshold.max(1);
    if failures <= 0 {
        ServiceStatus::Operational
    } else if failures < threshold {
        ServiceStatus::Degraded
    } else {
        ServiceStatus::Major
    }
}

/// The status a check may write, whatever non-maintenance status is stored
/// when the write lands. `None` leaves the stored status as it is.
pub fn gated_status(
    computed: ServiceStatus,
    success: bool,
    failures: i32,
    threshold: i32,
) -> Option<ServiceStatus> {
    (success || failures >= threshold.max(1)).then_some(computed)
}

/// Transition gate.
///
/// A computed status replaces the stored one only when it differs and the
/// check either succeeded or reached the threshold. A service at `major`
/// therefore stays `major` while failing below threshold and only returns to
/// `operational` after a successful check. Maintenance is never replaced.
pub fn should_transition(
    current: ServiceStatus,
    computed: ServiceStatus,
    success: bool,
    failures: i32,
    threshold: i32,
) -> bool {
    if current == ServiceStatus::Maintenance {
        return false;
    }
    computed != current && gated_status(computed, success, failures, threshold).is_some()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub consecutive_failures: i32,
    pub computed_status: ServiceStatus,
    /// `Some` when the status read before the probe must be overwritten.
    pub new_status: Option<ServiceStatus>,
    /// What the check writes. Equals `computed_status` when the gate is open.
    pub write_status: Option<ServiceStatus>,
}

pub fn resolve(
    current: ServiceStatus,
    previous_failures: i32,
    threshold: i32,
    result: &CheckResult,
) -> Resolution {
    let failures = next_failure_count(previous_failures, result);
    let computed = status_for_failures(failures, threshold);
    let new_status = should_transition(current, computed, result.success, failures, threshold)
        .then_some(computed);
    Resolution {
        consecutive_failures: failures,
        computed_status: computed,
        new_status,
        write_status: gated_status(computed, result.success, failures, threshold),
    }
}
