//! Domain records exchanged with the record store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::entities::service;
use crate::db::enums::{CheckStatus, ServiceStatus};

pub const MIN_INTERVAL_SECONDS: i32 = 30;
pub const DEFAULT_INTERVAL_SECONDS: i32 = 60;
pub const DEFAULT_TIMEOUT_SECONDS: i32 = 10;
pub const DEFAULT_FAILURE_THRESHOLD: i32 = 3;

/// Monitoring sub-fields embedded in a service record.
///
/// `monitor_type` selects which of the type-specific fields are meaningful.
/// The check-state fields at the bottom are written only by the check task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringConfig {
    #[serde(rename = "type")]
    pub monitor_type: String,
    pub enabled: bool,
    pub interval_seconds: i32,
    pub timeout_seconds: i32,
    pub failure_threshold: i32,
    pub url: Option<String>,
    pub method: Option<String>,
    pub expected_status_code: Option<i32>,
    pub host: Option<String>,
    pub port: Option<i32>,
    pub game_protocol: Option<String>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_check_status: CheckStatus,
    pub consecutive_failures: i32,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            monitor_type: "http".to_string(),
            enabled: false,
            interval_seconds: DEFAULT_INTERVAL_SECONDS,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            url: None,
            method: None,
            expected_status_code: None,
            host: None,
            port: None,
            game_protocol: None,
            last_checked_at: None,
            last_check_status: CheckStatus::Pending,
            consecutive_failures: 0,
        }
    }
}

impl MonitoringConfig {
    /// Enabled HTTP monitor expecting a `200` from a `GET`.
    pub fn http(url: impl Into<String>) -> Self {
        Self {
            monitor_type: "http".to_string(),
            enabled: true,
            url: Some(url.into()),
            method: Some("GET".to_string()),
            expected_status_code: Some(200),
            ..Default::default()
        }
    }

    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            monitor_type: "tcp".to_string(),
            enabled: true,
            host: Some(host.into()),
            port: Some(i32::from(port)),
            ..Default::default()
        }
    }

    pub fn ping(host: impl Into<String>) -> Self {
        Self {
            monitor_type: "ping".to_string(),
            enabled: true,
            host: Some(host.into()),
            ..Default::default()
        }
    }

    pub fn game_query(host: impl Into<String>, port: u16, protocol: impl Into<String>) -> Self {
        Self {
            monitor_type: "game-query".to_string(),
            enabled: true,
            host: Some(host.into()),
            port: Some(i32::from(port)),
            game_protocol: Some(protocol.into()),
            ..Default::default()
        }
    }
}

/// A monitored service as seen by the monitoring engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoredService {
    pub id: i32,
    pub name: String,
    pub status: ServiceStatus,
    pub monitoring: MonitoringConfig,
}

impl MonitoredService {
    pub fn new(id: i32, name: impl Into<String>, monitoring: MonitoringConfig) -> Self {
        Self {
            id,
            name: name.into(),
            status: ServiceStatus::Operational,
            monitoring,
        }
    }

    pub fn with_status(mut self, status: ServiceStatus) -> Self {
        self.status = status;
        self
    }
}

impl From<service::Model> for MonitoredService {
    fn from(model: service::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            status: model.status,
            monitoring: MonitoringConfig {
                monitor_type: model.monitor_type,
                enabled: model.monitor_enabled,
                interval_seconds: model.monitor_interval_seconds,
                timeout_seconds: model.monitor_timeout_seconds,
                failure_threshold: model.monitor_failure_threshold,
                url: model.monitor_url,
                method: model.monitor_method,
                expected_status_code: model.monitor_expected_status_code,
                host: model.monitor_host,
                port: model.monitor_port,
                game_protocol: model.monitor_game_protocol,
                last_checked_at: model.last_checked_at,
                last_check_status: model.last_check_status,
                consecutive_failures: model.consecutive_failures,
            },
        }
    }
}

/// Operator-editable monitoring fields. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringUpdate {
    #[serde(rename = "type")]
    pub monitor_type: Option<String>,
    pub enabled: Option<bool>,
    pub interval_seconds: Option<i32>,
    pub timeout_seconds: Option<i32>,
    pub failure_threshold: Option<i32>,
    pub url: Option<String>,
    pub method: Option<String>,
    pub expected_status_code: Option<i32>,
    pub host: Option<String>,
    pub port: Option<i32>,
    pub game_protocol: Option<String>,
}

impl MonitoringUpdate {
    pub fn validate(&self) -> Result<(), String> {
        if let Some(interval) = self.interval_seconds {
            if interval < MIN_INTERVAL_SECONDS {
                return Err(format!(
                    "intervalSeconds must be at least {MIN_INTERVAL_SECONDS}, got {interval}"
                ));
            }
        }
        if let Some(threshold) = self.failure_threshold {
            if threshold < 1 {
                return Err(format!("failureThreshold must be at least 1, got {threshold}"));
            }
        }
        if let Some(timeout) = self.timeout_seconds {
            if timeout < 1 {
                return Err(format!("timeoutSeconds must be at least 1, got {timeout}"));
            }
        }
        if let Some(port) = self.port {
            if !(1..=65535).contains(&port) {
                return Err(format!("port must be between 1 and 65535, got {port}"));
            }
        }
        Ok(())
    }

    pub fn apply_to(&self, config: &mut MonitoringConfig) {
        if let Some(monitor_type) = &self.monitor_type {
            config.monitor_type = monitor_type.clone();
        }
        if let Some(enabled) = self.enabled {
            config.enabled = enabled;
        }
        if let Some(interval) = self.interval_seconds {
            config.interval_seconds = interval;
        }
        if let Some(timeout) = self.timeout_seconds {
            config.timeout_seconds = timeout;
        }
        if let Some(threshold) = self.failure_threshold {
            config.failure_threshold = threshold;
        }
        if self.url.is_some() {
            config.url = self.url.clone();
        }
        if self.method.is_some() {
            config.method = self.method.clone();
        }
        if self.expected_status_code.is_some() {
            config.expected_status_code = self.expected_status_code;
        }
        if self.host.is_some() {
            config.host = self.host.clone();
        }
        if self.port.is_some() {
            config.port = self.port;
        }
        if self.game_protocol.is_some() {
            config.game_protocol = self.game_protocol.clone();
        }
    }
}

/// A partial update applied to a service record in a single store call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServicePatch {
    pub status: Option<ServiceStatus>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_check_status: Option<CheckStatus>,
    pub consecutive_failures: Option<i32>,
    pub monitoring: Option<MonitoringUpdate>,
    /// Refuse the write if the stored status is `maintenance` when it lands.
    pub skip_in_maintenance: bool,
}

impl ServicePatch {
    /// The health-state write for one executed check.
    pub fn check_result(
        status: Option<ServiceStatus>,
        checked_at: DateTime<Utc>,
        success: bool,
        consecutive_failures: i32,
    ) -> Self {
        Self {
            status,
            last_checked_at: Some(checked_at),
            last_check_status: Some(CheckStatus::from_success(success)),
            consecutive_failures: Some(consecutive_failures),
            monitoring: None,
            skip_in_maintenance: true,
        }
    }

    /// Whether the patch may land on `service` as currently stored.
    pub fn permits(&self, service: &MonitoredService) -> bool {
        !(self.skip_in_maintenance && service.status == ServiceStatus::Maintenance)
    }

    pub fn apply_to(&self, service: &mut MonitoredService) {
        if let Some(update) = &self.monitoring {
            update.apply_to(&mut service.monitoring);
        }
        if let Some(status) = self.status {
            service.status = status;
        }
        if let Some(checked_at) = self.last_checked_at {
            service.monitoring.last_checked_at = Some(checked_at);
        }
        if let Some(check_status) = self.last_check_status {
            service.monitoring.last_check_status = check_status;
        }
        if let Some(failures) = self.consecutive_failures {
            service.monitoring.consecutive_failures = failures;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusMatch {
    Is(ServiceStatus),
    IsNot(ServiceStatus),
}

/// Filter for [`crate::db::ServiceStore::find_services`]. All set conditions must hold.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceFilter {
    pub monitoring_enabled: Option<bool>,
    pub status: Option<StatusMatch>,
}

impl ServiceFilter {
    /// Monitoring enabled and not in maintenance.
    pub fn eligible() -> Self {
        Self {
            monitoring_enabled: Some(true),
            status: Some(StatusMatch::IsNot(ServiceStatus::Maintenance)),
        }
    }

    /// Monitoring enabled but currently in maintenance.
    pub fn in_maintenance() -> Self {
        Self {
            monitoring_enabled: Some(true),
            status: Some(StatusMatch::Is(ServiceStatus::Maintenance)),
        }
    }

    pub fn matches(&self, service: &MonitoredService) -> bool {
        if let Some(enabled) = self.monitoring_enabled {
            if service.monitoring.enabled != enabled {
                return false;
            }
        }
        match self.status {
            Some(StatusMatch::Is(status)) => service.status == status,
            Some(StatusMatch::IsNot(status)) => service.status != status,
            None => true,
        }
    }
}

/// Global monitoring settings, stored under the `monitoring` settings key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GlobalSettings {
    pub enabled: bool,
    pub schedule_expression: Option<String>,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule_expression: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_new_record_lifecycle() {
        let config = MonitoringConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.failure_threshold, 3);
        assert_eq!(config.interval_seconds, 60);
        assert_eq!(config.last_check_status, CheckStatus::Pending);
        assert_eq!(config.consecutive_failures, 0);
        assert!(config.last_checked_at.is_none());
    }

    #[test]
    fn update_validation_rejects_short_interval_and_zero_threshold() {
        let short = MonitoringUpdate {
            interval_seconds: Some(10),
            ..Default::default()
        };
        assert!(short.validate().is_err());

        let zero = MonitoringUpdate {
            failure_threshold: Some(0),
            ..Default::default()
        };
        assert!(zero.validate().is_err());

        let ok = MonitoringUpdate {
            interval_seconds: Some(30),
            failure_threshold: Some(1),
            ..Default::default()
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn patch_only_touches_set_fields() {
        let mut service = MonitoredService::new(1, "api", MonitoringConfig::tcp("db.internal", 5432));
        let patch = ServicePatch {
            consecutive_failures: Some(2),
            last_check_status: Some(CheckStatus::Failed),
            ..Default::default()
        };
        patch.apply_to(&mut service);

        assert_eq!(service.monitoring.consecutive_failures, 2);
        assert_eq!(service.monitoring.last_check_status, CheckStatus::Failed);
        assert_eq!(service.status, ServiceStatus::Operational);
        assert_eq!(service.monitoring.host.as_deref(), Some("db.internal"));
    }

    #[test]
    fn eligible_filter_excludes_maintenance_and_disabled() {
        let filter = ServiceFilter::eligible();
        let enabled = MonitoredService::new(1, "a", MonitoringConfig::ping("10.0.0.1"));
        let maintenance = enabled.clone().with_status(ServiceStatus::Maintenance);
        let mut disabled = enabled.clone();
        disabled.monitoring.enabled = false;

        assert!(filter.matches(&enabled));
        assert!(!filter.matches(&maintenance));
        assert!(!filter.matches(&disabled));
        assert!(ServiceFilter::in_maintenance().matches(&maintenance));
    }

    #[test]
    fn global_settings_tolerate_missing_keys() {
        let settings: GlobalSettings = serde_json::from_value(serde_json::json!({
            "scheduleExpression": "*/5 * * * *"
        }))
        .unwrap();
        assert!(settings.enabled);
        assert_eq!(settings.schedule_expression.as_deref(), Some("*/5 * * * *"));
    }
}
