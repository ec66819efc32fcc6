//! Protocol-specific health probes.
//!
//! A probe executes one check against one target and always returns a
//! [`CheckResult`]; transport failures, timeouts and unexpected responses are
//! reported as data, never as errors.

pub mod game_query;
pub mod http;
pub mod ping;
pub mod tcp;

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::db::models::MonitoringConfig;
use game_query::GameProtocol;

pub const DEFAULT_HTTP_METHOD: &str = "GET";
pub const DEFAULT_EXPECTED_STATUS: u16 = 200;

/// Outcome of a single probe.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CheckResult {
    pub fn success(response_time_ms: f64) -> Self {
        Self {
            success: true,
            response_time_ms: Some(response_time_ms),
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_status_code(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn with_response_time(mut self, response_time_ms: f64) -> Self {
        self.response_time_ms = Some(response_time_ms);
        self
    }
}

pub(crate) fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorType {
    Http,
    Tcp,
    Ping,
    GameQuery,
}

impl FromStr for MonitorType {
    type Err = ConfigIssue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" | "https" => Ok(MonitorType::Http),
            "tcp" => Ok(MonitorType::Tcp),
            "ping" | "icmp" => Ok(MonitorType::Ping),
            "game-query" | "game_query" | "gamequery" => Ok(MonitorType::GameQuery),
            other => Err(ConfigIssue::UnknownType(other.to_string())),
        }
    }
}

/// Why a monitoring configuration cannot be turned into a probe.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigIssue {
    #[error("unknown type")]
    UnknownType(String),
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("invalid value for `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("unsupported game protocol `{0}`")]
    UnsupportedProtocol(String),
}

/// What to probe, one variant per monitor type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeTarget {
    Http {
        url: String,
        method: String,
        expected_status_code: u16,
    },
    Tcp {
        host: String,
        port: u16,
    },
    Ping {
        host: String,
    },
    GameQuery {
        host: String,
        port: u16,
        protocol: GameProtocol,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeInput {
    pub target: ProbeTarget,
    pub timeout: Duration,
}

impl ProbeInput {
    /// Builds a probe input, validating that every field the selected type
    /// needs is present.
    pub fn from_config(config: &MonitoringConfig) -> Result<Self, ConfigIssue> {
        let monitor_type: MonitorType = config.monitor_type.parse()?;
        let target = match monitor_type {
            MonitorType::Http => ProbeTarget::Http {
                url: required(&config.url, "url")?,
                method: config
                    .method
                    .as_deref()
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .unwrap_or(DEFAULT_HTTP_METHOD)
                    .to_ascii_uppercase(),
                expected_status_code: match config.expected_status_code {
                    Some(code) => u16::try_from(code)
                        .ok()
                        .filter(|c| (100..=599).contains(c))
                        .ok_or_else(|| ConfigIssue::InvalidField {
                            field: "expectedStatusCode",
                            reason: format!("{code} is not an HTTP status code"),
                        })?,
                    None => DEFAULT_EXPECTED_STATUS,
                },
            },
            MonitorType::Tcp => ProbeTarget::Tcp {
                host: required(&config.host, "host")?,
                port: port(config.port)?,
            },
            MonitorType::Ping => ProbeTarget::Ping {
                host: required(&config.host, "host")?,
            },
            MonitorType::GameQuery => {
                let protocol_name = required(&config.game_protocol, "gameProtocol")?;
                let protocol = protocol_name
                    .parse::<GameProtocol>()
                    .map_err(|_| ConfigIssue::UnsupportedProtocol(protocol_name))?;
                ProbeTarget::GameQuery {
                    host: required(&config.host, "host")?,
                    port: port(config.port)?,
                    protocol,
                }
            }
        };

        Ok(Self {
            target,
            timeout: Duration::from_secs(config.timeout_seconds.max(1) as u64),
        })
    }
}

fn required(value: &Option<String>, field: &'static str) -> Result<String, ConfigIssue> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(ConfigIssue::MissingField(field))
}

fn port(value: Option<i32>) -> Result<u16, ConfigIssue> {
    let raw = value.ok_or(ConfigIssue::MissingField("port"))?;
    u16::try_from(raw)
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| ConfigIssue::InvalidField {
            field: "port",
            reason: format!("{raw} is out of range"),
        })
}

/// Runs the probe selected by `input.target`.
pub async fn probe(input: &ProbeInput) -> CheckResult {
    match &input.target {
        ProbeTarget::Http {
            url,
            method,
            expected_status_code,
        } => http::check(url, method, *expected_status_code, input.timeout).await,
        ProbeTarget::Tcp { host, port } => tcp::check(host, *port, input.timeout).await,
        ProbeTarget::Ping { host } => ping::check(host, input.timeout).await,
        ProbeTarget::GameQuery {
            host,
            port,
            protocol,
        } => game_query::check(host, *port, *protocol, input.timeout).await,
    }
}

/// Probes straight from a stored configuration. Configuration problems come
/// back as failed results.
pub async fn probe_config(config: &MonitoringConfig) -> CheckResult {
    match ProbeInput::from_config(config) {
        Ok(input) => probe(&input).await,
        Err(issue) => CheckResult::failure(issue.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_input_applies_defaults() {
        let mut config = MonitoringConfig::http("https://status.example.com");
        config.method = None;
        config.expected_status_code = None;
        config.timeout_seconds = 5;

        let input = ProbeInput::from_config(&config).unwrap();
        assert_eq!(input.timeout, Duration::from_secs(5));
        assert_eq!(
            input.target,
            ProbeTarget::Http {
                url: "https://status.example.com".to_string(),
                method: "GET".to_string(),
                expected_status_code: 200,
            }
        );
    }

    #[test]
    fn missing_fields_are_reported_per_type() {
        let mut tcp = MonitoringConfig::tcp("db", 5432);
        tcp.port = None;
        assert_eq!(
            ProbeInput::from_config(&tcp),
            Err(ConfigIssue::MissingField("port"))
        );

        let ping = MonitoringConfig::ping("   ");
        assert_eq!(
            ProbeInput::from_config(&ping),
            Err(ConfigIssue::MissingField("host"))
        );

        let mut http = MonitoringConfig::http("");
        http.url = None;
        assert_eq!(
            ProbeInput::from_config(&http),
            Err(ConfigIssue::MissingField("url"))
        );
    }

    #[test]
    fn unknown_game_protocol_is_a_config_issue() {
        let config = MonitoringConfig::game_query("play.example.com", 27015, "quake9");
        assert_eq!(
            ProbeInput::from_config(&config),
            Err(ConfigIssue::UnsupportedProtocol("quake9".to_string()))
        );
    }

    #[test]
    fn out_of_range_port_is_rejected() {
        let mut config = MonitoringConfig::tcp("db", 1);
        config.port = Some(70000);
        assert!(matches!(
            ProbeInput::from_config(&config),
            Err(ConfigIssue::InvalidField { field: "port", .. })
        ));
    }

    #[tokio::test]
    async fn unknown_type_yields_failed_result() {
        let mut config = MonitoringConfig::http("http://localhost");
        config.monitor_type = "smtp".to_string();
        let result = probe_config(&config).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("unknown type"));
    }
}
