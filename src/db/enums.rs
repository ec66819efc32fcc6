use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Overall status of a service.
///
/// The first three variants are ordered by severity. `Maintenance` is only
/// ever set from outside the monitoring engine and exempts the service from
/// automatic checks.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "service_status_enum")]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    #[sea_orm(string_value = "operational")]
    Operational,
    #[sea_orm(string_value = "degraded")]
    Degraded,
    #[sea_orm(string_value = "major")]
    Major,
    #[sea_orm(string_value = "maintenance")]
    Maintenance,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Operational => "operational",
            ServiceStatus::Degraded => "degraded",
            ServiceStatus::Major => "major",
            ServiceStatus::Maintenance => "maintenance",
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the most recent executed check.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "check_status_enum")]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    #[sea_orm(string_value = "success")]
    Success,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "pending")]
    Pending,
}

impl CheckStatus {
    pub fn from_success(success: bool) -> Self {
        if success {
            CheckStatus::Success
        } else {
            CheckStatus::Failed
        }
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CheckStatus::Success => "success",
            CheckStatus::Failed => "failed",
            CheckStatus::Pending => "pending",
        };
        f.write_str(s)
    }
}
