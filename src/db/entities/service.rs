use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::db::enums::{CheckStatus, ServiceStatus};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "services")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub name: String,
    pub status: ServiceStatus,
    pub monitor_enabled: bool,
    pub monitor_type: String,
    pub monitor_interval_seconds: i32,
    pub monitor_timeout_seconds: i32,
    pub monitor_failure_threshold: i32,
    pub monitor_url: Option<String>,
    pub monitor_method: Option<String>,
    pub monitor_expected_status_code: Option<i32>,
    pub monitor_host: Option<String>,
    pub monitor_port: Option<i32>,
    pub monitor_game_protocol: Option<String>,
    pub last_checked_at: Option<ChronoDateTimeUtc>,
    pub last_check_status: CheckStatus,
    pub consecutive_failures: i32,
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
