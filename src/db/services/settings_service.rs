use sea_orm::{DatabaseConnection, DbErr, EntityTrait};

use crate::db::entities::setting;
use crate::db::models::GlobalSettings;
use crate::db::store::StoreError;

pub const MONITORING_SETTINGS_KEY: &str = "monitoring";

/// Retrieves a setting by its key.
pub async fn get_setting(
    db: &DatabaseConnection,
    key: &str,
) -> Result<Option<setting::Model>, DbErr> {
    setting::Entity::find_by_id(key.to_owned()).one(db).await
}

/// Global monitoring settings; defaults apply when the row is absent.
pub async fn get_global_settings(db: &DatabaseConnection) -> Result<GlobalSettings, StoreError> {
    match get_setting(db, MONITORING_SETTINGS_KEY).await? {
        Some(row) => Ok(serde_json::from_value(row.value)?),
        None => Ok(GlobalSettings::default()),
    }
}
