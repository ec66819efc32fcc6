//! Reads and writes the monitoring columns of the `services` table.

use chrono::Utc;
use sea_orm::sea_query::{Expr, Value};
use sea_orm::{
    ActiveEnum, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, UpdateMany,
};

use crate::db::entities::service;
use crate::db::enums::ServiceStatus;
use crate::db::models::{
    MonitoredService, MonitoringUpdate, ServiceFilter, ServicePatch, StatusMatch,
};
use crate::db::store::StoreError;

pub async fn find_services(
    db: &DatabaseConnection,
    filter: &ServiceFilter,
) -> Result<Vec<MonitoredService>, StoreError> {
    let mut query = service::Entity::find();
    if let Some(enabled) = filter.monitoring_enabled {
        query = query.filter(service::Column::MonitorEnabled.eq(enabled));
    }
    query = match filter.status {
        Some(StatusMatch::Is(status)) => query.filter(service::Column::Status.eq(status)),
        Some(StatusMatch::IsNot(status)) => query.filter(service::Column::Status.ne(status)),
        None => query,
    };

    let models = query
        .order_by_asc(service::Column::Id)
        .all(db)
        .await?;
    Ok(models.into_iter().map(MonitoredService::from).collect())
}

pub async fn find_service_by_id(
    db: &DatabaseConnection,
    id: i32,
) -> Result<MonitoredService, StoreError> {
    service::Entity::find_by_id(id)
        .one(db)
        .await?
        .map(MonitoredService::from)
        .ok_or(StoreError::NotFound(id))
}

/// Applies the patch with one `UPDATE ... RETURNING` that sets only the
/// columns the patch carries.
pub async fn update_service(
    db: &DatabaseConnection,
    id: i32,
    patch: ServicePatch,
) -> Result<MonitoredService, StoreError> {
    let mut update = service::Entity::update_many()
        .col_expr(service::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(service::Column::Id.eq(id));
    if patch.skip_in_maintenance {
        update = update.filter(service::Column::Status.ne(ServiceStatus::Maintenance));
    }

    if let Some(status) = patch.status {
        update = update.col_expr(service::Column::Status, Expr::value(status.to_value()));
    }
    if let Some(checked_at) = patch.last_checked_at {
        update = update.col_expr(service::Column::LastCheckedAt, Expr::value(checked_at));
    }
    if let Some(check_status) = patch.last_check_status {
        update = update.col_expr(
            service::Column::LastCheckStatus,
            Expr::value(check_status.to_value()),
        );
    }
    if let Some(failures) = patch.consecutive_failures {
        update = update.col_expr(service::Column::ConsecutiveFailures, Expr::value(failures));
    }
    if let Some(monitoring) = patch.monitoring {
        update = set_monitoring_columns(update, monitoring);
    }

    let mut updated = update.exec_with_returning(db).await?;
    if let Some(model) = updated.pop() {
        return Ok(MonitoredService::from(model));
    }

    // No row matched: either the id is unknown or the guard refused it.
    let current = find_service_by_id(db, id).await?;
    if patch.skip_in_maintenance && current.status == ServiceStatus::Maintenance {
        Err(StoreError::InMaintenance(id))
    } else {
        Err(StoreError::Database(format!("update of service {id} matched no rows")))
    }
}

fn set_monitoring_columns(
    mut update: UpdateMany<service::Entity>,
    monitoring: MonitoringUpdate,
) -> UpdateMany<service::Entity> {
    use service::Column;

    let MonitoringUpdate {
        monitor_type,
        enabled,
        interval_seconds,
        timeout_seconds,
        failure_threshold,
        url,
        method,
        expected_status_code,
        host,
        port,
        game_protocol,
    } = monitoring;

    let columns: [(Column, Option<Value>); 11] = [
        (Column::MonitorType, monitor_type.map(Value::from)),
        (Column::MonitorEnabled, enabled.map(Value::from)),
        (Column::MonitorIntervalSeconds, interval_seconds.map(Value::from)),
        (Column::MonitorTimeoutSeconds, timeout_seconds.map(Value::from)),
        (Column::MonitorFailureThreshold, failure_threshold.map(Value::from)),
        (Column::MonitorUrl, url.map(Value::from)),
        (Column::MonitorMethod, method.map(Value::from)),
        (Column::MonitorExpectedStatusCode, expected_status_code.map(Value::from)),
        (Column::MonitorHost, host.map(Value::from)),
        (Column::MonitorPort, port.map(Value::from)),
        (Column::MonitorGameProtocol, game_protocol.map(Value::from)),
    ];
    for (column, value) in columns {
        if let Some(value) = value {
            update = update.col_expr(column, Expr::value(value));
        }
    }
    update
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::enums::CheckStatus;
    use sea_orm::{DatabaseBackend, MockDatabase, Statement, Transaction, Values};

    fn model(id: i32, status: ServiceStatus) -> service::Model {
        service::Model {
            id,
            name: format!("service-{id}"),
            status,
            monitor_enabled: true,
            monitor_type: "http".to_string(),
            monitor_interval_seconds: 60,
            monitor_timeout_seconds: 10,
            monitor_failure_threshold: 3,
            monitor_url: Some("https://example.com/health".to_string()),
            monitor_method: Some("GET".to_string()),
            monitor_expected_status_code: Some(200),
            monitor_host: None,
            monitor_port: None,
            monitor_game_protocol: None,
            last_checked_at: None,
            last_check_status: CheckStatus::Pending,
            consecutive_failures: 0,
            updated_at: Utc::now(),
        }
    }

    fn statements(log: &[Transaction]) -> Vec<Statement> {
        log.iter()
            .flat_map(|txn| txn.statements().iter().cloned())
            .collect()
    }

    /// The `SET` part of an `UPDATE`, without the `WHERE` and `RETURNING` tails.
    fn set_clause(sql: &str) -> &str {
        sql.split(" WHERE ").next().unwrap_or(sql)
    }

    #[tokio::test]
    async fn eligible_services_use_one_combined_query() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![
                model(1, ServiceStatus::Operational),
                model(3, ServiceStatus::Major),
            ]])
            .into_connection();

        let found = find_services(&db, &ServiceFilter::eligible()).await.unwrap();
        let ids: Vec<i32> = found.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(found[1].status, ServiceStatus::Major);

        let stmts = statements(&db.into_transaction_log());
        assert_eq!(stmts.len(), 1);
        assert!(stmts[0].sql.contains(
            r#"WHERE "services"."monitor_enabled" = $1 AND "services"."status" <> $2"#
        ));
        assert!(stmts[0].sql.ends_with(r#"ORDER BY "services"."id" ASC"#));
        assert_eq!(
            stmts[0].values,
            Some(Values(vec![true.into(), "maintenance".into()]))
        );
    }

    #[tokio::test]
    async fn maintenance_count_query_matches_status() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![model(2, ServiceStatus::Maintenance)]])
            .into_connection();

        let found = find_services(&db, &ServiceFilter::in_maintenance()).await.unwrap();
        assert_eq!(found.len(), 1);

        let stmts = statements(&db.into_transaction_log());
        assert!(stmts[0].sql.contains(r#""services"."status" = $2"#));
        assert_eq!(
            stmts[0].values,
            Some(Values(vec![true.into(), "maintenance".into()]))
        );
    }

    #[tokio::test]
    async fn missing_service_is_not_found() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<service::Model>::new()])
            .into_connection();
        assert_eq!(
            find_service_by_id(&db, 9).await.unwrap_err(),
            StoreError::NotFound(9)
        );
    }

    #[tokio::test]
    async fn check_result_is_written_with_one_guarded_update() {
        let mut stored = model(1, ServiceStatus::Major);
        stored.consecutive_failures = 3;
        stored.last_check_status = CheckStatus::Failed;
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![stored]])
            .into_connection();

        let patch = ServicePatch::check_result(Some(ServiceStatus::Major), Utc::now(), false, 3);
        let updated = update_service(&db, 1, patch).await.unwrap();
        assert_eq!(updated.status, ServiceStatus::Major);
        assert_eq!(updated.monitoring.consecutive_failures, 3);

        let stmts = statements(&db.into_transaction_log());
        assert_eq!(stmts.len(), 1);
        let sql = &stmts[0].sql;
        assert!(sql.starts_with(r#"UPDATE "services" SET"#));
        assert!(sql.contains(r#""status" <> "#));
        assert!(sql.contains("RETURNING"));

        let set = set_clause(sql);
        for column in ["status", "last_checked_at", "last_check_status", "consecutive_failures", "updated_at"] {
            assert!(set.contains(&format!(r#""{column}" = "#)), "{column} missing from {set}");
        }
        for column in ["monitor_url", "monitor_enabled", "monitor_interval_seconds"] {
            assert!(!set.contains(&format!(r#""{column}""#)), "{column} written by a check: {set}");
        }
    }

    #[tokio::test]
    async fn config_update_leaves_check_columns_alone() {
        let mut stored = model(4, ServiceStatus::Operational);
        stored.monitor_url = Some("https://example.com/ready".to_string());
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![stored]])
            .into_connection();

        let patch = ServicePatch {
            monitoring: Some(MonitoringUpdate {
                url: Some("https://example.com/ready".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let updated = update_service(&db, 4, patch).await.unwrap();
        assert_eq!(updated.monitoring.url.as_deref(), Some("https://example.com/ready"));

        let stmts = statements(&db.into_transaction_log());
        let set = set_clause(&stmts[0].sql);
        assert!(set.contains(r#""monitor_url" = "#));
        for column in ["status", "last_checked_at", "last_check_status", "consecutive_failures"] {
            assert!(!set.contains(&format!(r#""{column}""#)), "{column} written by a config edit: {set}");
        }
        assert!(!stmts[0].sql.contains(r#""status" <> "#));
    }

    #[tokio::test]
    async fn guarded_update_on_maintenance_is_refused() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([
                Vec::<service::Model>::new(),
                vec![model(1, ServiceStatus::Maintenance)],
            ])
            .into_connection();

        let patch = ServicePatch::check_result(Some(ServiceStatus::Major), Utc::now(), false, 1);
        let err = update_service(&db, 1, patch).await.unwrap_err();
        assert_eq!(err, StoreError::InMaintenance(1));

        let stmts = statements(&db.into_transaction_log());
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].sql.starts_with("UPDATE"));
        assert!(stmts[1].sql.starts_with("SELECT"));
    }

    #[tokio::test]
    async fn update_of_unknown_service_is_not_found() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<service::Model>::new(), Vec::new()])
            .into_connection();

        let err = update_service(&db, 7, ServicePatch::default()).await.unwrap_err();
        assert_eq!(err, StoreError::NotFound(7));
    }
}
