// Notification log repository implementation

use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::{NotificationLog, NotificationLogFilter, NotificationLogPatch};
use crate::store::NotificationLogStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgArguments, Postgres};
use sqlx::query::QueryAs;
use tracing::instrument;
use uuid::Uuid;

#[derive(sqlx::FromRow)]
struct NotificationLogRow {
    id: Uuid,
    user_id: Uuid,
    medication_id: Uuid,
    scheduled_time: DateTime<Utc>,
    notification_type: String,
    sent_at: DateTime<Utc>,
    status: String,
    delivery_method: String,
    acknowledged_at: Option<DateTime<Utc>>,
    snoozed_until: Option<DateTime<Utc>>,
    failure_reason: Option<String>,
    resolution: Option<String>,
}

impl TryFrom<NotificationLogRow> for NotificationLog {
    type Error = DatabaseError;

    fn try_from(row: NotificationLogRow) -> Result<Self, Self::Error> {
        Ok(NotificationLog {
            id: row.id,
            user_id: row.user_id,
            medication_id: row.medication_id,
            scheduled_time: row.scheduled_time,
            notification_type: row
                .notification_type
                .parse()
                .map_err(DatabaseError::InvalidData)?,
            sent_at: row.sent_at,
            status: row.status.parse().map_err(DatabaseError::InvalidData)?,
            delivery_method: row
                .delivery_method
                .parse()
                .map_err(DatabaseError::InvalidData)?,
            acknowledged_at: row.acknowledged_at,
            snoozed_until: row.snoozed_until,
            failure_reason: row.failure_reason,
            resolution: row
                .resolution
                .map(|r| r.parse())
                .transpose()
                .map_err(DatabaseError::InvalidData)?,
        })
    }
}

type LogQuery<'q> = QueryAs<'q, Postgres, NotificationLogRow, PgArguments>;

/// Build the SELECT for a filter; placeholders follow field order
fn filtered_select(filter: &NotificationLogFilter) -> String {
    let mut query = String::from(
        r#"
        SELECT id, user_id, medication_id, scheduled_time, notification_type,
               sent_at, status, delivery_method, acknowledged_at, snoozed_until,
               failure_reason, resolution
        FROM notification_logs
        WHERE TRUE
        "#,
    );

    let mut param_count = 1;

    if filter.user_id.is_some() {
        query.push_str(&format!(" AND user_id = ${}", param_count));
        param_count += 1;
    }

    if filter.medication_id.is_some() {
        query.push_str(&format!(" AND medication_id = ${}", param_count));
        param_count += 1;
    }

    if filter.notification_type.is_some() {
        query.push_str(&format!(" AND notification_type = ${}", param_count));
        param_count += 1;
    }

    if filter.scheduled_time.is_some() {
        query.push_str(&format!(" AND scheduled_time = ${}", param_count));
        param_count += 1;
    }

    if filter.status.is_some() {
        query.push_str(&format!(" AND status = ${}", param_count));
        param_count += 1;
    }

    if filter.sent_since.is_some() {
        query.push_str(&format!(" AND sent_at >= ${}", param_count));
    }

    query.push_str(" ORDER BY sent_at");
    query
}

fn bind_filter<'q>(mut query: LogQuery<'q>, filter: &NotificationLogFilter) -> LogQuery<'q> {
    if let Some(user_id) = filter.user_id {
        query = query.bind(user_id);
    }
    if let Some(medication_id) = filter.medication_id {
        query = query.bind(medication_id);
    }
    if let Some(notification_type) = filter.notification_type {
        query = query.bind(notification_type.to_string());
    }
    if let Some(scheduled_time) = filter.scheduled_time {
        query = query.bind(scheduled_time);
    }
    if let Some(status) = filter.status {
        query = query.bind(status.to_string());
    }
    if let Some(sent_since) = filter.sent_since {
        query = query.bind(sent_since);
    }
    query
}

/// Repository for the notification log
#[derive(Clone)]
pub struct NotificationLogRepository {
    pool: DbPool,
}

impl NotificationLogRepository {
    /// Create a new NotificationLogRepository
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationLogStore for NotificationLogRepository {
    #[instrument(skip(self, filter))]
    async fn find_one(
        &self,
        filter: &NotificationLogFilter,
    ) -> Result<Option<NotificationLog>, DatabaseError> {
        let mut query = filtered_select(filter);
        query.push_str(" LIMIT 1");

        let row = bind_filter(sqlx::query_as::<_, NotificationLogRow>(&query), filter)
            .fetch_optional(self.pool.pool())
            .await?;

        row.map(NotificationLog::try_from).transpose()
    }

    #[instrument(skip(self, filter))]
    async fn find(
        &self,
        filter: &NotificationLogFilter,
    ) -> Result<Vec<NotificationLog>, DatabaseError> {
        let query = filtered_select(filter);

        let rows = bind_filter(sqlx::query_as::<_, NotificationLogRow>(&query), filter)
            .fetch_all(self.pool.pool())
            .await?;

        rows.into_iter().map(NotificationLog::try_from).collect()
    }

    #[instrument(skip(self, record), fields(log_id = %record.id, kind = %record.notification_type))]
    async fn create(&self, record: &NotificationLog) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO notification_logs (
                id, user_id, medication_id, scheduled_time, notification_type,
                sent_at, status, delivery_method, acknowledged_at, snoozed_until,
                failure_reason, resolution
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(record.id)
        .bind(record.user_id)
        .bind(record.medication_id)
        .bind(record.scheduled_time)
        .bind(record.notification_type.to_string())
        .bind(record.sent_at)
        .bind(record.status.to_string())
        .bind(record.delivery_method.to_string())
        .bind(record.acknowledged_at)
        .bind(record.snoozed_until)
        .bind(&record.failure_reason)
        .bind(record.resolution.map(|r| r.to_string()))
        .execute(self.pool.pool())
        .await?;

        Ok(())
    }

    #[instrument(skip(self, patch))]
    async fn update_by_id(
        &self,
        id: Uuid,
        patch: &NotificationLogPatch,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE notification_logs
            SET status = COALESCE($2, status),
                acknowledged_at = COALESCE($3, acknowledged_at),
                failure_reason = COALESCE($4, failure_reason),
                resolution = COALESCE($5, resolution)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(patch.status.map(|s| s.to_string()))
        .bind(patch.acknowledged_at)
        .bind(&patch.failure_reason)
        .bind(patch.resolution.map(|r| r.to_string()))
        .execute(self.pool.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!(
                "Notification log not found: {}",
                id
            )));
        }

        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_sent_before(&self, cutoff: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM notification_logs WHERE sent_at < $1")
            .bind(cutoff)
            .execute(self.pool.pool())
            .await?;

        Ok(result.rows_affected())
    }
}
