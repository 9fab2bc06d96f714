// Dose log repository implementation

use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::DoseLog;
use crate::store::DoseHistoryStore;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::instrument;
use uuid::Uuid;

/// Repository for logged doses
#[derive(Clone)]
pub struct DoseLogRepository {
    pool: DbPool,
}

impl DoseLogRepository {
    /// Create a new DoseLogRepository
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DoseHistoryStore for DoseLogRepository {
    #[instrument(skip(self))]
    async fn has_dose_near(
        &self,
        medication_id: Uuid,
        instant: DateTime<Utc>,
        tolerance: Duration,
    ) -> Result<bool, DatabaseError> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1
                FROM dose_logs
                WHERE medication_id = $1
                  AND taken_at BETWEEN $2 AND $3
            )
            "#,
        )
        .bind(medication_id)
        .bind(instant - tolerance)
        .bind(instant + tolerance)
        .fetch_one(self.pool.pool())
        .await?;

        Ok(exists)
    }

    #[instrument(skip(self, dose), fields(dose_id = %dose.id))]
    async fn record_dose(&self, dose: &DoseLog) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO dose_logs (id, user_id, medication_id, taken_at, notes)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(dose.id)
        .bind(dose.user_id)
        .bind(dose.medication_id)
        .bind(dose.taken_at)
        .bind(&dose.notes)
        .execute(self.pool.pool())
        .await?;

        tracing::debug!(
            medication_id = %dose.medication_id,
            taken_at = %dose.taken_at,
            "Dose recorded"
        );
        Ok(())
    }
}
