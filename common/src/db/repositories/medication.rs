// Medication repository implementation

use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::{Dosage, Frequency, Medication};
use crate::store::MedicationStore;
use async_trait::async_trait;
use tracing::instrument;
use uuid::Uuid;

#[derive(sqlx::FromRow)]
struct MedicationRow {
    id: Uuid,
    user_id: Uuid,
    name: String,
    dosage_amount: f64,
    dosage_unit: String,
    dosage_form: String,
    times_per_day: i32,
    specific_times: Vec<String>,
    with_food: bool,
    is_active: bool,
}

impl TryFrom<MedicationRow> for Medication {
    type Error = DatabaseError;

    fn try_from(row: MedicationRow) -> Result<Self, Self::Error> {
        let times_per_day = u32::try_from(row.times_per_day).map_err(|_| {
            DatabaseError::InvalidData(format!(
                "Negative times_per_day {} for medication {}",
                row.times_per_day, row.id
            ))
        })?;

        Ok(Medication {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            dosage: Dosage {
                amount: row.dosage_amount,
                unit: row.dosage_unit,
                form: row.dosage_form,
            },
            frequency: Frequency {
                times_per_day,
                specific_times: row.specific_times,
            },
            with_food: row.with_food,
            is_active: row.is_active,
        })
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, user_id, name, dosage_amount, dosage_unit, dosage_form,
           times_per_day, specific_times, with_food, is_active
    FROM medications
"#;

/// Repository for medications
#[derive(Clone)]
pub struct MedicationRepository {
    pool: DbPool,
}

impl MedicationRepository {
    /// Create a new MedicationRepository
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create a new medication
    #[instrument(skip(self, medication), fields(medication_id = %medication.id))]
    pub async fn create(&self, medication: &Medication) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO medications (
                id, user_id, name, dosage_amount, dosage_unit, dosage_form,
                times_per_day, specific_times, with_food, is_active,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW(), NOW())
            "#,
        )
        .bind(medication.id)
        .bind(medication.user_id)
        .bind(&medication.name)
        .bind(medication.dosage.amount)
        .bind(&medication.dosage.unit)
        .bind(&medication.dosage.form)
        .bind(medication.frequency.times_per_day as i32)
        .bind(&medication.frequency.specific_times)
        .bind(medication.with_food)
        .bind(medication.is_active)
        .execute(self.pool.pool())
        .await?;

        tracing::info!(
            medication_id = %medication.id,
            user_id = %medication.user_id,
            "Medication created"
        );
        Ok(())
    }

    /// Mark a medication active or inactive
    #[instrument(skip(self))]
    pub async fn set_active(&self, id: Uuid, is_active: bool) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            "UPDATE medications SET is_active = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(is_active)
        .execute(self.pool.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("Medication not found: {}", id)));
        }

        Ok(())
    }

    /// Delete a medication; its dose logs cascade
    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> Result<(), DatabaseError> {
        let result = sqlx::query("DELETE FROM medications WHERE id = $1")
            .bind(id)
            .execute(self.pool.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("Medication not found: {}", id)));
        }

        tracing::info!(medication_id = %id, "Medication deleted");
        Ok(())
    }
}

#[async_trait]
impl MedicationStore for MedicationRepository {
    #[instrument(skip(self))]
    async fn find_active_medications_with_schedule(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<Medication>, DatabaseError> {
        let query = format!(
            "{} WHERE user_id = $1 AND is_active AND cardinality(specific_times) > 0 ORDER BY created_at",
            SELECT_COLUMNS
        );

        let rows = sqlx::query_as::<_, MedicationRow>(&query)
            .bind(user_id)
            .fetch_all(self.pool.pool())
            .await?;

        rows.into_iter().map(Medication::try_from).collect()
    }

    #[instrument(skip(self))]
    async fn find_medication_by_id(&self, id: Uuid) -> Result<Option<Medication>, DatabaseError> {
        let query = format!("{} WHERE id = $1", SELECT_COLUMNS);

        let row = sqlx::query_as::<_, MedicationRow>(&query)
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await?;

        row.map(Medication::try_from).transpose()
    }
}
