// User repository implementation

use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::{User, UserPatch};
use crate::store::UserStore;
use async_trait::async_trait;
use sqlx::types::Json;
use tracing::instrument;
use uuid::Uuid;

// Preferences are decoded per row so one malformed document cannot fail a
// whole result set
#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    notification_preferences: serde_json::Value,
}

impl TryFrom<UserRow> for User {
    type Error = DatabaseError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let notification_preferences =
            serde_json::from_value(row.notification_preferences).map_err(|e| {
                DatabaseError::InvalidData(format!(
                    "Malformed notification preferences for user {}: {}",
                    row.id, e
                ))
            })?;

        Ok(User {
            id: row.id,
            email: row.email,
            notification_preferences,
        })
    }
}

/// Decode rows for a batch read, skipping users whose preferences are malformed
fn decode_users(rows: Vec<UserRow>) -> Vec<User> {
    rows.into_iter()
        .filter_map(|row| {
            let user_id = row.id;
            match User::try_from(row) {
                Ok(user) => Some(user),
                Err(e) => {
                    tracing::warn!(user_id = %user_id, error = %e, "Skipping user with unreadable preferences");
                    None
                }
            }
        })
        .collect()
}

/// Repository for users and their notification preferences
#[derive(Clone)]
pub struct UserRepository {
    pool: DbPool,
}

impl UserRepository {
    /// Create a new UserRepository
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create a new user
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn create(&self, user: &User) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, email, notification_preferences, created_at, updated_at)
            VALUES ($1, $2, $3, NOW(), NOW())
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(Json(&user.notification_preferences))
        .execute(self.pool.pool())
        .await?;

        tracing::info!(user_id = %user.id, "User created");
        Ok(())
    }

    /// Delete a user; medications and dose logs cascade
    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> Result<(), DatabaseError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(self.pool.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("User not found: {}", id)));
        }

        tracing::info!(user_id = %id, "User deleted");
        Ok(())
    }
}

#[async_trait]
impl UserStore for UserRepository {
    #[instrument(skip(self))]
    async fn find_users_with_reminders_enabled(&self) -> Result<Vec<User>, DatabaseError> {
        // A missing flag counts as enabled, matching the preference defaults
        let rows = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, email, notification_preferences
            FROM users
            WHERE COALESCE(
                (notification_preferences -> 'medication_reminders' ->> 'enabled')::boolean,
                TRUE
            )
            ORDER BY created_at
            "#,
        )
        .fetch_all(self.pool.pool())
        .await?;

        Ok(decode_users(rows))
    }

    #[instrument(skip(self))]
    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, DatabaseError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, email, notification_preferences
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool.pool())
        .await?;

        row.map(User::try_from).transpose()
    }

    #[instrument(skip(self, patch))]
    async fn update_user(&self, id: Uuid, patch: &UserPatch) -> Result<(), DatabaseError> {
        let mut tx = self.pool.pool().begin().await?;

        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, email, notification_preferences
            FROM users
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Err(DatabaseError::NotFound(format!("User not found: {}", id)));
        };

        let mut user = User::try_from(row)?;
        patch.apply_to(&mut user);

        sqlx::query(
            r#"
            UPDATE users
            SET notification_preferences = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(Json(&user.notification_preferences))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!(user_id = %id, "User preferences updated");
        Ok(())
    }
}
