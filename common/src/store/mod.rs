// Collaborator contracts consumed by the reminder engine
//
// PostgreSQL implementations live in `db::repositories`; `memory` holds an
// in-process implementation of every contract.

pub mod memory;

use crate::errors::DatabaseError;
use crate::models::{
    DoseLog, Medication, NotificationLog, NotificationLogFilter, NotificationLogPatch, User,
    UserPatch,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

pub use memory::MemoryStore;

/// Access to users and their notification settings
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Users whose medication reminders are enabled
    async fn find_users_with_reminders_enabled(&self) -> Result<Vec<User>, DatabaseError>;

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, DatabaseError>;

    /// Apply a partial update; `NotFound` when the user does not exist
    async fn update_user(&self, id: Uuid, patch: &UserPatch) -> Result<(), DatabaseError>;
}

/// Access to medications
#[async_trait]
pub trait MedicationStore: Send + Sync {
    /// Active medications of a user with at least one specific time
    async fn find_active_medications_with_schedule(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<Medication>, DatabaseError>;

    async fn find_medication_by_id(&self, id: Uuid) -> Result<Option<Medication>, DatabaseError>;
}

/// Access to dose adherence history
#[async_trait]
pub trait DoseHistoryStore: Send + Sync {
    /// True when a dose of `medication_id` was logged within `tolerance` of `instant`
    async fn has_dose_near(
        &self,
        medication_id: Uuid,
        instant: DateTime<Utc>,
        tolerance: Duration,
    ) -> Result<bool, DatabaseError>;

    async fn record_dose(&self, dose: &DoseLog) -> Result<(), DatabaseError>;
}

/// Access to the notification log, the only state shared between tasks
#[async_trait]
pub trait NotificationLogStore: Send + Sync {
    async fn find_one(
        &self,
        filter: &NotificationLogFilter,
    ) -> Result<Option<NotificationLog>, DatabaseError>;

    async fn find(&self, filter: &NotificationLogFilter)
        -> Result<Vec<NotificationLog>, DatabaseError>;

    /// Insert a row; `DuplicateKey` when the dedup key already exists
    async fn create(&self, record: &NotificationLog) -> Result<(), DatabaseError>;

    /// Apply a partial update; `NotFound` when the row does not exist
    async fn update_by_id(&self, id: Uuid, patch: &NotificationLogPatch)
        -> Result<(), DatabaseError>;

    /// Delete rows with `sent_at` before `cutoff`, returning how many were removed
    async fn delete_sent_before(&self, cutoff: DateTime<Utc>) -> Result<u64, DatabaseError>;
}
