// In-process implementation of every store contract
//
// Backs the end-to-end tests and local development. The notification log
// enforces the same unique key as the PostgreSQL index.

use super::{DoseHistoryStore, MedicationStore, NotificationLogStore, UserStore};
use crate::errors::DatabaseError;
use crate::models::{
    DoseLog, Medication, NotificationLog, NotificationLogFilter, NotificationLogPatch, User,
    UserPatch,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Shared in-memory store
#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<Uuid, User>>,
    medications: RwLock<HashMap<Uuid, Medication>>,
    doses: RwLock<Vec<DoseLog>>,
    logs: RwLock<Vec<NotificationLog>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, user: User) {
        self.users.write().await.insert(user.id, user);
    }

    pub async fn remove_user(&self, id: Uuid) -> Option<User> {
        self.users.write().await.remove(&id)
    }

    pub async fn insert_medication(&self, medication: Medication) {
        self.medications
            .write()
            .await
            .insert(medication.id, medication);
    }

    pub async fn remove_medication(&self, id: Uuid) -> Option<Medication> {
        self.medications.write().await.remove(&id)
    }

    /// Snapshot of every notification row, in insertion order
    pub async fn notification_logs(&self) -> Vec<NotificationLog> {
        self.logs.read().await.clone()
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_users_with_reminders_enabled(&self) -> Result<Vec<User>, DatabaseError> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .filter(|u| u.reminder_preferences().enabled)
            .cloned()
            .collect())
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, DatabaseError> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn update_user(&self, id: Uuid, patch: &UserPatch) -> Result<(), DatabaseError> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(&id)
            .ok_or_else(|| DatabaseError::NotFound(format!("User not found: {}", id)))?;
        patch.apply_to(user);
        Ok(())
    }
}

#[async_trait]
impl MedicationStore for MemoryStore {
    async fn find_active_medications_with_schedule(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<Medication>, DatabaseError> {
        let medications = self.medications.read().await;
        Ok(medications
            .values()
            .filter(|m| m.user_id == user_id && m.is_active && m.has_schedule())
            .cloned()
            .collect())
    }

    async fn find_medication_by_id(&self, id: Uuid) -> Result<Option<Medication>, DatabaseError> {
        Ok(self.medications.read().await.get(&id).cloned())
    }
}

#[async_trait]
impl DoseHistoryStore for MemoryStore {
    async fn has_dose_near(
        &self,
        medication_id: Uuid,
        instant: DateTime<Utc>,
        tolerance: Duration,
    ) -> Result<bool, DatabaseError> {
        let doses = self.doses.read().await;
        Ok(doses
            .iter()
            .any(|d| d.medication_id == medication_id && (d.taken_at - instant).abs() <= tolerance))
    }

    async fn record_dose(&self, dose: &DoseLog) -> Result<(), DatabaseError> {
        self.doses.write().await.push(dose.clone());
        Ok(())
    }
}

#[async_trait]
impl NotificationLogStore for MemoryStore {
    async fn find_one(
        &self,
        filter: &NotificationLogFilter,
    ) -> Result<Option<NotificationLog>, DatabaseError> {
        let logs = self.logs.read().await;
        Ok(logs.iter().find(|l| filter.matches(l)).cloned())
    }

    async fn find(
        &self,
        filter: &NotificationLogFilter,
    ) -> Result<Vec<NotificationLog>, DatabaseError> {
        let logs = self.logs.read().await;
        Ok(logs.iter().filter(|l| filter.matches(l)).cloned().collect())
    }

    async fn create(&self, record: &NotificationLog) -> Result<(), DatabaseError> {
        let mut logs = self.logs.write().await;

        let duplicate = logs.iter().any(|l| {
            l.user_id == record.user_id
                && l.medication_id == record.medication_id
                && l.scheduled_time == record.scheduled_time
                && l.notification_type == record.notification_type
        });
        if duplicate {
            return Err(DatabaseError::DuplicateKey(format!(
                "{} notification already logged for medication {} at {}",
                record.notification_type, record.medication_id, record.scheduled_time
            )));
        }

        logs.push(record.clone());
        Ok(())
    }

    async fn update_by_id(
        &self,
        id: Uuid,
        patch: &NotificationLogPatch,
    ) -> Result<(), DatabaseError> {
        let mut logs = self.logs.write().await;
        let log = logs
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or_else(|| DatabaseError::NotFound(format!("Notification log not found: {}", id)))?;
        patch.apply_to(log);
        Ok(())
    }

    async fn delete_sent_before(&self, cutoff: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let mut logs = self.logs.write().await;
        let before = logs.len();
        logs.retain(|l| l.sent_at >= cutoff);
        Ok((before - logs.len()) as u64)
    }
}
