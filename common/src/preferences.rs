// Notification settings service: push subscription registration, reminder
// preferences and test notifications

use crate::clock::Clock;
use crate::errors::{DatabaseError, NotificationError, ValidationError};
use crate::models::{
    Dosage, Frequency, Medication, NotificationPreferences, PushSubscription, QuietHours, UserPatch,
    MAX_REMINDER_OFFSET_MINUTES,
};
use crate::reminders::{DispatchOutcome, NotificationDispatcher};
use crate::schedule::TimeOfDay;
use crate::store::UserStore;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Partial update of medication reminder preferences; absent fields are kept
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PreferencesUpdate {
    pub enabled: Option<bool>,
    pub advance_minutes: Option<u32>,
    pub escalation_minutes: Option<u32>,
    /// Replaces the whole quiet-hours block
    pub quiet_hours: Option<QuietHoursUpdate>,
}

/// Quiet hours as submitted by a client, before time validation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuietHoursUpdate {
    pub enabled: bool,
    pub start: String,
    pub end: String,
}

impl PreferencesUpdate {
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (field, value) in [
            ("advance_minutes", self.advance_minutes),
            ("escalation_minutes", self.escalation_minutes),
        ] {
            if let Some(minutes) = value {
                if minutes > MAX_REMINDER_OFFSET_MINUTES {
                    return Err(ValidationError::InvalidFieldValue {
                        field: field.to_string(),
                        reason: format!("must be between 0 and {}", MAX_REMINDER_OFFSET_MINUTES),
                    });
                }
            }
        }

        if let Some(quiet_hours) = &self.quiet_hours {
            quiet_hours.to_quiet_hours()?;
        }

        Ok(())
    }
}

impl QuietHoursUpdate {
    fn to_quiet_hours(&self) -> Result<QuietHours, ValidationError> {
        let parse = |field: &str, value: &str| {
            TimeOfDay::parse(value).map_err(|e| ValidationError::InvalidFieldValue {
                field: field.to_string(),
                reason: e.to_string(),
            })
        };

        Ok(QuietHours {
            enabled: self.enabled,
            start: parse("quiet_hours.start", &self.start)?,
            end: parse("quiet_hours.end", &self.end)?,
        })
    }
}

/// Check a subscription submitted by a browser
pub fn validate_subscription(subscription: &PushSubscription) -> Result<(), ValidationError> {
    let endpoint = subscription.endpoint.trim();
    if endpoint.is_empty() {
        return Err(ValidationError::MissingField("endpoint".to_string()));
    }

    let url = Url::parse(endpoint).map_err(|e| ValidationError::InvalidFieldValue {
        field: "endpoint".to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ValidationError::InvalidFieldValue {
            field: "endpoint".to_string(),
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }

    if subscription.keys.p256dh.trim().is_empty() {
        return Err(ValidationError::MissingField("keys.p256dh".to_string()));
    }
    if subscription.keys.auth.trim().is_empty() {
        return Err(ValidationError::MissingField("keys.auth".to_string()));
    }

    Ok(())
}

fn user_not_found(user_id: Uuid) -> impl FnOnce(DatabaseError) -> NotificationError {
    move |err| match err {
        DatabaseError::NotFound(_) => NotificationError::UserNotFound(user_id.to_string()),
        other => NotificationError::Database(other),
    }
}

pub struct NotificationSettingsService {
    users: Arc<dyn UserStore>,
    dispatcher: Arc<NotificationDispatcher>,
    clock: Arc<dyn Clock>,
    vapid_public_key: Option<String>,
}

impl NotificationSettingsService {
    pub fn new(
        users: Arc<dyn UserStore>,
        dispatcher: Arc<NotificationDispatcher>,
        clock: Arc<dyn Clock>,
        vapid_public_key: Option<String>,
    ) -> Self {
        Self {
            users,
            dispatcher,
            clock,
            vapid_public_key: vapid_public_key.filter(|k| !k.is_empty()),
        }
    }

    /// Application server key browsers need to subscribe; `None` when unset
    pub fn vapid_public_key(&self) -> Option<&str> {
        self.vapid_public_key.as_deref()
    }

    #[instrument(skip(self, subscription))]
    pub async fn register_push_subscription(
        &self,
        user_id: Uuid,
        subscription: PushSubscription,
    ) -> Result<(), NotificationError> {
        validate_subscription(&subscription)?;

        self.users
            .update_user(user_id, &UserPatch::set_subscription(subscription))
            .await
            .map_err(user_not_found(user_id))?;

        tracing::info!("Push subscription registered");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn unregister_push_subscription(&self, user_id: Uuid) -> Result<(), NotificationError> {
        self.users
            .update_user(user_id, &UserPatch::clear_subscription())
            .await
            .map_err(user_not_found(user_id))?;

        tracing::info!("Push subscription unregistered");
        Ok(())
    }

    /// Stored preferences, or the defaults for an unknown user
    #[instrument(skip(self))]
    pub async fn get_preferences(
        &self,
        user_id: Uuid,
    ) -> Result<NotificationPreferences, NotificationError> {
        Ok(self
            .users
            .find_user_by_id(user_id)
            .await?
            .map(|user| user.notification_preferences)
            .unwrap_or_default())
    }

    #[instrument(skip(self, update))]
    pub async fn update_preferences(
        &self,
        user_id: Uuid,
        update: PreferencesUpdate,
    ) -> Result<NotificationPreferences, NotificationError> {
        update.validate()?;

        let mut user = self
            .users
            .find_user_by_id(user_id)
            .await?
            .ok_or_else(|| NotificationError::UserNotFound(user_id.to_string()))?;

        let reminders = &mut user.notification_preferences.medication_reminders;
        if let Some(enabled) = update.enabled {
            reminders.enabled = enabled;
        }
        if let Some(minutes) = update.advance_minutes {
            reminders.advance_minutes = minutes;
        }
        if let Some(minutes) = update.escalation_minutes {
            reminders.escalation_minutes = minutes;
        }
        if let Some(quiet_hours) = &update.quiet_hours {
            reminders.quiet_hours = quiet_hours.to_quiet_hours()?;
        }

        self.users
            .update_user(user_id, &UserPatch::set_reminder_preferences(reminders.clone()))
            .await
            .map_err(user_not_found(user_id))?;

        tracing::info!("Notification preferences updated");
        Ok(user.notification_preferences)
    }

    /// Push a synthetic reminder through the regular dispatch path
    #[instrument(skip(self))]
    pub async fn send_test_notification(
        &self,
        user_id: Uuid,
    ) -> Result<DispatchOutcome, NotificationError> {
        let user = self
            .users
            .find_user_by_id(user_id)
            .await?
            .ok_or_else(|| NotificationError::UserNotFound(user_id.to_string()))?;

        let medication = Medication {
            id: Uuid::nil(),
            user_id,
            name: "Test Medication".to_string(),
            dosage: Dosage {
                amount: 1.0,
                unit: "tablet".to_string(),
                form: "Tablet".to_string(),
            },
            frequency: Frequency {
                times_per_day: 1,
                specific_times: Vec::new(),
            },
            with_food: false,
            is_active: true,
        };

        let outcome = self
            .dispatcher
            .dispatch(&user, &medication, self.clock.now())
            .await;
        tracing::info!(outcome = %outcome, "Test notification dispatched");
        Ok(outcome)
    }
}
