// Domain models for users, medications, doses and notification logs

use crate::schedule::{TimeOfDay, DEFAULT_QUIET_END, DEFAULT_QUIET_START};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

pub const DEFAULT_ADVANCE_MINUTES: u32 = 15;
pub const DEFAULT_ESCALATION_MINUTES: u32 = 30;
pub const MAX_REMINDER_OFFSET_MINUTES: u32 = 120;

// ============================================================================
// User Models
// ============================================================================

/// User as seen by the reminder engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(default)]
    pub notification_preferences: NotificationPreferences,
}

impl User {
    pub fn reminder_preferences(&self) -> &MedicationReminderPreferences {
        &self.notification_preferences.medication_reminders
    }

    /// Subscription usable for delivery, if any
    pub fn active_subscription(&self) -> Option<&PushSubscription> {
        self.notification_preferences
            .push_subscription
            .as_ref()
            .filter(|s| !s.endpoint.trim().is_empty())
    }
}

/// Notification settings stored on the user record
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NotificationPreferences {
    #[serde(default)]
    pub medication_reminders: MedicationReminderPreferences,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_subscription: Option<PushSubscription>,
}

/// Medication reminder preferences
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MedicationReminderPreferences {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_advance_minutes")]
    pub advance_minutes: u32,
    /// Zero disables escalation
    #[serde(default = "default_escalation_minutes")]
    pub escalation_minutes: u32,
    #[serde(default)]
    pub quiet_hours: QuietHours,
}

fn default_enabled() -> bool {
    true
}

fn default_advance_minutes() -> u32 {
    DEFAULT_ADVANCE_MINUTES
}

fn default_escalation_minutes() -> u32 {
    DEFAULT_ESCALATION_MINUTES
}

impl Default for MedicationReminderPreferences {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            advance_minutes: DEFAULT_ADVANCE_MINUTES,
            escalation_minutes: DEFAULT_ESCALATION_MINUTES,
            quiet_hours: QuietHours::default(),
        }
    }
}

/// Daily window during which no notification is dispatched
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuietHours {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_quiet_start")]
    pub start: TimeOfDay,
    #[serde(default = "default_quiet_end")]
    pub end: TimeOfDay,
}

fn default_quiet_start() -> TimeOfDay {
    DEFAULT_QUIET_START
}

fn default_quiet_end() -> TimeOfDay {
    DEFAULT_QUIET_END
}

impl Default for QuietHours {
    fn default() -> Self {
        Self {
            enabled: false,
            start: default_quiet_start(),
            end: default_quiet_end(),
        }
    }
}

/// Web Push subscription registered by a browser
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PushSubscription {
    pub endpoint: String,
    pub keys: PushSubscriptionKeys,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PushSubscriptionKeys {
    pub p256dh: String,
    pub auth: String,
}

/// Partial update applied to a user record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserPatch {
    /// `Some(None)` clears the subscription
    pub push_subscription: Option<Option<PushSubscription>>,
    pub medication_reminders: Option<MedicationReminderPreferences>,
}

impl UserPatch {
    pub fn clear_subscription() -> Self {
        Self {
            push_subscription: Some(None),
            ..Default::default()
        }
    }

    pub fn set_subscription(subscription: PushSubscription) -> Self {
        Self {
            push_subscription: Some(Some(subscription)),
            ..Default::default()
        }
    }

    pub fn set_reminder_preferences(preferences: MedicationReminderPreferences) -> Self {
        Self {
            medication_reminders: Some(preferences),
            ..Default::default()
        }
    }

    /// Apply the patch to an in-memory user
    pub fn apply_to(&self, user: &mut User) {
        if let Some(subscription) = &self.push_subscription {
            user.notification_preferences.push_subscription = subscription.clone();
        }
        if let Some(preferences) = &self.medication_reminders {
            user.notification_preferences.medication_reminders = preferences.clone();
        }
    }
}

// ============================================================================
// Medication Models
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Medication {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub dosage: Dosage,
    pub frequency: Frequency,
    #[serde(default)]
    pub with_food: bool,
    #[serde(default = "default_enabled")]
    pub is_active: bool,
}

impl Medication {
    pub fn has_schedule(&self) -> bool {
        !self.frequency.specific_times.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dosage {
    pub amount: f64,
    pub unit: String,
    pub form: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Frequency {
    pub times_per_day: u32,
    /// Raw "HH:MM" strings; unparseable entries are skipped by the scanner
    #[serde(default)]
    pub specific_times: Vec<String>,
}

/// A dose the user reported as taken
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DoseLog {
    pub id: Uuid,
    pub user_id: Uuid,
    pub medication_id: Uuid,
    pub taken_at: DateTime<Utc>,
    pub notes: Option<String>,
}

impl DoseLog {
    pub fn new(user_id: Uuid, medication_id: Uuid, taken_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            medication_id,
            taken_at,
            notes: None,
        }
    }
}

// ============================================================================
// NotificationLog Models
// ============================================================================

/// Record of a reminder delivery or a pending escalation marker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationLog {
    pub id: Uuid,
    pub user_id: Uuid,
    pub medication_id: Uuid,
    pub scheduled_time: DateTime<Utc>,
    pub notification_type: NotificationType,
    pub sent_at: DateTime<Utc>,
    pub status: NotificationStatus,
    pub delivery_method: DeliveryMethod,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub snoozed_until: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub resolution: Option<EscalationResolution>,
}

impl NotificationLog {
    /// Delivery record for an advance reminder
    pub fn new_advance(
        user_id: Uuid,
        medication_id: Uuid,
        scheduled_time: DateTime<Utc>,
        sent_at: DateTime<Utc>,
    ) -> Self {
        Self::new(
            user_id,
            medication_id,
            scheduled_time,
            NotificationType::Advance,
            sent_at,
        )
    }

    /// Pending escalation marker; stored with status `sent`
    pub fn new_escalation_marker(
        user_id: Uuid,
        medication_id: Uuid,
        scheduled_time: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self::new(
            user_id,
            medication_id,
            scheduled_time,
            NotificationType::Escalation,
            created_at,
        )
    }

    fn new(
        user_id: Uuid,
        medication_id: Uuid,
        scheduled_time: DateTime<Utc>,
        notification_type: NotificationType,
        sent_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            medication_id,
            scheduled_time,
            notification_type,
            sent_at,
            status: NotificationStatus::Sent,
            delivery_method: DeliveryMethod::Push,
            acknowledged_at: None,
            snoozed_until: None,
            failure_reason: None,
            resolution: None,
        }
    }

    /// Marker state for escalation rows
    ///
    /// `None` for advance rows and for snoozed rows, which the marker
    /// lifecycle never writes.
    pub fn escalation_state(&self) -> Option<EscalationState> {
        if self.notification_type != NotificationType::Escalation {
            return None;
        }

        Some(match self.status {
            NotificationStatus::Sent => EscalationState::Pending,
            NotificationStatus::Snoozed => return None,
            NotificationStatus::Failed => EscalationState::Resolved {
                via: self
                    .resolution
                    .unwrap_or(EscalationResolution::EscalationFailed),
            },
            // Rows written before the resolution column existed were all escalated
            NotificationStatus::Acknowledged => EscalationState::Resolved {
                via: self.resolution.unwrap_or(EscalationResolution::Escalated),
            },
        })
    }
}

/// Kind of notification row
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Advance,
    Escalation,
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationType::Advance => write!(f, "advance"),
            NotificationType::Escalation => write!(f, "escalation"),
        }
    }
}

impl FromStr for NotificationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "advance" => Ok(NotificationType::Advance),
            "escalation" => Ok(NotificationType::Escalation),
            _ => Err(format!("Invalid notification type: {}", s)),
        }
    }
}

/// Stored status of a notification row
///
/// On escalation rows `Sent` means "pending evaluation", not "delivered".
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Sent,
    Acknowledged,
    Snoozed,
    Failed,
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationStatus::Sent => write!(f, "sent"),
            NotificationStatus::Acknowledged => write!(f, "acknowledged"),
            NotificationStatus::Snoozed => write!(f, "snoozed"),
            NotificationStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for NotificationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(NotificationStatus::Sent),
            "acknowledged" => Ok(NotificationStatus::Acknowledged),
            "snoozed" => Ok(NotificationStatus::Snoozed),
            "failed" => Ok(NotificationStatus::Failed),
            _ => Err(format!("Invalid notification status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMethod {
    Push,
    InApp,
    Email,
}

impl std::fmt::Display for DeliveryMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryMethod::Push => write!(f, "push"),
            DeliveryMethod::InApp => write!(f, "in_app"),
            DeliveryMethod::Email => write!(f, "email"),
        }
    }
}

impl FromStr for DeliveryMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "push" => Ok(DeliveryMethod::Push),
            "in_app" => Ok(DeliveryMethod::InApp),
            "email" => Ok(DeliveryMethod::Email),
            _ => Err(format!("Invalid delivery method: {}", s)),
        }
    }
}

/// Explicit view of an escalation marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationState {
    Pending,
    Resolved { via: EscalationResolution },
}

/// How an escalation marker was closed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EscalationResolution {
    /// Dose was logged near the scheduled time; nothing sent
    DoseLogged,
    /// Follow-up push was delivered
    Escalated,
    /// Owning user or medication no longer exists
    EscalationFailed,
}

impl EscalationResolution {
    /// Stored status written when resolving with this outcome
    pub fn status(&self) -> NotificationStatus {
        match self {
            EscalationResolution::DoseLogged | EscalationResolution::Escalated => {
                NotificationStatus::Acknowledged
            }
            EscalationResolution::EscalationFailed => NotificationStatus::Failed,
        }
    }
}

impl std::fmt::Display for EscalationResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EscalationResolution::DoseLogged => write!(f, "dose_logged"),
            EscalationResolution::Escalated => write!(f, "escalated"),
            EscalationResolution::EscalationFailed => write!(f, "escalation_failed"),
        }
    }
}

impl FromStr for EscalationResolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dose_logged" => Ok(EscalationResolution::DoseLogged),
            "escalated" => Ok(EscalationResolution::Escalated),
            "escalation_failed" => Ok(EscalationResolution::EscalationFailed),
            _ => Err(format!("Invalid escalation resolution: {}", s)),
        }
    }
}

/// Filter for notification log queries; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationLogFilter {
    pub user_id: Option<Uuid>,
    pub medication_id: Option<Uuid>,
    pub notification_type: Option<NotificationType>,
    pub scheduled_time: Option<DateTime<Utc>>,
    pub status: Option<NotificationStatus>,
    pub sent_since: Option<DateTime<Utc>>,
}

impl NotificationLogFilter {
    /// All escalation markers still awaiting evaluation, regardless of age
    pub fn pending_escalations() -> Self {
        Self {
            notification_type: Some(NotificationType::Escalation),
            status: Some(NotificationStatus::Sent),
            ..Default::default()
        }
    }

    /// Advance reminder already sent today for one dose
    pub fn advance_for_dose(
        user_id: Uuid,
        medication_id: Uuid,
        scheduled_time: DateTime<Utc>,
        sent_since: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: Some(user_id),
            medication_id: Some(medication_id),
            notification_type: Some(NotificationType::Advance),
            scheduled_time: Some(scheduled_time),
            status: None,
            sent_since: Some(sent_since),
        }
    }

    pub fn matches(&self, log: &NotificationLog) -> bool {
        self.user_id.map_or(true, |v| log.user_id == v)
            && self.medication_id.map_or(true, |v| log.medication_id == v)
            && self
                .notification_type
                .map_or(true, |v| log.notification_type == v)
            && self.scheduled_time.map_or(true, |v| log.scheduled_time == v)
            && self.status.map_or(true, |v| log.status == v)
            && self.sent_since.map_or(true, |v| log.sent_at >= v)
    }
}

/// Partial update of a notification row
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationLogPatch {
    pub status: Option<NotificationStatus>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub resolution: Option<EscalationResolution>,
}

impl NotificationLogPatch {
    /// Close an escalation marker
    pub fn resolve(via: EscalationResolution, at: DateTime<Utc>, reason: Option<String>) -> Self {
        Self {
            status: Some(via.status()),
            acknowledged_at: Some(at),
            failure_reason: reason,
            resolution: Some(via),
        }
    }

    pub fn apply_to(&self, log: &mut NotificationLog) {
        if let Some(status) = self.status {
            log.status = status;
        }
        if let Some(at) = self.acknowledged_at {
            log.acknowledged_at = Some(at);
        }
        if let Some(reason) = &self.failure_reason {
            log.failure_reason = Some(reason.clone());
        }
        if let Some(resolution) = self.resolution {
            log.resolution = Some(resolution);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_preferences_defaults_when_absent() {
        let user: User = serde_json::from_value(serde_json::json!({
            "id": Uuid::new_v4(),
            "email": "a@example.com"
        }))
        .unwrap();

        let prefs = user.reminder_preferences();
        assert!(prefs.enabled);
        assert_eq!(prefs.advance_minutes, 15);
        assert_eq!(prefs.escalation_minutes, 30);
        assert!(!prefs.quiet_hours.enabled);
        assert_eq!(prefs.quiet_hours.start.to_string(), "22:00");
        assert_eq!(prefs.quiet_hours.end.to_string(), "07:00");
        assert!(user.active_subscription().is_none());
    }

    #[test]
    fn test_blank_endpoint_is_not_an_active_subscription() {
        let mut user = User {
            id: Uuid::new_v4(),
            email: "a@example.com".to_string(),
            notification_preferences: NotificationPreferences::default(),
        };
        UserPatch::set_subscription(PushSubscription {
            endpoint: "  ".to_string(),
            keys: PushSubscriptionKeys {
                p256dh: "k".to_string(),
                auth: "a".to_string(),
            },
        })
        .apply_to(&mut user);

        assert!(user.notification_preferences.push_subscription.is_some());
        assert!(user.active_subscription().is_none());
    }

    #[test]
    fn test_status_round_trips_through_strings() {
        for status in [
            NotificationStatus::Sent,
            NotificationStatus::Acknowledged,
            NotificationStatus::Snoozed,
            NotificationStatus::Failed,
        ] {
            assert_eq!(status.to_string().parse::<NotificationStatus>(), Ok(status));
        }
        assert!("delivered".parse::<NotificationStatus>().is_err());
    }

    #[test]
    fn test_escalation_state_mapping() {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();
        let mut marker = NotificationLog::new_escalation_marker(Uuid::new_v4(), Uuid::new_v4(), at, at);
        assert_eq!(marker.status, NotificationStatus::Sent);
        assert_eq!(marker.escalation_state(), Some(EscalationState::Pending));

        NotificationLogPatch::resolve(EscalationResolution::DoseLogged, at, None).apply_to(&mut marker);
        assert_eq!(marker.status, NotificationStatus::Acknowledged);
        assert_eq!(
            marker.escalation_state(),
            Some(EscalationState::Resolved {
                via: EscalationResolution::DoseLogged
            })
        );

        let advance = NotificationLog::new_advance(Uuid::new_v4(), Uuid::new_v4(), at, at);
        assert_eq!(advance.escalation_state(), None);
    }

    #[test]
    fn test_snoozed_escalation_row_is_not_pending() {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();
        let mut marker = NotificationLog::new_escalation_marker(Uuid::new_v4(), Uuid::new_v4(), at, at);
        marker.status = NotificationStatus::Snoozed;
        assert_eq!(marker.escalation_state(), None);
    }

    #[test]
    fn test_legacy_acknowledged_marker_reads_as_escalated() {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();
        let mut marker = NotificationLog::new_escalation_marker(Uuid::new_v4(), Uuid::new_v4(), at, at);
        marker.status = NotificationStatus::Acknowledged;
        assert_eq!(
            marker.escalation_state(),
            Some(EscalationState::Resolved {
                via: EscalationResolution::Escalated
            })
        );
    }

    #[test]
    fn test_filter_matches() {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();
        let log = NotificationLog::new_advance(Uuid::new_v4(), Uuid::new_v4(), at, at);

        let filter = NotificationLogFilter::advance_for_dose(log.user_id, log.medication_id, at, at);
        assert!(filter.matches(&log));

        let later = NotificationLogFilter::advance_for_dose(
            log.user_id,
            log.medication_id,
            at,
            at + chrono::Duration::seconds(1),
        );
        assert!(!later.matches(&log));
        assert!(!NotificationLogFilter::pending_escalations().matches(&log));
    }
}
