// Medication reminder engine: dispatch, scanning, escalation and retention

pub mod dispatcher;
pub mod escalation;
pub mod retention;
pub mod scanner;

use crate::config::ReminderConfig;
use crate::errors::ScheduleError;
use crate::schedule::parse_timezone;
use crate::store::{DoseHistoryStore, MedicationStore, NotificationLogStore, UserStore};
use chrono::Duration;
use chrono_tz::Tz;
use std::sync::Arc;

pub use dispatcher::{DispatchOutcome, NotificationDispatcher};
pub use escalation::{EscalationChecker, EscalationSummary};
pub use retention::LogRetention;
pub use scanner::{ReminderScanner, ScanSummary};

/// Store handles shared by the reminder tasks
#[derive(Clone)]
pub struct ReminderStores {
    pub users: Arc<dyn UserStore>,
    pub medications: Arc<dyn MedicationStore>,
    pub doses: Arc<dyn DoseHistoryStore>,
    pub logs: Arc<dyn NotificationLogStore>,
}

impl ReminderStores {
    /// Use one backend for every contract
    pub fn from_shared<S>(store: Arc<S>) -> Self
    where
        S: UserStore + MedicationStore + DoseHistoryStore + NotificationLogStore + 'static,
    {
        Self {
            users: store.clone(),
            medications: store.clone(),
            doses: store.clone(),
            logs: store,
        }
    }
}

/// Tunables for the reminder tasks
#[derive(Debug, Clone, Copy)]
pub struct ReminderOptions {
    pub wall_clock_tz: Tz,
    pub notification_window_minutes: u32,
    pub escalation_window: Duration,
    pub dose_tolerance: Duration,
    pub retention: Duration,
}

impl ReminderOptions {
    pub fn from_config(config: &ReminderConfig) -> Result<Self, ScheduleError> {
        Ok(Self {
            wall_clock_tz: parse_timezone(&config.wall_clock_timezone)?,
            notification_window_minutes: config.notification_window_minutes,
            escalation_window: Duration::minutes(config.escalation_window_minutes as i64),
            dose_tolerance: Duration::minutes(config.dose_tolerance_minutes as i64),
            retention: Duration::days(config.retention_days as i64),
        })
    }
}

impl Default for ReminderOptions {
    fn default() -> Self {
        Self {
            wall_clock_tz: chrono_tz::UTC,
            notification_window_minutes: 5,
            escalation_window: Duration::minutes(5),
            dose_tolerance: Duration::hours(1),
            retention: Duration::days(30),
        }
    }
}
