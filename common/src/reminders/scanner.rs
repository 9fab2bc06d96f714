// Reminder scanner: finds doses whose advance notification is due and sends
// each at most once per day

use super::{EscalationChecker, NotificationDispatcher, ReminderOptions, ReminderStores};
use crate::clock::Clock;
use crate::errors::{DatabaseError, SchedulerError};
use crate::models::{Medication, NotificationLog, NotificationLogFilter, User};
use crate::reminders::DispatchOutcome;
use crate::schedule::{scheduled_instant_today, should_notify, start_of_day, TimeOfDay};
use crate::telemetry;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

/// Counts from one reminder scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub users: u32,
    /// Doses whose notify window contained the current minute
    pub due: u32,
    pub sent: u32,
    /// Already notified today
    pub skipped: u32,
    /// Dispatcher declined or delivery failed; retried next run
    pub not_sent: u32,
    pub failed: u32,
}

enum CandidateResult {
    Sent,
    AlreadyNotified,
    NotSent(DispatchOutcome),
}

/// Time and day boundaries shared by every candidate of one scan
struct ScanInstant {
    now: DateTime<Utc>,
    current: TimeOfDay,
    today: DateTime<Utc>,
}

pub struct ReminderScanner {
    stores: ReminderStores,
    dispatcher: Arc<NotificationDispatcher>,
    escalations: Arc<EscalationChecker>,
    clock: Arc<dyn Clock>,
    options: ReminderOptions,
}

impl ReminderScanner {
    pub fn new(
        stores: ReminderStores,
        dispatcher: Arc<NotificationDispatcher>,
        escalations: Arc<EscalationChecker>,
        clock: Arc<dyn Clock>,
        options: ReminderOptions,
    ) -> Self {
        Self {
            stores,
            dispatcher,
            escalations,
            clock,
            options,
        }
    }

    /// Run one scan over every user with reminders enabled
    ///
    /// Failing to load the user list aborts the run. Failures while handling a
    /// single user or dose are logged and counted, and the scan continues.
    #[instrument(skip(self))]
    pub async fn check_medication_reminders(&self) -> Result<ScanSummary, SchedulerError> {
        let now = self.clock.now();
        let tz = self.options.wall_clock_tz;
        let instant = ScanInstant {
            now,
            current: TimeOfDay::from_instant(now, tz),
            today: start_of_day(now, tz),
        };

        tracing::debug!(current = %instant.current, "Checking medication reminders");

        let users = self.stores.users.find_users_with_reminders_enabled().await?;
        let mut summary = ScanSummary {
            users: users.len() as u32,
            ..Default::default()
        };

        for user in &users {
            if let Err(e) = self.scan_user(user, &instant, &mut summary).await {
                tracing::error!(user_id = %user.id, error = %e, "Failed to scan reminders for user");
                summary.failed += 1;
            }
        }

        tracing::info!(
            users = summary.users,
            sent = summary.sent,
            skipped = summary.skipped,
            not_sent = summary.not_sent,
            failed = summary.failed,
            "Reminder check complete"
        );

        Ok(summary)
    }

    #[instrument(skip(self, user, instant, summary), fields(user_id = %user.id))]
    async fn scan_user(
        &self,
        user: &User,
        instant: &ScanInstant,
        summary: &mut ScanSummary,
    ) -> Result<(), DatabaseError> {
        let advance_minutes = user.reminder_preferences().advance_minutes;
        let medications = self
            .stores
            .medications
            .find_active_medications_with_schedule(user.id)
            .await?;

        for medication in &medications {
            for raw_time in &medication.frequency.specific_times {
                let time = match TimeOfDay::parse(raw_time) {
                    Ok(time) => time,
                    Err(e) => {
                        tracing::warn!(
                            medication_id = %medication.id,
                            time = %raw_time,
                            error = %e,
                            "Skipping unparseable dose time"
                        );
                        continue;
                    }
                };

                if !should_notify(
                    time,
                    instant.current,
                    advance_minutes,
                    self.options.notification_window_minutes,
                ) {
                    continue;
                }
                summary.due += 1;

                match self.process_dose(user, medication, time, instant).await {
                    Ok(CandidateResult::Sent) => summary.sent += 1,
                    Ok(CandidateResult::AlreadyNotified) => summary.skipped += 1,
                    Ok(CandidateResult::NotSent(outcome)) => {
                        tracing::debug!(medication_id = %medication.id, outcome = %outcome, "Reminder not sent");
                        summary.not_sent += 1;
                    }
                    Err(e) => {
                        tracing::error!(
                            medication_id = %medication.id,
                            time = %time,
                            error = %e,
                            "Failed to process dose reminder"
                        );
                        summary.failed += 1;
                    }
                }
            }
        }

        Ok(())
    }

    async fn process_dose(
        &self,
        user: &User,
        medication: &Medication,
        time: TimeOfDay,
        instant: &ScanInstant,
    ) -> Result<CandidateResult, SchedulerError> {
        let scheduled_time = scheduled_instant_today(instant.now, time, self.options.wall_clock_tz)?;

        let existing = self
            .stores
            .logs
            .find_one(&NotificationLogFilter::advance_for_dose(
                user.id,
                medication.id,
                scheduled_time,
                instant.today,
            ))
            .await?;
        if existing.is_some() {
            return Ok(CandidateResult::AlreadyNotified);
        }

        // Re-read so a subscription cleared earlier in this scan is honored
        let Some(user) = self.stores.users.find_user_by_id(user.id).await? else {
            return Ok(CandidateResult::NotSent(DispatchOutcome::NoSubscription));
        };

        let outcome = self
            .dispatcher
            .dispatch(&user, medication, scheduled_time)
            .await;
        if !outcome.is_sent() {
            return Ok(CandidateResult::NotSent(outcome));
        }

        let record = NotificationLog::new_advance(user.id, medication.id, scheduled_time, instant.now);
        match self.stores.logs.create(&record).await {
            Ok(()) => {}
            Err(DatabaseError::DuplicateKey(_)) => {
                tracing::warn!(
                    medication_id = %medication.id,
                    scheduled_time = %scheduled_time,
                    "Advance reminder was logged concurrently"
                );
                return Ok(CandidateResult::AlreadyNotified);
            }
            Err(e) => return Err(e.into()),
        }
        telemetry::record_notification_sent("advance");

        if let Err(e) = self
            .escalations
            .schedule_escalation(&user, medication.id, scheduled_time)
            .await
        {
            tracing::error!(
                medication_id = %medication.id,
                error = %e,
                "Failed to schedule escalation"
            );
        }

        Ok(CandidateResult::Sent)
    }
}
