// Escalation markers: creation after an advance reminder and the periodic
// check that either closes them silently or sends the follow-up push

use super::{NotificationDispatcher, ReminderOptions, ReminderStores};
use crate::clock::Clock;
use crate::errors::{DatabaseError, SchedulerError};
use crate::models::{
    EscalationResolution, EscalationState, NotificationLog, NotificationLogFilter,
    NotificationLogPatch, User,
};
use crate::schedule::is_within_window;
use crate::telemetry;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Counts from one escalation check
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EscalationSummary {
    /// Markers pending at the start of the run
    pub pending: u32,
    pub not_due: u32,
    pub escalated: u32,
    pub dose_logged: u32,
    /// Owning user or medication disappeared
    pub orphaned: u32,
    /// User set `escalation_minutes` to zero after the marker was created
    pub disabled: u32,
    /// Due but the follow-up push was not delivered; retried next run
    pub retry: u32,
    pub failed: u32,
}

enum MarkerResult {
    NotDue,
    Disabled,
    Resolved(EscalationResolution),
    Retry,
}

pub struct EscalationChecker {
    stores: ReminderStores,
    dispatcher: Arc<NotificationDispatcher>,
    clock: Arc<dyn Clock>,
    options: ReminderOptions,
}

impl EscalationChecker {
    pub fn new(
        stores: ReminderStores,
        dispatcher: Arc<NotificationDispatcher>,
        clock: Arc<dyn Clock>,
        options: ReminderOptions,
    ) -> Self {
        Self {
            stores,
            dispatcher,
            clock,
            options,
        }
    }

    /// Create the pending marker for a dose whose advance reminder went out
    ///
    /// Returns `None` when the user disabled escalation (`escalation_minutes`
    /// of zero) or a marker for the same dose already exists.
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn schedule_escalation(
        &self,
        user: &User,
        medication_id: Uuid,
        scheduled_time: DateTime<Utc>,
    ) -> Result<Option<NotificationLog>, DatabaseError> {
        if user.reminder_preferences().escalation_minutes == 0 {
            tracing::debug!("Escalation disabled for user");
            return Ok(None);
        }

        let marker = NotificationLog::new_escalation_marker(
            user.id,
            medication_id,
            scheduled_time,
            self.clock.now(),
        );

        match self.stores.logs.create(&marker).await {
            Ok(()) => {
                tracing::debug!(marker_id = %marker.id, "Escalation marker created");
                Ok(Some(marker))
            }
            Err(DatabaseError::DuplicateKey(_)) => {
                tracing::debug!("Escalation marker already exists");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Evaluate every pending marker
    ///
    /// Markers are not bounded by age: one that was due while a run was
    /// missed stays pending and is re-read on every run until retention
    /// purges it.
    #[instrument(skip(self))]
    pub async fn check_escalation_reminders(&self) -> Result<EscalationSummary, SchedulerError> {
        let now = self.clock.now();

        let markers: Vec<NotificationLog> = self
            .stores
            .logs
            .find(&NotificationLogFilter::pending_escalations())
            .await?
            .into_iter()
            .filter(|log| log.escalation_state() == Some(EscalationState::Pending))
            .collect();
        telemetry::update_pending_escalations(markers.len());

        let mut summary = EscalationSummary {
            pending: markers.len() as u32,
            ..Default::default()
        };

        for marker in &markers {
            match self.evaluate_marker(marker, now).await {
                Ok(MarkerResult::NotDue) => summary.not_due += 1,
                Ok(MarkerResult::Disabled) => summary.disabled += 1,
                Ok(MarkerResult::Retry) => summary.retry += 1,
                Ok(MarkerResult::Resolved(via)) => match via {
                    EscalationResolution::Escalated => summary.escalated += 1,
                    EscalationResolution::DoseLogged => summary.dose_logged += 1,
                    EscalationResolution::EscalationFailed => summary.orphaned += 1,
                },
                Err(e) => {
                    tracing::error!(
                        marker_id = %marker.id,
                        user_id = %marker.user_id,
                        medication_id = %marker.medication_id,
                        error = %e,
                        "Failed to evaluate escalation marker"
                    );
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            pending = summary.pending,
            escalated = summary.escalated,
            dose_logged = summary.dose_logged,
            retry = summary.retry,
            disabled = summary.disabled,
            "Escalation check complete"
        );

        Ok(summary)
    }

    #[instrument(
        skip(self, marker),
        fields(marker_id = %marker.id, medication_id = %marker.medication_id)
    )]
    async fn evaluate_marker(
        &self,
        marker: &NotificationLog,
        now: DateTime<Utc>,
    ) -> Result<MarkerResult, DatabaseError> {
        let Some(user) = self.stores.users.find_user_by_id(marker.user_id).await? else {
            self.resolve(marker, EscalationResolution::EscalationFailed, now, Some("User no longer exists"))
                .await?;
            return Ok(MarkerResult::Resolved(EscalationResolution::EscalationFailed));
        };

        let escalation_minutes = user.reminder_preferences().escalation_minutes;
        if escalation_minutes == 0 {
            self.resolve(
                marker,
                EscalationResolution::EscalationFailed,
                now,
                Some("Escalation disabled by user"),
            )
            .await?;
            return Ok(MarkerResult::Disabled);
        }

        let escalation_time = marker.scheduled_time + Duration::minutes(escalation_minutes as i64);
        if !is_within_window(now, escalation_time, self.options.escalation_window) {
            return Ok(MarkerResult::NotDue);
        }

        let Some(medication) = self
            .stores
            .medications
            .find_medication_by_id(marker.medication_id)
            .await?
        else {
            self.resolve(
                marker,
                EscalationResolution::EscalationFailed,
                now,
                Some("Medication no longer exists"),
            )
            .await?;
            return Ok(MarkerResult::Resolved(EscalationResolution::EscalationFailed));
        };

        let dose_logged = self
            .stores
            .doses
            .has_dose_near(medication.id, marker.scheduled_time, self.options.dose_tolerance)
            .await?;

        if dose_logged {
            self.resolve(marker, EscalationResolution::DoseLogged, now, None)
                .await?;
            return Ok(MarkerResult::Resolved(EscalationResolution::DoseLogged));
        }

        let outcome = self
            .dispatcher
            .dispatch(&user, &medication, marker.scheduled_time)
            .await;
        if !outcome.is_sent() {
            tracing::debug!(outcome = %outcome, "Escalation not delivered, marker stays pending");
            return Ok(MarkerResult::Retry);
        }

        telemetry::record_notification_sent("escalation");
        // Resolved after the first delivery; a dose is never escalated twice
        self.resolve(marker, EscalationResolution::Escalated, now, None)
            .await?;
        Ok(MarkerResult::Resolved(EscalationResolution::Escalated))
    }

    async fn resolve(
        &self,
        marker: &NotificationLog,
        via: EscalationResolution,
        now: DateTime<Utc>,
        reason: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let patch = NotificationLogPatch::resolve(via, now, reason.map(str::to_string));
        self.stores.logs.update_by_id(marker.id, &patch).await?;

        telemetry::record_escalation_resolved(&via.to_string());
        tracing::info!(via = %via, "Escalation marker resolved");
        Ok(())
    }
}
