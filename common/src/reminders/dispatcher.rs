// Notification dispatcher: precondition checks, payload delivery and
// subscription invalidation

use crate::clock::Clock;
use crate::models::{Medication, User, UserPatch};
use crate::push::{PushTransport, ReminderNotification};
use crate::quiet_hours::is_quiet_time;
use crate::schedule::TimeOfDay;
use crate::store::UserStore;
use crate::telemetry;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::fmt;
use std::sync::Arc;
use tracing::instrument;

/// Result of one dispatch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    NoSubscription,
    Disabled,
    QuietHours,
    /// Transport reported the subscription permanently invalid; it was cleared
    SubscriptionGone,
    TransientFailure,
}

impl DispatchOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, DispatchOutcome::Sent)
    }

    /// Skipped for a user-side reason rather than a delivery error
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            DispatchOutcome::NoSubscription | DispatchOutcome::Disabled | DispatchOutcome::QuietHours
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchOutcome::Sent => "sent",
            DispatchOutcome::NoSubscription => "no_subscription",
            DispatchOutcome::Disabled => "disabled",
            DispatchOutcome::QuietHours => "quiet_hours",
            DispatchOutcome::SubscriptionGone => "subscription_gone",
            DispatchOutcome::TransientFailure => "transient",
        }
    }
}

impl fmt::Display for DispatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sends reminder pushes to a single user's subscription
///
/// Never returns an error: every failure mode collapses into a
/// `DispatchOutcome` other than `Sent`.
pub struct NotificationDispatcher {
    users: Arc<dyn UserStore>,
    transport: Arc<dyn PushTransport>,
    clock: Arc<dyn Clock>,
    wall_clock_tz: Tz,
}

impl NotificationDispatcher {
    pub fn new(
        users: Arc<dyn UserStore>,
        transport: Arc<dyn PushTransport>,
        clock: Arc<dyn Clock>,
        wall_clock_tz: Tz,
    ) -> Self {
        Self {
            users,
            transport,
            clock,
            wall_clock_tz,
        }
    }

    /// Boolean form used by callers that only care whether a push went out
    pub async fn send_reminder(
        &self,
        user: &User,
        medication: &Medication,
        scheduled_time: DateTime<Utc>,
    ) -> bool {
        self.dispatch(user, medication, scheduled_time)
            .await
            .is_sent()
    }

    #[instrument(
        skip(self, user, medication),
        fields(user_id = %user.id, medication_id = %medication.id, outcome = tracing::field::Empty)
    )]
    pub async fn dispatch(
        &self,
        user: &User,
        medication: &Medication,
        scheduled_time: DateTime<Utc>,
    ) -> DispatchOutcome {
        let outcome = self.try_dispatch(user, medication, scheduled_time).await;
        tracing::Span::current().record("outcome", outcome.as_str());

        if outcome.is_precondition() {
            telemetry::record_notification_skipped(outcome.as_str());
        }
        outcome
    }

    async fn try_dispatch(
        &self,
        user: &User,
        medication: &Medication,
        scheduled_time: DateTime<Utc>,
    ) -> DispatchOutcome {
        let Some(subscription) = user.active_subscription() else {
            tracing::debug!("No push subscription");
            return DispatchOutcome::NoSubscription;
        };

        let preferences = user.reminder_preferences();
        if !preferences.enabled {
            tracing::debug!("Medication reminders disabled");
            return DispatchOutcome::Disabled;
        }

        let current = TimeOfDay::from_instant(self.clock.now(), self.wall_clock_tz);
        if is_quiet_time(&preferences.quiet_hours, current) {
            tracing::debug!(current = %current, "Quiet hours active");
            return DispatchOutcome::QuietHours;
        }

        let payload = match ReminderNotification::for_dose(medication, scheduled_time).to_json() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize push payload");
                telemetry::record_dispatch_failure("serialization");
                return DispatchOutcome::TransientFailure;
            }
        };

        match self.transport.send(subscription, &payload).await {
            Ok(()) => {
                tracing::info!(medication = %medication.name, "Push notification sent");
                DispatchOutcome::Sent
            }
            Err(e) if self.transport.is_permanent_failure(&e) => {
                tracing::warn!(error = %e, "Push subscription is no longer valid, removing it");
                telemetry::record_dispatch_failure("permanent");

                match self
                    .users
                    .update_user(user.id, &UserPatch::clear_subscription())
                    .await
                {
                    Ok(()) => telemetry::record_subscription_removed(),
                    Err(e) => tracing::error!(error = %e, "Failed to remove push subscription"),
                }
                DispatchOutcome::SubscriptionGone
            }
            Err(e) => {
                tracing::warn!(error = %e, "Push delivery failed");
                telemetry::record_dispatch_failure("transient");
                DispatchOutcome::TransientFailure
            }
        }
    }
}
