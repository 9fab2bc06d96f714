// Notification log retention

use crate::clock::Clock;
use crate::errors::SchedulerError;
use crate::store::NotificationLogStore;
use crate::telemetry;
use chrono::Duration;
use std::sync::Arc;
use tracing::instrument;

/// Deletes notification rows older than the retention period
pub struct LogRetention {
    logs: Arc<dyn NotificationLogStore>,
    clock: Arc<dyn Clock>,
    retention: Duration,
}

impl LogRetention {
    pub fn new(logs: Arc<dyn NotificationLogStore>, clock: Arc<dyn Clock>, retention: Duration) -> Self {
        Self {
            logs,
            clock,
            retention,
        }
    }

    /// Remove rows whose `sent_at` is before now minus the retention period
    #[instrument(skip(self))]
    pub async fn cleanup_notification_logs(&self) -> Result<u64, SchedulerError> {
        let cutoff = self.clock.now() - self.retention;
        let deleted = self.logs.delete_sent_before(cutoff).await?;

        telemetry::record_logs_purged(deleted);
        tracing::info!(deleted = deleted, cutoff = %cutoff, "Cleaned up old notification logs");

        Ok(deleted)
    }
}
