// Dry-run transport that only logs what would be delivered

use super::PushTransport;
use crate::errors::PushError;
use crate::models::PushSubscription;
use async_trait::async_trait;

/// Log-based push transport
///
/// Used for local development and `push.mode = "log"`. Every send succeeds.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPushTransport;

#[async_trait]
impl PushTransport for LogPushTransport {
    #[tracing::instrument(skip(self, subscription, payload), fields(endpoint = %subscription.endpoint))]
    async fn send(&self, subscription: &PushSubscription, payload: &str) -> Result<(), PushError> {
        tracing::info!(payload = payload, "Push notification (dry run)");
        Ok(())
    }
}
