// Push delivery: transport contract, Web Push client and dry-run transport

pub mod log;
pub mod payload;
pub mod web_push;

use crate::errors::PushError;
use crate::models::PushSubscription;
use async_trait::async_trait;

pub use log::LogPushTransport;
pub use payload::ReminderNotification;
pub use web_push::{VapidCredentials, WebPushTransport};

/// Delivers a JSON payload to a browser push subscription
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn send(&self, subscription: &PushSubscription, payload: &str) -> Result<(), PushError>;

    /// True when the subscription can never succeed again and should be dropped
    fn is_permanent_failure(&self, error: &PushError) -> bool {
        matches!(
            error,
            PushError::Gone { .. } | PushError::InvalidSubscription(_)
        )
    }
}
