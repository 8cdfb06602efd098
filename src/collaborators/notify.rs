use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
#[error("notification to {destination} failed: {reason}")]
pub struct NotifyError {
    pub destination: String,
    pub reason: String,
}

/// Outbound SMS/email. Delivery is advisory; callers never wait on it.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, destination: &str, message: &str) -> Result<(), NotifyError>;
}

/// Writes notifications to the log instead of a provider.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl NotificationSender for LogNotifier {
    async fn send(&self, destination: &str, message: &str) -> Result<(), NotifyError> {
        info!(destination, message, "notification dispatched");
        Ok(())
    }
}

/// Fire-and-forget: spawns the send and logs failures.
pub fn dispatch(notifier: Arc<dyn NotificationSender>, destination: String, message: String) {
    tokio::spawn(async move {
        if let Err(err) = notifier.send(&destination, &message).await {
            warn!(error = %err, "notification failed");
        }
    });
}
