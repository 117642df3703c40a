use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;
use veranda_core::errors::DomainError;

/// Out-of-band delivery channel for upgrade outcomes. The coordinator
/// resolves the recipient from stored identity claims before calling this.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, recipient: &str, subject: &str, body: &str)
        -> Result<(), DomainError>;
}

/// Writes notifications to the structured log instead of an external channel.
/// Default until a mail or push integration is wired in.
#[derive(Debug, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn send(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), DomainError> {
        info!(
            event_name = "notify.delivered",
            recipient = %recipient,
            subject = %subject,
            body = %body,
            "notification delivered"
        );
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentNotification {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

/// Test double that captures every notification.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentNotification>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self { sent: Mutex::new(Vec::new()), fail: true }
    }

    pub async fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), DomainError> {
        if self.fail {
            return Err(DomainError::Provider("notification channel down".to_string()));
        }
        self.sent.lock().await.push(SentNotification {
            recipient: recipient.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}
