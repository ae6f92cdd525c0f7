//! Notification delivery

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::format::format_intent;
use super::intent::NotificationIntent;

const TELEGRAM_API: &str = "https://api.telegram.org";

/// Successful delivery of one intent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    /// Number of targets that accepted the message
    pub delivered: usize,
}

/// Sink for notification intents
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, intent: &NotificationIntent) -> Result<Ack, DispatchError>;
}

/// Notification target
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NotifyTarget {
    /// Log to tracing
    Log,
    /// Telegram Bot API `sendMessage`
    Telegram { bot_token: String, chat_id: String },
    /// HTTP webhook
    Webhook {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

/// Formats intents and sends them to every configured target
pub struct Notifier {
    client: reqwest::Client,
    targets: Vec<NotifyTarget>,
    telegram_api: String,
}

impl Notifier {
    /// Create a new notifier
    pub fn new(targets: Vec<NotifyTarget>, timeout: Duration) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            targets,
            telegram_api: TELEGRAM_API.to_string(),
        })
    }

    /// Send one intent to all targets; any target failing fails the dispatch
    pub async fn notify(&self, intent: &NotificationIntent) -> Result<Ack, DispatchError> {
        if self.targets.is_empty() {
            return Err(DispatchError::NotConfigured);
        }

        let message = format_intent(intent);
        let mut errors = Vec::new();
        let mut delivered = 0;

        for target in &self.targets {
            match self.notify_target(intent, target, &message).await {
                Ok(()) => delivered += 1,
                Err(e) => errors.push(e),
            }
        }

        match errors.len() {
            0 => Ok(Ack { delivered }),
            1 => Err(errors.remove(0)),
            _ => Err(DispatchError::Multiple(errors)),
        }
    }

    /// Send notification to a single target
    async fn notify_target(
        &self,
        intent: &NotificationIntent,
        target: &NotifyTarget,
        message: &str,
    ) -> Result<(), DispatchError> {
        match target {
            NotifyTarget::Log => {
                tracing::warn!(
                    kind = intent.kind(),
                    subject = %intent.subject(),
                    "Notification: {}",
                    message
                );
                Ok(())
            }
            NotifyTarget::Telegram { bot_token, chat_id } => {
                self.send_telegram(bot_token, chat_id, message).await
            }
            NotifyTarget::Webhook { url, headers } => {
                self.send_webhook(intent, url, headers, message).await
            }
        }
    }

    async fn send_telegram(&self, bot_token: &str, chat_id: &str, message: &str) -> Result<(), DispatchError> {
        let url = format!("{}/bot{}/sendMessage", self.telegram_api, bot_token);
        let payload = serde_json::json!({
            "chat_id": chat_id,
            "text": message,
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            // The URL carries the bot token, keep it out of the error text
            .map_err(|e| DispatchError::Transport(e.without_url().to_string()))?;

        if !response.status().is_success() {
            return Err(DispatchError::Status(response.status().as_u16()));
        }

        tracing::debug!(chat_id = %chat_id, "Telegram notification sent");
        Ok(())
    }

    /// Send webhook notification
    async fn send_webhook(
        &self,
        intent: &NotificationIntent,
        url: &str,
        headers: &HashMap<String, String>,
        message: &str,
    ) -> Result<(), DispatchError> {
        let payload = serde_json::json!({
            "kind": intent.kind(),
            "subject": intent.subject(),
            "message": message,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        let mut request = self.client.post(url).json(&payload);

        for (key, value) in headers {
            request = request.header(key, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DispatchError::Transport(format!("Failed to send webhook: {}", e)))?;

        if !response.status().is_success() {
            return Err(DispatchError::Status(response.status().as_u16()));
        }

        tracing::debug!(url = %url, "Webhook notification sent");
        Ok(())
    }
}

#[async_trait]
impl Dispatcher for Notifier {
    async fn dispatch(&self, intent: &NotificationIntent) -> Result<Ack, DispatchError> {
        self.notify(intent).await
    }
}

/// Dispatcher that records what it was asked to send.
///
/// Subjects listed with [`RecordingDispatcher::fail_on`] are rejected.
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    sent: Mutex<Vec<NotificationIntent>>,
    failing: Mutex<Vec<String>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(&self, subject: &str) {
        self.failing.lock().push(subject.to_string());
    }

    pub fn recover(&self) {
        self.failing.lock().clear();
    }

    pub fn sent(&self) -> Vec<NotificationIntent> {
        self.sent.lock().clone()
    }

    pub fn take(&self) -> Vec<NotificationIntent> {
        std::mem::take(&mut *self.sent.lock())
    }
}

#[async_trait]
impl Dispatcher for RecordingDispatcher {
    async fn dispatch(&self, intent: &NotificationIntent) -> Result<Ack, DispatchError> {
        let failing = self.failing.lock().iter().any(|s| s == intent.subject());
        if failing {
            return Err(DispatchError::Transport(format!("rejected {}", intent.subject())));
        }
        self.sent.lock().push(intent.clone());
        Ok(Ack { delivered: 1 })
    }
}

/// Notification errors
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Target returned status {0}")]
    Status(u16),

    #[error("No notification targets configured")]
    NotConfigured,

    #[error("Multiple notification failures: {0:?}")]
    Multiple(Vec<DispatchError>),
}
