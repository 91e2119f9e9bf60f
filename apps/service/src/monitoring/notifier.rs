use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error, warn};

use super::matcher::{self, MatchRule};
use crate::database::Database;
use crate::database::models::{Monitor, Snapshot, User};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Outbound delivery channel for monitor notifications.
///
/// Delivery is fire-and-forget from the engine's perspective: failures are
/// logged, never retried.
#[async_trait]
pub trait NotifyChannel: Send + Sync {
    /// Channel name, used in logs.
    fn name(&self) -> &str;

    async fn send(&self, user: &User, message: &str, snapshot: &Snapshot)
    -> Result<(), NotifyError>;
}

/// Log channel (writes to tracing).
pub struct LogChannel;

#[async_trait]
impl NotifyChannel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(
        &self,
        user: &User,
        message: &str,
        snapshot: &Snapshot,
    ) -> Result<(), NotifyError> {
        tracing::info!(
            monitor = %snapshot.monitor_uuid,
            user = %user.email,
            "notification: {message}"
        );
        Ok(())
    }
}

/// Webhook channel: posts the notification as JSON.
pub struct WebhookChannel {
    url: String,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), client: reqwest::Client::new() }
    }
}

#[async_trait]
impl NotifyChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(
        &self,
        user: &User,
        message: &str,
        snapshot: &Snapshot,
    ) -> Result<(), NotifyError> {
        let payload = serde_json::json!({
            "to": user.email,
            "message": message,
            "snapshot": {
                "id": snapshot.id,
                "monitor_uuid": snapshot.monitor_uuid,
                "http_status_code": snapshot.http_status_code,
                "is_error": snapshot.is_error,
                "is_match": snapshot.is_match,
                "time_total": snapshot.time_total,
                "created_at": snapshot.created_at,
            },
        });

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifyError::Delivery(format!("webhook request failed: {e}")))?;

        if response.status().is_success() {
            debug!("webhook notification sent");
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(NotifyError::Delivery(format!("webhook returned {status}: {body}")))
        }
    }
}

/// Notification decision engine - compares consecutive snapshots of a
/// monitor and dispatches at most one notification per completed snapshot.
pub struct NotificationEngine {
    database: Arc<dyn Database>,
    channels: Vec<Arc<dyn NotifyChannel>>,
}

impl NotificationEngine {
    pub fn new(database: Arc<dyn Database>, channels: Vec<Arc<dyn NotifyChannel>>) -> Self {
        Self { database, channels }
    }

    /// Evaluate a newly completed snapshot against its predecessor and
    /// notify the monitor's owner on a state transition.
    pub async fn handle_snapshot(&self, monitor: &Monitor, snapshot: &Snapshot) -> Result<()> {
        let previous = match snapshot.id {
            Some(id) => self.database.snapshot_before(monitor.uuid, id).await?,
            None => None,
        };

        let Some(message) = decide(previous.as_ref(), snapshot, &monitor.match_rule) else {
            return Ok(());
        };

        let Some(user) = self.database.get_user_by_uuid(monitor.user_uuid).await? else {
            error!(monitor = %monitor.uuid, user = %monitor.user_uuid, "owner not found, dropping notification");
            return Ok(());
        };

        for channel in &self.channels {
            let channel = Arc::clone(channel);
            let user = user.clone();
            let message = message.clone();
            let snapshot = snapshot.clone();
            tokio::spawn(async move {
                if let Err(e) = channel.send(&user, &message, &snapshot).await {
                    warn!(channel = channel.name(), "notification delivery failed: {e}");
                }
            });
        }

        Ok(())
    }
}

/// Pure decision: `Some(message)` when the state transition warrants a
/// notification.
///
/// Suppressed when neither `is_match` nor `is_error` changed relative to the
/// preceding snapshot, and on a first-ever snapshot with both flags false.
pub fn decide(
    previous: Option<&Snapshot>,
    current: &Snapshot,
    rule: &MatchRule,
) -> Option<String> {
    match previous {
        Some(previous) => {
            if previous.is_match == current.is_match && previous.is_error == current.is_error {
                return None;
            }
        }
        None => {
            if !current.is_match && !current.is_error {
                return None;
            }
        }
    }

    Some(compose_message(current, rule))
}

/// Message composition; error state short-circuits match reporting.
fn compose_message(snapshot: &Snapshot, rule: &MatchRule) -> String {
    if !snapshot.is_error && !snapshot.is_match {
        "recovered to normal".to_string()
    } else if snapshot.is_error {
        format!("request error, {}", snapshot.error_message)
    } else {
        matcher::for_snapshot(rule, snapshot).message()
    }
}
