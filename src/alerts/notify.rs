use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use super::types::EvaluationResult;

#[derive(thiserror::Error, Debug)]
pub enum NotifyError {
    #[error("no subscribers on the alert bus")]
    NoSubscribers,
}

/// Fire-and-forget delivery of triggered alerts
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, recipient: &str, result: &EvaluationResult) -> Result<(), NotifyError>;
}

/// Renders the user-facing alert text.
pub fn format_alert_message(result: &EvaluationResult) -> String {
    let target = match &result.token_address {
        Some(token) => format!("Token: {}", token),
        None => "Monitoring: All new tokens".to_string(),
    };
    let conditions: Vec<String> = result
        .verdicts
        .triggered_groups()
        .into_iter()
        .map(|(name, verdict)| format!("- {}: {}", name, verdict.reason))
        .collect();

    format!(
        "Alert Triggered: {}\nTime: {}\n{}\n\nTriggered Conditions:\n{}",
        result.alert.name,
        result.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
        target,
        conditions.join("\n")
    )
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertNotification {
    pub recipient: String,
    pub alert_id: String,
    pub alert_name: String,
    pub token_address: Option<String>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AlertBus {
    tx: broadcast::Sender<AlertNotification>,
}

impl AlertBus {
    #[instrument]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        debug!(capacity, "AlertBus initialized");
        Self { tx }
    }

    #[instrument(skip(self, notification), fields(alert_id = %notification.alert_id))]
    pub fn publish(&self, notification: AlertNotification) -> Result<usize, NotifyError> {
        match self.tx.send(notification) {
            Ok(subscriber_count) => {
                info!(subscriber_count, "Published alert notification");
                Ok(subscriber_count)
            }
            Err(e) => {
                warn!(recipient = %e.0.recipient, "No subscribers for alert notification");
                Err(NotifyError::NoSubscribers)
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AlertNotification> {
        debug!("New subscriber added to alert bus");
        self.tx.subscribe()
    }
}

impl Default for AlertBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// Publishes formatted alerts on an [`AlertBus`]
pub struct BusNotifier {
    bus: AlertBus,
}

impl BusNotifier {
    pub fn new(bus: AlertBus) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl Notifier for BusNotifier {
    async fn notify(&self, recipient: &str, result: &EvaluationResult) -> Result<(), NotifyError> {
        self.bus
            .publish(AlertNotification {
                recipient: recipient.to_string(),
                alert_id: result.alert.id.clone(),
                alert_name: result.alert.name.clone(),
                token_address: result.token_address.clone(),
                message: format_alert_message(result),
                timestamp: result.timestamp,
            })
            .map(|_| ())
    }
}
