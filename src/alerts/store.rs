use async_trait::async_trait;
use dashmap::DashMap;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::types::{Alert, AlertWithOwner, HistoryRecord};

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("failed to read alerts file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse alerts: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Which active alerts a lookup returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertScope {
    /// Alerts without a token address, applied to every new token
    Global,
    /// Alerts pinned to one token address
    Targeted,
    All,
}

impl AlertScope {
    pub fn matches(&self, alert: &Alert) -> bool {
        match self {
            AlertScope::Global => alert.is_global(),
            AlertScope::Targeted => !alert.is_global(),
            AlertScope::All => true,
        }
    }
}

/// Persistence for alert definitions and trigger history
#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn find_active_alerts(&self, scope: AlertScope) -> Result<Vec<AlertWithOwner>, StoreError>;

    async fn create_history(&self, record: HistoryRecord) -> Result<(), StoreError>;
}

/// In-process store keyed by alert id
#[derive(Debug, Default)]
pub struct MemoryAlertStore {
    alerts: DashMap<String, AlertWithOwner>,
    history: RwLock<Vec<HistoryRecord>>,
}

impl MemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_alerts(alerts: Vec<AlertWithOwner>) -> Self {
        let store = Self::new();
        for alert in alerts {
            store.insert(alert);
        }
        store
    }

    /// Loads a JSON array of alert definitions.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let alerts: Vec<AlertWithOwner> = serde_json::from_str(&content)?;
        info!(path = %path.display(), alerts = alerts.len(), "Loaded alert definitions");
        Ok(Self::from_alerts(alerts))
    }

    pub fn insert(&self, alert: AlertWithOwner) {
        debug!(alert_id = %alert.alert.id, name = %alert.alert.name, "Storing alert");
        self.alerts.insert(alert.alert.id.clone(), alert);
    }

    pub fn remove(&self, alert_id: &str) -> Option<AlertWithOwner> {
        self.alerts.remove(alert_id).map(|(_, alert)| alert)
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    /// All history records in insertion order.
    pub async fn history(&self) -> Vec<HistoryRecord> {
        self.history.read().await.clone()
    }
}

#[async_trait]
impl AlertStore for MemoryAlertStore {
    async fn find_active_alerts(&self, scope: AlertScope) -> Result<Vec<AlertWithOwner>, StoreError> {
        let mut alerts: Vec<AlertWithOwner> = self
            .alerts
            .iter()
            .filter(|entry| entry.alert.is_active() && scope.matches(&entry.alert))
            .map(|entry| entry.value().clone())
            .collect();
        alerts.sort_by(|a, b| {
            a.alert
                .created_at
                .cmp(&b.alert.created_at)
                .then_with(|| a.alert.id.cmp(&b.alert.id))
        });
        Ok(alerts)
    }

    async fn create_history(&self, record: HistoryRecord) -> Result<(), StoreError> {
        debug!(alert_id = %record.alert_id, token = ?record.token_address, "Appending alert history");
        self.history.write().await.push(record);
        Ok(())
    }
}
