// Upstream RPC access
pub mod rpc;

// Alert definitions, evaluation and delivery
pub mod alerts;

// Token snapshots and market data
pub mod market;

// Polling loop
pub mod monitor;

pub mod config;

// Re-export commonly used types for convenience
pub use alerts::{AlertStore, EvaluationResult, MemoryAlertStore, Notifier};
pub use config::AppConfig;
pub use monitor::{MonitorSettings, MonitoringService};
pub use rpc::{ConnectionManager, RetryOptions};
