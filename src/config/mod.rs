/// Configuration loading and validation

pub mod settings;

pub use settings::{AppConfig, ConfigError, LoggingConfig, MarketConfig, MonitorConfig, RetryConfig, RpcConfig, StoreConfig};
