/// Application configuration loaded from TOML

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::market::dexscreener::DEXSCREENER_API;
use crate::monitor::{MonitorSettings, SPL_TOKEN_PROGRAM_ID};
use crate::rpc::{EndpointConfig, ExponentialBackoff, RetryPolicy};

pub const RPC_URL_ENV: &str = "SOLANA_RPC_URL";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub monitor: MonitorConfig,
    pub retry: RetryConfig,
    pub rpc: RpcConfig,
    pub endpoints: Vec<EndpointConfig>,
    pub market: MarketConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub poll_interval_ms: u64,
    pub signature_limit: usize,
    pub token_program_id: String,
    pub inter_transaction_delay_ms: u64,
    pub idle_delay_ms: u64,
    pub max_consecutive_errors: u32,
    pub base_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub targeted_check_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_factor: f64,
    pub retryable_errors: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RpcConfig {
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MarketConfig {
    pub dexscreener_url: String,
    pub timeout_secs: u64,
    pub cache_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub alerts_file: String,
    pub bus_capacity: usize,
}

/// Log output of the binary. `RUST_LOG` takes precedence over `filter`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub directory: String,
    /// Daily files are named `<file_prefix>.<date>`
    pub file_prefix: String,
    pub filter: String,
    /// JSON lines in the file; plain text otherwise
    pub json_file: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 60_000,
            signature_limit: 10,
            token_program_id: SPL_TOKEN_PROGRAM_ID.to_string(),
            inter_transaction_delay_ms: 100,
            idle_delay_ms: 5_000,
            max_consecutive_errors: 5,
            base_retry_delay_ms: 1_000,
            max_retry_delay_ms: 60_000,
            targeted_check_interval_ms: None,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_retries: policy.max_retries,
            base_delay_ms: policy.backoff.base.as_millis() as u64,
            max_delay_ms: policy.backoff.cap.as_millis() as u64,
            jitter_factor: policy.backoff.jitter_factor,
            retryable_errors: policy.retryable_errors,
        }
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
        }
    }
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            dexscreener_url: DEXSCREENER_API.to_string(),
            timeout_secs: 15,
            cache_secs: 30,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            alerts_file: "alerts.json".to_string(),
            bus_capacity: 1000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: "logs".to_string(),
            file_prefix: "mintwatch.log".to_string(),
            filter: "info".to_string(),
            json_file: true,
        }
    }
}

pub fn default_endpoints() -> Vec<EndpointConfig> {
    vec![
        EndpointConfig {
            url: "https://api.mainnet-beta.solana.com".to_string(),
            weight: 5,
            max_requests: 25,
            window_ms: 10_000,
        },
        EndpointConfig {
            url: "https://solana-api.projectserum.com".to_string(),
            weight: 3,
            max_requests: 20,
            window_ms: 10_000,
        },
    ]
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            monitor: MonitorConfig::default(),
            retry: RetryConfig::default(),
            rpc: RpcConfig::default(),
            endpoints: default_endpoints(),
            market: MarketConfig::default(),
            store: StoreConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Parses and validates a TOML file. Environment overrides are not applied.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` when given, otherwise the built-in defaults, then applies
    /// environment overrides and validates the result.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                info!(path, "Loading configuration");
                Self::load_from_file(path)?
            }
            None => {
                warn!("No config file given, using defaults");
                Self::default()
            }
        };

        if let Ok(url) = std::env::var(RPC_URL_ENV) {
            if !url.trim().is_empty() {
                config.set_primary_rpc(url.trim());
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Puts `url` first with the primary endpoint's weight and budget.
    pub fn set_primary_rpc(&mut self, url: &str) {
        self.endpoints.retain(|endpoint| endpoint.url != url);
        self.endpoints.insert(
            0,
            EndpointConfig {
                url: url.to_string(),
                weight: 10,
                max_requests: 50,
                window_ms: 10_000,
            },
        );
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.endpoints.is_empty() {
            return invalid("at least one RPC endpoint is required".to_string());
        }
        for endpoint in &self.endpoints {
            let parsed = url::Url::parse(&endpoint.url)
                .map_err(|e| ConfigError::Invalid(format!("endpoint url '{}': {}", endpoint.url, e)))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return invalid(format!("endpoint url '{}' must be http or https", endpoint.url));
            }
            if endpoint.weight == 0 {
                return invalid(format!("endpoint '{}' weight must be positive", endpoint.url));
            }
            if endpoint.max_requests == 0 || endpoint.window_ms == 0 {
                return invalid(format!("endpoint '{}' rate limit must be positive", endpoint.url));
            }
        }

        let monitor = &self.monitor;
        if monitor.poll_interval_ms == 0 {
            return invalid("monitor.poll_interval_ms must be positive".to_string());
        }
        if monitor.signature_limit == 0 {
            return invalid("monitor.signature_limit must be positive".to_string());
        }
        if monitor.targeted_check_interval_ms == Some(0) {
            return invalid("monitor.targeted_check_interval_ms must be positive".to_string());
        }
        if monitor.base_retry_delay_ms > monitor.max_retry_delay_ms {
            return invalid("monitor.base_retry_delay_ms exceeds max_retry_delay_ms".to_string());
        }

        let retry = &self.retry;
        if !(0.0..=1.0).contains(&retry.jitter_factor) {
            return invalid(format!("retry.jitter_factor {} outside [0, 1]", retry.jitter_factor));
        }
        if retry.base_delay_ms > retry.max_delay_ms {
            return invalid("retry.base_delay_ms exceeds max_delay_ms".to_string());
        }

        url::Url::parse(&self.market.dexscreener_url)
            .map_err(|e| ConfigError::Invalid(format!("market.dexscreener_url: {}", e)))?;

        let logging = &self.logging;
        if logging.directory.trim().is_empty() || logging.file_prefix.trim().is_empty() {
            return invalid("logging.directory and logging.file_prefix must be set".to_string());
        }
        tracing_subscriber::EnvFilter::try_new(&logging.filter)
            .map_err(|e| ConfigError::Invalid(format!("logging.filter '{}': {}", logging.filter, e)))?;
        Ok(())
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        let m = &self.monitor;
        MonitorSettings {
            poll_interval: Duration::from_millis(m.poll_interval_ms),
            signature_limit: m.signature_limit,
            token_program_id: m.token_program_id.clone(),
            inter_transaction_delay: Duration::from_millis(m.inter_transaction_delay_ms),
            idle_delay: Duration::from_millis(m.idle_delay_ms),
            max_consecutive_errors: m.max_consecutive_errors,
            base_retry_delay: Duration::from_millis(m.base_retry_delay_ms),
            max_retry_delay: Duration::from_millis(m.max_retry_delay_ms),
            targeted_check_interval: m.targeted_check_interval_ms.map(Duration::from_millis),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry.max_retries,
            retryable_errors: self.retry.retryable_errors.clone(),
            backoff: ExponentialBackoff::new(
                Duration::from_millis(self.retry.base_delay_ms),
                Duration::from_millis(self.retry.max_delay_ms),
                self.retry.jitter_factor,
            ),
        }
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.endpoints.len(), 2);
        assert_eq!(config.monitor_settings(), MonitorSettings::default());
        assert_eq!(config.retry_policy().max_retries, 3);
    }

    #[test]
    fn test_load_partial_file_keeps_defaults() {
        let file = write_config(
            r#"
            [monitor]
            poll_interval_ms = 15000
            targeted_check_interval_ms = 300000

            [[endpoints]]
            url = "https://rpc.example.com"
            weight = 7
            max_requests = 40
            window_ms = 10000
            "#,
        );

        let config = AppConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.monitor.poll_interval_ms, 15_000);
        assert_eq!(config.monitor.signature_limit, 10);
        assert_eq!(config.endpoints.len(), 1);
        assert_eq!(config.endpoints[0].weight, 7);
        assert_eq!(
            config.monitor_settings().targeted_check_interval,
            Some(Duration::from_secs(300))
        );
        assert_eq!(config.retry.retryable_errors, vec!["429", "rate limit", "timeout", "network"]);
        assert_eq!(config.logging.directory, "logs");
    }

    #[test]
    fn test_logging_section_overrides_defaults() {
        let file = write_config(
            r#"
            [logging]
            directory = "/var/log/mintwatch"
            filter = "warn,mintwatch=debug"
            json_file = false
            "#,
        );

        let config = AppConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.logging.directory, "/var/log/mintwatch");
        assert_eq!(config.logging.file_prefix, "mintwatch.log");
        assert_eq!(config.logging.filter, "warn,mintwatch=debug");
        assert!(!config.logging.json_file);
    }

    #[test]
    fn test_rejects_bad_log_filter() {
        let mut config = AppConfig::default();
        config.logging.filter = "mintwatch=loud".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.logging.filter = "info".to_string();
        config.logging.directory = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_endpoint() {
        let file = write_config(
            r#"
            [[endpoints]]
            url = "ftp://rpc.example.com"
            weight = 1
            max_requests = 1
            window_ms = 1000
            "#,
        );
        assert!(matches!(AppConfig::load_from_file(file.path()), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_out_of_range_jitter() {
        let mut config = AppConfig::default();
        config.retry.jitter_factor = 1.5;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_base_above_cap() {
        let mut config = AppConfig::default();
        config.retry.base_delay_ms = 60_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_error_surfaces() {
        let file = write_config("[monitor\npoll_interval_ms = ");
        assert!(matches!(AppConfig::load_from_file(file.path()), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_primary_rpc_goes_first_without_duplicates() {
        let mut config = AppConfig::default();
        config.set_primary_rpc("https://api.mainnet-beta.solana.com");
        assert_eq!(config.endpoints.len(), 2);
        assert_eq!(config.endpoints[0].url, "https://api.mainnet-beta.solana.com");
        assert_eq!(config.endpoints[0].weight, 10);
        assert_eq!(config.endpoints[0].max_requests, 50);
    }
}
