/// Multi-endpoint connection manager with rate-aware selection and retries

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::backoff::ExponentialBackoff;
use super::client::{
    ChainClient, ChainError, ConnectionFactory, MintAccount, ParsedTransaction, TokenHolder, TokenSupply,
};
use super::endpoint_pool::{EndpointConfig, EndpointPool, EndpointStatus};

pub const MIN_PRIORITY: u8 = 1;
pub const MAX_PRIORITY: u8 = 10;

pub fn default_retryable_errors() -> Vec<String> {
    ["429", "rate limit", "timeout", "network"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Manager-wide retry defaults
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retryable_errors: Vec<String>,
    pub backoff: ExponentialBackoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retryable_errors: default_retryable_errors(),
            backoff: ExponentialBackoff::default(),
        }
    }
}

/// Per-call retry options
#[derive(Debug, Clone)]
pub struct RetryOptions {
    pub priority: u8,
    /// Total attempts; zero still runs the operation once
    pub max_retries: u32,
    pub retryable_errors: Vec<String>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            priority: MIN_PRIORITY,
            max_retries: 3,
            retryable_errors: default_retryable_errors(),
        }
    }
}

impl RetryOptions {
    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn also_retry_on(mut self, substring: &str) -> Self {
        self.retryable_errors.push(substring.to_string());
        self
    }

    pub fn is_retryable(&self, error: &ChainError) -> bool {
        let text = error.to_string().to_lowercase();
        self.retryable_errors
            .iter()
            .any(|needle| text.contains(&needle.to_lowercase()))
    }
}

#[derive(Clone)]
struct Lease {
    endpoint: usize,
    client: Arc<dyn ChainClient>,
}

struct ManagerState {
    pool: EndpointPool,
    current: Option<Lease>,
}

/// Owns the endpoint pool and the single cached chain connection. Every
/// upstream call in the crate passes through [`ConnectionManager::with_retry`].
pub struct ConnectionManager {
    state: Mutex<ManagerState>,
    factory: Arc<dyn ConnectionFactory>,
    policy: RetryPolicy,
}

impl ConnectionManager {
    pub fn new(endpoints: &[EndpointConfig], factory: Arc<dyn ConnectionFactory>, policy: RetryPolicy) -> Self {
        info!(
            endpoints = endpoints.len(),
            max_retries = policy.max_retries,
            "Initializing ConnectionManager"
        );
        Self {
            state: Mutex::new(ManagerState {
                pool: EndpointPool::new(endpoints),
                current: None,
            }),
            factory,
            policy,
        }
    }

    /// Retry options seeded from the manager's policy
    pub fn retry_options(&self, priority: u8) -> RetryOptions {
        RetryOptions {
            priority,
            max_retries: self.policy.max_retries,
            retryable_errors: self.policy.retryable_errors.clone(),
        }
    }

    /// Returns the cached connection, opening one against the best-ranked
    /// endpoint when none is live. The call is recorded against the
    /// connection's endpoint either way.
    pub async fn get_connection(&self, priority: u8) -> Result<Arc<dyn ChainClient>, ChainError> {
        Ok(self.lease(priority, 0).await?.client)
    }

    async fn lease(&self, priority: u8, retry_count: u32) -> Result<Lease, ChainError> {
        let priority = priority.clamp(MIN_PRIORITY, MAX_PRIORITY);
        let mut state = self.state.lock().await;
        let now = Instant::now();

        let cached = state.current.clone();
        let lease = match cached {
            Some(lease) => lease,
            None => {
                let index = state.pool.best(priority, now).ok_or(ChainError::NoEndpoints)?;
                let url = state
                    .pool
                    .endpoint(index)
                    .map(|endpoint| endpoint.url.clone())
                    .ok_or(ChainError::NoEndpoints)?;

                let client = match self.factory.connect(&url) {
                    Ok(client) => client,
                    Err(e) => {
                        state.pool.record_error(index, now);
                        return Err(e);
                    }
                };

                debug!(endpoint = %url, priority, "Opened connection");
                let lease = Lease { endpoint: index, client };
                state.current = Some(lease.clone());
                lease
            }
        };

        state.pool.record_attempt(lease.endpoint, priority, retry_count, now);
        Ok(lease)
    }

    /// Marks the current endpoint as failed and forces re-selection.
    pub async fn handle_error(&self, error: &ChainError) {
        let mut state = self.state.lock().await;
        if let Some(lease) = state.current.take() {
            state.pool.record_error(lease.endpoint, Instant::now());
            warn!(endpoint = lease.endpoint, error = %error, "Connection error, dropping cached connection");
        }
    }

    async fn note_failure(&self, lease: &Lease, drop_connection: bool) {
        let mut state = self.state.lock().await;
        state.pool.record_error(lease.endpoint, Instant::now());

        if !drop_connection {
            return;
        }
        // Another caller may already have replaced the handle
        let same_handle = state
            .current
            .as_ref()
            .map_or(false, |current| Arc::ptr_eq(&current.client, &lease.client));
        if same_handle {
            state.current = None;
        }
    }

    /// Runs `operation` against a managed connection.
    ///
    /// Failures are recorded against the serving endpoint first. Errors whose
    /// text matches a retryable substring are retried after a backoff delay
    /// with priority raised by one (capped) and a fresh endpoint selection;
    /// anything else propagates immediately.
    pub async fn with_retry<T, F, Fut>(&self, options: RetryOptions, operation: F) -> Result<T, ChainError>
    where
        F: Fn(Arc<dyn ChainClient>) -> Fut,
        Fut: Future<Output = Result<T, ChainError>>,
    {
        let max_attempts = options.max_retries.max(1);
        let mut priority = options.priority.clamp(MIN_PRIORITY, MAX_PRIORITY);
        let mut attempt = 0u32;

        loop {
            let lease = self.lease(priority, attempt).await?;

            let error = match operation(lease.client.clone()).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            let retryable = options.is_retryable(&error);
            self.note_failure(&lease, retryable).await;
            attempt += 1;

            if !retryable {
                debug!(error = %error, attempt, "Non-retryable upstream error");
                return Err(error);
            }
            if attempt >= max_attempts {
                warn!(error = %error, attempts = attempt, "Retries exhausted");
                return Err(error);
            }

            let delay = self.policy.backoff.delay(attempt - 1);
            warn!(
                error = %error,
                attempt,
                max_attempts,
                priority,
                delay_ms = delay.as_millis() as u64,
                "Retryable upstream error, backing off"
            );
            sleep(delay).await;
            priority = (priority + 1).min(MAX_PRIORITY);
        }
    }

    pub async fn recent_signatures(
        &self,
        address: &str,
        limit: usize,
        options: RetryOptions,
    ) -> Result<Vec<String>, ChainError> {
        self.with_retry(options, |client| async move { client.signatures_for_address(address, limit).await })
            .await
    }

    pub async fn parsed_transaction(
        &self,
        signature: &str,
        options: RetryOptions,
    ) -> Result<Option<ParsedTransaction>, ChainError> {
        self.with_retry(options, |client| async move { client.parsed_transaction(signature).await })
            .await
    }

    pub async fn mint_account(&self, address: &str, options: RetryOptions) -> Result<Option<MintAccount>, ChainError> {
        self.with_retry(options, |client| async move { client.mint_account(address).await })
            .await
    }

    pub async fn token_supply(&self, address: &str, options: RetryOptions) -> Result<TokenSupply, ChainError> {
        self.with_retry(options, |client| async move { client.token_supply(address).await })
            .await
    }

    pub async fn largest_accounts(&self, address: &str, options: RetryOptions) -> Result<Vec<TokenHolder>, ChainError> {
        self.with_retry(options, |client| async move { client.largest_accounts(address).await })
            .await
    }

    pub async fn endpoint_status(&self) -> Vec<EndpointStatus> {
        let state = self.state.lock().await;
        state.pool.snapshot(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FlakyClient {
        failures: std::sync::Mutex<VecDeque<ChainError>>,
        calls: AtomicUsize,
    }

    impl FlakyClient {
        fn failing(errors: Vec<ChainError>) -> Arc<Self> {
            Arc::new(Self {
                failures: std::sync::Mutex::new(errors.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChainClient for FlakyClient {
        async fn signatures_for_address(&self, _address: &str, _limit: usize) -> Result<Vec<String>, ChainError> {
            Ok(vec![])
        }

        async fn parsed_transaction(&self, _signature: &str) -> Result<Option<ParsedTransaction>, ChainError> {
            Ok(None)
        }

        async fn mint_account(&self, _address: &str) -> Result<Option<MintAccount>, ChainError> {
            Ok(None)
        }

        async fn token_supply(&self, _address: &str) -> Result<TokenSupply, ChainError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.failures.lock().unwrap().pop_front() {
                Some(error) => Err(error),
                None => Ok(TokenSupply {
                    amount: 1_000,
                    decimals: 0,
                    ui_amount: 1_000.0,
                }),
            }
        }

        async fn largest_accounts(&self, _address: &str) -> Result<Vec<TokenHolder>, ChainError> {
            Ok(vec![])
        }
    }

    struct MapFactory {
        clients: HashMap<String, Arc<FlakyClient>>,
        connects: std::sync::Mutex<Vec<String>>,
    }

    impl MapFactory {
        fn new(clients: Vec<(&str, Arc<FlakyClient>)>) -> Arc<Self> {
            Arc::new(Self {
                clients: clients.into_iter().map(|(url, c)| (url.to_string(), c)).collect(),
                connects: std::sync::Mutex::new(Vec::new()),
            })
        }

        fn connects(&self) -> Vec<String> {
            self.connects.lock().unwrap().clone()
        }
    }

    impl ConnectionFactory for MapFactory {
        fn connect(&self, url: &str) -> Result<Arc<dyn ChainClient>, ChainError> {
            self.connects.lock().unwrap().push(url.to_string());
            self.clients
                .get(url)
                .cloned()
                .map(|client| client as Arc<dyn ChainClient>)
                .ok_or_else(|| ChainError::InvalidInput(url.to_string()))
        }
    }

    fn endpoint(url: &str, weight: u32) -> EndpointConfig {
        EndpointConfig {
            url: url.to_string(),
            weight,
            max_requests: 50,
            window_ms: 10_000,
        }
    }

    fn manager(endpoints: &[EndpointConfig], factory: Arc<MapFactory>) -> ConnectionManager {
        ConnectionManager::new(endpoints, factory, RetryPolicy::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_errors_exhaust_after_max_attempts() {
        let client = FlakyClient::failing(vec![
            ChainError::Timeout("1".into()),
            ChainError::Timeout("2".into()),
            ChainError::Timeout("3".into()),
            ChainError::Timeout("4".into()),
        ]);
        let factory = MapFactory::new(vec![("https://a", client.clone())]);
        let manager = manager(&[endpoint("https://a", 1)], factory.clone());

        let result = manager.token_supply("mint", RetryOptions::default()).await;

        assert_eq!(result, Err(ChainError::Timeout("3".into())));
        assert_eq!(client.calls(), 3);
        // Connection dropped and reopened before every retry
        assert_eq!(factory.connects().len(), 3);

        let status = manager.endpoint_status().await;
        assert_eq!(status[0].error_count, 3);
        assert_eq!(status[0].queued_priorities, vec![1, 2, 3]);
        assert_eq!(status[0].retries_in_window, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_propagates_immediately() {
        let client = FlakyClient::failing(vec![ChainError::InvalidInput("bad mint".into())]);
        let factory = MapFactory::new(vec![("https://a", client.clone())]);
        let manager = manager(&[endpoint("https://a", 1)], factory.clone());

        let result = manager.token_supply("mint", RetryOptions::default()).await;

        assert_eq!(result, Err(ChainError::InvalidInput("bad mint".into())));
        assert_eq!(client.calls(), 1);
        assert_eq!(manager.endpoint_status().await[0].error_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_still_runs_once() {
        let client = FlakyClient::failing(vec![ChainError::Network("reset".into())]);
        let factory = MapFactory::new(vec![("https://a", client.clone())]);
        let manager = manager(&[endpoint("https://a", 1)], factory);

        let result = manager
            .token_supply("mint", RetryOptions::default().max_retries(0))
            .await;

        assert!(result.is_err());
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_escalation_caps_at_ten() {
        let client = FlakyClient::failing(vec![ChainError::RateLimited("busy".into()); 5]);
        let factory = MapFactory::new(vec![("https://a", client.clone())]);
        let manager = manager(&[endpoint("https://a", 1)], factory);

        let options = RetryOptions::default().priority(9).max_retries(4);
        let _ = manager.token_supply("mint", options).await;

        let status = manager.endpoint_status().await;
        assert_eq!(status[0].queued_priorities, vec![9, 10, 10, 10]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_rotates_away_from_failing_endpoint() {
        let primary = FlakyClient::failing(vec![ChainError::RateLimited("busy".into())]);
        let backup = FlakyClient::failing(vec![]);
        let factory = MapFactory::new(vec![("https://primary", primary.clone()), ("https://backup", backup.clone())]);
        let manager = manager(
            &[endpoint("https://primary", 10), endpoint("https://backup", 5)],
            factory.clone(),
        );

        let supply = manager.token_supply("mint", RetryOptions::default()).await.unwrap();

        assert_eq!(supply.ui_amount, 1_000.0);
        assert_eq!(primary.calls(), 1);
        assert_eq!(backup.calls(), 1);
        assert_eq!(factory.connects(), vec!["https://primary", "https://backup"]);
    }

    #[tokio::test]
    async fn test_connection_is_reused_until_error() {
        let client = FlakyClient::failing(vec![]);
        let factory = MapFactory::new(vec![("https://a", client)]);
        let manager = manager(&[endpoint("https://a", 1)], factory.clone());

        manager.get_connection(1).await.unwrap();
        manager.get_connection(2).await.unwrap();
        assert_eq!(factory.connects().len(), 1);

        manager.handle_error(&ChainError::Network("down".into())).await;
        manager.get_connection(1).await.unwrap();
        assert_eq!(factory.connects().len(), 2);

        let status = manager.endpoint_status().await;
        assert_eq!(status[0].error_count, 1);
        assert_eq!(status[0].requests_in_window, 3);
    }

    #[tokio::test]
    async fn test_no_endpoints_is_an_error() {
        let factory = MapFactory::new(vec![]);
        let manager = manager(&[], factory);
        assert_eq!(
            manager.get_connection(1).await.err(),
            Some(ChainError::NoEndpoints)
        );
    }

    #[test]
    fn test_retryable_classification_is_case_insensitive() {
        let options = RetryOptions::default();
        assert!(options.is_retryable(&ChainError::Rpc("HTTP 429 Too Many Requests".into())));
        assert!(options.is_retryable(&ChainError::Rpc("Gateway Timeout".into())));
        assert!(!options.is_retryable(&ChainError::Rpc("invalid param".into())));
        assert!(options.clone().also_retry_on("blockhash").is_retryable(&ChainError::Rpc("Blockhash not found".into())));
    }
}
