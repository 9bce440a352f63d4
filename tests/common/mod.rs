#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mintwatch::alerts::{
    Alert, AlertStatus, AlertWithOwner, ConditionSet, DistributionCondition, EvaluationResult, MemoryAlertStore,
    Notifier, NotifyError,
};
use mintwatch::market::{LiquidityInfo, MarketDataSource, MarketError, TradingInfo};
use mintwatch::monitor::{MonitorSettings, MonitoringService, SPL_TOKEN_PROGRAM_ID};
use mintwatch::rpc::{
    ChainClient, ChainError, ConnectionFactory, ConnectionManager, EndpointConfig, MintAccount, ParsedInstruction,
    ParsedTransaction, RetryPolicy, TokenHolder, TokenSupply,
};

/// Chain client answering from scripted data
#[derive(Default)]
pub struct ScriptedChain {
    signature_batches: Mutex<VecDeque<Result<Vec<String>, ChainError>>>,
    transactions: Mutex<HashMap<String, Result<ParsedTransaction, ChainError>>>,
    mints: Mutex<HashMap<String, MintAccount>>,
    supplies: Mutex<HashMap<String, TokenSupply>>,
    holders: Mutex<HashMap<String, Vec<TokenHolder>>>,
    mint_failures: Mutex<HashMap<String, ChainError>>,
    supply_failures: Mutex<HashMap<String, ChainError>>,
    signature_delay: Mutex<Duration>,
}

impl ScriptedChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_signatures(&self, newest_first: &[&str]) {
        self.signature_batches
            .lock()
            .unwrap()
            .push_back(Ok(newest_first.iter().map(|s| s.to_string()).collect()));
    }

    pub fn push_signature_error(&self, error: ChainError) {
        self.signature_batches.lock().unwrap().push_back(Err(error));
    }

    /// Makes every signature listing take `delay` before answering.
    pub fn delay_signatures(&self, delay: Duration) {
        *self.signature_delay.lock().unwrap() = delay;
    }

    pub fn fail_mint_account(&self, mint: &str, error: ChainError) {
        self.mint_failures.lock().unwrap().insert(mint.to_string(), error);
    }

    pub fn fail_supply(&self, mint: &str, error: ChainError) {
        self.supply_failures.lock().unwrap().insert(mint.to_string(), error);
    }

    /// Registers `signature` as a transaction initializing `mint`.
    pub fn add_mint_transaction(&self, signature: &str, mint: &str) {
        let tx = ParsedTransaction {
            signature: signature.to_string(),
            slot: 1,
            has_meta: true,
            instructions: vec![ParsedInstruction {
                program_id: SPL_TOKEN_PROGRAM_ID.to_string(),
                kind: Some("initializeMint2".to_string()),
                info: json!({"mint": mint, "decimals": 6}),
            }],
        };
        self.transactions
            .lock()
            .unwrap()
            .insert(signature.to_string(), Ok(tx));
    }

    pub fn add_failing_transaction(&self, signature: &str, error: ChainError) {
        self.transactions
            .lock()
            .unwrap()
            .insert(signature.to_string(), Err(error));
    }

    /// Registers a mint with a 1,000,000 token supply and one holder of
    /// `top_holder_amount`.
    pub fn add_token(&self, mint: &str, top_holder_amount: f64) {
        self.mints.lock().unwrap().insert(
            mint.to_string(),
            MintAccount {
                mint_authority: None,
                freeze_authority: None,
                supply: 1_000_000,
                decimals: 0,
                is_initialized: true,
            },
        );
        self.supplies.lock().unwrap().insert(
            mint.to_string(),
            TokenSupply {
                amount: 1_000_000,
                decimals: 0,
                ui_amount: 1_000_000.0,
            },
        );
        self.holders.lock().unwrap().insert(
            mint.to_string(),
            vec![TokenHolder {
                address: "Holder111".to_string(),
                ui_amount: top_holder_amount,
            }],
        );
    }
}

#[async_trait]
impl ChainClient for ScriptedChain {
    async fn signatures_for_address(&self, _address: &str, limit: usize) -> Result<Vec<String>, ChainError> {
        let delay = *self.signature_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match self.signature_batches.lock().unwrap().pop_front() {
            Some(Ok(mut batch)) => {
                batch.truncate(limit);
                Ok(batch)
            }
            Some(Err(e)) => Err(e),
            None => Ok(Vec::new()),
        }
    }

    async fn parsed_transaction(&self, signature: &str) -> Result<Option<ParsedTransaction>, ChainError> {
        match self.transactions.lock().unwrap().get(signature) {
            Some(Ok(tx)) => Ok(Some(tx.clone())),
            Some(Err(e)) => Err(e.clone()),
            None => Ok(None),
        }
    }

    async fn mint_account(&self, address: &str) -> Result<Option<MintAccount>, ChainError> {
        if let Some(error) = self.mint_failures.lock().unwrap().get(address) {
            return Err(error.clone());
        }
        Ok(self.mints.lock().unwrap().get(address).cloned())
    }

    async fn token_supply(&self, address: &str) -> Result<TokenSupply, ChainError> {
        if let Some(error) = self.supply_failures.lock().unwrap().get(address) {
            return Err(error.clone());
        }
        self.supplies
            .lock()
            .unwrap()
            .get(address)
            .cloned()
            .ok_or_else(|| ChainError::NotFound(address.to_string()))
    }

    async fn largest_accounts(&self, address: &str) -> Result<Vec<TokenHolder>, ChainError> {
        Ok(self.holders.lock().unwrap().get(address).cloned().unwrap_or_default())
    }
}

pub struct ScriptedFactory(pub Arc<ScriptedChain>);

impl ConnectionFactory for ScriptedFactory {
    fn connect(&self, _url: &str) -> Result<Arc<dyn ChainClient>, ChainError> {
        Ok(self.0.clone() as Arc<dyn ChainClient>)
    }
}

pub struct StaticMarket;

#[async_trait]
impl MarketDataSource for StaticMarket {
    async fn liquidity(&self, _address: &str) -> Result<LiquidityInfo, MarketError> {
        Ok(LiquidityInfo {
            total: 100_000.0,
            locked: false,
            lock_expiry: None,
        })
    }

    async fn trading(&self, address: &str) -> Result<TradingInfo, MarketError> {
        Err(MarketError::NoPairs(address.to_string()))
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(String, EvaluationResult)>>,
}

impl RecordingNotifier {
    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, recipient: &str, result: &EvaluationResult) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .unwrap()
            .push((recipient.to_string(), result.clone()));
        Ok(())
    }
}

/// Alert that fires when the top holder exceeds `max_pct` percent.
pub fn distribution_alert(id: &str, token: Option<&str>, max_pct: f64) -> AlertWithOwner {
    alert_with(
        id,
        token,
        ConditionSet {
            distribution: DistributionCondition {
                enabled: true,
                max_top_holder_percentage: max_pct,
            },
            ..ConditionSet::default()
        },
    )
}

pub fn alert_with(id: &str, token: Option<&str>, conditions: ConditionSet) -> AlertWithOwner {
    let now = Utc::now();
    AlertWithOwner {
        alert: Alert {
            id: id.to_string(),
            owner_id: "user-1".to_string(),
            name: format!("{} alert", id),
            token_address: token.map(str::to_string),
            conditions,
            status: AlertStatus::Active,
            created_at: now,
            updated_at: now,
        },
        owner_email: Some("owner@example.com".to_string()),
    }
}

pub struct Harness {
    pub chain: Arc<ScriptedChain>,
    pub store: Arc<MemoryAlertStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub service: Arc<MonitoringService>,
}

pub fn harness(alerts: Vec<AlertWithOwner>) -> Harness {
    harness_with(alerts, MonitorSettings::default())
}

pub fn harness_with(alerts: Vec<AlertWithOwner>, settings: MonitorSettings) -> Harness {
    let chain = ScriptedChain::new();
    let connections = Arc::new(ConnectionManager::new(
        &[EndpointConfig {
            url: "https://rpc.test".to_string(),
            weight: 1,
            max_requests: 1_000,
            window_ms: 10_000,
        }],
        Arc::new(ScriptedFactory(chain.clone())),
        RetryPolicy::default(),
    ));
    let store = Arc::new(MemoryAlertStore::from_alerts(alerts));
    let notifier = Arc::new(RecordingNotifier::default());
    let service = MonitoringService::new(
        settings,
        connections,
        Arc::new(StaticMarket),
        store.clone(),
        notifier.clone(),
    );

    Harness {
        chain,
        store,
        notifier,
        service,
    }
}

