/// Per-token data snapshot assembled from chain reads and market data

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::rpc::{ConnectionManager, MintAccount, TokenHolder, TokenSupply};

/// Priority used for all snapshot reads
pub const SNAPSHOT_PRIORITY: u8 = 4;

/// A group reading. `Err` carries the reason the data could not be fetched.
pub type Reading<T> = Result<T, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplyInfo {
    pub total: u64,
    pub circulating: u64,
    pub ui_amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HolderShare {
    pub address: String,
    pub percentage: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HolderInfo {
    pub total: usize,
    pub distribution: Vec<HolderShare>,
}

impl HolderInfo {
    pub fn top_holder_percentage(&self) -> Option<f64> {
        self.distribution
            .iter()
            .map(|share| share.percentage)
            .fold(None, |best, pct| Some(best.map_or(pct, |b: f64| b.max(pct))))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidityInfo {
    /// USD
    pub total: f64,
    pub locked: bool,
    #[serde(default)]
    pub lock_expiry: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingInfo {
    pub volume_24h: f64,
    pub transactions_24h: u64,
    pub buy_tax: f64,
    pub sell_tax: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Upgradeability {
    pub proxy: bool,
    pub admin: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractInfo {
    pub verified: bool,
    pub mint_authority_enabled: bool,
    pub renounced: bool,
    pub freeze_authority_enabled: bool,
    pub upgradeability: Upgradeability,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenSnapshot {
    pub address: String,
    /// `None` when neither the mint nor the supply read succeeded
    pub decimals: Option<u8>,
    pub supply: Option<SupplyInfo>,
    pub holders: Reading<HolderInfo>,
    pub liquidity: Reading<LiquidityInfo>,
    pub trading: Reading<TradingInfo>,
    pub contract: Reading<ContractInfo>,
}

#[derive(thiserror::Error, Debug)]
pub enum MarketError {
    #[error("market data request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("market data API error: {0}")]
    Api(String),

    #[error("failed to parse market data: {0}")]
    Parse(String),

    #[error("no trading pairs found for {0}")]
    NoPairs(String),
}

/// Off-chain liquidity and trading data
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn liquidity(&self, address: &str) -> Result<LiquidityInfo, MarketError>;

    async fn trading(&self, address: &str) -> Result<TradingInfo, MarketError>;
}

/// Holder shares as a percentage of the UI supply.
pub fn holder_info(accounts: &[TokenHolder], supply_ui_amount: f64) -> Reading<HolderInfo> {
    if accounts.is_empty() {
        return Ok(HolderInfo::default());
    }
    if supply_ui_amount <= 0.0 {
        return Err("Could not fetch token supply".to_string());
    }

    Ok(HolderInfo {
        total: accounts.len(),
        distribution: accounts
            .iter()
            .map(|account| HolderShare {
                address: account.address.clone(),
                percentage: account.ui_amount / supply_ui_amount * 100.0,
            })
            .collect(),
    })
}

pub fn contract_info(mint: &MintAccount) -> ContractInfo {
    let mint_authority_enabled = mint.mint_authority.is_some();
    ContractInfo {
        // No verification source exists for SPL mints
        verified: false,
        mint_authority_enabled,
        renounced: !mint_authority_enabled,
        freeze_authority_enabled: mint.freeze_authority.is_some(),
        upgradeability: Upgradeability::default(),
    }
}

fn supply_info(supply: &TokenSupply) -> SupplyInfo {
    SupplyInfo {
        total: supply.amount,
        circulating: supply.amount,
        ui_amount: supply.ui_amount,
    }
}

/// Builds [`TokenSnapshot`]s. Only a confirmed missing mint account drops
/// the token; every failed read degrades the groups that depend on it.
pub struct SnapshotBuilder {
    connections: Arc<ConnectionManager>,
    market: Arc<dyn MarketDataSource>,
}

impl SnapshotBuilder {
    pub fn new(connections: Arc<ConnectionManager>, market: Arc<dyn MarketDataSource>) -> Self {
        Self { connections, market }
    }

    /// Returns `None` when the address holds no account.
    #[instrument(skip(self))]
    pub async fn build(&self, address: &str) -> Option<TokenSnapshot> {
        let options = self.connections.retry_options(SNAPSHOT_PRIORITY);

        let mint = match self.connections.mint_account(address, options.clone()).await {
            Ok(Some(mint)) => Ok(mint),
            Ok(None) => {
                debug!(token = %address, "No mint account found");
                return None;
            }
            Err(e) => {
                warn!(token = %address, error = %e, "Mint account lookup failed");
                Err(format!("Could not fetch mint info: {}", e))
            }
        };

        let supply = self
            .connections
            .token_supply(address, options.clone())
            .await
            .map_err(|e| {
                warn!(token = %address, error = %e, "Token supply lookup failed");
                format!("Could not fetch token supply: {}", e)
            });

        let holders = match &supply {
            Ok(supply) => match self.connections.largest_accounts(address, options).await {
                Ok(accounts) => holder_info(&accounts, supply.ui_amount),
                Err(e) => {
                    warn!(token = %address, error = %e, "Holder lookup failed");
                    Err(format!("Error checking token distribution: {}", e))
                }
            },
            Err(cause) => Err(cause.clone()),
        };

        let liquidity = self
            .market
            .liquidity(address)
            .await
            .map_err(|e| format!("Liquidity data unavailable: {}", e));
        let trading = self
            .market
            .trading(address)
            .await
            .map_err(|e| format!("Trading data unavailable: {}", e));

        let decimals = match (&mint, &supply) {
            (Ok(mint), _) => Some(mint.decimals),
            (Err(_), Ok(supply)) => Some(supply.decimals),
            (Err(_), Err(_)) => None,
        };

        Some(TokenSnapshot {
            address: address.to_string(),
            decimals,
            supply: supply.as_ref().ok().map(supply_info),
            holders,
            liquidity,
            trading,
            contract: mint.as_ref().map(contract_info).map_err(|cause| cause.clone()),
        })
    }
}
