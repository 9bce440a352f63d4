/// Chain access seam used by the connection manager

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Upstream call failure. Display text carries the keywords the retry policy
/// matches on ("rate limit", "timeout", "network").
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ChainError {
    #[error("rate limit exceeded (429): {0}")]
    RateLimited(String),

    #[error("request timeout: {0}")]
    Timeout(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("no upstream endpoints configured")]
    NoEndpoints,
}

/// One instruction of a JSON-parsed transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedInstruction {
    pub program_id: String,
    /// `parsed.type` for instructions the RPC node could decode
    pub kind: Option<String>,
    /// `parsed.info`, or `Null` when not decoded
    pub info: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedTransaction {
    pub signature: String,
    pub slot: u64,
    /// False when the node returned no status meta for the transaction
    pub has_meta: bool,
    pub instructions: Vec<ParsedInstruction>,
}

/// Decoded mint account fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MintAccount {
    pub mint_authority: Option<String>,
    pub freeze_authority: Option<String>,
    pub supply: u64,
    pub decimals: u8,
    pub is_initialized: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenSupply {
    /// Raw amount in base units
    pub amount: u64,
    pub decimals: u8,
    pub ui_amount: f64,
}

impl TokenSupply {
    /// Builds a supply from the RPC's string amount, deriving the UI amount
    /// when the node omits it.
    pub fn from_raw(amount: &str, decimals: u8, ui_amount: Option<f64>) -> Result<Self, ChainError> {
        let amount: u64 = amount
            .parse()
            .map_err(|e| ChainError::InvalidInput(format!("token amount '{}': {}", amount, e)))?;
        let ui_amount = ui_amount.unwrap_or_else(|| amount as f64 / 10f64.powi(decimals as i32));
        Ok(Self {
            amount,
            decimals,
            ui_amount,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenHolder {
    pub address: String,
    pub ui_amount: f64,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Most recent signatures touching `address`, newest first.
    async fn signatures_for_address(&self, address: &str, limit: usize) -> Result<Vec<String>, ChainError>;

    async fn parsed_transaction(&self, signature: &str) -> Result<Option<ParsedTransaction>, ChainError>;

    async fn mint_account(&self, address: &str) -> Result<Option<MintAccount>, ChainError>;

    async fn token_supply(&self, address: &str) -> Result<TokenSupply, ChainError>;

    /// Largest token accounts for a mint, largest first.
    async fn largest_accounts(&self, address: &str) -> Result<Vec<TokenHolder>, ChainError>;
}

/// Opens chain clients against endpoint URLs
pub trait ConnectionFactory: Send + Sync {
    fn connect(&self, url: &str) -> Result<Arc<dyn ChainClient>, ChainError>;
}
