/// DexScreener API client for liquidity and 24h trading data

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::snapshot::{LiquidityInfo, MarketDataSource, MarketError, TradingInfo};

pub const DEXSCREENER_API: &str = "https://api.dexscreener.com/latest/dex/tokens";
const CACHE_DURATION_SECS: u64 = 30;
const API_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DexScreenerResponse {
    #[serde(rename = "schemaVersion", default)]
    pub schema_version: String,
    pub pairs: Option<Vec<TokenPair>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenPair {
    #[serde(rename = "chainId")]
    pub chain_id: String,
    #[serde(rename = "dexId")]
    pub dex_id: String,
    #[serde(rename = "pairAddress")]
    pub pair_address: String,
    pub txns: Option<Transactions>,
    pub volume: Option<Volume>,
    pub liquidity: Option<Liquidity>,
    #[serde(rename = "pairCreatedAt")]
    pub pair_created_at: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Transactions {
    pub h24: TransactionCount,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransactionCount {
    pub buys: u64,
    pub sells: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Volume {
    pub h24: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Liquidity {
    pub usd: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct TokenInfo {
    pub pairs: Vec<TokenPair>,
}

impl TokenInfo {
    pub fn liquidity(&self) -> LiquidityInfo {
        let total = self
            .pairs
            .first()
            .and_then(|pair| pair.liquidity.as_ref())
            .and_then(|liquidity| liquidity.usd)
            .unwrap_or(0.0);
        // DexScreener exposes no lock information
        LiquidityInfo {
            total,
            locked: false,
            lock_expiry: None,
        }
    }

    pub fn trading(&self) -> TradingInfo {
        let pair = self.pairs.first();
        TradingInfo {
            volume_24h: pair.and_then(|p| p.volume.as_ref()).map_or(0.0, |v| v.h24),
            transactions_24h: pair
                .and_then(|p| p.txns.as_ref())
                .map_or(0, |t| t.h24.buys + t.h24.sells),
            // SPL transfers carry no buy/sell tax
            buy_tax: 0.0,
            sell_tax: 0.0,
        }
    }
}

pub struct DexScreenerClient {
    client: Client,
    base_url: String,
    cache_duration: Duration,
    cache: Arc<Mutex<HashMap<String, (TokenInfo, Instant)>>>,
}

impl DexScreenerClient {
    pub fn new() -> Result<Self, MarketError> {
        Self::with_settings(
            DEXSCREENER_API,
            Duration::from_secs(API_TIMEOUT_SECS),
            Duration::from_secs(CACHE_DURATION_SECS),
        )
    }

    pub fn with_settings(base_url: &str, timeout: Duration, cache_duration: Duration) -> Result<Self, MarketError> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            cache_duration,
            cache: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub async fn get_token_info(&self, mint: &str) -> Result<TokenInfo, MarketError> {
        if let Some(cached_info) = self.get_cached_token_info(mint).await {
            return Ok(cached_info);
        }

        let token_info = self.fetch_token_info(mint).await?;
        self.cache_token_info(mint, token_info.clone()).await;
        Ok(token_info)
    }

    async fn fetch_token_info(&self, mint: &str) -> Result<TokenInfo, MarketError> {
        let url = format!("{}/{}", self.base_url, mint);
        debug!(url = %url, "Fetching token info from DexScreener");

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(MarketError::Api(format!("DexScreener returned {}", response.status())));
        }

        let response_text = response.text().await?;
        parse_token_info(mint, &response_text)
    }

    async fn get_cached_token_info(&self, mint: &str) -> Option<TokenInfo> {
        let cache = self.cache.lock().await;
        match cache.get(mint) {
            Some((info, timestamp)) if timestamp.elapsed() < self.cache_duration => {
                debug!(mint, "Using cached DexScreener data");
                Some(info.clone())
            }
            _ => None,
        }
    }

    async fn cache_token_info(&self, mint: &str, info: TokenInfo) {
        let mut cache = self.cache.lock().await;
        let ttl = self.cache_duration;
        cache.retain(|_, (_, timestamp)| timestamp.elapsed() < ttl);
        cache.insert(mint.to_string(), (info, Instant::now()));
    }
}

fn parse_token_info(mint: &str, body: &str) -> Result<TokenInfo, MarketError> {
    let data: DexScreenerResponse =
        serde_json::from_str(body).map_err(|e| MarketError::Parse(format!("DexScreener response: {}", e)))?;

    match data.pairs {
        Some(pairs) if !pairs.is_empty() => Ok(TokenInfo { pairs }),
        _ => {
            warn!(mint, "DexScreener has no pairs for token");
            Err(MarketError::NoPairs(mint.to_string()))
        }
    }
}

#[async_trait]
impl MarketDataSource for DexScreenerClient {
    async fn liquidity(&self, address: &str) -> Result<LiquidityInfo, MarketError> {
        Ok(self.get_token_info(address).await?.liquidity())
    }

    async fn trading(&self, address: &str) -> Result<TradingInfo, MarketError> {
        Ok(self.get_token_info(address).await?.trading())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r#"{
        "schemaVersion": "1.0.0",
        "pairs": [{
            "chainId": "solana",
            "dexId": "raydium",
            "pairAddress": "Pair111",
            "txns": {"h24": {"buys": 120, "sells": 80}},
            "volume": {"h24": 45210.5},
            "liquidity": {"usd": 98000.25, "base": 1, "quote": 2},
            "pairCreatedAt": 1714560000000
        }, {
            "chainId": "solana",
            "dexId": "orca",
            "pairAddress": "Pair222",
            "liquidity": {"usd": 1.0}
        }]
    }"#;

    #[test]
    fn test_first_pair_drives_readings() {
        let info = parse_token_info("Mint111", BODY).unwrap();
        let liquidity = info.liquidity();
        assert_eq!(liquidity.total, 98000.25);
        assert!(!liquidity.locked);

        let trading = info.trading();
        assert_eq!(trading.volume_24h, 45210.5);
        assert_eq!(trading.transactions_24h, 200);
        assert_eq!(trading.buy_tax, 0.0);
    }

    #[test]
    fn test_missing_pairs_is_an_error() {
        assert!(matches!(
            parse_token_info("Mint111", r#"{"schemaVersion": "1.0.0", "pairs": null}"#),
            Err(MarketError::NoPairs(_))
        ));
        assert!(matches!(
            parse_token_info("Mint111", r#"{"pairs": []}"#),
            Err(MarketError::NoPairs(_))
        ));
        assert!(matches!(parse_token_info("Mint111", "<html>"), Err(MarketError::Parse(_))));
    }

    #[tokio::test]
    async fn test_cache_serves_fresh_entries() {
        let client = DexScreenerClient::new().unwrap();
        let info = parse_token_info("Mint111", BODY).unwrap();
        client.cache_token_info("Mint111", info).await;

        let cached = client.get_cached_token_info("Mint111").await.unwrap();
        assert_eq!(cached.pairs.len(), 2);
        assert!(client.get_cached_token_info("Other").await.is_none());
    }
}
