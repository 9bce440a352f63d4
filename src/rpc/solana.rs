/// Solana JSON-RPC implementation of the chain client

use async_trait::async_trait;
use serde_json::Value;
use solana_account_decoder::parse_token::UiTokenAmount;
use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_client::GetConfirmedSignaturesForAddress2Config;
use solana_client::rpc_config::RpcTransactionConfig;
use solana_sdk::{commitment_config::CommitmentConfig, pubkey::Pubkey, signature::Signature};
use solana_transaction_status::{
    EncodedConfirmedTransactionWithStatusMeta, EncodedTransaction, UiInstruction, UiMessage, UiParsedInstruction,
    UiTransactionEncoding,
};
use solana_program::program_option::COption;
use solana_program::program_pack::Pack;
use spl_token::state::Mint;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::client::{
    ChainClient, ChainError, ConnectionFactory, MintAccount, ParsedInstruction, ParsedTransaction, TokenHolder,
    TokenSupply,
};

pub struct SolanaRpcClient {
    url: String,
    client: RpcClient,
}

impl SolanaRpcClient {
    pub fn new(url: &str, timeout: Duration) -> Self {
        Self {
            url: url.to_string(),
            client: RpcClient::new_with_timeout_and_commitment(url.to_string(), timeout, CommitmentConfig::confirmed()),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn parse_pubkey(address: &str) -> Result<Pubkey, ChainError> {
    Pubkey::from_str(address).map_err(|e| ChainError::InvalidInput(format!("address '{}': {}", address, e)))
}

/// Maps client failures onto the retry taxonomy
fn classify(error: ClientError) -> ChainError {
    let text = error.to_string();
    match error.kind() {
        ClientErrorKind::Reqwest(e) if e.is_timeout() => ChainError::Timeout(text),
        ClientErrorKind::Reqwest(e) if e.status().map_or(false, |status| status.as_u16() == 429) => {
            ChainError::RateLimited(text)
        }
        ClientErrorKind::Reqwest(_) | ClientErrorKind::Io(_) => ChainError::Network(text),
        _ if text.contains("429") || text.to_lowercase().contains("too many requests") => ChainError::RateLimited(text),
        _ => ChainError::Rpc(text),
    }
}

fn supply_from_ui(amount: &UiTokenAmount) -> Result<TokenSupply, ChainError> {
    TokenSupply::from_raw(&amount.amount, amount.decimals, amount.ui_amount)
}

fn convert_instruction(instruction: &UiInstruction, account_keys: &[String]) -> ParsedInstruction {
    match instruction {
        UiInstruction::Parsed(UiParsedInstruction::Parsed(parsed)) => ParsedInstruction {
            program_id: parsed.program_id.clone(),
            kind: parsed
                .parsed
                .get("type")
                .and_then(Value::as_str)
                .map(str::to_string),
            info: parsed.parsed.get("info").cloned().unwrap_or(Value::Null),
        },
        UiInstruction::Parsed(UiParsedInstruction::PartiallyDecoded(partial)) => ParsedInstruction {
            program_id: partial.program_id.clone(),
            kind: None,
            info: Value::Null,
        },
        UiInstruction::Compiled(compiled) => ParsedInstruction {
            program_id: account_keys
                .get(compiled.program_id_index as usize)
                .cloned()
                .unwrap_or_default(),
            kind: None,
            info: Value::Null,
        },
    }
}

fn convert_transaction(signature: &str, tx: &EncodedConfirmedTransactionWithStatusMeta) -> ParsedTransaction {
    let instructions = match &tx.transaction.transaction {
        EncodedTransaction::Json(ui_tx) => match &ui_tx.message {
            UiMessage::Parsed(message) => {
                let account_keys: Vec<String> = message.account_keys.iter().map(|key| key.pubkey.clone()).collect();
                message
                    .instructions
                    .iter()
                    .map(|ix| convert_instruction(ix, &account_keys))
                    .collect()
            }
            UiMessage::Raw(_) => Vec::new(),
        },
        _ => Vec::new(),
    };

    ParsedTransaction {
        signature: signature.to_string(),
        slot: tx.slot,
        has_meta: tx.transaction.meta.is_some(),
        instructions,
    }
}

#[async_trait]
impl ChainClient for SolanaRpcClient {
    async fn signatures_for_address(&self, address: &str, limit: usize) -> Result<Vec<String>, ChainError> {
        let pubkey = parse_pubkey(address)?;
        let config = GetConfirmedSignaturesForAddress2Config {
            before: None,
            until: None,
            limit: Some(limit),
            commitment: Some(CommitmentConfig::confirmed()),
        };
        let statuses = self
            .client
            .get_signatures_for_address_with_config(&pubkey, config)
            .await
            .map_err(classify)?;
        Ok(statuses.into_iter().map(|status| status.signature).collect())
    }

    async fn parsed_transaction(&self, signature: &str) -> Result<Option<ParsedTransaction>, ChainError> {
        let parsed_signature = Signature::from_str(signature)
            .map_err(|e| ChainError::InvalidInput(format!("signature '{}': {}", signature, e)))?;
        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::JsonParsed),
            commitment: Some(CommitmentConfig::confirmed()),
            max_supported_transaction_version: Some(0),
        };

        match self.client.get_transaction_with_config(&parsed_signature, config).await {
            Ok(tx) => Ok(Some(convert_transaction(signature, &tx))),
            // The node answers `null` for transactions it has not indexed yet
            Err(e) if matches!(e.kind(), ClientErrorKind::SerdeJson(_)) && e.to_string().contains("null") => {
                debug!(signature, "Transaction not available yet");
                Ok(None)
            }
            Err(e) => Err(classify(e)),
        }
    }

    async fn mint_account(&self, address: &str) -> Result<Option<MintAccount>, ChainError> {
        let pubkey = parse_pubkey(address)?;
        let response = self
            .client
            .get_account_with_commitment(&pubkey, CommitmentConfig::confirmed())
            .await
            .map_err(classify)?;

        let Some(account) = response.value else {
            return Ok(None);
        };
        if account.data.len() < Mint::LEN {
            return Err(ChainError::InvalidInput(format!(
                "account {} is not a mint ({} bytes)",
                address,
                account.data.len()
            )));
        }

        // Token-2022 mints carry extensions after the base layout
        let mint = Mint::unpack_from_slice(&account.data[..Mint::LEN])
            .map_err(|e| ChainError::InvalidInput(format!("mint {}: {}", address, e)))?;

        let authority = |key: COption<_>| match key {
            COption::Some(key) => Some(format!("{}", key)),
            COption::None => None,
        };

        Ok(Some(MintAccount {
            mint_authority: authority(mint.mint_authority),
            freeze_authority: authority(mint.freeze_authority),
            supply: mint.supply,
            decimals: mint.decimals,
            is_initialized: mint.is_initialized,
        }))
    }

    async fn token_supply(&self, address: &str) -> Result<TokenSupply, ChainError> {
        let pubkey = parse_pubkey(address)?;
        let amount = self.client.get_token_supply(&pubkey).await.map_err(classify)?;
        supply_from_ui(&amount)
    }

    async fn largest_accounts(&self, address: &str) -> Result<Vec<TokenHolder>, ChainError> {
        let pubkey = parse_pubkey(address)?;
        let balances = self
            .client
            .get_token_largest_accounts(&pubkey)
            .await
            .map_err(classify)?;

        balances
            .iter()
            .map(|balance| {
                Ok(TokenHolder {
                    address: balance.address.clone(),
                    ui_amount: supply_from_ui(&balance.amount)?.ui_amount,
                })
            })
            .collect()
    }
}

/// Opens [`SolanaRpcClient`]s with a fixed request timeout
pub struct SolanaConnectionFactory {
    timeout: Duration,
}

impl SolanaConnectionFactory {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl ConnectionFactory for SolanaConnectionFactory {
    fn connect(&self, url: &str) -> Result<Arc<dyn ChainClient>, ChainError> {
        url::Url::parse(url).map_err(|e| ChainError::InvalidInput(format!("endpoint url '{}': {}", url, e)))?;
        Ok(Arc::new(SolanaRpcClient::new(url, self.timeout)))
    }
}
