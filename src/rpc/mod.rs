pub mod backoff;
pub mod client;
pub mod connection;
pub mod endpoint_pool;
pub mod solana;

pub use backoff::ExponentialBackoff;
pub use client::{
    ChainClient, ChainError, ConnectionFactory, MintAccount, ParsedInstruction, ParsedTransaction, TokenHolder,
    TokenSupply,
};
pub use connection::{ConnectionManager, RetryOptions, RetryPolicy, MAX_PRIORITY, MIN_PRIORITY};
pub use endpoint_pool::{EndpointConfig, EndpointPool, EndpointStatus};
pub use solana::{SolanaConnectionFactory, SolanaRpcClient};
