pub mod dexscreener;
pub mod snapshot;

pub use dexscreener::DexScreenerClient;
pub use snapshot::{
    ContractInfo, HolderInfo, HolderShare, LiquidityInfo, MarketDataSource, MarketError, Reading, SnapshotBuilder,
    SupplyInfo, TokenSnapshot, TradingInfo, Upgradeability, SNAPSHOT_PRIORITY,
};
