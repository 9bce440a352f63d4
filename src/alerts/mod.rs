pub mod engine;
pub mod notify;
pub mod store;
pub mod types;

pub use engine::evaluate;
pub use notify::{format_alert_message, AlertBus, AlertNotification, BusNotifier, Notifier, NotifyError};
pub use store::{AlertScope, AlertStore, MemoryAlertStore, StoreError};
pub use types::{
    Alert, AlertStatus, AlertWithOwner, ConditionSet, ConditionValue, ConditionVerdict, ContractCondition,
    DistributionCondition, EvaluationResult, GroupVerdicts, HistoryRecord, LiquidityCondition, TradingCondition,
};
