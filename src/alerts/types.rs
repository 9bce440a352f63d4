use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributionCondition {
    pub enabled: bool,
    #[serde(alias = "maxTopHolderPercentage")]
    pub max_top_holder_percentage: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiquidityCondition {
    pub enabled: bool,
    /// USD
    #[serde(alias = "minLiquidity")]
    pub min_liquidity: f64,
    #[serde(alias = "requireLocked")]
    pub require_locked: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContractCondition {
    pub enabled: bool,
    #[serde(alias = "requireRenounced")]
    pub require_renounced: bool,
    #[serde(alias = "requireVerified")]
    pub require_verified: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingCondition {
    pub enabled: bool,
    #[serde(alias = "minDailyVolume")]
    pub min_daily_volume: f64,
    /// Percent
    #[serde(alias = "maxBuyTax")]
    pub max_buy_tax: f64,
    #[serde(alias = "maxSellTax")]
    pub max_sell_tax: f64,
}

/// The four condition groups of an alert. A group absent from the stored
/// definition is disabled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConditionSet {
    #[serde(default, alias = "tokenDistribution")]
    pub distribution: DistributionCondition,
    #[serde(default, alias = "liquidityPool")]
    pub liquidity: LiquidityCondition,
    #[serde(default, alias = "smartContract")]
    pub contract: ContractCondition,
    #[serde(default)]
    pub trading: TradingCondition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    /// `None` watches every newly created token
    #[serde(default)]
    pub token_address: Option<String>,
    #[serde(default)]
    pub conditions: ConditionSet,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Alert {
    pub fn is_active(&self) -> bool {
        self.status == AlertStatus::Active
    }

    pub fn is_global(&self) -> bool {
        self.token_address.is_none()
    }
}

/// An alert joined with its owner's contact address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertWithOwner {
    #[serde(flatten)]
    pub alert: Alert,
    #[serde(default)]
    pub owner_email: Option<String>,
}

/// Observed or threshold value attached to a verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionValue {
    Number(f64),
    Flag(bool),
    Text(String),
}

impl From<f64> for ConditionValue {
    fn from(value: f64) -> Self {
        ConditionValue::Number(value)
    }
}

impl From<bool> for ConditionValue {
    fn from(value: bool) -> Self {
        ConditionValue::Flag(value)
    }
}

impl From<String> for ConditionValue {
    fn from(value: String) -> Self {
        ConditionValue::Text(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionVerdict {
    pub triggered: bool,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_value: Option<ConditionValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<ConditionValue>,
}

impl ConditionVerdict {
    pub fn new(triggered: bool, reason: impl Into<String>) -> Self {
        Self {
            triggered,
            reason: reason.into(),
            current_value: None,
            threshold: None,
        }
    }

    pub fn disabled() -> Self {
        Self::new(false, "disabled")
    }

    /// Non-triggering verdict for a group whose data could not be fetched
    pub fn unavailable(cause: impl Into<String>) -> Self {
        Self::new(false, cause)
    }

    pub fn with_values(mut self, current: impl Into<ConditionValue>, threshold: impl Into<ConditionValue>) -> Self {
        self.current_value = Some(current.into());
        self.threshold = Some(threshold.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupVerdicts {
    pub distribution: ConditionVerdict,
    pub liquidity: ConditionVerdict,
    pub contract: ConditionVerdict,
    pub trading: ConditionVerdict,
}

impl GroupVerdicts {
    pub fn any_triggered(&self) -> bool {
        self.distribution.triggered || self.liquidity.triggered || self.contract.triggered || self.trading.triggered
    }

    /// Triggered groups with display labels, in fixed group order.
    pub fn triggered_groups(&self) -> Vec<(&'static str, &ConditionVerdict)> {
        [
            ("Token Distribution", &self.distribution),
            ("Liquidity Pool", &self.liquidity),
            ("Smart Contract", &self.contract),
            ("Trading", &self.trading),
        ]
        .into_iter()
        .filter(|(_, verdict)| verdict.triggered)
        .collect()
    }
}

/// Outcome of evaluating one alert against one token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Copy of the evaluated alert with the token address filled in
    pub alert: Alert,
    pub token_address: Option<String>,
    pub triggered: bool,
    pub verdicts: GroupVerdicts,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub alert_id: String,
    pub token_address: Option<String>,
    pub triggered_conditions: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl HistoryRecord {
    pub fn from_result(result: &EvaluationResult) -> Result<Self, serde_json::Error> {
        Ok(Self {
            alert_id: result.alert.id.clone(),
            token_address: result.token_address.clone(),
            triggered_conditions: serde_json::to_value(&result.verdicts)?,
            timestamp: result.timestamp,
        })
    }
}
