/// Alert condition evaluation
///
/// Every evaluator is a pure function of a condition group and a snapshot
/// reading. A disabled group or a failed reading never triggers.

use chrono::{DateTime, Utc};

use super::types::{
    Alert, ConditionVerdict, ContractCondition, DistributionCondition, EvaluationResult, GroupVerdicts,
    LiquidityCondition, TradingCondition,
};
use crate::market::{ContractInfo, HolderInfo, LiquidityInfo, Reading, TokenSnapshot, TradingInfo};

fn reading<T>(reading: &Reading<T>) -> Result<&T, ConditionVerdict> {
    reading.as_ref().map_err(ConditionVerdict::unavailable)
}

pub fn evaluate_distribution(condition: &DistributionCondition, holders: &Reading<HolderInfo>) -> ConditionVerdict {
    if !condition.enabled {
        return ConditionVerdict::disabled();
    }
    let holders = match reading(holders) {
        Ok(holders) => holders,
        Err(verdict) => return verdict,
    };
    let Some(top) = holders.top_holder_percentage() else {
        return ConditionVerdict::new(false, "No token accounts found");
    };

    let max = condition.max_top_holder_percentage;
    ConditionVerdict::new(
        top > max,
        format!("Top holder owns {:.1}% of supply (max: {}%)", top, max),
    )
    .with_values(top, max)
}

pub fn evaluate_liquidity(condition: &LiquidityCondition, liquidity: &Reading<LiquidityInfo>) -> ConditionVerdict {
    if !condition.enabled {
        return ConditionVerdict::disabled();
    }
    let liquidity = match reading(liquidity) {
        Ok(liquidity) => liquidity,
        Err(verdict) => return verdict,
    };

    let mut problems = Vec::new();
    if liquidity.total < condition.min_liquidity {
        problems.push(format!(
            "Liquidity ${:.2} is below minimum ${:.2}",
            liquidity.total, condition.min_liquidity
        ));
    }
    if condition.require_locked && !liquidity.locked {
        problems.push("Liquidity is not locked".to_string());
    }

    let verdict = if problems.is_empty() {
        ConditionVerdict::new(
            false,
            format!(
                "Liquidity ${:.2} meets minimum ${:.2}",
                liquidity.total, condition.min_liquidity
            ),
        )
    } else {
        ConditionVerdict::new(true, problems.join("; "))
    };
    verdict.with_values(liquidity.total, condition.min_liquidity)
}

pub fn evaluate_contract(condition: &ContractCondition, contract: &Reading<ContractInfo>) -> ConditionVerdict {
    if !condition.enabled {
        return ConditionVerdict::disabled();
    }
    let contract = match reading(contract) {
        Ok(contract) => contract,
        Err(verdict) => return verdict,
    };

    let mut problems = Vec::new();
    if condition.require_renounced && contract.mint_authority_enabled {
        problems.push("Mint authority is still enabled");
    }
    if condition.require_verified && !contract.verified {
        problems.push("Contract is not verified");
    }

    let verdict = if problems.is_empty() {
        ConditionVerdict::new(false, "Contract checks passed")
    } else {
        ConditionVerdict::new(true, problems.join("; "))
    };
    verdict.with_values(contract.mint_authority_enabled, false)
}

pub fn evaluate_trading(condition: &TradingCondition, trading: &Reading<TradingInfo>) -> ConditionVerdict {
    if !condition.enabled {
        return ConditionVerdict::disabled();
    }
    let trading = match reading(trading) {
        Ok(trading) => trading,
        Err(verdict) => return verdict,
    };

    let mut problems = Vec::new();
    if trading.volume_24h < condition.min_daily_volume {
        problems.push(format!(
            "24h volume ${:.2} is below minimum ${:.2}",
            trading.volume_24h, condition.min_daily_volume
        ));
    }
    if trading.buy_tax > condition.max_buy_tax {
        problems.push(format!("Buy tax {}% exceeds {}%", trading.buy_tax, condition.max_buy_tax));
    }
    if trading.sell_tax > condition.max_sell_tax {
        problems.push(format!("Sell tax {}% exceeds {}%", trading.sell_tax, condition.max_sell_tax));
    }

    let verdict = if problems.is_empty() {
        ConditionVerdict::new(false, "Trading checks passed")
    } else {
        ConditionVerdict::new(true, problems.join("; "))
    };
    verdict.with_values(trading.volume_24h, condition.min_daily_volume)
}

/// Evaluates every condition group of `alert` against `snapshot`.
pub fn evaluate(alert: &Alert, snapshot: &TokenSnapshot, now: DateTime<Utc>) -> EvaluationResult {
    let conditions = &alert.conditions;
    let verdicts = GroupVerdicts {
        distribution: evaluate_distribution(&conditions.distribution, &snapshot.holders),
        liquidity: evaluate_liquidity(&conditions.liquidity, &snapshot.liquidity),
        contract: evaluate_contract(&conditions.contract, &snapshot.contract),
        trading: evaluate_trading(&conditions.trading, &snapshot.trading),
    };

    let mut evaluated = alert.clone();
    evaluated.token_address = Some(snapshot.address.clone());

    EvaluationResult {
        alert: evaluated,
        token_address: Some(snapshot.address.clone()),
        triggered: verdicts.any_triggered(),
        verdicts,
        timestamp: now,
    }
}
