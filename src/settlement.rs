//! Option exercise and assignment settlement
//!
//! Once per trading day, every option position that has expired is closed
//! out against the official close of its underlying. In-the-money
//! positions settle into stock at the strike price; out-of-the-money
//! positions expire worthless. Both paths synthesize order records and
//! drive them through the same fill-reconciliation arithmetic as live
//! broker fills, so re-running a pass over an already-flat position is a
//! no-op by construction.

use chrono::NaiveDate;
use itertools::Itertools;
use std::time::Duration;
use tracing::{info, warn};

use crate::engine::TradingEngine;
use crate::types::{Action, Instrument, OptionRight, Symbol};

/// Snapshot of one option position due for settlement
#[derive(Debug, Clone)]
struct ExpiredOption {
    position_id: crate::oms::PositionId,
    symbol: Symbol,
    strike: f64,
    expiry: NaiveDate,
    right: OptionRight,
    quantity: f64,
    strategy_id: String,
    pair_id: Option<String>,
}

/// Summary of one settlement pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettlementReport {
    /// Option positions flattened this pass
    pub settled: usize,
    /// Positions skipped for want of a close price; retried next pass
    pub skipped: usize,
    /// Stock legs synthesized for in-the-money positions
    pub stock_legs: usize,
}

/// CALL settles in the money above the strike, PUT below it
fn in_the_money(right: OptionRight, close: f64, strike: f64) -> bool {
    match right {
        OptionRight::Call => close > strike,
        OptionRight::Put => close < strike,
    }
}

/// Direction of the stock leg: exercising a long call (or being assigned on
/// a short put) buys stock; the mirror cases sell it.
fn stock_leg_action(right: OptionRight, position_is_long: bool) -> Action {
    match (right, position_is_long) {
        (OptionRight::Call, true) => Action::Buy,
        (OptionRight::Call, false) => Action::Sell,
        (OptionRight::Put, true) => Action::Sell,
        (OptionRight::Put, false) => Action::Buy,
    }
}

/// Run one settlement pass for `today`. Safe to invoke repeatedly on the
/// same date: settled positions are flat and no longer match the scan.
pub async fn run_settlement(engine: &TradingEngine, today: NaiveDate) -> SettlementReport {
    let candidates = collect_expired_options(engine, today);
    if candidates.is_empty() {
        info!("settlement: no expired option positions");
        return SettlementReport::default();
    }
    info!(
        "settlement: {} expired option positions to process",
        candidates.len()
    );

    let timeout = Duration::from_secs(engine.config.settlement.close_price_timeout_secs);
    let mut report = SettlementReport::default();

    for option in candidates {
        let close = match engine.market_data.daily_close(option.symbol.as_str(), option.expiry) {
            Some(close) => close,
            None => {
                engine
                    .gateway
                    .request_daily_close(&option.symbol, option.expiry);
                match engine
                    .market_data
                    .wait_for_close(option.symbol.as_str(), option.expiry, timeout)
                    .await
                {
                    Some(close) => close,
                    None => {
                        warn!(
                            "settlement: close for {} on {} unavailable, skipping until next pass",
                            option.symbol, option.expiry
                        );
                        report.skipped += 1;
                        continue;
                    }
                }
            }
        };

        match settle_position(engine, &option, close) {
            SettleOutcome::AlreadyFlat => {}
            SettleOutcome::Expired => report.settled += 1,
            SettleOutcome::Exercised => {
                report.settled += 1;
                report.stock_legs += 1;
            }
        }
    }

    info!(
        "settlement pass complete: {} settled, {} stock legs, {} skipped",
        report.settled, report.stock_legs, report.skipped
    );
    report
}

/// Option positions with non-zero quantity expiring at or before `today`,
/// in deterministic order.
fn collect_expired_options(engine: &TradingEngine, today: NaiveDate) -> Vec<ExpiredOption> {
    engine.with_ledger(|ledger| {
        ledger
            .positions
            .iter()
            .filter(|p| !p.is_flat())
            .filter_map(|p| match p.instrument {
                Instrument::Option {
                    strike,
                    expiry,
                    right,
                } if expiry <= today => Some(ExpiredOption {
                    position_id: p.id,
                    symbol: p.symbol.clone(),
                    strike,
                    expiry,
                    right,
                    quantity: p.quantity,
                    strategy_id: p.strategy_id.clone(),
                    pair_id: p.pair_id.clone(),
                }),
                _ => None,
            })
            .sorted_by(|a, b| {
                a.symbol
                    .as_str()
                    .cmp(b.symbol.as_str())
                    .then(a.expiry.cmp(&b.expiry))
                    .then(a.strike.total_cmp(&b.strike))
            })
            .collect()
    })
}

enum SettleOutcome {
    AlreadyFlat,
    Expired,
    Exercised,
}

/// Flatten one option position and, if in the money, settle the stock leg.
/// The whole multi-step transaction runs under one ledger lock so no fill
/// can interleave with a half-settled position.
fn settle_position(engine: &TradingEngine, option: &ExpiredOption, close: f64) -> SettleOutcome {
    engine.with_ledger(|ledger| {
        // Re-check under the lock: a concurrent pass may have settled it
        let quantity = match ledger.positions.get(option.position_id) {
            Some(p) if !p.is_flat() => p.quantity,
            _ => return SettleOutcome::AlreadyFlat,
        };

        let is_long = quantity > 0.0;
        let contracts = quantity.abs();
        let instrument = Instrument::Option {
            strike: option.strike,
            expiry: option.expiry,
            right: option.right,
        };

        // Leg 1: flatten the option at zero premium
        let flatten_action = if is_long { Action::Sell } else { Action::Buy };
        let option_order = ledger.create_synthetic_order(
            &option.symbol,
            flatten_action,
            contracts,
            &instrument,
            &option.strategy_id,
            option.pair_id.as_deref(),
        );
        if let Err(e) = ledger.process_fill(option_order, contracts, 0.0) {
            warn!(
                "settlement: option leg failed for position #{}: {}",
                option.position_id, e
            );
            return SettleOutcome::AlreadyFlat;
        }

        if !in_the_money(option.right, close, option.strike) {
            info!(
                "settlement: {} {} {} @ {} expired worthless (close {:.2})",
                option.symbol, option.right, option.strike, option.expiry, close
            );
            return SettleOutcome::Expired;
        }

        // Leg 2: stock delivery at the strike, 100 shares per contract
        let shares = contracts * 100.0;
        let action = stock_leg_action(option.right, is_long);
        let stock_order = ledger.create_synthetic_order(
            &option.symbol,
            action,
            shares,
            &Instrument::Stock,
            &option.strategy_id,
            option.pair_id.as_deref(),
        );
        if let Err(e) = ledger.process_fill(stock_order, shares, option.strike) {
            warn!(
                "settlement: stock leg failed for position #{}: {}",
                option.position_id, e
            );
            return SettleOutcome::Expired;
        }

        info!(
            "settlement: {} {} {} {} contracts {} -> {} {} shares @ {:.2} (close {:.2})",
            if is_long { "exercised" } else { "assigned" },
            option.symbol,
            option.right,
            contracts,
            option.expiry,
            action,
            shares,
            option.strike,
            close
        );
        SettleOutcome::Exercised
    })
}
