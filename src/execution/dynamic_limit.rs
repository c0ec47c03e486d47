//! Dynamic limit order strategy
//!
//! Works the spread instead of crossing it: starts at the tick-aligned mid,
//! re-prices a bounded number of times while the market moves away, and
//! converts the remainder to an IOC market order once the timeout expires.
//! An order that is already filling gets extra time and is not chased.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::execution::{
    prices_differ, ExecContext, ExecState, ExecutionStrategy, OrderChanges, StrategyStatus,
};
use crate::config::ExecutionConfig;
use crate::gateway::{BrokerOrder, BrokerOrderType, TimeInForce};
use crate::oms::OrderId;
use crate::types::{Action, ExecKind, Quote, TradeSignal};

/// Timeout extension applied once any partial fill exists
const PARTIAL_FILL_TIMEOUT_MULTIPLIER: f64 = 1.5;
/// A fill covering this fraction of the order is left alone
const SIGNIFICANT_FILL_THRESHOLD: f64 = 0.25;

pub struct DynamicLimitStrategy {
    state: ExecState,
    timeout_secs: f64,
    max_attempts: u32,
    attempts: u32,
    converted_to_market: bool,
    conversion_time: Option<DateTime<Utc>>,
    market_order_timeout_secs: f64,
}

impl DynamicLimitStrategy {
    pub fn new(signal: TradeSignal, order_id: OrderId, config: &ExecutionConfig) -> Self {
        DynamicLimitStrategy {
            state: ExecState::new(signal, order_id),
            timeout_secs: config.dynamic_limit_timeout_secs as f64,
            max_attempts: config.max_reprice_attempts,
            attempts: 0,
            converted_to_market: false,
            conversion_time: None,
            market_order_timeout_secs: config.market_order_timeout_secs as f64,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn converted_to_market(&self) -> bool {
        self.converted_to_market
    }

    /// Effective timeout: extended once the market has started filling us
    fn effective_timeout(&self) -> f64 {
        if self.state.has_partial_fill {
            self.timeout_secs * PARTIAL_FILL_TIMEOUT_MULTIPLIER
        } else {
            self.timeout_secs
        }
    }

    fn current_limit_price(&self) -> Option<f64> {
        self.state.current_order.as_ref().map(|o| o.limit_price)
    }

    /// Tick-aligned target price for the live market, or None when the data
    /// to compute one is momentarily unavailable.
    fn compute_limit_price(&self, ctx: &ExecContext) -> Option<f64> {
        let key = self.state.signal.instrument_key();
        let quote = ctx.market_data.latest_quote(&key)?;
        compute_limit_price(&quote, ctx.market_data.tick_size(&key), self.state.signal.action)
    }
}

/// Pricing rule: with a two-sided book, round the mid to the nearest tick,
/// then clamp so a buy never lifts the ask and a sell never hits the bid.
/// Without a book, fall back to the last trade; without that, no price.
pub fn compute_limit_price(quote: &Quote, tick_size: Option<f64>, action: Action) -> Option<f64> {
    if quote.has_two_sided_book() {
        let bid = quote.bid.unwrap();
        let ask = quote.ask.unwrap();
        let tick = tick_size.filter(|t| *t > 0.0)?;

        let mid = (bid + ask) / 2.0;
        let rounded = (mid / tick).round() * tick;

        let price = match action {
            Action::Buy if rounded >= ask => bid,
            Action::Sell if rounded <= bid => ask,
            _ => rounded,
        };
        return Some(price);
    }
    quote.last.filter(|p| *p > 0.0)
}

impl ExecutionStrategy for DynamicLimitStrategy {
    fn state(&self) -> &ExecState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ExecState {
        &mut self.state
    }

    fn kind(&self) -> ExecKind {
        ExecKind::DynamicLimit
    }

    fn create_order(&mut self, ctx: &ExecContext) -> Option<BrokerOrder> {
        let price = self.compute_limit_price(ctx)?;
        Some(BrokerOrder {
            action: self.state.signal.action,
            quantity: self.state.signal.quantity,
            order_type: BrokerOrderType::Limit,
            limit_price: price,
            tif: TimeInForce::Day,
        })
    }

    fn check_and_update(&mut self, ctx: &ExecContext) {
        if self.state.status != StrategyStatus::Active || self.state.broker_order_id.is_none() {
            return;
        }

        // A converted IOC market order should have resolved immediately;
        // cancel it if the gateway has left it dangling.
        if self.converted_to_market {
            if let Some(at) = self.conversion_time {
                let since = (Utc::now() - at).num_milliseconds() as f64 / 1000.0;
                if since > self.market_order_timeout_secs {
                    warn!(
                        "market IOC order #{} still active after {:.1}s, cancelling",
                        self.state.order_id, since
                    );
                    self.cancel_order(ctx);
                }
            }
            return;
        }

        if self.state.timeout_exceeded(self.effective_timeout()) {
            let remaining = self.state.signal.quantity - self.state.filled_quantity;
            info!(
                "timeout reached for order #{}, converting remaining {:.2} to IOC market",
                self.state.order_id, remaining
            );
            self.modify_order(
                ctx,
                OrderChanges {
                    order_type: Some(BrokerOrderType::Market),
                    tif: Some(TimeInForce::Ioc),
                    limit_price: Some(0.0),
                },
            );
            self.converted_to_market = true;
            self.conversion_time = Some(Utc::now());
            return;
        }

        if self.attempts >= self.max_attempts {
            return;
        }

        // An order the market is filling in size should not be chased
        if self.state.has_partial_fill
            && self.state.filled_fraction() >= SIGNIFICANT_FILL_THRESHOLD
        {
            info!(
                "order #{} significantly filled ({:.0}%), skipping price update",
                self.state.order_id,
                self.state.filled_fraction() * 100.0
            );
            return;
        }

        // Market data gaps skip the cycle rather than raise
        let Some(new_price) = self.compute_limit_price(ctx) else {
            return;
        };
        let Some(current_price) = self.current_limit_price() else {
            return;
        };

        if prices_differ(new_price, current_price) {
            info!(
                "updating limit price for order #{} from {:.4} to {:.4}",
                self.state.order_id, current_price, new_price
            );
            self.modify_order(
                ctx,
                OrderChanges {
                    limit_price: Some(new_price),
                    ..OrderChanges::default()
                },
            );
            self.attempts += 1;
        }
    }
}
