//! Execution strategies
//!
//! Each in-flight order is driven by one execution strategy: a small state
//! machine that builds the contract/order payload, submits it through the
//! gateway, digests status callbacks, and (for the dynamic variant) adjusts
//! the live order until it reaches a terminal state. The set of strategies
//! is closed: IOC-market, plain limit, and dynamic limit, selected by a
//! factory keyed on the signal's execution kind.

pub mod dynamic_limit;
pub mod limit;
pub mod market;
pub mod monitor;

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::config::ExecutionConfig;
use crate::error::{EngineError, EngineResult};
use crate::gateway::{
    BrokerContract, BrokerGateway, BrokerOrder, BrokerOrderId, BrokerOrderType, OrderStatusEvent,
    TimeInForce,
};
use crate::market_data::MarketData;
use crate::oms::{IdTranslator, OrderId};
use crate::types::{ExecKind, Instrument, TradeSignal};

pub use dynamic_limit::DynamicLimitStrategy;
pub use limit::LimitStrategy;
pub use market::IocMarketStrategy;

const PRICE_EPS: f64 = 1e-9;

/// Lifecycle of one execution strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyStatus {
    Pending,
    Active,
    Completed,
    Cancelled,
}

/// Field overrides applied by an in-place order modification
#[derive(Debug, Clone, Default)]
pub struct OrderChanges {
    pub order_type: Option<BrokerOrderType>,
    pub tif: Option<TimeInForce>,
    pub limit_price: Option<f64>,
}

/// Outcome of a placement attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceOutcome {
    Placed,
    /// Pricing data missing or invalid; try again later
    NoOrder,
    /// Gateway handshake has not seeded broker ids yet; try again later
    NotReady,
    AlreadyPlaced,
}

/// Everything a strategy may touch while being driven. Strategies never
/// reach into the ledger; fills flow through the engine's reconciliation
/// path.
pub struct ExecContext<'a> {
    pub market_data: &'a MarketData,
    pub gateway: &'a dyn BrokerGateway,
    pub exec: &'a Mutex<ExecTable>,
    pub config: &'a ExecutionConfig,
}

/// State shared by every strategy variant
pub struct ExecState {
    pub signal: TradeSignal,
    pub order_id: OrderId,
    pub broker_order_id: Option<BrokerOrderId>,
    pub status: StrategyStatus,
    /// Last payload sent to the gateway; base for modifications
    pub current_order: Option<BrokerOrder>,
    pub filled_quantity: f64,
    pub avg_fill_price: f64,
    pub has_partial_fill: bool,
    pub started_at: DateTime<Utc>,
}

impl ExecState {
    pub fn new(signal: TradeSignal, order_id: OrderId) -> Self {
        ExecState {
            signal,
            order_id,
            broker_order_id: None,
            status: StrategyStatus::Pending,
            current_order: None,
            filled_quantity: 0.0,
            avg_fill_price: 0.0,
            has_partial_fill: false,
            started_at: Utc::now(),
        }
    }

    /// Build the instrument descriptor for the signal
    pub fn create_contract(&self) -> BrokerContract {
        let multiplier = match self.signal.instrument {
            Instrument::Option { .. } => Some(100),
            _ => None,
        };
        BrokerContract {
            symbol: self.signal.ticker.clone(),
            instrument: self.signal.instrument.clone(),
            exchange: "SMART".to_string(),
            currency: "USD".to_string(),
            multiplier,
        }
    }

    /// Map a gateway status callback onto the strategy lifecycle. Any
    /// partial or unrecognized live status keeps the order Active.
    pub fn process_status(&mut self, event: &OrderStatusEvent) {
        self.filled_quantity = event.filled;
        self.avg_fill_price = event.avg_fill_price;

        if event.filled > 0.0 && event.remaining > 0.0 {
            self.status = StrategyStatus::Active;
            self.has_partial_fill = true;
            debug!(
                "order #{} partially filled: {} at {:.4}, {} remaining",
                self.order_id, event.filled, event.avg_fill_price, event.remaining
            );
        } else if event.status == "Filled" {
            self.status = StrategyStatus::Completed;
            debug!(
                "order #{} fully filled: {} at {:.4}",
                self.order_id, event.filled, event.avg_fill_price
            );
        } else if event.status == "Cancelled" || event.status == "ApiCancelled" {
            self.status = StrategyStatus::Cancelled;
            debug!(
                "order #{} cancelled with {} filled at {:.4}",
                self.order_id, event.filled, event.avg_fill_price
            );
        } else {
            self.status = StrategyStatus::Active;
            debug!(
                "order #{} status {}: {} filled, {} remaining",
                self.order_id, event.status, event.filled, event.remaining
            );
        }
    }

    pub fn timeout_exceeded(&self, timeout_secs: f64) -> bool {
        let elapsed = (Utc::now() - self.started_at).num_milliseconds() as f64 / 1000.0;
        elapsed >= timeout_secs
    }

    /// Fraction of the original quantity already filled
    pub fn filled_fraction(&self) -> f64 {
        if self.signal.quantity <= 0.0 {
            return 0.0;
        }
        self.filled_quantity / self.signal.quantity
    }
}

/// One in-flight order's execution state machine
pub trait ExecutionStrategy: Send {
    fn state(&self) -> &ExecState;
    fn state_mut(&mut self) -> &mut ExecState;
    fn kind(&self) -> ExecKind;

    /// Build the order payload. None means required pricing data is missing
    /// or invalid: the caller retries later, this is not a failure.
    fn create_order(&mut self, ctx: &ExecContext) -> Option<BrokerOrder>;

    /// Variant-specific periodic hook driven by the monitor
    fn check_and_update(&mut self, _ctx: &ExecContext) {}

    /// Submit through the gateway. The broker id is allocated and its
    /// mapping registered under the exec lock before the submission call,
    /// so a callback can never reference an unmapped id.
    fn place_order(&mut self, ctx: &ExecContext) -> PlaceOutcome {
        if self.state().broker_order_id.is_some() {
            return PlaceOutcome::AlreadyPlaced;
        }
        let Some(ticket) = self.create_order(ctx) else {
            return PlaceOutcome::NoOrder;
        };
        let contract = self.state().create_contract();

        let broker_id = {
            let mut exec = ctx.exec.lock().unwrap();
            exec.translator.allocate(self.state().order_id)
        };
        let Some(broker_id) = broker_id else {
            debug!(
                "order #{}: broker id counter not seeded yet, deferring",
                self.state().order_id
            );
            return PlaceOutcome::NotReady;
        };

        {
            let state = self.state_mut();
            state.broker_order_id = Some(broker_id);
            state.current_order = Some(ticket.clone());
            state.status = StrategyStatus::Active;
        }
        ctx.gateway.submit(broker_id, &contract, &ticket);
        info!(
            "placed order #{} (broker #{}) {} {} x{}",
            self.state().order_id,
            broker_id,
            ticket.action,
            contract.symbol,
            ticket.quantity
        );
        PlaceOutcome::Placed
    }

    /// Re-submit the live order under the same broker id with fields
    /// overridden. Only legal while Active with a bound broker id.
    fn modify_order(&mut self, ctx: &ExecContext, changes: OrderChanges) {
        let state = self.state();
        let (Some(broker_id), Some(current)) = (state.broker_order_id, state.current_order.clone())
        else {
            return;
        };
        if state.status != StrategyStatus::Active {
            return;
        }

        let mut modified = current;
        if let Some(order_type) = changes.order_type {
            modified.order_type = order_type;
        }
        if let Some(tif) = changes.tif {
            modified.tif = tif;
        }
        if let Some(price) = changes.limit_price {
            modified.limit_price = price;
        }

        let contract = self.state().create_contract();
        self.state_mut().current_order = Some(modified.clone());
        ctx.gateway.submit(broker_id, &contract, &modified);
        info!(
            "modified order #{} (broker #{}): {:?}",
            self.state().order_id,
            broker_id,
            changes
        );
    }

    /// Cooperative cancel: sets intent with the gateway; the terminal state
    /// arrives via a status callback.
    fn cancel_order(&mut self, ctx: &ExecContext) {
        let state = self.state();
        if state.status == StrategyStatus::Active {
            if let Some(broker_id) = state.broker_order_id {
                ctx.gateway.cancel(broker_id);
                info!(
                    "cancel requested for order #{} (broker #{})",
                    state.order_id, broker_id
                );
            }
        }
    }

    fn process_order_status(&mut self, event: &OrderStatusEvent) {
        self.state_mut().process_status(event);
    }

    fn is_complete(&self) -> bool {
        matches!(
            self.state().status,
            StrategyStatus::Completed | StrategyStatus::Cancelled
        )
    }
}

/// Shared handle to one strategy; the per-entry mutex serializes the
/// callback path against the monitor.
pub type SharedStrategy = Arc<Mutex<Box<dyn ExecutionStrategy>>>;

/// Active strategy table plus the id translator, guarded together by one
/// lock in the engine.
pub struct ExecTable {
    strategies: HashMap<OrderId, SharedStrategy>,
    pub translator: IdTranslator,
}

impl ExecTable {
    pub fn new() -> Self {
        ExecTable {
            strategies: HashMap::new(),
            translator: IdTranslator::new(),
        }
    }

    pub fn insert(&mut self, order_id: OrderId, strategy: SharedStrategy) {
        self.strategies.insert(order_id, strategy);
    }

    pub fn remove(&mut self, order_id: OrderId) -> Option<SharedStrategy> {
        self.strategies.remove(&order_id)
    }

    pub fn get(&self, order_id: OrderId) -> Option<SharedStrategy> {
        self.strategies.get(&order_id).cloned()
    }

    /// Copy of the current entries. The monitor iterates this snapshot so
    /// insertions and removals during the sweep cannot invalidate it.
    pub fn snapshot(&self) -> Vec<(OrderId, SharedStrategy)> {
        self.strategies
            .iter()
            .map(|(id, s)| (*id, s.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

impl Default for ExecTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Reject malformed trade instructions before any order exists
pub fn validate_signal(signal: &TradeSignal) -> EngineResult<()> {
    if signal.quantity <= 0.0 {
        return Err(EngineError::InvalidSignal(format!(
            "non-positive quantity {} for {}",
            signal.quantity, signal.ticker
        )));
    }
    if signal.execution == ExecKind::Limit && signal.limit_price.filter(|p| *p > 0.0).is_none() {
        return Err(EngineError::InvalidSignal(format!(
            "limit order for {} without a limit price",
            signal.ticker
        )));
    }
    Ok(())
}

/// Build the strategy for a validated signal
pub fn create_execution_strategy(
    signal: &TradeSignal,
    order_id: OrderId,
    config: &ExecutionConfig,
) -> EngineResult<Box<dyn ExecutionStrategy>> {
    validate_signal(signal)?;
    match signal.execution {
        ExecKind::IocMarket => Ok(Box::new(IocMarketStrategy::new(signal.clone(), order_id))),
        ExecKind::Limit => {
            let price = signal
                .limit_price
                .filter(|p| *p > 0.0)
                .expect("validated above");
            Ok(Box::new(LimitStrategy::new(signal.clone(), order_id, price)))
        }
        ExecKind::DynamicLimit => Ok(Box::new(DynamicLimitStrategy::new(
            signal.clone(),
            order_id,
            config,
        ))),
    }
}

/// Price comparison tolerance for repricing decisions
pub(crate) fn prices_differ(a: f64, b: f64) -> bool {
    (a - b).abs() > PRICE_EPS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Action, Symbol};

    fn signal(execution: ExecKind, limit_price: Option<f64>) -> TradeSignal {
        TradeSignal {
            ticker: Symbol::new("AAPL"),
            action: Action::Buy,
            quantity: 10.0,
            instrument: Instrument::Stock,
            execution,
            limit_price,
            pair_id: None,
            strategy_id: "TEST".to_string(),
        }
    }

    fn status(status: &str, filled: f64, remaining: f64, avg: f64) -> OrderStatusEvent {
        OrderStatusEvent {
            broker_order_id: 1,
            status: status.to_string(),
            filled,
            remaining,
            avg_fill_price: avg,
            last_fill_price: avg,
        }
    }

    #[test]
    fn test_factory_rejects_limit_without_price() {
        let config = ExecutionConfig::default();
        let err = create_execution_strategy(&signal(ExecKind::Limit, None), 1, &config).err().unwrap();
        assert!(matches!(err, EngineError::InvalidSignal(_)));
    }

    #[test]
    fn test_factory_rejects_non_positive_quantity() {
        let config = ExecutionConfig::default();
        let mut s = signal(ExecKind::IocMarket, None);
        s.quantity = 0.0;
        assert!(create_execution_strategy(&s, 1, &config).is_err());
    }

    #[test]
    fn test_factory_builds_all_variants() {
        let config = ExecutionConfig::default();
        let kinds = [
            (ExecKind::IocMarket, None),
            (ExecKind::Limit, Some(100.0)),
            (ExecKind::DynamicLimit, None),
        ];
        for (kind, price) in kinds {
            let strategy = create_execution_strategy(&signal(kind, price), 1, &config).unwrap();
            assert_eq!(strategy.kind(), kind);
            assert_eq!(strategy.state().status, StrategyStatus::Pending);
        }
    }

    #[test]
    fn test_status_mapping_partial_then_filled() {
        let mut state = ExecState::new(signal(ExecKind::IocMarket, None), 1);

        state.process_status(&status("Submitted", 4.0, 6.0, 10.0));
        assert_eq!(state.status, StrategyStatus::Active);
        assert!(state.has_partial_fill);

        state.process_status(&status("Filled", 10.0, 0.0, 10.1));
        assert_eq!(state.status, StrategyStatus::Completed);
        assert_eq!(state.filled_quantity, 10.0);
    }

    #[test]
    fn test_status_mapping_unrecognized_stays_active() {
        let mut state = ExecState::new(signal(ExecKind::IocMarket, None), 1);
        state.process_status(&status("PreSubmitted", 0.0, 10.0, 0.0));
        assert_eq!(state.status, StrategyStatus::Active);

        state.process_status(&status("Cancelled", 0.0, 10.0, 0.0));
        assert_eq!(state.status, StrategyStatus::Cancelled);
    }

    #[test]
    fn test_option_contract_carries_multiplier() {
        let mut s = signal(ExecKind::IocMarket, None);
        s.instrument = Instrument::Option {
            strike: 100.0,
            expiry: chrono::NaiveDate::from_ymd_opt(2026, 9, 18).unwrap(),
            right: crate::types::OptionRight::Call,
        };
        let state = ExecState::new(s, 1);
        let contract = state.create_contract();
        assert_eq!(contract.multiplier, Some(100));
        assert_eq!(contract.exchange, "SMART");
    }
}
