//! Position ledger and fill reconciliation
//!
//! `Ledger` owns both the position book and the order book behind one
//! logical lock (the engine wraps it in a single `Mutex`), so a fill is
//! merged into the order's progress and the position's basis as one atomic
//! step. The same path serves broker callbacks and synthetic settlement
//! fills.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

use crate::error::{EngineError, EngineResult};
use crate::oms::orders::{ExecutionType, OrderBook, OrderId, OrderRecord};
use crate::oms::store::LedgerStore;
use crate::types::{Action, Instrument, Symbol, TradeSignal};

/// Opaque position identifier, minted locally and persisted
pub type PositionId = u64;

const QTY_EPS: f64 = 1e-9;

/// Net signed holding in one instrument for one strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub symbol: Symbol,
    pub instrument: Instrument,
    pub strategy_id: String,
    /// Positive = long, negative = short
    pub quantity: f64,
    /// Volume-weighted basis of the open exposure; 0.0 when flat
    pub avg_price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pair_id: Option<String>,
    pub last_updated: chrono::DateTime<Utc>,
}

impl Position {
    pub fn is_flat(&self) -> bool {
        self.quantity.abs() < QTY_EPS
    }

    /// Identity match: same symbol, strategy, and instrument terms
    pub fn matches(&self, symbol: &Symbol, instrument: &Instrument, strategy_id: &str) -> bool {
        self.symbol == *symbol && self.strategy_id == strategy_id && self.instrument == *instrument
    }
}

/// In-memory half of the position ledger
pub struct PositionBook {
    positions: HashMap<PositionId, Position>,
    next_id: PositionId,
}

impl PositionBook {
    pub fn new() -> Self {
        PositionBook {
            positions: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn load(positions: Vec<Position>) -> Self {
        let next_id = positions.iter().map(|p| p.id).max().unwrap_or(0) + 1;
        PositionBook {
            positions: positions.into_iter().map(|p| (p.id, p)).collect(),
            next_id,
        }
    }

    /// Linear identity match. Positions are never deleted, so a flat
    /// position with the right identity is found and reused here.
    pub fn find_matching(
        &self,
        symbol: &Symbol,
        instrument: &Instrument,
        strategy_id: &str,
    ) -> Option<PositionId> {
        self.positions
            .values()
            .find(|p| p.matches(symbol, instrument, strategy_id))
            .map(|p| p.id)
    }

    /// Identity match or a freshly minted flat position
    pub fn get_or_create(
        &mut self,
        symbol: &Symbol,
        instrument: &Instrument,
        strategy_id: &str,
        pair_id: Option<&str>,
    ) -> PositionId {
        if let Some(id) = self.find_matching(symbol, instrument, strategy_id) {
            return id;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.positions.insert(
            id,
            Position {
                id,
                symbol: symbol.clone(),
                instrument: instrument.clone(),
                strategy_id: strategy_id.to_string(),
                quantity: 0.0,
                avg_price: 0.0,
                pair_id: pair_id.map(|s| s.to_string()),
                last_updated: Utc::now(),
            },
        );
        debug!("minted position #{} for {} {}", id, symbol, strategy_id);
        id
    }

    pub fn get(&self, id: PositionId) -> Option<&Position> {
        self.positions.get(&id)
    }

    pub fn get_mut(&mut self, id: PositionId) -> Option<&mut Position> {
        self.positions.get_mut(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

impl Default for PositionBook {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of one reconciliation call
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FillOutcome {
    /// New quantity was merged into the ledger
    Applied { delta: f64, position_id: PositionId },
    /// Cumulative fill did not advance; nothing changed
    Duplicate,
}

/// Combined ledger: positions + orders + durable store
pub struct Ledger {
    pub positions: PositionBook,
    pub orders: OrderBook,
    store: Option<LedgerStore>,
    /// Set after a storage failure; memory stays authoritative
    degraded: bool,
}

impl Ledger {
    pub fn in_memory() -> Self {
        Ledger {
            positions: PositionBook::new(),
            orders: OrderBook::new(),
            store: None,
            degraded: false,
        }
    }

    /// Open backed by a store, reloading the persisted snapshot
    pub fn open(store: LedgerStore) -> anyhow::Result<Self> {
        let positions = store.load_positions()?;
        let orders = store.load_orders()?;
        info!(
            "Ledger loaded: {} positions, {} orders",
            positions.len(),
            orders.len()
        );
        Ok(Ledger {
            positions: PositionBook::load(positions),
            orders: OrderBook::load(orders),
            store: Some(store),
            degraded: false,
        })
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Build and persist an order row for a signal, resolving its position
    /// by identity match.
    pub fn create_order_info(&mut self, signal: &TradeSignal) -> OrderId {
        let position_id = self.positions.get_or_create(
            &signal.ticker,
            &signal.instrument,
            &signal.strategy_id,
            signal.pair_id.as_deref(),
        );
        let id = self.orders.mint_id();
        let record = OrderRecord {
            id,
            symbol: signal.ticker.clone(),
            action: signal.action,
            quantity: signal.quantity,
            position_id,
            strategy_id: signal.strategy_id.clone(),
            instrument: signal.instrument.clone(),
            execution_type: signal.execution.into(),
            limit_price: signal.limit_price,
            pair_id: signal.pair_id.clone(),
            submitted_at: Utc::now(),
            last_processed_fill: 0.0,
            fill_processed: false,
        };
        self.persist_order(&record);
        self.orders.insert(record);
        id
    }

    /// Build and persist a synthetic order used by settlement. It is never
    /// submitted to a broker; its fills run through `process_fill` exactly
    /// like real ones.
    pub fn create_synthetic_order(
        &mut self,
        symbol: &Symbol,
        action: Action,
        quantity: f64,
        instrument: &Instrument,
        strategy_id: &str,
        pair_id: Option<&str>,
    ) -> OrderId {
        let position_id =
            self.positions
                .get_or_create(symbol, instrument, strategy_id, pair_id);
        let id = self.orders.mint_id();
        let record = OrderRecord {
            id,
            symbol: symbol.clone(),
            action,
            quantity,
            position_id,
            strategy_id: strategy_id.to_string(),
            instrument: instrument.clone(),
            execution_type: ExecutionType::Settlement,
            limit_price: None,
            pair_id: pair_id.map(|s| s.to_string()),
            submitted_at: Utc::now(),
            last_processed_fill: 0.0,
            fill_processed: false,
        };
        self.persist_order(&record);
        self.orders.insert(record);
        id
    }

    /// Merge a cumulative fill report into the ledger.
    ///
    /// `cumulative_filled` is the total filled quantity the gateway reports
    /// for the order so far. Only the newly observed delta beyond
    /// `last_processed_fill` is applied; a report that does not advance is
    /// a duplicate and leaves the ledger untouched.
    pub fn process_fill(
        &mut self,
        order_id: OrderId,
        cumulative_filled: f64,
        fill_price: f64,
    ) -> EngineResult<FillOutcome> {
        let order = self
            .orders
            .get(order_id)
            .ok_or(EngineError::UnknownOrder(order_id))?;

        let previous = order.last_processed_fill;
        if cumulative_filled < previous - QTY_EPS {
            return Err(EngineError::NonMonotonicFill {
                order_id,
                previous,
                reported: cumulative_filled,
            });
        }

        let mut cumulative = cumulative_filled;
        if cumulative > order.quantity + QTY_EPS {
            warn!(
                "order #{} reported filled {} above quantity {}; clamping",
                order_id, cumulative, order.quantity
            );
            cumulative = order.quantity;
        }

        let delta = cumulative - previous;
        if delta <= QTY_EPS {
            debug!(
                "order #{} duplicate fill report at {:.4}; no ledger delta",
                order_id, cumulative
            );
            return Ok(FillOutcome::Duplicate);
        }

        let action = order.action;
        let position_id = order.position_id;
        let quantity = order.quantity;
        let symbol = order.symbol.clone();

        self.apply_position_delta(position_id, action, delta, fill_price);

        let order = self
            .orders
            .get_mut(order_id)
            .expect("order present above");
        order.last_processed_fill = cumulative;
        order.fill_processed = cumulative >= quantity - QTY_EPS;
        let record = order.clone();
        self.persist_order(&record);

        info!(
            "fill merged: order #{} {} {} +{:.2} @ {:.4} (cum {:.2}/{:.2})",
            order_id, action, symbol, delta, fill_price, cumulative, quantity
        );
        Ok(FillOutcome::Applied { delta, position_id })
    }

    /// The fill-merging arithmetic. Price update priority:
    /// flat => basis 0; same sign growing => weighted average; same sign
    /// shrinking => basis unchanged; sign flip => the crossing fill's price.
    fn apply_position_delta(
        &mut self,
        position_id: PositionId,
        action: Action,
        fill_quantity: f64,
        fill_price: f64,
    ) {
        let position = match self.positions.get_mut(position_id) {
            Some(p) => p,
            None => {
                error!("fill for missing position #{}", position_id);
                return;
            }
        };

        let delta = fill_quantity * action.sign();
        let current_quantity = position.quantity;
        let current_avg = position.avg_price;
        let new_quantity = current_quantity + delta;

        let new_avg = if new_quantity.abs() < QTY_EPS {
            0.0
        } else if current_quantity * new_quantity > 0.0 {
            if new_quantity.abs() > current_quantity.abs() {
                // Adding exposure: quantity-weighted average
                (current_quantity.abs() * current_avg + delta.abs() * fill_price)
                    / new_quantity.abs()
            } else {
                // Reducing exposure: basis of what remains is untouched
                current_avg
            }
        } else {
            // Crossed zero (or opened from flat): the fill defines the basis
            fill_price
        };

        position.quantity = if new_quantity.abs() < QTY_EPS {
            0.0
        } else {
            new_quantity
        };
        position.avg_price = new_avg;
        position.last_updated = Utc::now();

        debug_assert!(
            !(position.is_flat() && position.avg_price != 0.0),
            "flat position must carry zero basis"
        );

        let snapshot = position.clone();
        self.persist_position(&snapshot);
    }

    fn persist_position(&mut self, position: &Position) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save_position(position) {
                error!(
                    "ledger degraded: failed to persist position #{}: {}",
                    position.id, e
                );
                self.degraded = true;
            } else if store.auto_backup() {
                if let Err(e) = store.export_json() {
                    warn!("json backup failed: {}", e);
                }
            }
        }
    }

    fn persist_order(&mut self, order: &OrderRecord) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save_order(order) {
                error!(
                    "ledger degraded: failed to persist order #{}: {}",
                    order.id, e
                );
                self.degraded = true;
            }
        }
    }

    /// Merge-update an order row and persist it
    pub fn update_order<F: FnOnce(&mut OrderRecord)>(
        &mut self,
        order_id: OrderId,
        update: F,
    ) -> EngineResult<()> {
        let order = self
            .orders
            .get_mut(order_id)
            .ok_or(EngineError::UnknownOrder(order_id))?;
        update(order);
        let record = order.clone();
        self.persist_order(&record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ExecKind;
    use approx::assert_relative_eq;

    fn stock_signal(action: Action, quantity: f64) -> TradeSignal {
        TradeSignal {
            ticker: Symbol::new("AAPL"),
            action,
            quantity,
            instrument: Instrument::Stock,
            execution: ExecKind::IocMarket,
            limit_price: None,
            pair_id: None,
            strategy_id: "TEST_001".to_string(),
        }
    }

    fn ledger_with_order(action: Action, quantity: f64) -> (Ledger, OrderId) {
        let mut ledger = Ledger::in_memory();
        let order_id = ledger.create_order_info(&stock_signal(action, quantity));
        (ledger, order_id)
    }

    fn position_of(ledger: &Ledger, order_id: OrderId) -> &Position {
        let pid = ledger.orders.get(order_id).unwrap().position_id;
        ledger.positions.get(pid).unwrap()
    }

    #[test]
    fn test_opening_fill_sets_basis_to_fill_price() {
        let (mut ledger, order_id) = ledger_with_order(Action::Buy, 100.0);
        ledger.process_fill(order_id, 100.0, 189.5).unwrap();

        let pos = position_of(&ledger, order_id);
        assert_relative_eq!(pos.quantity, 100.0);
        assert_relative_eq!(pos.avg_price, 189.5);
    }

    #[test]
    fn test_adding_exposure_uses_weighted_average() {
        let (mut ledger, first) = ledger_with_order(Action::Buy, 100.0);
        ledger.process_fill(first, 100.0, 10.0).unwrap();

        let second = ledger.create_order_info(&stock_signal(Action::Buy, 100.0));
        ledger.process_fill(second, 100.0, 12.0).unwrap();

        let pos = position_of(&ledger, first);
        assert_relative_eq!(pos.quantity, 200.0);
        // Weighted average strictly between the two constituent prices
        assert_relative_eq!(pos.avg_price, 11.0);
        assert!(pos.avg_price > 10.0 && pos.avg_price < 12.0);
    }

    #[test]
    fn test_reducing_exposure_keeps_basis() {
        let (mut ledger, first) = ledger_with_order(Action::Buy, 100.0);
        ledger.process_fill(first, 100.0, 10.0).unwrap();

        let reduce = ledger.create_order_info(&stock_signal(Action::Sell, 40.0));
        ledger.process_fill(reduce, 40.0, 15.0).unwrap();

        let pos = position_of(&ledger, first);
        assert_relative_eq!(pos.quantity, 60.0);
        assert_relative_eq!(pos.avg_price, 10.0);
    }

    #[test]
    fn test_flattening_zeroes_basis() {
        let (mut ledger, first) = ledger_with_order(Action::Buy, 100.0);
        ledger.process_fill(first, 100.0, 10.0).unwrap();

        let close = ledger.create_order_info(&stock_signal(Action::Sell, 100.0));
        ledger.process_fill(close, 100.0, 12.5).unwrap();

        let pos = position_of(&ledger, first);
        assert!(pos.is_flat());
        assert_relative_eq!(pos.avg_price, 0.0);
    }

    #[test]
    fn test_sign_flip_resets_basis_to_crossing_fill() {
        let (mut ledger, first) = ledger_with_order(Action::Buy, 100.0);
        ledger.process_fill(first, 100.0, 10.0).unwrap();

        // Sell 150: close the 100 long and open a 50 short
        let flip = ledger.create_order_info(&stock_signal(Action::Sell, 150.0));
        ledger.process_fill(flip, 150.0, 11.0).unwrap();

        let pos = position_of(&ledger, first);
        assert_relative_eq!(pos.quantity, -50.0);
        assert_relative_eq!(pos.avg_price, 11.0);
    }

    #[test]
    fn test_short_position_arithmetic_mirrors_long() {
        let (mut ledger, first) = ledger_with_order(Action::Sell, 10.0);
        ledger.process_fill(first, 10.0, 5.0).unwrap();

        let add = ledger.create_order_info(&stock_signal(Action::Sell, 10.0));
        ledger.process_fill(add, 10.0, 7.0).unwrap();

        let pos = position_of(&ledger, first);
        assert_relative_eq!(pos.quantity, -20.0);
        assert_relative_eq!(pos.avg_price, 6.0);
    }

    #[test]
    fn test_duplicate_cumulative_report_is_noop() {
        let (mut ledger, order_id) = ledger_with_order(Action::Buy, 100.0);
        let first = ledger.process_fill(order_id, 60.0, 10.0).unwrap();
        assert!(matches!(first, FillOutcome::Applied { .. }));

        // Same cumulative value again: zero additional ledger delta
        let second = ledger.process_fill(order_id, 60.0, 10.0).unwrap();
        assert_eq!(second, FillOutcome::Duplicate);

        let pos = position_of(&ledger, order_id);
        assert_relative_eq!(pos.quantity, 60.0);
    }

    #[test]
    fn test_partial_fills_accumulate_incrementally() {
        let (mut ledger, order_id) = ledger_with_order(Action::Buy, 100.0);
        ledger.process_fill(order_id, 30.0, 10.0).unwrap();
        ledger.process_fill(order_id, 100.0, 11.0).unwrap();

        let order = ledger.orders.get(order_id).unwrap();
        assert!(order.fill_processed);

        // 30 @ 10 + 70 @ 11 => weighted basis 10.70
        let pos = position_of(&ledger, order_id);
        assert_relative_eq!(pos.quantity, 100.0);
        assert_relative_eq!(pos.avg_price, 10.70, epsilon = 1e-9);
    }

    #[test]
    fn test_decreasing_cumulative_is_protocol_violation() {
        let (mut ledger, order_id) = ledger_with_order(Action::Buy, 100.0);
        ledger.process_fill(order_id, 60.0, 10.0).unwrap();

        let err = ledger.process_fill(order_id, 40.0, 10.0).unwrap_err();
        assert!(err.is_protocol_violation());

        // Ledger untouched by the bad report
        let pos = position_of(&ledger, order_id);
        assert_relative_eq!(pos.quantity, 60.0);
    }

    #[test]
    fn test_unknown_order_fails_loudly() {
        let mut ledger = Ledger::in_memory();
        let err = ledger.process_fill(999, 10.0, 5.0).unwrap_err();
        assert!(matches!(err, EngineError::UnknownOrder(999)));
    }

    #[test]
    fn test_flat_position_is_reused_by_identity() {
        let (mut ledger, first) = ledger_with_order(Action::Buy, 10.0);
        ledger.process_fill(first, 10.0, 100.0).unwrap();
        let close = ledger.create_order_info(&stock_signal(Action::Sell, 10.0));
        ledger.process_fill(close, 10.0, 101.0).unwrap();

        let reopened = ledger.create_order_info(&stock_signal(Action::Buy, 5.0));
        let pid_first = ledger.orders.get(first).unwrap().position_id;
        let pid_reopened = ledger.orders.get(reopened).unwrap().position_id;
        assert_eq!(pid_first, pid_reopened);
        assert_eq!(ledger.positions.len(), 1);
    }

    #[test]
    fn test_different_strikes_get_different_positions() {
        let mut ledger = Ledger::in_memory();
        let expiry = chrono::NaiveDate::from_ymd_opt(2026, 9, 18).unwrap();
        let mut signal = stock_signal(Action::Sell, 2.0);
        signal.instrument = Instrument::Option {
            strike: 100.0,
            expiry,
            right: crate::types::OptionRight::Call,
        };
        let a = ledger.create_order_info(&signal);

        signal.instrument = Instrument::Option {
            strike: 105.0,
            expiry,
            right: crate::types::OptionRight::Call,
        };
        let b = ledger.create_order_info(&signal);

        assert_ne!(
            ledger.orders.get(a).unwrap().position_id,
            ledger.orders.get(b).unwrap().position_id
        );
    }

    #[test]
    fn test_update_order_merges_fields() {
        let (mut ledger, order_id) = ledger_with_order(Action::Buy, 100.0);
        ledger
            .update_order(order_id, |order| {
                order.limit_price = Some(42.5);
            })
            .unwrap();
        assert_eq!(ledger.orders.get(order_id).unwrap().limit_price, Some(42.5));

        let err = ledger.update_order(999, |_| {}).unwrap_err();
        assert!(matches!(err, EngineError::UnknownOrder(999)));
    }

    #[test]
    fn test_overreported_fill_clamps_to_order_quantity() {
        let (mut ledger, order_id) = ledger_with_order(Action::Buy, 10.0);
        ledger.process_fill(order_id, 12.0, 10.0).unwrap();

        let order = ledger.orders.get(order_id).unwrap();
        assert_relative_eq!(order.last_processed_fill, 10.0);
        assert!(order.fill_processed);
    }
}
