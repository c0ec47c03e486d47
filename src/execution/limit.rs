//! Plain limit order strategy

use crate::execution::{ExecContext, ExecState, ExecutionStrategy};
use crate::gateway::{BrokerOrder, BrokerOrderType, TimeInForce};
use crate::oms::OrderId;
use crate::types::{ExecKind, TradeSignal};

/// Fixed-price limit order. No periodic adjustment: it rests until filled
/// or cancelled at the trading-day boundary by the DAY time in force.
pub struct LimitStrategy {
    state: ExecState,
    limit_price: f64,
}

impl LimitStrategy {
    /// The factory validates the price before constructing this, so a
    /// missing price never reaches here.
    pub fn new(signal: TradeSignal, order_id: OrderId, limit_price: f64) -> Self {
        LimitStrategy {
            state: ExecState::new(signal, order_id),
            limit_price,
        }
    }
}

impl ExecutionStrategy for LimitStrategy {
    fn state(&self) -> &ExecState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ExecState {
        &mut self.state
    }

    fn kind(&self) -> ExecKind {
        ExecKind::Limit
    }

    fn create_order(&mut self, _ctx: &ExecContext) -> Option<BrokerOrder> {
        Some(BrokerOrder {
            action: self.state.signal.action,
            quantity: self.state.signal.quantity,
            order_type: BrokerOrderType::Limit,
            limit_price: self.limit_price,
            tif: TimeInForce::Day,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionConfig;
    use crate::execution::ExecTable;
    use crate::gateway::PaperGateway;
    use crate::market_data::MarketData;
    use crate::types::{Action, Instrument, Symbol};
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_limit_order_uses_supplied_price() {
        let signal = TradeSignal {
            ticker: Symbol::new("MSFT"),
            action: Action::Buy,
            quantity: 50.0,
            instrument: Instrument::Stock,
            execution: ExecKind::Limit,
            limit_price: Some(425.50),
            pair_id: None,
            strategy_id: "TEST".to_string(),
        };
        let mut strategy = LimitStrategy::new(signal, 1, 425.50);

        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let market_data = Arc::new(MarketData::new());
        let gateway = PaperGateway::new(tx, market_data.clone());
        let exec = Mutex::new(ExecTable::new());
        let config = ExecutionConfig::default();
        let ctx = ExecContext {
            market_data: &market_data,
            gateway: &gateway,
            exec: &exec,
            config: &config,
        };

        let order = strategy.create_order(&ctx).unwrap();
        assert_eq!(order.order_type, BrokerOrderType::Limit);
        assert_eq!(order.limit_price, 425.50);
        assert_eq!(order.tif, TimeInForce::Day);
    }
}
