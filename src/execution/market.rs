//! IOC market order strategy

use crate::execution::{ExecContext, ExecState, ExecutionStrategy};
use crate::gateway::{BrokerOrder, BrokerOrderType, TimeInForce};
use crate::oms::OrderId;
use crate::types::{ExecKind, TradeSignal};

/// Market order with immediate-or-cancel time in force. The gateway cancels
/// any unfilled remainder on its own, so there is no periodic work.
pub struct IocMarketStrategy {
    state: ExecState,
}

impl IocMarketStrategy {
    pub fn new(signal: TradeSignal, order_id: OrderId) -> Self {
        IocMarketStrategy {
            state: ExecState::new(signal, order_id),
        }
    }
}

impl ExecutionStrategy for IocMarketStrategy {
    fn state(&self) -> &ExecState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ExecState {
        &mut self.state
    }

    fn kind(&self) -> ExecKind {
        ExecKind::IocMarket
    }

    fn create_order(&mut self, _ctx: &ExecContext) -> Option<BrokerOrder> {
        Some(BrokerOrder {
            action: self.state.signal.action,
            quantity: self.state.signal.quantity,
            order_type: BrokerOrderType::Market,
            limit_price: 0.0,
            tif: TimeInForce::Ioc,
        })
    }
}
