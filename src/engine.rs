//! Trading engine
//!
//! Owns the ledgers, the active-strategy table with its id translator, the
//! market data cache, and the gateway handle. Two locks cover everything:
//! one for the combined position/order ledger (held for a whole logical
//! operation, never across gateway calls), one for the strategy table plus
//! translator. Gateway callbacks arrive on a channel and are drained by a
//! single reconciliation task, so fills for one order are always applied in
//! arrival order.

use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{EngineError, EngineResult};
use crate::execution::{
    create_execution_strategy, dynamic_limit::compute_limit_price, ExecContext, ExecTable,
    PlaceOutcome, SharedStrategy,
};
use crate::gateway::{BrokerGateway, GatewayEvent, OrderStatusEvent};
use crate::market_data::MarketData;
use crate::oms::{FillOutcome, Ledger, OrderId};
use crate::types::{ExecKind, TradeSignal};

/// Result of dispatching one signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Order is live; the strategy is registered and being monitored
    Placed(OrderId),
    /// Pricing data or the gateway handshake is not ready; retry later
    Deferred,
}

pub struct TradingEngine {
    pub config: Config,
    pub(crate) ledger: Mutex<Ledger>,
    pub(crate) exec: Mutex<ExecTable>,
    pub(crate) market_data: Arc<MarketData>,
    pub(crate) gateway: Arc<dyn BrokerGateway>,
}

impl TradingEngine {
    pub fn new(
        config: Config,
        ledger: Ledger,
        market_data: Arc<MarketData>,
        gateway: Arc<dyn BrokerGateway>,
    ) -> Arc<Self> {
        Arc::new(TradingEngine {
            config,
            ledger: Mutex::new(ledger),
            exec: Mutex::new(ExecTable::new()),
            market_data,
            gateway,
        })
    }

    pub(crate) fn exec_ctx(&self) -> ExecContext<'_> {
        ExecContext {
            market_data: &self.market_data,
            gateway: self.gateway.as_ref(),
            exec: &self.exec,
            config: &self.config.execution,
        }
    }

    /// Drain gateway events until the channel closes. This task is the
    /// single writer for fill reconciliation.
    pub fn spawn_event_loop(
        self: &Arc<Self>,
        mut events: UnboundedReceiver<GatewayEvent>,
    ) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            info!("gateway event loop started");
            while let Some(event) = events.recv().await {
                engine.handle_event(event);
            }
            info!("gateway event loop stopped");
        })
    }

    pub fn handle_event(&self, event: GatewayEvent) {
        match event {
            GatewayEvent::Ready {
                next_broker_order_id,
            } => {
                self.exec
                    .lock()
                    .unwrap()
                    .translator
                    .seed(next_broker_order_id);
                info!("gateway ready, next broker order id {}", next_broker_order_id);
            }
            GatewayEvent::ContractDetails {
                instrument_key,
                tick_size,
            } => {
                self.market_data.set_tick_size(&instrument_key, tick_size);
            }
            GatewayEvent::DailyClose {
                symbol,
                date,
                close,
            } => {
                self.market_data.set_daily_close(symbol.as_str(), date, close);
            }
            GatewayEvent::Execution {
                broker_order_id,
                symbol,
                shares,
                price,
            } => {
                info!(
                    "execution report: broker #{} {} {} @ {:.4}",
                    broker_order_id, symbol, shares, price
                );
            }
            GatewayEvent::OrderStatus(status) => self.handle_order_status(status),
        }
    }

    fn handle_order_status(&self, event: OrderStatusEvent) {
        let order_id = {
            let exec = self.exec.lock().unwrap();
            exec.translator.internal_id(event.broker_order_id)
        };
        let Some(order_id) = order_id else {
            // Mapping not registered yet (or never ours): safe to ignore,
            // the broker will keep reporting state transitions.
            debug!(
                "status for unmapped broker order id {}, ignoring",
                event.broker_order_id
            );
            return;
        };

        // Drive the strategy state machine first
        let strategy = {
            let exec = self.exec.lock().unwrap();
            exec.get(order_id)
        };
        if let Some(strategy) = strategy {
            strategy.lock().unwrap().process_order_status(&event);
        }

        // Then merge any newly reported fill quantity into the ledgers
        if event.filled > 0.0 {
            let fill_price = if event.last_fill_price > 0.0 {
                event.last_fill_price
            } else {
                event.avg_fill_price
            };
            let result = self
                .ledger
                .lock()
                .unwrap()
                .process_fill(order_id, event.filled, fill_price);
            match result {
                Ok(FillOutcome::Applied { delta, position_id }) => {
                    debug!(
                        "order #{}: applied fill delta {:.2} to position #{}",
                        order_id, delta, position_id
                    );
                }
                Ok(FillOutcome::Duplicate) => {}
                Err(e) if e.is_protocol_violation() => {
                    error!("dropping fill callback for order #{}: {}", order_id, e);
                }
                Err(e) => {
                    error!("fill reconciliation failed for order #{}: {}", order_id, e);
                }
            }
        }
    }

    /// Cheap pre-check so a signal that cannot produce an order yet is
    /// deferred without minting ledger rows.
    fn pricing_ready(&self, signal: &TradeSignal) -> bool {
        match signal.execution {
            ExecKind::IocMarket | ExecKind::Limit => true,
            ExecKind::DynamicLimit => {
                let key = signal.instrument_key();
                match self.market_data.latest_quote(&key) {
                    Some(quote) => compute_limit_price(
                        &quote,
                        self.market_data.tick_size(&key),
                        signal.action,
                    )
                    .is_some(),
                    None => false,
                }
            }
        }
    }

    /// Turn one signal into a live order: validate it, mint the order row,
    /// build the strategy, register it, and submit through the gateway.
    pub fn submit_signal(&self, signal: &TradeSignal) -> EngineResult<DispatchOutcome> {
        crate::execution::validate_signal(signal)?;
        if !self.exec.lock().unwrap().translator.is_seeded() {
            debug!("gateway not ready, deferring signal for {}", signal.ticker);
            return Ok(DispatchOutcome::Deferred);
        }
        if !self.pricing_ready(signal) {
            debug!(
                "pricing not ready for {}, deferring signal",
                signal.ticker
            );
            return Ok(DispatchOutcome::Deferred);
        }

        let order_id = {
            let mut ledger = self.ledger.lock().unwrap();
            ledger.create_order_info(signal)
        };

        let strategy = create_execution_strategy(signal, order_id, &self.config.execution)?;
        let shared: SharedStrategy = Arc::new(Mutex::new(strategy));
        self.exec.lock().unwrap().insert(order_id, shared.clone());

        let outcome = shared.lock().unwrap().place_order(&self.exec_ctx());
        match outcome {
            PlaceOutcome::Placed | PlaceOutcome::AlreadyPlaced => {
                info!(
                    "signal dispatched: {} {} x{} as order #{}",
                    signal.action, signal.ticker, signal.quantity, order_id
                );
                Ok(DispatchOutcome::Placed(order_id))
            }
            PlaceOutcome::NoOrder | PlaceOutcome::NotReady => {
                // Pricing vanished between the pre-check and placement, or
                // the handshake raced. The minted row stays inert at zero
                // fills; the signal is retried with a fresh order.
                self.exec.lock().unwrap().remove(order_id);
                warn!(
                    "placement deferred after minting order #{} for {}",
                    order_id, signal.ticker
                );
                Ok(DispatchOutcome::Deferred)
            }
        }
    }

    /// One monitor pass: snapshot the table, drive each strategy, retire
    /// the complete ones. Returns the number retired.
    pub fn monitor_sweep(&self) -> usize {
        let snapshot = {
            let exec = self.exec.lock().unwrap();
            exec.snapshot()
        };

        let mut retired = 0;
        for (order_id, strategy) in snapshot {
            let complete = {
                let mut s = strategy.lock().unwrap();
                s.check_and_update(&self.exec_ctx());
                s.is_complete()
            };
            if complete {
                self.exec.lock().unwrap().remove(order_id);
                debug!("retired execution strategy for order #{}", order_id);
                retired += 1;
            }
        }
        retired
    }

    /// Number of strategies currently being monitored
    pub fn active_strategies(&self) -> usize {
        self.exec.lock().unwrap().len()
    }

    /// Request a cooperative cancel for a live order
    pub fn cancel_order(&self, order_id: OrderId) -> EngineResult<()> {
        let strategy = {
            let exec = self.exec.lock().unwrap();
            exec.get(order_id)
        };
        match strategy {
            Some(strategy) => {
                strategy.lock().unwrap().cancel_order(&self.exec_ctx());
                Ok(())
            }
            None => Err(EngineError::UnknownOrder(order_id)),
        }
    }

    /// Run a closure against the ledger under its lock
    pub fn with_ledger<R>(&self, f: impl FnOnce(&mut Ledger) -> R) -> R {
        let mut ledger = self.ledger.lock().unwrap();
        f(&mut ledger)
    }
}
