//! Broker gateway boundary
//!
//! Defines the contract the engine speaks to a broker: synchronous
//! `submit`/`cancel` calls going out, and an event channel coming back.
//! Callbacks never touch engine locks directly; the gateway side pushes
//! `GatewayEvent`s into a channel drained by a single reconciliation task.
//!
//! `PaperGateway` is the built-in implementation: it acknowledges
//! submissions with simulated fills through the same channel, so the whole
//! engine runs end-to-end without a live broker session. A live adapter
//! plugs in behind the same trait.

use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::market_data::MarketData;
use crate::types::{Action, Instrument, Symbol};

/// Broker-assigned order identifier
pub type BrokerOrderId = i64;

/// Order type on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerOrderType {
    Market,
    Limit,
}

/// Time-in-force on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeInForce {
    Day,
    Ioc,
}

/// Instrument descriptor submitted with an order
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerContract {
    pub symbol: Symbol,
    pub instrument: Instrument,
    pub exchange: String,
    pub currency: String,
    /// Shares per contract; 100 for listed options
    pub multiplier: Option<u32>,
}

/// Order payload submitted to the gateway
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerOrder {
    pub action: Action,
    pub quantity: f64,
    pub order_type: BrokerOrderType,
    /// 0.0 for market orders
    pub limit_price: f64,
    pub tif: TimeInForce,
}

/// Order status callback payload. `filled` is cumulative.
#[derive(Debug, Clone)]
pub struct OrderStatusEvent {
    pub broker_order_id: BrokerOrderId,
    pub status: String,
    pub filled: f64,
    pub remaining: f64,
    pub avg_fill_price: f64,
    pub last_fill_price: f64,
}

/// Asynchronous events delivered by the gateway
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// Connection handshake complete; seeds the broker order id counter
    Ready { next_broker_order_id: BrokerOrderId },
    OrderStatus(OrderStatusEvent),
    /// Informational execution report
    Execution {
        broker_order_id: BrokerOrderId,
        symbol: Symbol,
        shares: f64,
        price: f64,
    },
    /// Contract details response carrying the minimum price increment
    ContractDetails {
        instrument_key: String,
        tick_size: f64,
    },
    /// Official daily bar close for a historical-data request
    DailyClose {
        symbol: Symbol,
        date: NaiveDate,
        close: f64,
    },
}

/// Outbound broker operations. The id is allocated by the caller before
/// submission so the id mapping exists before any callback can reference it.
pub trait BrokerGateway: Send + Sync {
    fn submit(&self, broker_order_id: BrokerOrderId, contract: &BrokerContract, order: &BrokerOrder);
    fn cancel(&self, broker_order_id: BrokerOrderId);
    /// Request the official close for `date`; answered via `DailyClose`
    fn request_daily_close(&self, symbol: &Symbol, date: NaiveDate);
}

struct PaperBook {
    orders: HashMap<BrokerOrderId, BrokerOrder>,
}

/// Simulated gateway: fills limit orders at their limit price and market
/// orders at the cached last/mid price. Orders with no usable price rest
/// until cancelled.
pub struct PaperGateway {
    events: UnboundedSender<GatewayEvent>,
    market_data: Arc<MarketData>,
    book: Mutex<PaperBook>,
}

impl PaperGateway {
    pub fn new(events: UnboundedSender<GatewayEvent>, market_data: Arc<MarketData>) -> Self {
        PaperGateway {
            events,
            market_data,
            book: Mutex::new(PaperBook {
                orders: HashMap::new(),
            }),
        }
    }

    /// Emit the connection handshake, seeding broker order ids
    pub fn announce_ready(&self, next_broker_order_id: BrokerOrderId) {
        let _ = self.events.send(GatewayEvent::Ready {
            next_broker_order_id,
        });
    }

    fn send_status(&self, event: OrderStatusEvent) {
        if self.events.send(GatewayEvent::OrderStatus(event)).is_err() {
            warn!("gateway event channel closed; dropping status");
        }
    }

    fn fill_price_for(&self, contract: &BrokerContract, order: &BrokerOrder) -> Option<f64> {
        match order.order_type {
            BrokerOrderType::Limit => Some(order.limit_price),
            BrokerOrderType::Market => {
                let key = crate::types::instrument_key(&contract.symbol, &contract.instrument);
                let quote = self.market_data.latest_quote(&key)?;
                if quote.has_two_sided_book() {
                    Some((quote.bid.unwrap() + quote.ask.unwrap()) / 2.0)
                } else {
                    quote.last.filter(|p| *p > 0.0)
                }
            }
        }
    }
}

impl BrokerGateway for PaperGateway {
    fn submit(&self, broker_order_id: BrokerOrderId, contract: &BrokerContract, order: &BrokerOrder) {
        debug!(
            "[paper] submit #{} {} {} x{} @ {:?}/{}",
            broker_order_id,
            order.action,
            contract.symbol,
            order.quantity,
            order.order_type,
            order.limit_price
        );
        self.book
            .lock()
            .unwrap()
            .orders
            .insert(broker_order_id, order.clone());

        self.send_status(OrderStatusEvent {
            broker_order_id,
            status: "Submitted".to_string(),
            filled: 0.0,
            remaining: order.quantity,
            avg_fill_price: 0.0,
            last_fill_price: 0.0,
        });

        match self.fill_price_for(contract, order) {
            Some(price) => {
                self.book.lock().unwrap().orders.remove(&broker_order_id);
                self.send_status(OrderStatusEvent {
                    broker_order_id,
                    status: "Filled".to_string(),
                    filled: order.quantity,
                    remaining: 0.0,
                    avg_fill_price: price,
                    last_fill_price: price,
                });
            }
            None if order.tif == TimeInForce::Ioc => {
                // Nothing to fill against: IOC cancels the remainder
                self.book.lock().unwrap().orders.remove(&broker_order_id);
                self.send_status(OrderStatusEvent {
                    broker_order_id,
                    status: "Cancelled".to_string(),
                    filled: 0.0,
                    remaining: order.quantity,
                    avg_fill_price: 0.0,
                    last_fill_price: 0.0,
                });
            }
            None => {
                debug!("[paper] order #{} resting (no price)", broker_order_id);
            }
        }
    }

    fn cancel(&self, broker_order_id: BrokerOrderId) {
        let removed = self.book.lock().unwrap().orders.remove(&broker_order_id);
        if let Some(order) = removed {
            self.send_status(OrderStatusEvent {
                broker_order_id,
                status: "Cancelled".to_string(),
                filled: 0.0,
                remaining: order.quantity,
                avg_fill_price: 0.0,
                last_fill_price: 0.0,
            });
        } else {
            debug!("[paper] cancel for unknown order #{}", broker_order_id);
        }
    }

    fn request_daily_close(&self, symbol: &Symbol, date: NaiveDate) {
        // Paper sessions have no bar history; serve the cached last trade
        if let Some(last) = self
            .market_data
            .latest_quote(symbol.as_str())
            .and_then(|q| q.last)
        {
            let _ = self.events.send(GatewayEvent::DailyClose {
                symbol: symbol.clone(),
                date,
                close: last,
            });
        } else {
            debug!("[paper] no close available for {} on {}", symbol, date);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::TickField;
    use tokio::sync::mpsc;

    fn stock_contract(symbol: &str) -> BrokerContract {
        BrokerContract {
            symbol: Symbol::new(symbol),
            instrument: Instrument::Stock,
            exchange: "SMART".to_string(),
            currency: "USD".to_string(),
            multiplier: None,
        }
    }

    #[tokio::test]
    async fn test_limit_order_fills_at_limit_price() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let md = Arc::new(MarketData::new());
        let gw = PaperGateway::new(tx, md);

        gw.submit(
            1,
            &stock_contract("AAPL"),
            &BrokerOrder {
                action: Action::Buy,
                quantity: 10.0,
                order_type: BrokerOrderType::Limit,
                limit_price: 190.0,
                tif: TimeInForce::Day,
            },
        );

        // Submitted then Filled
        let first = rx.recv().await.unwrap();
        assert!(matches!(first, GatewayEvent::OrderStatus(ref s) if s.status == "Submitted"));
        match rx.recv().await.unwrap() {
            GatewayEvent::OrderStatus(s) => {
                assert_eq!(s.status, "Filled");
                assert_eq!(s.filled, 10.0);
                assert_eq!(s.avg_fill_price, 190.0);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_market_ioc_without_quotes_cancels() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let md = Arc::new(MarketData::new());
        let gw = PaperGateway::new(tx, md);

        gw.submit(
            2,
            &stock_contract("XYZ"),
            &BrokerOrder {
                action: Action::Sell,
                quantity: 5.0,
                order_type: BrokerOrderType::Market,
                limit_price: 0.0,
                tif: TimeInForce::Ioc,
            },
        );

        let _submitted = rx.recv().await.unwrap();
        match rx.recv().await.unwrap() {
            GatewayEvent::OrderStatus(s) => assert_eq!(s.status, "Cancelled"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_market_order_fills_at_mid() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let md = Arc::new(MarketData::new());
        md.update_tick("AAPL", TickField::Bid, 189.0);
        md.update_tick("AAPL", TickField::Ask, 191.0);
        let gw = PaperGateway::new(tx, md);

        gw.submit(
            3,
            &stock_contract("AAPL"),
            &BrokerOrder {
                action: Action::Buy,
                quantity: 1.0,
                order_type: BrokerOrderType::Market,
                limit_price: 0.0,
                tif: TimeInForce::Day,
            },
        );

        let _submitted = rx.recv().await.unwrap();
        match rx.recv().await.unwrap() {
            GatewayEvent::OrderStatus(s) => {
                assert_eq!(s.status, "Filled");
                assert_eq!(s.avg_fill_price, 190.0);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
