//! Automated Trading Order Execution
//!
//! An order-execution and position-reconciliation engine for stocks and
//! options: strategy-generated trade instructions become live broker
//! orders, adaptively managed until filled or cancelled, with an
//! authoritative persisted ledger of positions and orders that stays
//! consistent under asynchronous, out-of-order, and duplicated fill
//! callbacks. Expiring option positions are settled daily by synthesizing
//! exercise/assignment trades into the same ledger.
//!
//! # Architecture
//!
//! - [`oms`] — position/order ledgers, fill-merging arithmetic, broker id
//!   translation, SQLite persistence
//! - [`execution`] — the per-order strategy state machines (IOC market,
//!   plain limit, dynamic limit) and the monitor that drives them
//! - [`engine`] — wires ledgers, strategies, market data, and the gateway
//!   event channel together
//! - [`settlement`] — daily option exercise/assignment pass
//! - [`gateway`] — broker boundary trait plus the built-in paper gateway
//! - [`signals`] — per-strategy HTTP signal feed client
//!
//! # Example
//! ```no_run
//! use std::sync::Arc;
//! use option_trader::{Config, TradingEngine};
//! use option_trader::gateway::PaperGateway;
//! use option_trader::market_data::MarketData;
//! use option_trader::oms::Ledger;
//!
//! let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
//! let market_data = Arc::new(MarketData::new());
//! let gateway = Arc::new(PaperGateway::new(events_tx, market_data.clone()));
//! let engine = TradingEngine::new(
//!     Config::default(),
//!     Ledger::in_memory(),
//!     market_data,
//!     gateway,
//! );
//! let _events = engine.spawn_event_loop(events_rx);
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod execution;
pub mod gateway;
pub mod market_data;
pub mod oms;
pub mod settlement;
pub mod signals;
pub mod types;

pub use config::Config;
pub use engine::{DispatchOutcome, TradingEngine};
pub use error::{EngineError, EngineResult};
pub use settlement::SettlementReport;
pub use types::*;
