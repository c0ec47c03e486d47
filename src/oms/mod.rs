//! Order management: position/order ledgers, id translation, persistence

pub mod ledger;
pub mod orders;
pub mod store;
pub mod translator;

pub use ledger::{FillOutcome, Ledger, Position, PositionBook, PositionId};
pub use orders::{ExecutionType, OrderBook, OrderId, OrderRecord};
pub use store::LedgerStore;
pub use translator::IdTranslator;
