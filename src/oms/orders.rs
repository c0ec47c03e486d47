//! Order ledger
//!
//! Tracks every submitted order from creation to terminal state, including
//! the cumulative fill progress used to de-duplicate gateway callbacks.
//! Internal order ids are minted locally and never reused; the id counter
//! is seeded from the persisted snapshot on startup.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::oms::ledger::PositionId;
use crate::types::{Action, ExecKind, Instrument, Symbol};

/// Internal order identifier, globally unique within one ledger store
pub type OrderId = u64;

/// How an order entered the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionType {
    IocMarket,
    Limit,
    DynamicLimit,
    /// Internally generated for settlement; never submitted to a broker
    Settlement,
}

impl From<ExecKind> for ExecutionType {
    fn from(kind: ExecKind) -> Self {
        match kind {
            ExecKind::IocMarket => ExecutionType::IocMarket,
            ExecKind::Limit => ExecutionType::Limit,
            ExecKind::DynamicLimit => ExecutionType::DynamicLimit,
        }
    }
}

impl std::fmt::Display for ExecutionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionType::IocMarket => write!(f, "IOC_MARKET"),
            ExecutionType::Limit => write!(f, "LIMIT"),
            ExecutionType::DynamicLimit => write!(f, "DYNAMIC_LIMIT"),
            ExecutionType::Settlement => write!(f, "SETTLEMENT"),
        }
    }
}

impl std::str::FromStr for ExecutionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IOC_MARKET" => Ok(ExecutionType::IocMarket),
            "LIMIT" => Ok(ExecutionType::Limit),
            "DYNAMIC_LIMIT" => Ok(ExecutionType::DynamicLimit),
            "SETTLEMENT" => Ok(ExecutionType::Settlement),
            other => Err(format!("unknown execution type: {}", other)),
        }
    }
}

/// One order row. Mutated on every fill callback and persisted after every
/// mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: OrderId,
    pub symbol: Symbol,
    pub action: Action,
    pub quantity: f64,
    pub position_id: PositionId,
    pub strategy_id: String,
    pub instrument: Instrument,
    pub execution_type: ExecutionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pair_id: Option<String>,
    pub submitted_at: DateTime<Utc>,
    /// Cumulative quantity already merged into the position ledger.
    /// Monotone non-decreasing, never exceeds `quantity`.
    pub last_processed_fill: f64,
    /// Terminal flag: the full quantity has been reconciled
    pub fill_processed: bool,
}

impl OrderRecord {
    pub fn remaining_unprocessed(&self) -> f64 {
        (self.quantity - self.last_processed_fill).max(0.0)
    }
}

/// In-memory half of the order ledger
pub struct OrderBook {
    orders: HashMap<OrderId, OrderRecord>,
    next_id: OrderId,
}

impl OrderBook {
    pub fn new() -> Self {
        OrderBook {
            orders: HashMap::new(),
            next_id: 1,
        }
    }

    /// Rebuild from a persisted snapshot; the id counter resumes past the
    /// highest id ever minted.
    pub fn load(orders: Vec<OrderRecord>) -> Self {
        let next_id = orders.iter().map(|o| o.id).max().unwrap_or(0) + 1;
        OrderBook {
            orders: orders.into_iter().map(|o| (o.id, o)).collect(),
            next_id,
        }
    }

    pub fn mint_id(&mut self) -> OrderId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn insert(&mut self, record: OrderRecord) {
        self.orders.insert(record.id, record);
    }

    pub fn get(&self, id: OrderId) -> Option<&OrderRecord> {
        self.orders.get(&id)
    }

    pub fn get_mut(&mut self, id: OrderId) -> Option<&mut OrderRecord> {
        self.orders.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OrderRecord> {
        self.orders.values()
    }
}

impl Default for OrderBook {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: OrderId) -> OrderRecord {
        OrderRecord {
            id,
            symbol: Symbol::new("AAPL"),
            action: Action::Buy,
            quantity: 10.0,
            position_id: 1,
            strategy_id: "TEST".to_string(),
            instrument: Instrument::Stock,
            execution_type: ExecutionType::IocMarket,
            limit_price: None,
            pair_id: None,
            submitted_at: Utc::now(),
            last_processed_fill: 0.0,
            fill_processed: false,
        }
    }

    #[test]
    fn test_mint_ids_are_unique_and_increasing() {
        let mut book = OrderBook::new();
        let a = book.mint_id();
        let b = book.mint_id();
        assert!(b > a);
    }

    #[test]
    fn test_load_resumes_id_counter() {
        let mut book = OrderBook::load(vec![record(7), record(3)]);
        assert_eq!(book.mint_id(), 8);
        assert_eq!(book.len(), 2);
    }

    #[test]
    fn test_execution_type_round_trip() {
        for et in [
            ExecutionType::IocMarket,
            ExecutionType::Limit,
            ExecutionType::DynamicLimit,
            ExecutionType::Settlement,
        ] {
            let parsed: ExecutionType = et.to_string().parse().unwrap();
            assert_eq!(parsed, et);
        }
    }
}
