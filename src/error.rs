//! Engine error taxonomy
//!
//! Splits failures into the classes the rest of the system dispatches on:
//! transient data gaps are retried, protocol violations are logged and
//! dropped, invalid signals are rejected at construction, and storage
//! failures degrade durability without stopping the engine.

use thiserror::Error;

use crate::oms::orders::OrderId;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Quote or tick size not available yet; skip this cycle and retry
    #[error("market data unavailable for {0}")]
    MissingMarketData(String),

    /// Settlement close price not available yet; position retried next cycle
    #[error("settlement close unavailable for {symbol} on {date}")]
    SettlementPriceUnavailable { symbol: String, date: String },

    /// Fill callback referenced an order the ledger does not know
    #[error("fill callback for unknown order {0}")]
    UnknownOrder(OrderId),

    /// Status callback arrived before the broker id mapping was registered
    #[error("callback for unmapped broker order id {0}")]
    UnmappedBrokerId(i64),

    /// Cumulative filled quantity went backwards between two callbacks
    #[error("non-monotonic fill for order {order_id}: {previous} -> {reported}")]
    NonMonotonicFill {
        order_id: OrderId,
        previous: f64,
        reported: f64,
    },

    /// Malformed trade instruction, rejected before an order is built
    #[error("invalid signal: {0}")]
    InvalidSignal(String),

    /// Ledger write failed; in-memory state stays authoritative
    #[error("ledger storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl EngineError {
    /// True for conditions that clear on their own and should be retried
    /// rather than surfaced as failures.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::MissingMarketData(_) | EngineError::SettlementPriceUnavailable { .. }
        )
    }

    /// True for callbacks that cannot be applied because the sender broke
    /// the protocol; these are logged and dropped.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            EngineError::UnknownOrder(_)
                | EngineError::UnmappedBrokerId(_)
                | EngineError::NonMonotonicFill { .. }
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(EngineError::MissingMarketData("AAPL".into()).is_retryable());
        assert!(!EngineError::UnknownOrder(7).is_retryable());
        assert!(EngineError::UnmappedBrokerId(42).is_protocol_violation());
        assert!(!EngineError::InvalidSignal("no price".into()).is_protocol_violation());
    }
}
