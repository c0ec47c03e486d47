//! Core data types used across the trading system

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Ticker symbol of the underlying
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol(pub String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Symbol(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Buy,
    Sell,
}

impl Action {
    /// Opposite direction, used when flattening a position
    pub fn reversed(self) -> Self {
        match self {
            Action::Buy => Action::Sell,
            Action::Sell => Action::Buy,
        }
    }

    /// Signed multiplier applied to fill quantities
    pub fn sign(self) -> f64 {
        match self {
            Action::Buy => 1.0,
            Action::Sell => -1.0,
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Buy => write!(f, "BUY"),
            Action::Sell => write!(f, "SELL"),
        }
    }
}

/// Option right
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OptionRight {
    Call,
    Put,
}

impl std::fmt::Display for OptionRight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptionRight::Call => write!(f, "CALL"),
            OptionRight::Put => write!(f, "PUT"),
        }
    }
}

/// Instrument kind with its variant-specific contract terms.
///
/// Position identity includes the full instrument, so two option positions
/// on the same underlying but different strikes never merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "UPPERCASE")]
pub enum Instrument {
    Stock,
    Option {
        strike: f64,
        expiry: NaiveDate,
        right: OptionRight,
    },
    Future {
        expiry: NaiveDate,
    },
}

impl Instrument {
    pub fn kind(&self) -> &'static str {
        match self {
            Instrument::Stock => "STOCK",
            Instrument::Option { .. } => "OPTION",
            Instrument::Future { .. } => "FUTURE",
        }
    }

    pub fn is_option(&self) -> bool {
        matches!(self, Instrument::Option { .. })
    }
}

/// Execution strategy kind requested by a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecKind {
    IocMarket,
    Limit,
    DynamicLimit,
}

impl std::fmt::Display for ExecKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecKind::IocMarket => write!(f, "IOC_MARKET"),
            ExecKind::Limit => write!(f, "LIMIT"),
            ExecKind::DynamicLimit => write!(f, "DYNAMIC_LIMIT"),
        }
    }
}

/// One trade instruction from a signal producer.
///
/// This is the boundary payload: the feed validates it once, and everything
/// downstream can assume it is well-formed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeSignal {
    pub ticker: Symbol,
    pub action: Action,
    pub quantity: f64,
    pub instrument: Instrument,
    pub execution: ExecKind,
    /// Required for ExecKind::Limit, ignored otherwise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pair_id: Option<String>,
    pub strategy_id: String,
}

impl TradeSignal {
    /// Key used for market-data subscription and quote lookup
    pub fn instrument_key(&self) -> String {
        instrument_key(&self.ticker, &self.instrument)
    }
}

/// Canonical market-data key: ticker for stocks, ticker_strike_expiry_right
/// for options.
pub fn instrument_key(symbol: &Symbol, instrument: &Instrument) -> String {
    match instrument {
        Instrument::Stock => symbol.as_str().to_string(),
        Instrument::Option {
            strike,
            expiry,
            right,
        } => format!("{}_{}_{}_{}", symbol, strike, expiry.format("%Y%m%d"), right),
        Instrument::Future { expiry } => {
            format!("{}_FUT_{}", symbol, expiry.format("%Y%m%d"))
        }
    }
}

/// Latest quote snapshot for one instrument
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Quote {
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub last: Option<f64>,
}

impl Quote {
    /// Both sides of the book present and positive
    pub fn has_two_sided_book(&self) -> bool {
        matches!((self.bid, self.ask), (Some(b), Some(a)) if b > 0.0 && a > 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_sign_and_reverse() {
        assert_eq!(Action::Buy.sign(), 1.0);
        assert_eq!(Action::Sell.sign(), -1.0);
        assert_eq!(Action::Buy.reversed(), Action::Sell);
    }

    #[test]
    fn test_instrument_key_for_option() {
        let key = instrument_key(
            &Symbol::new("AAPL"),
            &Instrument::Option {
                strike: 180.0,
                expiry: NaiveDate::from_ymd_opt(2026, 9, 18).unwrap(),
                right: OptionRight::Call,
            },
        );
        assert_eq!(key, "AAPL_180_20260918_CALL");
    }

    #[test]
    fn test_instrument_identity() {
        let a = Instrument::Option {
            strike: 100.0,
            expiry: NaiveDate::from_ymd_opt(2026, 1, 16).unwrap(),
            right: OptionRight::Put,
        };
        let b = Instrument::Option {
            strike: 105.0,
            expiry: NaiveDate::from_ymd_opt(2026, 1, 16).unwrap(),
            right: OptionRight::Put,
        };
        assert_ne!(a, b);
        assert_eq!(a.kind(), "OPTION");
    }

    #[test]
    fn test_signal_deserializes_from_feed_payload() {
        let raw = r#"{
            "ticker": "MSFT",
            "action": "SELL",
            "quantity": 3,
            "instrument": {"kind": "OPTION", "strike": 430.0, "expiry": "2026-08-21", "right": "PUT"},
            "execution": "DYNAMIC_LIMIT",
            "strategy_id": "OPTION_WRITE_001"
        }"#;
        let signal: TradeSignal = serde_json::from_str(raw).expect("parse signal");
        assert_eq!(signal.action, Action::Sell);
        assert_eq!(signal.execution, ExecKind::DynamicLimit);
        assert!(signal.instrument.is_option());
    }
}
