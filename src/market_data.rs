//! Market data cache
//!
//! Holds the latest quote per instrument, tick sizes, and official daily
//! closes used by settlement. The gateway callback path writes into the
//! cache; strategies and settlement read from it. Every wait here is
//! bounded and degrades to `None` so a stalled feed can never stall the
//! engine.

use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

use crate::types::Quote;

/// Field of a streaming price update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickField {
    Bid,
    Ask,
    Last,
}

#[derive(Default)]
struct MarketDataInner {
    quotes: HashMap<String, Quote>,
    tick_sizes: HashMap<String, f64>,
    /// symbol -> date -> official close
    daily_closes: HashMap<String, HashMap<NaiveDate, f64>>,
}

/// Thread-safe market data cache
pub struct MarketData {
    inner: Mutex<MarketDataInner>,
    poll_interval: Duration,
}

impl MarketData {
    pub fn new() -> Self {
        MarketData {
            inner: Mutex::new(MarketDataInner::default()),
            poll_interval: Duration::from_millis(100),
        }
    }

    /// Apply one streaming tick
    pub fn update_tick(&self, instrument_key: &str, field: TickField, price: f64) {
        let mut inner = self.inner.lock().unwrap();
        let quote = inner.quotes.entry(instrument_key.to_string()).or_default();
        match field {
            TickField::Bid => quote.bid = Some(price),
            TickField::Ask => quote.ask = Some(price),
            TickField::Last => quote.last = Some(price),
        }
        debug!("tick {} {:?} = {}", instrument_key, field, price);
    }

    /// Latest quote snapshot, if any tick has arrived
    pub fn latest_quote(&self, instrument_key: &str) -> Option<Quote> {
        self.inner.lock().unwrap().quotes.get(instrument_key).copied()
    }

    pub fn set_tick_size(&self, instrument_key: &str, tick_size: f64) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .tick_sizes
            .insert(instrument_key.to_string(), tick_size);
        debug!("tick size {} = {}", instrument_key, tick_size);
    }

    pub fn tick_size(&self, instrument_key: &str) -> Option<f64> {
        self.inner
            .lock()
            .unwrap()
            .tick_sizes
            .get(instrument_key)
            .copied()
    }

    /// Store an official daily close reported by the gateway
    pub fn set_daily_close(&self, symbol: &str, date: NaiveDate, close: f64) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .daily_closes
            .entry(symbol.to_string())
            .or_default()
            .insert(date, close);
        debug!("daily close {} {} = {}", symbol, date, close);
    }

    pub fn daily_close(&self, symbol: &str, date: NaiveDate) -> Option<f64> {
        self.inner
            .lock()
            .unwrap()
            .daily_closes
            .get(symbol)
            .and_then(|m| m.get(&date))
            .copied()
    }

    /// Wait until a quote with at least one populated field is available,
    /// up to `timeout`. Returns None on timeout.
    pub async fn wait_for_quote(&self, instrument_key: &str, timeout: Duration) -> Option<Quote> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(quote) = self.latest_quote(instrument_key) {
                if quote.bid.is_some() || quote.ask.is_some() || quote.last.is_some() {
                    return Some(quote);
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Wait for an official close to appear in the cache, up to `timeout`.
    pub async fn wait_for_close(
        &self,
        symbol: &str,
        date: NaiveDate,
        timeout: Duration,
    ) -> Option<f64> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(close) = self.daily_close(symbol, date) {
                return Some(close);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_updates_merge_into_quote() {
        let md = MarketData::new();
        md.update_tick("AAPL", TickField::Bid, 189.95);
        md.update_tick("AAPL", TickField::Ask, 190.05);

        let quote = md.latest_quote("AAPL").unwrap();
        assert_eq!(quote.bid, Some(189.95));
        assert_eq!(quote.ask, Some(190.05));
        assert_eq!(quote.last, None);
        assert!(quote.has_two_sided_book());
    }

    #[test]
    fn test_daily_close_keyed_by_date() {
        let md = MarketData::new();
        let d1 = NaiveDate::from_ymd_opt(2026, 8, 5).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2026, 8, 6).unwrap();
        md.set_daily_close("MSFT", d1, 431.50);

        assert_eq!(md.daily_close("MSFT", d1), Some(431.50));
        assert_eq!(md.daily_close("MSFT", d2), None);
    }

    #[tokio::test]
    async fn test_wait_for_quote_times_out() {
        let md = MarketData::new();
        let got = md
            .wait_for_quote("NOPE", Duration::from_millis(50))
            .await;
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_wait_for_quote_returns_early() {
        let md = MarketData::new();
        md.update_tick("AAPL", TickField::Last, 190.0);
        let got = md
            .wait_for_quote("AAPL", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(got.last, Some(190.0));
    }
}
