//! Signal feed client
//!
//! Each configured strategy exposes an HTTP endpoint serving the day's
//! trade instructions. Once per day, at the strategy's check time, the feed
//! fetches `{base_url}/{YYYYMMDD}/{capital}`, validates every instruction,
//! and enqueues the good ones for dispatch. Malformed instructions are
//! rejected here and never reach the engine.

use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDate};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::config::{Config, StrategyFeedConfig};
use crate::execution::validate_signal;
use crate::types::TradeSignal;

struct FeedState {
    config: StrategyFeedConfig,
    capital: i64,
    last_fetch_date: Option<NaiveDate>,
}

impl FeedState {
    /// Once-per-day gate: the check time has passed and today's fetch has
    /// not happened yet.
    fn due(&self, now: DateTime<Local>) -> bool {
        now.time() >= self.config.check_at
            && self
                .last_fetch_date
                .map(|d| d < now.date_naive())
                .unwrap_or(true)
    }

    fn url(&self, date: NaiveDate) -> String {
        format!(
            "{}/{}/{}",
            self.config.signal_base_url,
            date.format("%Y%m%d"),
            self.capital
        )
    }
}

pub struct SignalFeed {
    client: reqwest::Client,
    feeds: Vec<FeedState>,
    queue: UnboundedSender<TradeSignal>,
}

impl SignalFeed {
    pub fn new(config: &Config, queue: UnboundedSender<TradeSignal>) -> Self {
        let feeds = config
            .enabled_strategies()
            .into_iter()
            .map(|feed| FeedState {
                capital: config.capital_allocation(&feed),
                config: feed,
                last_fetch_date: None,
            })
            .collect();
        SignalFeed {
            client: reqwest::Client::new(),
            feeds,
            queue,
        }
    }

    /// Fetch and enqueue instructions for every feed whose daily check time
    /// has arrived. Returns the number of signals enqueued.
    pub async fn poll_once(&mut self, now: DateTime<Local>) -> usize {
        let mut enqueued = 0;
        for feed in self.feeds.iter_mut().filter(|f| f.due(now)) {
            let url = feed.url(now.date_naive());
            info!(
                "[{}] fetching signals: {}",
                feed.config.strategy_id, url
            );
            match fetch_signals(&self.client, &url).await {
                Ok(signals) => {
                    feed.last_fetch_date = Some(now.date_naive());
                    enqueued += enqueue_valid(&self.queue, &feed.config.strategy_id, signals);
                }
                Err(e) => {
                    // Left un-latched: retried on the next poll tick
                    warn!(
                        "[{}] signal fetch failed: {:#}",
                        feed.config.strategy_id, e
                    );
                }
            }
        }
        enqueued
    }

    /// Poll until the shared running flag clears
    pub async fn run(mut self, running: Arc<AtomicBool>, poll_interval: Duration) {
        let mut ticker = interval(poll_interval);
        info!("signal feed started ({} strategies)", self.feeds.len());
        loop {
            ticker.tick().await;
            if !running.load(Ordering::SeqCst) {
                break;
            }
            self.poll_once(Local::now()).await;
        }
        info!("signal feed stopped");
    }
}

async fn fetch_signals(client: &reqwest::Client, url: &str) -> Result<Vec<TradeSignal>> {
    let response = client
        .get(url)
        .send()
        .await
        .context("signal feed request failed")?
        .error_for_status()
        .context("signal feed returned an error status")?;
    response
        .json::<Vec<TradeSignal>>()
        .await
        .context("signal feed payload did not parse")
}

/// Validate and enqueue a batch; invalid instructions are discarded with a
/// warning and the rest still go through.
fn enqueue_valid(
    queue: &UnboundedSender<TradeSignal>,
    strategy_id: &str,
    signals: Vec<TradeSignal>,
) -> usize {
    let mut enqueued = 0;
    for signal in signals {
        if let Err(e) = validate_signal(&signal) {
            warn!("[{}] discarding signal: {}", strategy_id, e);
            continue;
        }
        debug!(
            "[{}] new instruction: {} {} x{} via {}",
            strategy_id, signal.action, signal.ticker, signal.quantity, signal.execution
        );
        if queue.send(signal).is_err() {
            warn!("[{}] dispatch queue closed, dropping signal", strategy_id);
            break;
        }
        enqueued += 1;
    }
    enqueued
}
