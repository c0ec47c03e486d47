//! Run Command
//!
//! The live engine loop: drains the gateway event channel, polls the signal
//! feeds, dispatches instructions as orders, drives the execution monitor,
//! and fires the daily settlement pass, with graceful Ctrl+C shutdown and
//! crash recovery from the persisted ledger.

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{error, info, warn};

use option_trader::engine::DispatchOutcome;
use option_trader::execution::monitor::ExecutionMonitor;
use option_trader::gateway::PaperGateway;
use option_trader::market_data::MarketData;
use option_trader::oms::{Ledger, LedgerStore};
use option_trader::settlement::run_settlement;
use option_trader::signals::SignalFeed;
use option_trader::types::TradeSignal;
use option_trader::{Config, TradingEngine};

/// A deferred signal is retried this many dispatch cycles before dropping
const MAX_DISPATCH_RETRIES: u32 = 60;
const FEED_POLL_INTERVAL: Duration = Duration::from_secs(30);

pub fn run(config_path: String, paper: bool, live: bool) -> Result<()> {
    if !paper && !live {
        anyhow::bail!("Must specify either --paper or --live mode");
    }
    if live && paper {
        anyhow::bail!("Cannot specify both --paper and --live modes");
    }
    if live {
        anyhow::bail!(
            "No live gateway adapter is configured in this build; \
             run with --paper, or plug an adapter in behind gateway::BrokerGateway"
        );
    }

    dotenv::dotenv().ok();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(run_async(config_path))
}

async fn run_async(config_path: String) -> Result<()> {
    let config = Config::from_file(&config_path)
        .context(format!("Failed to load config from {}", config_path))?;

    info!("Starting trading engine (PAPER mode)");
    info!(
        "Strategies: {}",
        config
            .enabled_strategies()
            .iter()
            .map(|s| s.strategy_id.clone())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let market_data = Arc::new(MarketData::new());
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let gateway = Arc::new(PaperGateway::new(events_tx, market_data.clone()));

    let store = LedgerStore::open_in(&config.storage.state_dir)?;
    let ledger = Ledger::open(store)?;

    let engine = TradingEngine::new(config.clone(), ledger, market_data, gateway.clone());
    let _event_task = engine.spawn_event_loop(events_rx);

    // Paper sessions hand out broker ids immediately; a live adapter would
    // emit Ready from its connection handshake instead.
    gateway.announce_ready(1);

    let running = Arc::new(AtomicBool::new(true));

    let monitor = ExecutionMonitor::new(
        engine.clone(),
        Duration::from_secs(config.execution.monitor_interval_secs),
    );
    let monitor_task = tokio::spawn(monitor.run(running.clone()));

    let (signal_tx, mut signal_rx) = mpsc::unbounded_channel::<TradeSignal>();
    let feed = SignalFeed::new(&config, signal_tx);
    let feed_task = tokio::spawn(feed.run(running.clone(), FEED_POLL_INTERVAL));

    let running_for_signal = running.clone();
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, initiating shutdown...");
                running_for_signal.store(false, Ordering::SeqCst);
                let _ = shutdown_tx.send(()).await;
            }
            Err(e) => error!("Error setting up signal handler: {}", e),
        }
    });

    let mut dispatch_interval =
        interval(Duration::from_secs(config.trading.dispatch_interval_secs));
    let mut pending: VecDeque<(TradeSignal, u32)> = VecDeque::new();
    let mut last_settlement_date: Option<NaiveDate> = None;

    info!("Engine loop started");
    loop {
        tokio::select! {
            maybe_signal = signal_rx.recv() => {
                if let Some(signal) = maybe_signal {
                    pending.push_back((signal, 0));
                }
            }
            _ = dispatch_interval.tick() => {
                if !running.load(Ordering::SeqCst) {
                    break;
                }

                run_settlement_if_due(&engine, &config, &mut last_settlement_date).await;
                dispatch_pending(&engine, &mut pending);
            }
            _ = shutdown_rx.recv() => {
                break;
            }
        }
    }

    running.store(false, Ordering::SeqCst);
    let _ = monitor_task.await;
    let _ = feed_task.await;

    let open_orders = engine.active_strategies();
    if open_orders > 0 {
        warn!("Shutting down with {} strategies still active", open_orders);
    }
    if engine.with_ledger(|ledger| ledger.is_degraded()) {
        warn!("Ledger persistence degraded this session; verify the on-disk snapshot");
    }
    info!("Trading engine shutdown complete");
    Ok(())
}

/// Fire the daily settlement pass once per date, at or after the
/// configured time. Invoking again on the same date is a no-op.
async fn run_settlement_if_due(
    engine: &TradingEngine,
    config: &Config,
    last_settlement_date: &mut Option<NaiveDate>,
) {
    let now = Local::now();
    let already_ran_today = last_settlement_date
        .map(|d| d >= now.date_naive())
        .unwrap_or(false);
    if now.time() < config.settlement.run_at || already_ran_today {
        return;
    }

    let today = now.date_naive();
    info!("Settlement clock fired for {}", today);
    let report = run_settlement(engine, today).await;
    *last_settlement_date = Some(today);
    info!(
        "Settlement: {} settled, {} stock legs, {} skipped",
        report.settled, report.stock_legs, report.skipped
    );
}

/// Try every queued signal once. Deferred ones go back in the queue with a
/// bounded retry budget; rejected ones are discarded.
fn dispatch_pending(engine: &TradingEngine, pending: &mut VecDeque<(TradeSignal, u32)>) {
    let mut requeue = VecDeque::new();
    while let Some((signal, retries)) = pending.pop_front() {
        match engine.submit_signal(&signal) {
            Ok(DispatchOutcome::Placed(order_id)) => {
                info!(
                    "dispatched {} {} x{} as order #{}",
                    signal.action, signal.ticker, signal.quantity, order_id
                );
            }
            Ok(DispatchOutcome::Deferred) => {
                if retries + 1 >= MAX_DISPATCH_RETRIES {
                    warn!(
                        "dropping signal for {} after {} deferred attempts",
                        signal.ticker, retries + 1
                    );
                } else {
                    requeue.push_back((signal, retries + 1));
                }
            }
            Err(e) => {
                warn!("signal for {} rejected: {}", signal.ticker, e);
            }
        }
    }
    *pending = requeue;
}
