//! Settle Command
//!
//! One-shot exercise/assignment settlement pass, for manual runs and for
//! catching up after the engine was down on an expiry date.

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use std::sync::Arc;
use tracing::info;

use option_trader::gateway::PaperGateway;
use option_trader::market_data::MarketData;
use option_trader::oms::{Ledger, LedgerStore};
use option_trader::settlement::run_settlement;
use option_trader::{Config, TradingEngine};

pub fn run(config_path: String, date: Option<String>) -> Result<()> {
    dotenv::dotenv().ok();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(run_async(config_path, date))
}

async fn run_async(config_path: String, date: Option<String>) -> Result<()> {
    let config = Config::from_file(&config_path)
        .context(format!("Failed to load config from {}", config_path))?;

    let date = match date {
        Some(raw) => NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
            .context("settlement date must be YYYY-MM-DD")?,
        None => Local::now().date_naive(),
    };

    let market_data = Arc::new(MarketData::new());
    let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
    let gateway = Arc::new(PaperGateway::new(events_tx, market_data.clone()));

    let store = LedgerStore::open_in(&config.storage.state_dir)?;
    let ledger = Ledger::open(store)?;
    let engine = TradingEngine::new(config, ledger, market_data, gateway);
    let _events = engine.spawn_event_loop(events_rx);

    info!("Running settlement pass for {}", date);
    let report = run_settlement(&engine, date).await;

    println!("Settlement for {}:", date);
    println!("  settled positions: {}", report.settled);
    println!("  stock legs:        {}", report.stock_legs);
    println!("  skipped (retry):   {}", report.skipped);

    Ok(())
}
