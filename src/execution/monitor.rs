//! Execution monitor
//!
//! Periodic loop that drives every active execution strategy forward and
//! retires the completed ones. Each sweep works on a snapshot of the
//! strategy table, so dispatch and callbacks can insert or remove entries
//! while the sweep runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, info};

use crate::engine::TradingEngine;

pub struct ExecutionMonitor {
    engine: Arc<TradingEngine>,
    poll_interval: Duration,
}

impl ExecutionMonitor {
    pub fn new(engine: Arc<TradingEngine>, poll_interval: Duration) -> Self {
        ExecutionMonitor {
            engine,
            poll_interval,
        }
    }

    /// Run until the shared running flag clears
    pub async fn run(self, running: Arc<AtomicBool>) {
        let mut ticker = interval(self.poll_interval);
        info!(
            "execution monitor started (interval {:?})",
            self.poll_interval
        );
        loop {
            ticker.tick().await;
            if !running.load(Ordering::SeqCst) {
                break;
            }
            let retired = self.engine.monitor_sweep();
            if retired > 0 {
                debug!("monitor sweep retired {} strategies", retired);
            }
        }
        info!("execution monitor stopped");
    }
}
