//! Periodic throughput reporting.
//!
//! A small background task that samples the log manager's counters on an
//! interval, logs records/s and failure counts, and mirrors the totals into
//! `metrics` counters for whatever recorder the embedding process installs.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::logman::LogManager;

pub struct RateReporter {
    handle: Option<JoinHandle<()>>,
    stop: CancellationToken,
}

impl RateReporter {
    /// Spawn the reporter; `interval_secs = 0` disables it. The reporter
    /// also stops when `parent` is cancelled.
    pub fn spawn(log: Arc<LogManager>, interval_secs: u64, parent: CancellationToken) -> Self {
        let stop = parent.child_token();
        if interval_secs == 0 {
            return Self { handle: None, stop };
        }
        let token = stop.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so the first report
            // covers a full interval.
            ticker.tick().await;
            let mut last_total = 0u64;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let total = log.total();
                let errors = log.errors();
                let rate = (total - last_total) as f64 / interval_secs as f64;
                last_total = total;
                metrics::counter!("cqlbulk_records_total").absolute(total);
                metrics::counter!("cqlbulk_errors_total").absolute(errors);
                metrics::gauge!("cqlbulk_records_per_second").set(rate);
                info!(total, errors, rate = format_args!("{rate:.0}/s"), "progress");
            }
        });
        Self { handle: Some(handle), stop }
    }

    /// Stop the reporter and wait for its final tick to finish.
    pub async fn stop(mut self) {
        self.stop.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}
