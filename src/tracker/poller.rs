//! Background poll loop.
//!
//! Every tick is spawned as its own task, so a tick whose jobs hang never
//! delays the timer. Overlapping ticks are safe: each job's exclusion marker
//! keeps it from being polled twice at once.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::tracker::service::{TaskTracker, TickSummary};

/// How long shutdown waits for running ticks before aborting them.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(3);

/// Spawn the poll loop for a tracker.
///
/// Returns a `JoinHandle` and a shutdown flag. Once the flag is set the loop
/// stops at its next tick and waits (bounded) for running ticks to finish.
pub fn spawn_poll_loop(tracker: TaskTracker) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        let period = tracker.config().poll_interval;
        info!("Ask job poll loop started (interval: {}ms)", period.as_millis());

        let mut tick = tokio::time::interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks: JoinSet<TickSummary> = JoinSet::new();

        loop {
            tick.tick().await;

            while let Some(done) = ticks.try_join_next() {
                log_tick(done);
            }

            if shutdown.load(Ordering::Relaxed) {
                info!(running = ticks.len(), "Ask job poll loop shutting down");
                drain(&mut ticks).await;
                return;
            }

            let tracker = tracker.clone();
            ticks.spawn(async move { tracker.poll_tick().await });
        }
    });

    (handle, shutdown_flag)
}

async fn drain(ticks: &mut JoinSet<TickSummary>) {
    let drained = tokio::time::timeout(SHUTDOWN_DRAIN, async {
        while let Some(done) = ticks.join_next().await {
            log_tick(done);
        }
    })
    .await;

    if drained.is_err() {
        warn!(aborted = ticks.len(), "Poll ticks still running at shutdown, aborting");
        ticks.abort_all();
    }
}

fn log_tick(done: Result<TickSummary, tokio::task::JoinError>) {
    match done {
        Ok(summary) if summary.polled > 0 || summary.evicted > 0 => {
            debug!(
                polled = summary.polled,
                failed = summary.failed,
                evicted = summary.evicted,
                "Poll tick complete"
            );
        }
        Ok(_) => {}
        Err(e) => warn!("Poll tick task failed: {e}"),
    }
}
