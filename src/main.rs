use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use ask_tracker::config::{RemoteConfig, TrackerConfig, db_path_from_env};
use ask_tracker::remote::{HttpRemoteClient, RemoteJobClient};
use ask_tracker::store::{ConversationSink, LibSqlBackend, TaskStore};
use ask_tracker::tracker::{AskContext, TaskTracker, spawn_poll_loop};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let remote_config = RemoteConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export ASK_TRACKER_AI_SERVICE_URL=http://localhost:5555");
        std::process::exit(1);
    });
    let tracker_config = TrackerConfig::from_env();
    let db_path = db_path_from_env();

    eprintln!("ask-tracker v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   AI service: {}", remote_config.base_url);
    eprintln!("   Database: {}", db_path.display());
    eprintln!(
        "   Poll interval: {}ms, retention: {}s",
        tracker_config.poll_interval.as_millis(),
        tracker_config.retention.as_secs()
    );

    // ── Database ─────────────────────────────────────────────────────────
    let db = Arc::new(LibSqlBackend::new_local(&db_path).await?);
    let store: Arc<dyn TaskStore> = db.clone();
    let sink: Arc<dyn ConversationSink> = db.clone();

    // ── Tracker ──────────────────────────────────────────────────────────
    let remote: Arc<dyn RemoteJobClient> = Arc::new(HttpRemoteClient::new(&remote_config));
    let tracker = TaskTracker::new(tracker_config.clone(), remote, store, sink);
    let (poll_handle, shutdown) = spawn_poll_loop(tracker.clone());

    let question = std::env::args().skip(1).collect::<Vec<_>>().join(" ");

    if question.trim().is_empty() {
        eprintln!("   Supervising ask jobs. Ctrl-C to exit.\n");
        tokio::signal::ctrl_c().await?;
    } else {
        let job_id = tracker
            .create_job(&question, AskContext::default(), None)
            .await?;
        eprintln!("   Job: {job_id}\n");

        let result = loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracker.cancel_job(&job_id).await?;
                    eprintln!("Cancellation requested");
                }
                _ = tokio::time::sleep(tracker_config.poll_interval) => {}
            }

            // Classification can finalize a job before its status is terminal.
            let finalized = tracker
                .get_tracked(&job_id)
                .is_none_or(|job| job.is_finalized);

            match tracker.get_result(&job_id).await? {
                Some(result) if finalized || result.status.is_terminal() => break result,
                Some(result) => tracing::info!(status = %result.status, "Waiting for ask job"),
                None => {}
            }
        };

        println!("{}", serde_json::to_string_pretty(&result)?);
    }

    shutdown.store(true, Ordering::Relaxed);
    // The loop notices the flag on its next tick, then drains running ticks.
    let grace = tracker_config.poll_interval + Duration::from_secs(5);
    if tokio::time::timeout(grace, poll_handle).await.is_err() {
        tracing::warn!("Poll loop did not stop within {}s", grace.as_secs());
    }
    Ok(())
}
