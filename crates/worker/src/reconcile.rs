use std::time::Instant;

use chrono::Utc;
use shared::repos::{ReconcileReport, Store, StoreError};
use tracing::{error, info, warn};

/// One reconciliation pass over the most recently updated topics.
pub(crate) async fn run_reconcile_tick(
    store: &Store,
    topic_batch: usize,
) -> Result<ReconcileReport, StoreError> {
    let started_at = Instant::now();
    let report = match store.reconcile_recent_scores(topic_batch).await {
        Ok(report) => report,
        Err(err) => {
            error!(metric_name = "worker_reconcile_tick", "score reconciliation failed: {err}");
            return Err(err);
        }
    };

    let latency_ms = started_at.elapsed().as_millis() as u64;
    if report.failed > 0 {
        warn!(
            metric_name = "worker_reconcile_tick",
            topics = report.topics,
            posts = report.posts,
            corrected = report.corrected,
            failed = report.failed,
            latency_ms,
            "score reconciliation finished with failures"
        );
    } else {
        info!(
            metric_name = "worker_reconcile_tick",
            topics = report.topics,
            posts = report.posts,
            corrected = report.corrected,
            latency_ms,
            at = %Utc::now().to_rfc3339(),
            "score reconciliation tick"
        );
    }

    Ok(report)
}
