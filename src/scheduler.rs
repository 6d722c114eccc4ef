use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::time::MissedTickBehavior;

use crate::prober::{ProbeOutcome, Prober};
use crate::store::{MetricStore, StoreError};

/// What one monitoring cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub timestamp: DateTime<Utc>,
    pub bucket: i64,
    pub succeeded: usize,
    pub failed: usize,
}

// ─── Single cycle ────────────────────────────────────────────────

/// Probes every URL, then ingests the successful outcomes into the
/// bucket of the cycle's start time. Probe failures are logged and
/// counted but never persisted.
pub async fn run_cycle(
    prober: &Prober,
    store: &MetricStore,
    urls: &[String],
) -> Result<CycleReport, StoreError> {
    let timestamp = Utc::now();
    tracing::info!(targets = urls.len(), "visiting urls");

    let mut successes = Vec::with_capacity(urls.len());
    let mut failed = 0;

    let mut outcomes = prober.visit(urls);
    while let Some(outcome) = outcomes.next().await {
        match outcome {
            ProbeOutcome::Success(s) => {
                tracing::debug!(
                    url = %s.url,
                    status = s.status,
                    elapsed_us = s.response_time.as_micros() as u64,
                    "probe succeeded"
                );
                successes.push(s);
            }
            ProbeOutcome::Failure(f) => {
                failed += 1;
                tracing::warn!(
                    url = %f.url,
                    error = %f.error,
                    elapsed_us = f.response_time.as_micros() as u64,
                    "probe failed"
                );
            }
        }
    }

    let bucket = if successes.is_empty() {
        store.bucket(timestamp)
    } else {
        tracing::info!(points = successes.len(), "persisting monitor data points");
        store.ingest(timestamp, &successes).await?
    };

    Ok(CycleReport {
        timestamp,
        bucket,
        succeeded: successes.len(),
        failed,
    })
}

// ─── Loop ────────────────────────────────────────────────────────

/// Runs a cycle every `every` until `shutdown` resolves.
///
/// A failed ingest is logged and the next cycle proceeds; the failure is
/// never dropped silently. Ticks missed while a slow cycle runs are
/// skipped, not replayed.
pub async fn run(
    prober: Prober,
    store: MetricStore,
    urls: Vec<String>,
    every: Duration,
    shutdown: impl Future<Output = ()>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("monitor loop stopping");
                return;
            }
            _ = ticker.tick() => {
                match run_cycle(&prober, &store, &urls).await {
                    Ok(report) => tracing::info!(
                        bucket = report.bucket,
                        succeeded = report.succeeded,
                        failed = report.failed,
                        "cycle complete"
                    ),
                    Err(err) => tracing::error!(error = %err, "cycle failed to persist"),
                }
            }
        }
    }
}
