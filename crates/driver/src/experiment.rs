use crate::config::{CollectionConfig, RunConfig};
use crate::report::{ReportInput, RunReport};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use workload_core::manager::WorkloadManager;

/// Execute `runs` in order on `manager`, reporting each one.
///
/// Every run is set up with its seller overrides (falling back to the
/// workload section), executed, given `grace_period_ms` for in-flight
/// completions and then drained into a report. A run that was abandoned
/// early ends the experiment after its report.
pub async fn run_experiment(
    manager: &mut WorkloadManager,
    runs: &[RunConfig],
    collection: &CollectionConfig,
    output: Option<&Path>,
    shutdown: &CancellationToken,
) -> Result<Vec<RunReport>, Box<dyn std::error::Error>> {
    let base_distribution = manager.config().seller_distribution;
    let base_range = manager.config().seller_range;
    let grace = Duration::from_millis(collection.grace_period_ms);
    let mut reports = Vec::with_capacity(runs.len());

    for (index, run) in runs.iter().enumerate() {
        if shutdown.is_cancelled() {
            tracing::warn!(run = index, "shutdown requested, skipping remaining runs");
            break;
        }

        let distribution = run.seller_distribution.unwrap_or(base_distribution);
        let seller_range = run.seller_range.unwrap_or(base_range);
        manager.set_up(distribution, seller_range)?;
        let window = manager.run().await?;

        if !window.aborted_early && !grace.is_zero() {
            tracing::debug!(grace_ms = collection.grace_period_ms, "waiting for in-flight completions");
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(grace) => {}
            }
        }

        let records = manager.tracker().drain();
        let stats = manager.stats();
        let report = RunReport::build(ReportInput {
            run: index,
            seller_distribution: distribution,
            seller_range,
            window,
            records: &records,
            stats: &stats,
        })?;

        tracing::info!(
            run = index,
            duration_ms = report.duration_ms,
            submitted = report.submitted,
            abandoned_sessions = report.abandoned_sessions,
            throughput_tps = format!("{:.1}", report.throughput_tps),
            aborted = records.aborted.len(),
            pending = report.pending_at_drain,
            top_seller_share = format!("{:.3}", report.sellers.top_share),
            "run report"
        );
        for (tx_type, t) in &report.transactions {
            if let Some(latency) = &t.latency {
                tracing::info!(
                    run = index,
                    tx_type = %tx_type,
                    submitted = t.submitted,
                    finished = t.finished,
                    aborted = t.aborted,
                    p50_ms = latency.p50_ms,
                    p90_ms = latency.p90_ms,
                    p99_ms = latency.p99_ms,
                    max_ms = latency.max_ms,
                    "latency"
                );
            }
        }

        if let Some(path) = output {
            append_report(path, &report).await?;
        }

        let stop = window.aborted_early;
        reports.push(report);
        if stop {
            tracing::warn!(run = index, "run was abandoned, stopping experiment");
            break;
        }
    }

    Ok(reports)
}

/// Append `report` as one JSON line.
async fn append_report(path: &Path, report: &RunReport) -> Result<(), Box<dyn std::error::Error>> {
    let mut line = serde_json::to_vec(report)?;
    line.push(b'\n');
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(&line).await?;
    file.flush().await?;
    Ok(())
}
