//! One complete batch run: scan, schedule, report.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use anyhow::{Context, Result};
use log::{info, warn};
use crate::config::MigrationConfig;
use crate::report::ExecutionReport;
use crate::scan::{build_job_queue, ensure_directories};
use crate::scheduler::{RunSummary, Scheduler, ToolLauncher};
use crate::worker::ToolInvocation;

/// What a finished run produced
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub summary: RunSummary,
    pub report: ExecutionReport,
}

/// Migrate every matched source with `tool`, append the report to the
/// summary log and hand it back for display.
///
/// `cancel` resolving stops the run early; jobs still running are killed and
/// left out of the report.
pub async fn run_batch<C>(cfg: &MigrationConfig, tool: PathBuf, cancel: C) -> Result<BatchOutcome>
where
    C: Future<Output = ()>,
{
    cfg.validate().context("Invalid configuration")?;
    ensure_directories(cfg)?;
    let queue = build_job_queue(cfg).context("Failed to build job queue")?;

    let launcher = ToolLauncher::new(ToolInvocation::from_config(cfg, tool));
    let scheduler = Scheduler::new(
        queue,
        cfg.concurrency,
        Duration::from_millis(cfg.poll_interval_ms),
        launcher,
    );
    let summary = scheduler.run(cancel).await;

    if summary.cancelled {
        warn!(
            "Run was cancelled: {} running job(s) killed and {} never started; they are not in the report",
            summary.tally.cancelled, summary.tally.abandoned
        );
    }

    let report = ExecutionReport::from_summary(&summary);
    report
        .append_to(&cfg.summary_log)
        .context("Failed to write summary log")?;

    info!(
        "Batch done: {} reported, {} failed",
        report.job_count(),
        report.failed_count()
    );

    Ok(BatchOutcome { summary, report })
}
