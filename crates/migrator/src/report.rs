//! Tab-delimited summary of a run, appended to the cross-run summary log.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Local};
use humansize::{format_size, DECIMAL};
use log::info;
use crate::job::ExecutionInfo;
use crate::scheduler::RunSummary;

/// Column header of the summary table
pub const REPORT_HEADER: &str = "#\tProcess\tFile\tSize(b)\tstart\tfinish\tduration\tresult";

const SEPARATOR: &str = "----\t----\t--------\t--------\t--------\t--------\t--------\t--------";

/// `HH:MM:SS.f`, tenths of a second truncated; negative durations show as zero
pub fn format_duration(d: Duration) -> String {
    let millis = d.num_milliseconds().max(0);
    let tenths = (millis % 1000) / 100;
    let secs = millis / 1000;
    format!(
        "{:02}:{:02}:{:02}.{}",
        secs / 3600,
        (secs / 60) % 60,
        secs % 60,
        tenths
    )
}

/// Wall-clock time as `HH:MM:SS.f`
pub fn format_time(t: &DateTime<Local>) -> String {
    let tenths = (t.timestamp_subsec_millis() / 100).min(9);
    format!("{}.{}", t.format("%H:%M:%S"), tenths)
}

#[derive(Debug, Clone)]
pub struct ExecutionReport {
    rows: Vec<ExecutionInfo>,
    started_at: DateTime<Local>,
    finished_at: DateTime<Local>,
}

impl ExecutionReport {
    pub fn new(
        mut rows: Vec<ExecutionInfo>,
        started_at: DateTime<Local>,
        finished_at: DateTime<Local>,
    ) -> Self {
        rows.sort_by_key(|info| info.index);
        ExecutionReport { rows, started_at, finished_at }
    }

    pub fn from_summary(summary: &RunSummary) -> Self {
        Self::new(summary.infos.clone(), summary.started_at, summary.finished_at)
    }

    pub fn rows(&self) -> &[ExecutionInfo] {
        &self.rows
    }

    pub fn job_count(&self) -> usize {
        self.rows.len()
    }

    pub fn failed_count(&self) -> usize {
        self.rows.iter().filter(|r| r.is_failed()).count()
    }

    /// Sum of the known target sizes; unknown sizes (-1) are skipped
    pub fn total_bytes(&self) -> u64 {
        self.rows
            .iter()
            .filter(|r| r.final_size >= 0)
            .map(|r| r.final_size as u64)
            .sum()
    }

    /// Highest slot among the reported rows, plus one
    pub fn slots_used(&self) -> usize {
        self.rows.iter().map(|r| r.slot + 1).max().unwrap_or(0)
    }

    fn render_row(info: &ExecutionInfo) -> String {
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            info.index + 1,
            info.slot + 1,
            info.base_name,
            info.final_size,
            format_time(&info.started_at),
            format_time(&info.finished_at),
            format_duration(info.finished_at - info.started_at),
            info.outcome
        )
    }

    fn render_totals(&self) -> String {
        let failed = self.failed_count();
        let result = if failed == 0 {
            "ok".to_string()
        } else {
            format!("{} failed", failed)
        };
        format!(
            "{}\t{}\t-\t{}\t{}\t{}\t{}\t{}",
            self.job_count(),
            self.slots_used(),
            self.total_bytes(),
            format_time(&self.started_at),
            format_time(&self.finished_at),
            format_duration(self.finished_at - self.started_at),
            result
        )
    }

    /// Rows followed by the framed totals row, without the header
    pub fn render_body(&self) -> String {
        let mut out = String::new();
        for row in &self.rows {
            out.push_str(&Self::render_row(row));
            out.push('\n');
        }
        out.push_str(SEPARATOR);
        out.push('\n');
        out.push_str(&self.render_totals());
        out.push('\n');
        out.push_str(SEPARATOR);
        out.push('\n');
        out
    }

    /// Console rendering, always with the header
    pub fn render(&self) -> String {
        format!("{}\n{}", REPORT_HEADER, self.render_body())
    }

    /// Append the report to the summary log, writing the header only when the
    /// file is new
    pub fn append_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .with_context(|| format!("Failed to open summary log: {}", path.display()))?;

        let is_new = file
            .metadata()
            .with_context(|| format!("Failed to stat summary log: {}", path.display()))?
            .len()
            == 0;

        let mut text = String::new();
        if is_new {
            text.push_str(REPORT_HEADER);
            text.push('\n');
        }
        text.push_str(&self.render_body());

        file.write_all(text.as_bytes())
            .with_context(|| format!("Failed to write summary log: {}", path.display()))?;

        info!(
            "Appended {} row(s) ({} migrated) to {}",
            self.job_count(),
            format_size(self.total_bytes(), DECIMAL),
            path.display()
        );
        Ok(())
    }
}
