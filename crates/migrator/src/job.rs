use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use chrono::{DateTime, Local};
use thiserror::Error;

/// Final size recorded when the target cannot be statted
pub const UNKNOWN_SIZE: i64 = -1;

/// One migration task: a source file, its clone and the target to produce
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDescriptor {
    /// Source file name without extension or source token
    pub base_name: String,
    pub source_path: PathBuf,
    pub clone_path: PathBuf,
    pub target_path: PathBuf,
    /// Position in the size-sorted queue, starting at 0
    pub index: usize,
    /// Source file size in bytes
    pub source_size: u64,
}

/// Job-local failure while driving the migration tool
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to launch {tool}: {source}")]
    Launch {
        tool: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("tool output unavailable: {0}")]
    Output(String),
    /// The tool ended without an exit code, e.g. killed by a signal it did
    /// not get from us
    #[error("migration tool terminated by {0}")]
    Terminated(String),
}

impl ExecError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        ExecError::Io { context: context.into(), source }
    }
}

/// Metrics of a job whose tool process ran to the end
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobMetrics {
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    /// Target size in bytes, or [`UNKNOWN_SIZE`]
    pub final_size: i64,
    /// Exit code of the tool
    pub exit_code: i32,
}

/// A job that could not run to the end
#[derive(Debug, Clone)]
pub struct JobFailure {
    pub error: Arc<ExecError>,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
}

/// Lifecycle of one execution unit
#[derive(Debug, Clone, Default)]
pub enum JobState {
    #[default]
    Pending,
    Running,
    Completed(JobMetrics),
    Failed(JobFailure),
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed(_) | JobState::Failed(_) | JobState::Cancelled)
    }
}

/// How a reported job ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed { exit_code: i32 },
    Failed(String),
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Completed { exit_code: 0 } => write!(f, "ok"),
            JobOutcome::Completed { exit_code } => write!(f, "exit {}", exit_code),
            JobOutcome::Failed(reason) => write!(f, "FAILED: {}", reason),
        }
    }
}

/// Snapshot taken when a job leaves its slot; never changed afterwards
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionInfo {
    pub index: usize,
    pub slot: usize,
    pub base_name: String,
    pub final_size: i64,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub outcome: JobOutcome,
}

impl ExecutionInfo {
    /// Build the report snapshot for a terminal state; `Cancelled` (and
    /// non-terminal states) produce nothing
    pub fn from_state(descriptor: &JobDescriptor, slot: usize, state: &JobState) -> Option<Self> {
        match state {
            JobState::Completed(metrics) => Some(ExecutionInfo {
                index: descriptor.index,
                slot,
                base_name: descriptor.base_name.clone(),
                final_size: metrics.final_size,
                started_at: metrics.started_at,
                finished_at: metrics.finished_at,
                outcome: JobOutcome::Completed { exit_code: metrics.exit_code },
            }),
            JobState::Failed(failure) => Some(ExecutionInfo {
                index: descriptor.index,
                slot,
                base_name: descriptor.base_name.clone(),
                final_size: UNKNOWN_SIZE,
                started_at: failure.started_at,
                finished_at: failure.finished_at,
                outcome: JobOutcome::Failed(failure.error.to_string()),
            }),
            JobState::Pending | JobState::Running | JobState::Cancelled => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, JobOutcome::Failed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> JobDescriptor {
        JobDescriptor {
            base_name: "Invoices".to_string(),
            source_path: PathBuf::from("source/Invoices.fmp12"),
            clone_path: PathBuf::from("clone/Invoices Clone.fmp12"),
            target_path: PathBuf::from("target/Invoices.fmp12"),
            index: 3,
            source_size: 1024,
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
    }

    #[test]
    fn test_cancelled_jobs_produce_no_info() {
        assert!(ExecutionInfo::from_state(&descriptor(), 0, &JobState::Cancelled).is_none());
        assert!(ExecutionInfo::from_state(&descriptor(), 0, &JobState::Running).is_none());
    }

    #[test]
    fn test_failed_job_is_distinct_from_sizeless_completion() {
        let now = Local::now();
        let failed = JobState::Failed(JobFailure {
            error: Arc::new(ExecError::Output("stdout closed".to_string())),
            started_at: now,
            finished_at: now,
        });
        let sizeless = JobState::Completed(JobMetrics {
            started_at: now,
            finished_at: now,
            final_size: UNKNOWN_SIZE,
            exit_code: 0,
        });

        let failed = ExecutionInfo::from_state(&descriptor(), 1, &failed).unwrap();
        let sizeless = ExecutionInfo::from_state(&descriptor(), 1, &sizeless).unwrap();

        assert_eq!(failed.final_size, sizeless.final_size);
        assert!(failed.is_failed());
        assert!(!sizeless.is_failed());
        assert_eq!(failed.outcome.to_string(), "FAILED: tool output unavailable: stdout closed");
        assert_eq!(sizeless.outcome.to_string(), "ok");
        assert_eq!(failed.index, 3);
        assert_eq!(failed.slot, 1);
    }

    #[test]
    fn test_outcome_display_for_exit_codes() {
        assert_eq!(JobOutcome::Completed { exit_code: 2 }.to_string(), "exit 2");
        assert_eq!(
            JobOutcome::Failed(ExecError::Terminated("signal 2".to_string()).to_string()).to_string(),
            "FAILED: migration tool terminated by signal 2"
        );
    }
}
