//! Progress checkpoints derived from the migration tool's output.
//!
//! The tool reports no percentage, but it prints recognisable lines when it
//! starts mapping the fields of a table and when it prints a table summary.
//! At each of those the target file is re-statted and the growth since the
//! previous checkpoint is logged.

use std::fmt;
use std::path::PathBuf;
use log::debug;

/// Printed when the tool starts mapping the fields of a table
pub const MAPPING_FIELDS_SENTINEL: &str = "mapping fields";
/// Printed when the tool finishes a table
pub const SUMMARY_SENTINEL: &str = "summary";

/// Whether an output line marks a checkpoint (ASCII case-insensitive)
pub fn is_checkpoint(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    lower.contains(MAPPING_FIELDS_SENTINEL) || lower.contains(SUMMARY_SENTINEL)
}

/// Target size at a checkpoint and its change since the previous one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    pub size: u64,
    pub delta: i64,
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "checkpoint: target size {} bytes ({:+} bytes)", self.size, self.delta)
    }
}

/// Tracks target growth between checkpoints; the baseline starts at 0
#[derive(Debug)]
pub struct CheckpointTracker {
    target: PathBuf,
    last_size: u64,
}

impl CheckpointTracker {
    pub fn new(target: PathBuf) -> Self {
        CheckpointTracker { target, last_size: 0 }
    }

    /// Measure the target if `line` is a checkpoint.
    ///
    /// A target that cannot be statted yet yields no checkpoint and leaves the
    /// baseline untouched.
    pub async fn observe(&mut self, line: &str) -> Option<Checkpoint> {
        if !is_checkpoint(line) {
            return None;
        }
        match tokio::fs::metadata(&self.target).await {
            Ok(meta) => Some(self.record(meta.len())),
            Err(e) => {
                debug!("Checkpoint skipped, cannot stat {}: {}", self.target.display(), e);
                None
            }
        }
    }

    /// Record a measured size against the previous checkpoint
    pub fn record(&mut self, size: u64) -> Checkpoint {
        let delta = size as i64 - self.last_size as i64;
        self.last_size = size;
        Checkpoint { size, delta }
    }
}
