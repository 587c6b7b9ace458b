use std::fmt;
use std::path::{Path, PathBuf};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use crate::naming::NamingConvention;

/// Lowest accepted number of concurrent migration processes
pub const MIN_CONCURRENCY: usize = 1;
/// Highest accepted number of concurrent migration processes
pub const MAX_CONCURRENCY: usize = 10;

/// Configuration for a batch migration run
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Explicit path to the migration tool; discovered on disk when unset
    pub tool_path: Option<PathBuf>,
    /// Number of migration processes allowed to run at once (1-10)
    pub concurrency: usize,
    /// Account used for both the source and the clone file
    pub account: String,
    /// Password for `account`; never serialized back out
    #[serde(skip_serializing)]
    pub password: String,
    /// Prefix/suffix rule mapping source names to clone and target names
    pub naming: NamingConvention,
    /// Extra arguments passed to the tool after the fixed ones
    pub extra_args: String,
    /// Directory holding the source files
    pub source_dir: PathBuf,
    /// Directory holding the empty clone files
    pub clone_dir: PathBuf,
    /// Directory receiving migrated files (created if absent)
    pub target_dir: PathBuf,
    /// Directory receiving one log file per job
    pub log_dir: PathBuf,
    /// Cross-run summary table, appended after every run
    pub summary_log: PathBuf,
    /// Extension of the database files, without the dot
    pub extension: String,
    /// Scheduler tick in milliseconds
    pub poll_interval_ms: u64,
    /// Remove a partially written target when its job fails
    pub delete_failed_targets: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl fmt::Debug for MigrationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationConfig")
            .field("tool_path", &self.tool_path)
            .field("concurrency", &self.concurrency)
            .field("account", &self.account)
            .field("password", &"**********")
            .field("naming", &self.naming)
            .field("extra_args", &self.extra_args)
            .field("source_dir", &self.source_dir)
            .field("clone_dir", &self.clone_dir)
            .field("target_dir", &self.target_dir)
            .field("log_dir", &self.log_dir)
            .field("summary_log", &self.summary_log)
            .field("extension", &self.extension)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("delete_failed_targets", &self.delete_failed_targets)
            .finish()
    }
}

impl MigrationConfig {
    /// Create a default configuration laid out relative to the working directory
    pub fn default_config() -> Self {
        Self {
            tool_path: None,
            concurrency: 1,
            account: String::new(),
            password: String::new(),
            naming: NamingConvention::None,
            extra_args: String::new(),
            source_dir: PathBuf::from("source"),
            clone_dir: PathBuf::from("clone"),
            target_dir: PathBuf::from("target"),
            log_dir: PathBuf::from("."),
            summary_log: PathBuf::from("dmtbatch.log"),
            extension: "fmp12".to_string(),
            poll_interval_ms: 100,
            delete_failed_targets: false,
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            }
        }

        Ok(config)
    }

    /// Reject settings the scheduler cannot run with
    pub fn validate(&self) -> Result<()> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&self.concurrency) {
            bail!(
                "Process count must be between {} and {} inclusive (got {})",
                MIN_CONCURRENCY,
                MAX_CONCURRENCY,
                self.concurrency
            );
        }
        if self.account.trim().is_empty() {
            bail!("No account name configured");
        }
        if self.extension.trim().is_empty() || self.extension.starts_with('.') {
            bail!("File extension must be non-empty and given without a leading dot");
        }
        if self.poll_interval_ms == 0 {
            bail!("Poll interval must be at least 1ms");
        }
        Ok(())
    }

    /// Account and password for the source and clone files
    pub fn credentials(&self) -> Credentials {
        Credentials {
            account: self.account.clone(),
            password: self.password.clone(),
        }
    }
}

/// Account credentials handed to the migration tool
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub account: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("account", &self.account)
            .field("password", &"**********")
            .finish()
    }
}
