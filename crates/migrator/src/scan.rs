use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use humansize::{format_size, DECIMAL};
use log::{debug, info, warn};
use walkdir::WalkDir;
use crate::config::MigrationConfig;
use crate::job::JobDescriptor;

/// A source file paired with the files derived from it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMatch {
    pub base_name: String,
    pub source_path: PathBuf,
    pub clone_path: PathBuf,
    pub target_path: PathBuf,
    pub size: u64,
}

/// Result of scanning a source file
#[derive(Debug, Clone)]
pub enum ScanResult {
    /// File has a clone counterpart and can be migrated
    Matched(SourceMatch),
    /// File should be skipped (path, reason)
    Skipped(PathBuf, String),
}

/// Create the source and clone directories if they are missing so a first
/// run on an empty folder reports zero jobs instead of failing
pub fn ensure_directories(cfg: &MigrationConfig) -> Result<()> {
    for dir in [&cfg.source_dir, &cfg.clone_dir] {
        if !dir.exists() {
            info!("Creating missing directory: {}", dir.display());
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
    }
    Ok(())
}

/// Scan the top level of the source directory for files following the naming
/// convention and pair each with its clone.
///
/// Results keep directory enumeration order (sorted by file name).
pub fn scan_sources(cfg: &MigrationConfig) -> Result<Vec<ScanResult>> {
    let mut results = Vec::new();

    info!(
        "Scanning {} for {}",
        cfg.source_dir.display(),
        cfg.naming.source_pattern(&cfg.extension)
    );

    let walker = WalkDir::new(&cfg.source_dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name();

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Error reading directory entry: {}", e);
                continue;
            }
        };

        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            debug!("Ignoring non UTF-8 file name: {}", path.display());
            continue;
        };

        let Some(base_name) = cfg.naming.source_base_name(file_name, &cfg.extension) else {
            debug!("Not a source file under the naming convention: {}", path.display());
            continue;
        };

        results.push(match_source(cfg, path, base_name));
    }

    Ok(results)
}

fn match_source(cfg: &MigrationConfig, path: &Path, base_name: String) -> ScanResult {
    let clone_path = cfg.clone_dir.join(cfg.naming.clone_file_name(&base_name, &cfg.extension));
    if !clone_path.is_file() {
        let reason = format!("Failed to find clone file: {}", clone_path.display());
        warn!("{}", reason);
        return ScanResult::Skipped(path.to_path_buf(), reason);
    }

    // the file may vanish between enumeration and pairing
    let size = match std::fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) => {
            let reason = format!("Failed to stat source file {}: {}", path.display(), e);
            warn!("{}", reason);
            return ScanResult::Skipped(path.to_path_buf(), reason);
        }
    };
    let target_path = cfg.target_dir.join(cfg.naming.target_file_name(&base_name, &cfg.extension));

    debug!("Matched {} -> {}", path.display(), clone_path.display());
    ScanResult::Matched(SourceMatch {
        base_name,
        source_path: path.to_path_buf(),
        clone_path,
        target_path,
        size,
    })
}

/// Turn scan results into the run queue: matched sources ordered by
/// descending size, ties keeping scan order, indexed from 0.
///
/// Largest first so a big migration does not end up running alone after all
/// the small ones have finished.
pub fn build_queue(results: Vec<ScanResult>) -> Vec<JobDescriptor> {
    let mut matches: Vec<SourceMatch> = results
        .into_iter()
        .filter_map(|r| match r {
            ScanResult::Matched(m) => Some(m),
            ScanResult::Skipped(..) => None,
        })
        .collect();

    // stable sort: equal sizes stay in enumeration order
    matches.sort_by(|a, b| b.size.cmp(&a.size));

    matches
        .into_iter()
        .enumerate()
        .map(|(index, m)| JobDescriptor {
            base_name: m.base_name,
            source_path: m.source_path,
            clone_path: m.clone_path,
            target_path: m.target_path,
            index,
            source_size: m.size,
        })
        .collect()
}

/// Scan the source directory and build the ordered job queue
pub fn build_job_queue(cfg: &MigrationConfig) -> Result<Vec<JobDescriptor>> {
    let results = scan_sources(cfg)?;
    let skipped = results
        .iter()
        .filter(|r| matches!(r, ScanResult::Skipped(..)))
        .count();

    let queue = build_queue(results);
    let total: u64 = queue.iter().map(|d| d.source_size).sum();

    info!(
        "Scan complete: {} job(s) queued ({}), {} source(s) without a clone",
        queue.len(),
        format_size(total, DECIMAL),
        skipped
    );
    for descriptor in &queue {
        debug!(
            "  #{} {} ({})",
            descriptor.index + 1,
            descriptor.base_name,
            format_size(descriptor.source_size, DECIMAL)
        );
    }

    Ok(queue)
}
