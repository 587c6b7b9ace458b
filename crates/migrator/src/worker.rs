//! Execution unit: one migration tool process for one job.
//!
//! Each unit runs on its own tokio task. The task publishes its lifecycle
//! through a `watch` channel and only ever writes a terminal state after the
//! tool process has been reaped, so a scheduler that sees a terminal state
//! can hand the slot to the next job straight away.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use chrono::{DateTime, Local};
use log::{debug, error, info, warn};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use crate::checkpoint::CheckpointTracker;
use crate::config::{Credentials, MigrationConfig};
use crate::job::{ExecError, JobDescriptor, JobFailure, JobMetrics, JobState, UNKNOWN_SIZE};
use crate::tool::{split_extra_args, CommandBuilder};

/// Format of the timestamp leading every per-job log line
const LOG_TIME_FORMAT: &str = "%H:%M:%S";

/// Everything needed to run the tool, shared by all units of a run
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub tool: PathBuf,
    pub credentials: Credentials,
    pub extra_args: Vec<String>,
    pub log_dir: PathBuf,
    pub delete_failed_targets: bool,
}

impl ToolInvocation {
    pub fn from_config(cfg: &MigrationConfig, tool: PathBuf) -> Self {
        ToolInvocation {
            tool,
            credentials: cfg.credentials(),
            extra_args: split_extra_args(&cfg.extra_args),
            log_dir: cfg.log_dir.clone(),
            delete_failed_targets: cfg.delete_failed_targets,
        }
    }

    /// Per-job log file for a base name
    pub fn log_path(&self, base_name: &str) -> PathBuf {
        self.log_dir.join(format!("{}.txt", base_name))
    }
}

/// Handle to a running execution unit
pub struct WorkerHandle {
    descriptor: JobDescriptor,
    state: watch::Receiver<JobState>,
    kill: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Start the migration tool for one job. Must be called inside a tokio runtime.
    pub fn start(descriptor: JobDescriptor, invocation: Arc<ToolInvocation>) -> Self {
        let job = descriptor.clone();
        Self::spawn(descriptor, move |kill| run_migration(job, invocation, kill))
    }

    /// Run an arbitrary job body as an execution unit.
    ///
    /// The body receives the kill signal and returns the terminal state; it
    /// resolves when [`force_terminate`](Self::force_terminate) is called or
    /// the handle is dropped.
    pub fn spawn<F, Fut>(descriptor: JobDescriptor, body: F) -> Self
    where
        F: FnOnce(oneshot::Receiver<()>) -> Fut + Send + 'static,
        Fut: Future<Output = JobState> + Send + 'static,
    {
        let (state_tx, state_rx) = watch::channel(JobState::Pending);
        let (kill_tx, kill_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            state_tx.send_replace(JobState::Running);
            let terminal = body(kill_rx).await;
            debug_assert!(terminal.is_terminal());
            // last write of the unit
            state_tx.send_replace(terminal);
        });

        WorkerHandle {
            descriptor,
            state: state_rx,
            kill: Some(kill_tx),
            task,
        }
    }

    pub fn descriptor(&self) -> &JobDescriptor {
        &self.descriptor
    }

    pub fn is_running(&self) -> bool {
        self.terminal_state().is_none()
    }

    /// Terminal state, or `None` while the job is pending or running.
    ///
    /// A task that ended without publishing a terminal state (a panic) is
    /// reported as failed.
    pub fn terminal_state(&self) -> Option<JobState> {
        let state = self.state.borrow().clone();
        if state.is_terminal() {
            return Some(state);
        }
        if self.task.is_finished() {
            // the state may have been published after the first read
            let state = self.state.borrow().clone();
            if state.is_terminal() {
                return Some(state);
            }
            let now = Local::now();
            return Some(JobState::Failed(JobFailure {
                error: Arc::new(ExecError::Output("worker task ended without a result".to_string())),
                started_at: now,
                finished_at: now,
            }));
        }
        None
    }

    /// Kill the tool process without draining its output.
    ///
    /// The unit becomes `Cancelled` shortly after; calling this again or after
    /// the job ended is a no-op.
    pub fn force_terminate(&mut self) {
        if let Some(kill) = self.kill.take() {
            debug!("Force terminating job {}", self.descriptor.base_name);
            let _ = kill.send(());
        }
    }

    /// Wait until the unit reaches a terminal state
    pub async fn wait(&mut self) -> JobState {
        loop {
            if let Some(state) = self.terminal_state() {
                return state;
            }
            if self.state.changed().await.is_err() {
                // sender gone: the task is finishing, let it settle
                tokio::task::yield_now().await;
            }
        }
    }
}

/// Outcome of streaming the tool's output
enum Pump {
    Drained,
    Killed,
}

async fn run_migration(
    descriptor: JobDescriptor,
    invocation: Arc<ToolInvocation>,
    mut kill: oneshot::Receiver<()>,
) -> JobState {
    let started_at = Local::now();
    let log_path = invocation.log_path(&descriptor.base_name);

    match execute(&descriptor, &invocation, &log_path, started_at, &mut kill).await {
        Ok(Some(metrics)) => {
            info!(
                "{} - Finished ({} bytes, exit code {})",
                descriptor.base_name,
                metrics.final_size,
                metrics.exit_code
            );
            JobState::Completed(metrics)
        }
        Ok(None) => {
            warn!("{} - Cancelled", descriptor.base_name);
            JobState::Cancelled
        }
        Err(e) => {
            error!("{} - Failed: {}", descriptor.base_name, e);
            record_failure(&log_path, &e).await;
            if invocation.delete_failed_targets {
                remove_partial_target(&descriptor.target_path).await;
            }
            JobState::Failed(JobFailure {
                error: Arc::new(e),
                started_at,
                finished_at: Local::now(),
            })
        }
    }
}

/// Run the tool to completion. `Ok(None)` means the job was killed.
async fn execute(
    descriptor: &JobDescriptor,
    invocation: &ToolInvocation,
    log_path: &Path,
    started_at: DateTime<Local>,
    kill: &mut oneshot::Receiver<()>,
) -> Result<Option<JobMetrics>, ExecError> {
    let mut log = JobLog::create(log_path).await?;

    if let Some(target_dir) = descriptor.target_path.parent() {
        if !target_dir.as_os_str().is_empty() {
            tokio::fs::create_dir_all(target_dir).await.map_err(|e| {
                ExecError::io(format!("failed to create target directory {}", target_dir.display()), e)
            })?;
        }
    }

    let builder = CommandBuilder::new(&invocation.credentials, &invocation.extra_args);
    let args = builder.build_migration_command(descriptor);
    log.write_line(&format!("command: {}", builder.render(&invocation.tool, &args)))
        .await?;

    let mut command = Command::new(&invocation.tool);
    command
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    // own process group: a terminal Ctrl-C reaches only us, and the tool is
    // ended through force_terminate
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command
        .spawn()
        .map_err(|e| ExecError::Launch { tool: invocation.tool.clone(), source: e })?;

    info!("{} - Started", descriptor.base_name);

    let (line_tx, mut lines) = mpsc::channel(64);
    match (child.stdout.take(), child.stderr.take()) {
        (Some(stdout), Some(stderr)) => {
            tokio::spawn(forward_lines(stdout, line_tx.clone()));
            tokio::spawn(forward_lines(stderr, line_tx));
        }
        _ => {
            terminate(&mut child, &descriptor.base_name).await;
            return Err(ExecError::Output("failed to capture tool stdout/stderr".to_string()));
        }
    }

    let mut tracker = CheckpointTracker::new(descriptor.target_path.clone());
    match pump_output(descriptor, &mut log, &mut lines, &mut tracker, kill).await {
        Ok(Pump::Drained) => {}
        Ok(Pump::Killed) => {
            terminate(&mut child, &descriptor.base_name).await;
            log.write_line("cancelled").await.ok();
            return Ok(None);
        }
        Err(e) => {
            terminate(&mut child, &descriptor.base_name).await;
            return Err(e);
        }
    }

    // output closed; the process is exiting
    let status = tokio::select! {
        biased;
        _ = &mut *kill => {
            terminate(&mut child, &descriptor.base_name).await;
            log.write_line("cancelled").await.ok();
            return Ok(None);
        }
        status = child.wait() => status
            .map_err(|e| ExecError::io("failed to wait for the migration tool", e))?,
    };

    let finished_at = Local::now();
    let final_size = match tokio::fs::metadata(&descriptor.target_path).await {
        Ok(meta) => meta.len() as i64,
        Err(e) => {
            debug!("Cannot stat {}: {}", descriptor.target_path.display(), e);
            UNKNOWN_SIZE
        }
    };
    let Some(exit_code) = status.code() else {
        return Err(ExecError::Terminated(termination_cause(&status)));
    };

    log.write_line(&format!(
        "finished: exit code {}, target size {} bytes, duration {}",
        exit_code,
        final_size,
        crate::report::format_duration(finished_at - started_at)
    ))
    .await?;

    Ok(Some(JobMetrics {
        started_at,
        finished_at,
        final_size,
        exit_code,
    }))
}

/// Log every output line until both streams close or the job is killed
async fn pump_output(
    descriptor: &JobDescriptor,
    log: &mut JobLog,
    lines: &mut mpsc::Receiver<std::io::Result<String>>,
    tracker: &mut CheckpointTracker,
    kill: &mut oneshot::Receiver<()>,
) -> Result<Pump, ExecError> {
    loop {
        tokio::select! {
            biased;
            // a dropped handle counts as a kill request
            _ = &mut *kill => return Ok(Pump::Killed),
            next = lines.recv() => match next {
                Some(Ok(line)) => {
                    log.write_line(&line).await?;
                    info!("{} - {}", descriptor.base_name, line);

                    if let Some(checkpoint) = tracker.observe(&line).await {
                        log.write_line(&checkpoint.to_string()).await?;
                        info!("{} - {}", descriptor.base_name, checkpoint);
                    }
                }
                Some(Err(e)) => return Err(ExecError::io("failed to read tool output", e)),
                None => return Ok(Pump::Drained),
            },
        }
    }
}

async fn forward_lines<R>(reader: R, tx: mpsc::Sender<std::io::Result<String>>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if tx.send(Ok(line)).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                break;
            }
        }
    }
}

/// Why a process ended without an exit code
fn termination_cause(status: &std::process::ExitStatus) -> String {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("signal {}", signal);
        }
    }
    format!("unknown cause ({})", status)
}

/// Kill the tool and reap it
async fn terminate(child: &mut Child, base_name: &str) {
    if let Err(e) = child.kill().await {
        debug!("{} - kill failed (process may have exited): {}", base_name, e);
        let _ = child.wait().await;
    }
}

async fn record_failure(log_path: &Path, error: &ExecError) {
    let line = format!("{}\tERROR: {}\n", Local::now().format(LOG_TIME_FORMAT), error);
    let result = async {
        let mut file = OpenOptions::new().create(true).append(true).open(log_path).await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
    .await;
    if let Err(e) = result {
        warn!("Failed to write error to {}: {}", log_path.display(), e);
    }
}

async fn remove_partial_target(target: &Path) {
    match tokio::fs::remove_file(target).await {
        Ok(()) => info!("Removed partial target {}", target.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove partial target {}: {}", target.display(), e),
    }
}

/// Per-job log: `timestamp<TAB>line`, flushed line by line
struct JobLog {
    path: PathBuf,
    file: File,
}

impl JobLog {
    /// Create or truncate the log
    async fn create(path: &Path) -> Result<Self, ExecError> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir).await.map_err(|e| {
                    ExecError::io(format!("failed to create log directory {}", dir.display()), e)
                })?;
            }
        }
        let file = File::create(path)
            .await
            .map_err(|e| ExecError::io(format!("failed to create log {}", path.display()), e))?;
        Ok(JobLog { path: path.to_path_buf(), file })
    }

    async fn write_line(&mut self, line: &str) -> Result<(), ExecError> {
        let entry = format!("{}\t{}\n", Local::now().format(LOG_TIME_FORMAT), line);
        self.file
            .write_all(entry.as_bytes())
            .await
            .map_err(|e| ExecError::io(format!("failed to write log {}", self.path.display()), e))?;
        self.file
            .flush()
            .await
            .map_err(|e| ExecError::io(format!("failed to write log {}", self.path.display()), e))
    }
}

#[cfg(all(test, unix))]
pub(crate) mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Write an executable shell script standing in for the migration tool
    pub(crate) fn fake_tool(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("FMDataMigration");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn setup(body: &str) -> (TempDir, JobDescriptor, Arc<ToolInvocation>) {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(dir.path(), body);
        let descriptor = JobDescriptor {
            base_name: "Invoices".to_string(),
            source_path: dir.path().join("source/Invoices.fmp12"),
            clone_path: dir.path().join("clone/Invoices Clone.fmp12"),
            target_path: dir.path().join("target/Invoices.fmp12"),
            index: 0,
            source_size: 10,
        };
        let invocation = Arc::new(ToolInvocation {
            tool,
            credentials: Credentials { account: "admin".to_string(), password: "pa\"ss word".to_string() },
            extra_args: vec!["-force".to_string()],
            log_dir: dir.path().join("logs"),
            delete_failed_targets: false,
        });
        (dir, descriptor, invocation)
    }

    fn read_log(invocation: &ToolInvocation) -> String {
        std::fs::read_to_string(invocation.log_path("Invoices")).unwrap()
    }

    #[tokio::test]
    async fn test_tool_receives_arguments_intact() {
        let (_dir, descriptor, invocation) = setup(r#"for a in "$@"; do echo "ARG[$a]"; done"#);
        let mut handle = WorkerHandle::start(descriptor, invocation.clone());

        let state = handle.wait().await;
        assert!(matches!(state, JobState::Completed(ref m) if m.exit_code == 0));

        let log = read_log(&invocation);
        assert!(log.contains("ARG[-src_pwd]"));
        assert!(log.contains("ARG[pa\"ss word]"));
        assert!(log.contains("\tARG[-clone_account]\n"));
        assert!(log.contains("ARG[-v]"));
        assert!(log.contains("ARG[-force]"));
        // rendered command line never shows the password
        let command_line = log.lines().find(|l| l.contains("command:")).unwrap();
        assert!(!command_line.contains("pa\"ss word"));
        assert!(command_line.contains("**********"));
    }

    #[tokio::test]
    async fn test_log_lines_are_tab_delimited_with_checkpoints() {
        let (_dir, descriptor, invocation) = setup(
            r#"target="$6"
head -c 100 /dev/zero > "$target"
echo "Summary: table one"
sleep 1
head -c 180 /dev/zero > "$target"
echo "Summary: table two"
echo "oops" >&2"#,
        );
        let target = descriptor.target_path.clone();
        let mut handle = WorkerHandle::start(descriptor, invocation.clone());

        let state = handle.wait().await;
        let JobState::Completed(metrics) = state else { panic!("expected completion") };
        assert_eq!(metrics.final_size, 180);
        assert!(target.parent().unwrap().is_dir());

        let log = read_log(&invocation);
        for line in log.lines() {
            let (time, _) = line.split_once('\t').expect("tab separated");
            assert_eq!(time.len(), 8);
        }
        assert!(log.contains("\tSummary: table one\n"));
        assert!(log.contains("checkpoint: target size 100 bytes (+100 bytes)"));
        assert!(log.contains("checkpoint: target size 180 bytes (+80 bytes)"));
        assert!(log.contains("\toops\n"));
        assert!(log.contains("finished: exit code 0, target size 180 bytes"));
    }

    #[tokio::test]
    async fn test_missing_target_reports_unknown_size() {
        let (_dir, descriptor, invocation) = setup("echo nothing to do; exit 3");
        let mut handle = WorkerHandle::start(descriptor, invocation);

        let JobState::Completed(metrics) = handle.wait().await else { panic!("expected completion") };
        assert_eq!(metrics.final_size, UNKNOWN_SIZE);
        assert_eq!(metrics.exit_code, 3);
    }

    #[tokio::test]
    async fn test_launch_failure_becomes_failed_state_with_log() {
        let (_dir, descriptor, invocation) = setup("exit 0");
        let invocation = Arc::new(ToolInvocation {
            tool: invocation.log_dir.join("does-not-exist"),
            ..(*invocation).clone()
        });
        let mut handle = WorkerHandle::start(descriptor, invocation.clone());

        let state = handle.wait().await;
        let JobState::Failed(failure) = state else { panic!("expected failure") };
        assert!(matches!(*failure.error, ExecError::Launch { .. }));
        assert!(!handle.is_running());

        let log = read_log(&invocation);
        assert!(log.contains("ERROR: failed to launch"));
    }

    #[tokio::test]
    async fn test_force_terminate_cancels_running_tool() {
        let (_dir, descriptor, invocation) = setup("echo started; sleep 30; echo never");
        let mut handle = WorkerHandle::start(descriptor, invocation.clone());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(handle.is_running());
        handle.force_terminate();
        handle.force_terminate();

        let state = tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .expect("cancelled within grace period");
        assert!(matches!(state, JobState::Cancelled));
        assert!(!read_log(&invocation).contains("never"));
    }

    #[tokio::test]
    async fn test_failed_target_is_removed_when_configured() {
        let (dir, descriptor, invocation) = setup("exit 0");
        std::fs::create_dir_all(descriptor.target_path.parent().unwrap()).unwrap();
        std::fs::write(&descriptor.target_path, b"partial").unwrap();
        let invocation = Arc::new(ToolInvocation {
            tool: dir.path().join("missing-tool"),
            delete_failed_targets: true,
            ..(*invocation).clone()
        });
        let target = descriptor.target_path.clone();

        let mut handle = WorkerHandle::start(descriptor, invocation);
        assert!(matches!(handle.wait().await, JobState::Failed(_)));
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn test_tool_killed_by_signal_is_failed_not_completed() {
        let (_dir, descriptor, invocation) = setup("echo hi; kill -INT $$; sleep 5");
        let mut handle = WorkerHandle::start(descriptor, invocation.clone());

        let JobState::Failed(failure) = handle.wait().await else { panic!("expected failure") };
        assert!(matches!(*failure.error, ExecError::Terminated(_)));
        assert_eq!(failure.error.to_string(), "migration tool terminated by signal 2");
        assert!(read_log(&invocation).contains("ERROR: migration tool terminated by signal 2"));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_tool_runs_in_its_own_process_group() {
        let (_dir, descriptor, invocation) = setup(
            r#"read -r _ _ _ _ pgid _ < /proc/$$/stat
echo "PID[$$] PGID[$pgid]""#,
        );
        let mut handle = WorkerHandle::start(descriptor, invocation.clone());
        assert!(matches!(handle.wait().await, JobState::Completed(_)));

        let log = read_log(&invocation);
        let line = log.lines().find(|l| l.contains("PGID[")).unwrap();
        let field = |tag: &str| {
            let start = line.find(tag).unwrap() + tag.len();
            line[start..].split(']').next().unwrap().to_string()
        };
        assert_eq!(field("PID["), field("PGID["));
        let own_group = std::fs::read_to_string("/proc/self/stat").unwrap();
        assert_ne!(own_group.split_whitespace().nth(4).unwrap(), field("PGID["));
    }

    #[tokio::test]
    async fn test_spawned_body_sees_kill_signal() {
        let (_dir, descriptor, _) = setup("exit 0");
        let mut handle = WorkerHandle::spawn(descriptor, |kill| async move {
            let _ = kill.await;
            JobState::Cancelled
        });
        assert!(handle.is_running());
        handle.force_terminate();
        assert!(matches!(handle.wait().await, JobState::Cancelled));
    }
}
