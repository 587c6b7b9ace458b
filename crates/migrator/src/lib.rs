pub mod config;
pub mod naming;
pub mod job;
pub mod scan;
pub mod tool;
pub mod checkpoint;
pub mod worker;
pub mod pool;
pub mod scheduler;
pub mod report;
pub mod notify;
pub mod batch;

pub use config::{Credentials, MigrationConfig};
pub use job::{ExecError, ExecutionInfo, JobDescriptor, JobOutcome, JobState};
pub use naming::NamingConvention;
pub use report::ExecutionReport;
pub use scheduler::{Launcher, RunSummary, Scheduler, ToolLauncher};
pub use worker::{ToolInvocation, WorkerHandle};
pub use batch::{run_batch, BatchOutcome};
