//! Scheduler loop: feeds the size-ordered queue into the slot pool.
//!
//! A single control task owns the pool and the queue. Every tick it fills
//! empty slots in queue order, collects units that reached a terminal state
//! and frees their slots, and stops once the queue is empty and every slot is
//! free. Cancellation drains the queue and kills every running unit.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use chrono::{DateTime, Local};
use log::{debug, error, info, warn};
use tokio::time::MissedTickBehavior;
use crate::job::{ExecutionInfo, JobDescriptor, JobState};
use crate::pool::SlotPool;
use crate::worker::{ToolInvocation, WorkerHandle};

/// Starts an execution unit for a descriptor
pub trait Launcher {
    fn launch(&self, descriptor: JobDescriptor) -> WorkerHandle;
}

/// Launches the migration tool
#[derive(Debug, Clone)]
pub struct ToolLauncher {
    invocation: Arc<ToolInvocation>,
}

impl ToolLauncher {
    pub fn new(invocation: ToolInvocation) -> Self {
        ToolLauncher { invocation: Arc::new(invocation) }
    }
}

impl Launcher for ToolLauncher {
    fn launch(&self, descriptor: JobDescriptor) -> WorkerHandle {
        WorkerHandle::start(descriptor, Arc::clone(&self.invocation))
    }
}

/// Where every descriptor of a run currently is; the fields always add up to
/// the number of descriptors the run started with
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct JobTally {
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    /// Killed while running
    pub cancelled: usize,
    /// Drained from the queue by a cancellation, never started
    pub abandoned: usize,
}

impl JobTally {
    pub fn total(&self) -> usize {
        self.queued + self.running + self.completed + self.failed + self.cancelled + self.abandoned
    }
}

/// Result of a scheduler run
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// One entry per completed or failed job, ordered by queue index
    pub infos: Vec<ExecutionInfo>,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub tally: JobTally,
    pub cancelled: bool,
}

pub struct Scheduler<L> {
    launcher: L,
    pool: SlotPool<WorkerHandle>,
    queue: VecDeque<JobDescriptor>,
    tick: Duration,
    infos: Vec<ExecutionInfo>,
    tally: JobTally,
    total: usize,
}

impl<L: Launcher> Scheduler<L> {
    /// `queue` must already be in start order; `concurrency` is the slot count
    pub fn new(queue: Vec<JobDescriptor>, concurrency: usize, tick: Duration, launcher: L) -> Self {
        let total = queue.len();
        Scheduler {
            launcher,
            pool: SlotPool::new(concurrency.max(1)),
            queue: queue.into(),
            tick,
            infos: Vec::with_capacity(total),
            tally: JobTally { queued: total, ..Default::default() },
            total,
        }
    }

    pub fn tally(&self) -> JobTally {
        self.tally
    }

    /// Run until every job has left the pool.
    ///
    /// `cancel` resolving requests cancellation: no further job starts, running
    /// jobs are force terminated and the loop returns once they are all
    /// terminal.
    pub async fn run<C>(mut self, cancel: C) -> RunSummary
    where
        C: Future<Output = ()>,
    {
        let started_at = Local::now();
        let mut cancelled = false;
        tokio::pin!(cancel);

        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Running {} job(s) with {} concurrent process(es)",
            self.total,
            self.pool.capacity()
        );

        loop {
            if !cancelled {
                self.fill_free_slots();
            }
            self.collect_finished();
            debug_assert_eq!(self.tally.total(), self.total);

            if self.queue.is_empty() && self.pool.is_idle() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {}
                _ = &mut cancel, if !cancelled => {
                    cancelled = true;
                    self.cancel_all();
                }
            }
        }

        let finished_at = Local::now();
        self.infos.sort_by_key(|info| info.index);

        info!(
            "Run finished: {} completed, {} failed, {} cancelled, {} never started",
            self.tally.completed, self.tally.failed, self.tally.cancelled, self.tally.abandoned
        );

        RunSummary {
            infos: self.infos,
            started_at,
            finished_at,
            tally: self.tally,
            cancelled,
        }
    }

    /// Start queued jobs in every empty slot, lowest slot first
    fn fill_free_slots(&mut self) {
        while self.pool.first_free().is_some() {
            let Some(descriptor) = self.queue.pop_front() else {
                break;
            };
            let handle = self.launcher.launch(descriptor);
            match self.pool.assign_first_free(handle) {
                Ok(slot) => {
                    let descriptor = self.pool.get(slot).map(WorkerHandle::descriptor);
                    if let Some(descriptor) = descriptor {
                        info!(
                            "Started #{} {} in slot {}",
                            descriptor.index + 1,
                            descriptor.base_name,
                            slot + 1
                        );
                    }
                    self.tally.queued -= 1;
                    self.tally.running += 1;
                }
                Err(mut handle) => {
                    // pool filled up under us: stop the unit and retry next tick
                    error!("No free slot for {}, requeueing", handle.descriptor().base_name);
                    handle.force_terminate();
                    self.queue.push_front(handle.descriptor().clone());
                    break;
                }
            }
        }
    }

    /// Record and free every slot whose unit reached a terminal state
    fn collect_finished(&mut self) {
        let finished: Vec<(usize, JobState)> = self
            .pool
            .iter_occupied()
            .filter_map(|(slot, handle)| handle.terminal_state().map(|state| (slot, state)))
            .collect();

        for (slot, state) in finished {
            let Some(handle) = self.pool.release(slot) else {
                continue;
            };
            let descriptor = handle.descriptor();
            self.tally.running -= 1;

            match &state {
                JobState::Completed(_) => self.tally.completed += 1,
                JobState::Failed(_) => self.tally.failed += 1,
                JobState::Cancelled => self.tally.cancelled += 1,
                JobState::Pending | JobState::Running => {}
            }

            match ExecutionInfo::from_state(descriptor, slot, &state) {
                Some(info) => {
                    debug!(
                        "Slot {} freed by #{} {} ({})",
                        slot + 1,
                        info.index + 1,
                        info.base_name,
                        info.outcome
                    );
                    self.infos.push(info);
                }
                None => debug!("Slot {} freed by cancelled job {}", slot + 1, descriptor.base_name),
            }
        }
    }

    /// Drain the queue and kill every running unit
    fn cancel_all(&mut self) {
        let drained = self.queue.len();
        self.queue.clear();
        self.tally.queued -= drained;
        self.tally.abandoned += drained;

        let running = self.pool.occupied();
        warn!(
            "Cancellation requested: {} queued job(s) dropped, terminating {} running job(s)",
            drained, running
        );

        for (_, handle) in self.pool.iter_occupied_mut() {
            handle.force_terminate();
        }
    }
}
