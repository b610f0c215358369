//! Reader/writer task harness.
//!
//! [`run`] owns the lifecycle of one demonstration run: it creates the
//! [`RwSync`], spawns reader and writer threads that loop
//! `enter -> touch resource -> exit -> sleep`, raises the [`Shutdown`]
//! signal when the [`RunLimit`] is reached, and joins every thread.
//!
//! Shutdown is cooperative. Each task checks the signal once per iteration,
//! between an exit and the next enter. A task already blocked inside an
//! enter call completes that cycle before it notices.

use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use rwsync_core::sync::stress;
use rwsync_core::{Mode, Occupancy, RwSync};

use crate::log::Logger;
use crate::monitor::{CriticalSectionMonitor, MonitorReport};
use crate::task::{Role, Task};
use crate::{tlog, vtlog};

// ===========================================================================
// Configuration
// ===========================================================================

/// When a run ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunLimit {
    /// Raise the shutdown signal after this long. Readers keep going even
    /// if every writer already ran out of work.
    Duration(Duration),
    /// Each writer performs at most this many cycles (fewer if it runs out
    /// of work); readers run until all writers are done.
    WriterCycles(u64),
}

/// Randomized pauses between cycles, in microseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pacing {
    /// Pause after each reader cycle.
    pub reader_us: RangeInclusive<u64>,
    /// Pause after each writer cycle.
    pub writer_us: RangeInclusive<u64>,
}

impl Pacing {
    /// Pauses given in milliseconds.
    pub fn millis(reader: RangeInclusive<u64>, writer: RangeInclusive<u64>) -> Self {
        let us = |r: RangeInclusive<u64>| r.start() * 1000..=r.end() * 1000;
        Self {
            reader_us: us(reader),
            writer_us: us(writer),
        }
    }

    /// No pauses at all.
    pub fn none() -> Self {
        Self {
            reader_us: 0..=0,
            writer_us: 0..=0,
        }
    }
}

/// Parameters of one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Synchronization policy.
    pub mode: Mode,
    /// Number of reader tasks.
    pub readers: usize,
    /// Number of writer tasks.
    pub writers: usize,
    /// When to stop.
    pub limit: RunLimit,
    /// Pauses between cycles.
    pub pacing: Pacing,
    /// Base PRNG seed for the pauses.
    pub seed: u64,
}

// ===========================================================================
// Workload contract
// ===========================================================================

/// What a task can see while it runs.
pub struct Ctx<'a> {
    /// The running task.
    pub task: Task,
    /// The synchronizer's mode. Workloads use it to pick the deliberately
    /// slow write path in vanilla mode.
    pub mode: Mode,
    /// Trace sink.
    pub logger: &'a Logger,
}

/// A protected resource plus the reader and writer behavior around it.
///
/// `read` and `write` run strictly between the matching enter and exit;
/// everything else runs outside the critical section.
pub trait Workload: Send + Sync + 'static {
    /// Private progress of one writer task.
    type WriterState: Send;
    /// What a writer prepared outside the critical section.
    type Item;
    /// What a reader took out of the critical section.
    type Observation;

    /// Creates the state of writer `task` out of `writers` total.
    fn writer_state(&self, task: Task, writers: usize) -> Self::WriterState;

    /// Prepares the next write. `None` means this writer has no more work.
    fn next_item(&self, state: &mut Self::WriterState) -> Option<Self::Item>;

    /// Applies `item` to the resource. Called inside the critical section.
    fn write(&self, ctx: &Ctx<'_>, item: Self::Item);

    /// Reads the resource. Called inside the critical section.
    fn read(&self, ctx: &Ctx<'_>) -> Self::Observation;

    /// Inspects an observation after the reader left.
    fn observed(&self, ctx: &Ctx<'_>, observation: Self::Observation);

    /// Called once when a writer stops, for whatever reason.
    fn writer_finished(&self, _ctx: &Ctx<'_>, _state: &Self::WriterState) {}
}

// ===========================================================================
// Shutdown
// ===========================================================================

/// Cooperative cancellation signal shared by all tasks of a run.
///
/// It is only ever polled between cycles; it never interrupts a task
/// blocked inside the synchronizer.
#[derive(Debug)]
pub struct Shutdown {
    running: AtomicBool,
}

impl Shutdown {
    /// Creates a signal in the running state.
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
        }
    }

    /// Returns `true` until [`Shutdown::trigger`] is called.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Asks every task to stop after its current cycle.
    pub fn trigger(&self) {
        self.running.store(false, Ordering::Release);
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts writers that have stopped and wakes the coordinator.
#[derive(Default)]
struct WriterTally {
    done: Mutex<usize>,
    changed: Condvar,
}

impl WriterTally {
    fn mark_done(&self) {
        *self.done.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        self.changed.notify_all();
    }

    /// Waits until `total` writers are done.
    fn wait_all(&self, total: usize) {
        let done = self.done.lock().unwrap_or_else(PoisonError::into_inner);
        let _done = self
            .changed
            .wait_while(done, |d| *d < total)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

/// Marks a writer done even if its loop panicked.
struct MarkDoneOnDrop(Arc<WriterTally>);

impl Drop for MarkDoneOnDrop {
    fn drop(&mut self) {
        self.0.mark_done();
    }
}

// ===========================================================================
// Run
// ===========================================================================

/// Outcome of a run.
#[derive(Debug, Clone, Copy)]
pub struct RunReport {
    /// Mode the run used.
    pub mode: Mode,
    /// Counts gathered by the external observer.
    pub monitor: MonitorReport,
    /// Synchronizer counters after every task returned.
    pub final_occupancy: Occupancy,
    /// Wall time from first spawn to last join.
    pub elapsed: Duration,
}

/// Everything a task thread shares with its siblings.
struct Shared<W> {
    workload: Arc<W>,
    sync: Arc<RwSync>,
    monitor: Arc<CriticalSectionMonitor>,
    shutdown: Arc<Shutdown>,
    logger: Arc<Logger>,
}

impl<W> Clone for Shared<W> {
    fn clone(&self) -> Self {
        Self {
            workload: Arc::clone(&self.workload),
            sync: Arc::clone(&self.sync),
            monitor: Arc::clone(&self.monitor),
            shutdown: Arc::clone(&self.shutdown),
            logger: Arc::clone(&self.logger),
        }
    }
}

/// Runs `workload` under `config` and returns the observer's report.
///
/// # Errors
///
/// Fails if a thread cannot be spawned or a task panicked.
pub fn run<W: Workload>(
    workload: Arc<W>,
    config: &RunConfig,
    logger: Arc<Logger>,
) -> Result<RunReport> {
    stress::init(0, config.seed);

    let shared = Shared {
        workload,
        sync: Arc::new(RwSync::new(config.mode)),
        monitor: Arc::new(CriticalSectionMonitor::new()),
        shutdown: Arc::new(Shutdown::new()),
        logger,
    };
    let tally = Arc::new(WriterTally::default());
    let start = Instant::now();

    let mut handles: Vec<(Task, JoinHandle<()>)> = Vec::new();
    let spawned = spawn_all(&shared, config, &tally, &mut handles);

    if spawned.is_ok() {
        match config.limit {
            RunLimit::Duration(d) => thread::sleep(d),
            RunLimit::WriterCycles(_) => tally.wait_all(config.writers),
        }
    }
    shared.shutdown.trigger();

    let mut panicked = Vec::new();
    for (task, handle) in handles {
        if handle.join().is_err() {
            panicked.push(task.to_string());
        }
    }
    spawned?;
    if !panicked.is_empty() {
        return Err(anyhow!("task(s) panicked: {}", panicked.join(", ")));
    }

    Ok(RunReport {
        mode: config.mode,
        monitor: shared.monitor.report(),
        final_occupancy: shared.sync.snapshot(),
        elapsed: start.elapsed(),
    })
}

fn spawn_all<W: Workload>(
    shared: &Shared<W>,
    config: &RunConfig,
    tally: &Arc<WriterTally>,
    handles: &mut Vec<(Task, JoinHandle<()>)>,
) -> Result<()> {
    for id in 1..=config.readers {
        let task = Task::reader(id);
        let (shared, pacing) = (shared.clone(), config.pacing.reader_us.clone());
        let handle = thread::Builder::new()
            .name(task.to_string())
            .spawn(move || reader_loop(&shared, task, pacing))
            .with_context(|| format!("failed to spawn reader {task}"))?;
        handles.push((task, handle));
    }

    for id in 1..=config.writers {
        let task = Task::writer(id);
        let (shared, tally) = (shared.clone(), Arc::clone(tally));
        let (pacing, limit, writers) = (config.pacing.writer_us.clone(), config.limit, config.writers);
        let handle = thread::Builder::new()
            .name(task.to_string())
            .spawn(move || {
                let _done = MarkDoneOnDrop(tally);
                writer_loop(&shared, task, writers, limit, pacing);
            })
            .with_context(|| format!("failed to spawn writer {task}"))?;
        handles.push((task, handle));
    }
    Ok(())
}

fn reader_loop<W: Workload>(shared: &Shared<W>, task: Task, pacing: RangeInclusive<u64>) {
    stress::seed_thread(task.salt());
    let ctx = Ctx {
        task,
        mode: shared.sync.mode(),
        logger: &shared.logger,
    };
    tlog!(ctx.logger, task, "started");

    while shared.shutdown.is_running() {
        vtlog!(ctx.logger, task, "entering");
        shared.sync.reader_enter();
        shared.monitor.entered(Role::Reader);

        let observation = shared.workload.read(&ctx);

        shared.monitor.leaving(Role::Reader);
        shared.sync.reader_exit();
        shared.monitor.exited(Role::Reader);
        vtlog!(ctx.logger, task, "left");

        shared.workload.observed(&ctx, observation);
        pause(&pacing);
    }

    tlog!(ctx.logger, task, "finished");
}

fn writer_loop<W: Workload>(
    shared: &Shared<W>,
    task: Task,
    writers: usize,
    limit: RunLimit,
    pacing: RangeInclusive<u64>,
) {
    stress::seed_thread(task.salt());
    let ctx = Ctx {
        task,
        mode: shared.sync.mode(),
        logger: &shared.logger,
    };
    tlog!(ctx.logger, task, "started");

    let mut state = shared.workload.writer_state(task, writers);
    let mut cycles = 0u64;
    while shared.shutdown.is_running() {
        if matches!(limit, RunLimit::WriterCycles(n) if cycles >= n) {
            break;
        }
        let Some(item) = shared.workload.next_item(&mut state) else {
            break;
        };

        vtlog!(ctx.logger, task, "entering");
        shared.sync.writer_enter();
        shared.monitor.entered(Role::Writer);

        shared.workload.write(&ctx, item);

        shared.monitor.leaving(Role::Writer);
        shared.sync.writer_exit();
        shared.monitor.exited(Role::Writer);
        vtlog!(ctx.logger, task, "left");

        cycles += 1;
        pause(&pacing);
    }

    shared.workload.writer_finished(&ctx, &state);
}

/// Sleeps for a random number of microseconds in `range`.
fn pause(range: &RangeInclusive<u64>) {
    let us = stress::random_in(range.clone());
    if us > 0 {
        thread::sleep(Duration::from_micros(us));
    }
}
