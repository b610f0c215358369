//! Shared prime counter.
//!
//! Writer `i` of `W` scans its own slice of `[2, max)` and bumps a shared
//! counter for every prime it finds; readers sample the counter. The slices
//! are disjoint, so the final count is known in advance. Vanilla mode splits
//! the increment into load, delay, store, and loses updates.

use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::race_window;
use crate::harness::{Ctx, Workload};
use crate::task::Task;
use crate::tlog;

/// Delay between the load and the store of a vanilla increment.
const INCREMENT_GAP: Duration = Duration::from_micros(50);

/// Trial division with the 6k +/- 1 wheel.
pub fn is_prime(n: u64) -> bool {
    if n <= 1 {
        return false;
    }
    if n <= 3 {
        return true;
    }
    if n % 2 == 0 || n % 3 == 0 {
        return false;
    }
    let mut i = 5;
    while i <= n / i {
        if n % i == 0 || n % (i + 2) == 0 {
            return false;
        }
        i += 6;
    }
    true
}

/// Returns the slice of `[2, max)` scanned by writer `id` (1-based) of
/// `writers`. The last writer also takes the remainder.
pub fn writer_range(id: usize, writers: usize, max: u64) -> Range<u64> {
    if writers == 0 || id == 0 || id > writers {
        return 2..2;
    }
    let total = max.saturating_sub(2);
    let per_writer = total / writers as u64;
    let start = 2 + (id as u64 - 1) * per_writer;
    let end = if id == writers {
        max.max(2)
    } else {
        start + per_writer
    };
    start..end
}

/// Number of primes all `writers` together will find below `max`.
pub fn expected_count(max: u64, writers: usize) -> u64 {
    (1..=writers)
        .flat_map(|id| writer_range(id, writers, max))
        .filter(|&n| is_prime(n))
        .count() as u64
}

/// The prime-counter workload.
pub struct PrimeDemo {
    count: AtomicU64,
    max: u64,
    reads: AtomicU64,
}

/// A writer's position in its slice.
#[derive(Debug, Clone)]
pub struct Scan {
    range: Range<u64>,
    next: u64,
}

impl PrimeDemo {
    /// Creates the workload for the range `[2, max)`.
    pub fn new(max: u64) -> Self {
        Self {
            count: AtomicU64::new(0),
            max,
            reads: AtomicU64::new(0),
        }
    }

    /// Upper bound (exclusive) of the scanned range.
    pub fn max(&self) -> u64 {
        self.max
    }

    /// Current value of the shared counter.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Completed reads.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Compares the counter against what `writers` should have found.
    pub fn report(&self, writers: usize) -> PrimeReport {
        PrimeReport {
            final_count: self.count(),
            expected: expected_count(self.max, writers),
            reads: self.reads(),
        }
    }
}

/// Summary of a prime run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrimeReport {
    /// Counter value after the run.
    pub final_count: u64,
    /// Primes the writers' slices contain.
    pub expected: u64,
    /// Completed reads.
    pub reads: u64,
}

impl PrimeReport {
    /// Increments that were overwritten by a concurrent writer.
    pub fn lost_updates(&self) -> u64 {
        self.expected.saturating_sub(self.final_count)
    }

    /// Returns `true` if no increment was lost.
    pub fn is_correct(&self) -> bool {
        self.final_count == self.expected
    }
}

impl Workload for PrimeDemo {
    type WriterState = Scan;
    type Item = u64;
    type Observation = u64;

    fn writer_state(&self, task: Task, writers: usize) -> Scan {
        let range = writer_range(task.id, writers, self.max);
        Scan {
            next: range.start,
            range,
        }
    }

    fn next_item(&self, scan: &mut Scan) -> Option<u64> {
        let prime = (scan.next..scan.range.end).find(|&n| is_prime(n))?;
        scan.next = prime + 1;
        Some(prime)
    }

    fn write(&self, ctx: &Ctx<'_>, prime: u64) {
        // Read-modify-write in two steps; only the bracket makes it atomic.
        let current = self.count.load(Ordering::Relaxed);
        race_window(ctx.mode, INCREMENT_GAP);
        self.count.store(current + 1, Ordering::Relaxed);
        tlog!(
            ctx.logger,
            ctx.task,
            "found prime {prime}, count = {}",
            current + 1
        );
    }

    fn read(&self, _ctx: &Ctx<'_>) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    fn observed(&self, ctx: &Ctx<'_>, count: u64) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        tlog!(ctx.logger, ctx.task, "read prime_count = {count}");
    }

    fn writer_finished(&self, ctx: &Ctx<'_>, scan: &Scan) {
        tlog!(
            ctx.logger,
            ctx.task,
            "finished checking range [{}, {})",
            scan.range.start,
            scan.range.end
        );
    }
}
