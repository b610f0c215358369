//! External observer of critical-section occupancy.
//!
//! Tasks report to a [`CriticalSectionMonitor`] right after an enter call
//! returns and right before the matching exit call. The monitor keeps its
//! own reader/writer counts in one atomic word, so an overlapping reader and
//! writer (or two writers) is always seen by whichever arrives second.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::task::Role;

const READER_ONE: u64 = 1;
const WRITER_ONE: u64 = 1 << 32;
const READER_MASK: u64 = WRITER_ONE - 1;

/// Counts completed enter/exit calls and mutual-exclusion violations.
#[derive(Debug, Default)]
pub struct CriticalSectionMonitor {
    occupancy: AtomicU64,
    violations: AtomicU64,
    max_readers: AtomicU64,
    reader_enters: AtomicU64,
    reader_exits: AtomicU64,
    writer_enters: AtomicU64,
    writer_exits: AtomicU64,
}

impl CriticalSectionMonitor {
    /// Creates a monitor with all counts at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that a task of `role` is now inside its critical section.
    ///
    /// Returns `false` if entering overlapped a conflicting task.
    pub fn entered(&self, role: Role) -> bool {
        let ok = match role {
            Role::Reader => {
                self.reader_enters.fetch_add(1, Ordering::Relaxed);
                let prev = self.occupancy.fetch_add(READER_ONE, Ordering::SeqCst);
                self.max_readers
                    .fetch_max((prev & READER_MASK) + 1, Ordering::Relaxed);
                prev & !READER_MASK == 0
            }
            Role::Writer => {
                self.writer_enters.fetch_add(1, Ordering::Relaxed);
                let prev = self.occupancy.fetch_add(WRITER_ONE, Ordering::SeqCst);
                prev == 0
            }
        };
        if !ok {
            self.violations.fetch_add(1, Ordering::Relaxed);
        }
        ok
    }

    /// Records that a task of `role` is about to leave its critical section.
    pub fn leaving(&self, role: Role) {
        let one = match role {
            Role::Reader => READER_ONE,
            Role::Writer => WRITER_ONE,
        };
        self.occupancy.fetch_sub(one, Ordering::SeqCst);
    }

    /// Records a completed exit call.
    pub fn exited(&self, role: Role) {
        match role {
            Role::Reader => self.reader_exits.fetch_add(1, Ordering::Relaxed),
            Role::Writer => self.writer_exits.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// Returns the counts gathered so far.
    pub fn report(&self) -> MonitorReport {
        MonitorReport {
            reader_enters: self.reader_enters.load(Ordering::Relaxed),
            reader_exits: self.reader_exits.load(Ordering::Relaxed),
            writer_enters: self.writer_enters.load(Ordering::Relaxed),
            writer_exits: self.writer_exits.load(Ordering::Relaxed),
            violations: self.violations.load(Ordering::Relaxed),
            max_readers: self.max_readers.load(Ordering::Relaxed),
        }
    }
}

/// Counts gathered by a [`CriticalSectionMonitor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MonitorReport {
    /// Completed reader enter calls.
    pub reader_enters: u64,
    /// Completed reader exit calls.
    pub reader_exits: u64,
    /// Completed writer enter calls.
    pub writer_enters: u64,
    /// Completed writer exit calls.
    pub writer_exits: u64,
    /// Entries that overlapped a conflicting task.
    pub violations: u64,
    /// Largest number of readers seen inside together.
    pub max_readers: u64,
}

impl MonitorReport {
    /// Returns `true` if every enter was matched by an exit.
    pub fn is_balanced(&self) -> bool {
        self.reader_enters == self.reader_exits && self.writer_enters == self.writer_exits
    }
}
