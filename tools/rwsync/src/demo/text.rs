//! Shared sentence buffer.
//!
//! Writers overwrite a NUL-terminated buffer with sentences from a fixed
//! list; readers copy it out. A read that matches no sentence is a torn read.
//! In vanilla mode the copy is done one byte at a time with a delay per byte,
//! so readers regularly see a new prefix glued to an old suffix.

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use rwsync_core::Mode;

use crate::harness::{Ctx, Workload};
use crate::task::Task;
use crate::tlog;

/// Buffer size including the terminator.
pub const CAPACITY: usize = 256;

/// Buffer contents before any writer ran.
pub const INITIAL: &str = "Initial string content.";

/// Per-byte delay of the vanilla copy.
const BYTE_DELAY: Duration = Duration::from_micros(100);

/// Sentences writers cycle through. Lengths vary wildly on purpose.
pub const SENTENCES: [&str; 20] = [
    "A",
    "Hello World!",
    "The quick brown fox jumps over the lazy dog.",
    "Operating systems manage hardware and software resources.",
    "X",
    "Synchronization prevents race conditions in concurrent programs.",
    "Readers and writers must coordinate access to shared data.",
    "Race!",
    "Mutual exclusion ensures only one writer at a time.",
    "Pthread library provides powerful threading primitives.",
    "Concurrency bugs are difficult to reproduce and debug consistently.",
    "AB",
    "Memory barriers ensure proper ordering of operations across cores.",
    "Deadlock occurs when threads wait indefinitely for each other.",
    "Test",
    "Lock-free data structures use atomic operations for synchronization.",
    "Thread pools improve performance by reusing worker threads efficiently.",
    "!",
    "Context switching between threads has performance overhead costs.",
    "Critical sections must be kept as short as possible for efficiency.",
];

/// Returns `true` if `s` is a complete state a writer could have left.
pub fn is_complete(s: &str) -> bool {
    s == INITIAL || SENTENCES.contains(&s)
}

/// A fixed-size NUL-terminated byte string.
pub struct SharedText {
    bytes: [AtomicU8; CAPACITY],
}

impl SharedText {
    /// Creates a buffer holding `initial` (truncated to fit).
    pub fn new(initial: &str) -> Self {
        let text = Self {
            bytes: [const { AtomicU8::new(0) }; CAPACITY],
        };
        text.store(initial, None);
        text
    }

    /// Copies `s` in, followed by the terminator. With `step_delay`, sleeps
    /// after every byte.
    pub fn store(&self, s: &str, step_delay: Option<Duration>) {
        let src = &s.as_bytes()[..s.len().min(CAPACITY - 1)];
        for (slot, &b) in self.bytes.iter().zip(src) {
            slot.store(b, Ordering::Relaxed);
            if let Some(d) = step_delay {
                std::thread::sleep(d);
            }
        }
        self.bytes[src.len()].store(0, Ordering::Relaxed);
    }

    /// Copies the contents out up to the first terminator.
    pub fn load(&self) -> String {
        let out: Vec<u8> = self
            .bytes
            .iter()
            .take(CAPACITY - 1)
            .map(|b| b.load(Ordering::Relaxed))
            .take_while(|&b| b != 0)
            .collect();
        String::from_utf8_lossy(&out).into_owned()
    }
}

/// The shared-text workload.
pub struct TextDemo {
    text: SharedText,
    reads: AtomicU64,
    writes: AtomicU64,
    torn: AtomicU64,
}

/// Summary of a text run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextReport {
    /// Buffer contents after the run.
    pub final_text: String,
    /// Completed reads.
    pub reads: u64,
    /// Completed writes.
    pub writes: u64,
    /// Reads that matched no complete state.
    pub torn_reads: u64,
}

impl TextDemo {
    /// Creates the workload with [`INITIAL`] in the buffer.
    pub fn new() -> Self {
        Self {
            text: SharedText::new(INITIAL),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            torn: AtomicU64::new(0),
        }
    }

    /// Returns the counts gathered so far.
    pub fn report(&self) -> TextReport {
        TextReport {
            final_text: self.text.load(),
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            torn_reads: self.torn.load(Ordering::Relaxed),
        }
    }
}

impl Default for TextDemo {
    fn default() -> Self {
        Self::new()
    }
}

impl Workload for TextDemo {
    /// Index of the next sentence.
    type WriterState = usize;
    type Item = &'static str;
    type Observation = String;

    fn writer_state(&self, _task: Task, _writers: usize) -> usize {
        0
    }

    fn next_item(&self, next: &mut usize) -> Option<&'static str> {
        let sentence = SENTENCES[*next];
        *next = (*next + 1) % SENTENCES.len();
        Some(sentence)
    }

    fn write(&self, ctx: &Ctx<'_>, sentence: &'static str) {
        let step = (ctx.mode == Mode::Unsynchronized).then_some(BYTE_DELAY);
        self.text.store(sentence, step);
        self.writes.fetch_add(1, Ordering::Relaxed);
        tlog!(ctx.logger, ctx.task, "wrote: \"{sentence}\"");
    }

    fn read(&self, _ctx: &Ctx<'_>) -> String {
        self.text.load()
    }

    fn observed(&self, ctx: &Ctx<'_>, value: String) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        if !is_complete(&value) {
            self.torn.fetch_add(1, Ordering::Relaxed);
        }
        tlog!(ctx.logger, ctx.task, "read: \"{value}\"");
    }
}
