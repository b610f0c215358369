//! Simulated append-only log file.
//!
//! Writers append `[Writer W<id>] Log entry #<n>` lines to a fixed-capacity
//! buffer; readers take a snapshot and count its lines. A snapshot that ends
//! mid-line or holds a malformed line is torn. The vanilla append advances
//! the length one byte at a time, so concurrent appenders interleave.

use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use super::race_window;
use crate::harness::{Ctx, Workload};
use crate::task::Task;
use crate::tlog;

/// Buffer capacity in bytes.
pub const CAPACITY: usize = 4096;

/// Bytes shown by [`FileReport::tail`].
const TAIL_LEN: usize = 200;

const BYTE_DELAY: Duration = Duration::from_micros(50);

/// Formats entry `n` of writer `id`, newline included.
pub fn entry(id: usize, n: u64) -> String {
    format!("[Writer W{id}] Log entry #{n}\n")
}

/// Returns `true` if `line` (without its newline) is a well-formed entry.
pub fn is_entry(line: &str) -> bool {
    let Some(rest) = line.strip_prefix("[Writer W") else {
        return false;
    };
    let Some((id, n)) = rest.split_once("] Log entry #") else {
        return false;
    };
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    digits(id) && digits(n)
}

/// Number of newline characters in `bytes`.
pub fn count_lines(bytes: &[u8]) -> usize {
    bytes.iter().filter(|&&b| b == b'\n').count()
}

/// Returns `true` if `snapshot` is a sequence of whole, well-formed entries.
pub fn is_consistent(snapshot: &[u8]) -> bool {
    if snapshot.last().is_some_and(|&b| b != b'\n') {
        return false;
    }
    let Ok(text) = std::str::from_utf8(snapshot) else {
        return false;
    };
    text.lines().all(is_entry)
}

/// Fixed-capacity byte buffer with a separately stored length.
pub struct AppendLog {
    bytes: [AtomicU8; CAPACITY],
    len: AtomicUsize,
}

impl AppendLog {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self {
            bytes: [const { AtomicU8::new(0) }; CAPACITY],
            len: AtomicUsize::new(0),
        }
    }

    /// Current length in bytes.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed).min(CAPACITY)
    }

    /// Returns `true` if nothing has been appended.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends `line` and returns the new length, or `None` if it does not
    /// fit. One byte is always kept free.
    ///
    /// With `step_delay`, the length is re-read and bumped per byte with a
    /// sleep in between.
    pub fn append(&self, line: &[u8], step_delay: Option<Duration>) -> Option<usize> {
        let len = self.len.load(Ordering::Relaxed);
        if len + line.len() >= CAPACITY {
            return None;
        }
        match step_delay {
            None => {
                for (slot, &b) in self.bytes[len..].iter().zip(line) {
                    slot.store(b, Ordering::Relaxed);
                }
                self.len.store(len + line.len(), Ordering::Relaxed);
            }
            Some(delay) => {
                for &b in line {
                    let at = self.len.load(Ordering::Relaxed);
                    let Some(slot) = self.bytes.get(at) else {
                        break;
                    };
                    slot.store(b, Ordering::Relaxed);
                    self.len.store(at + 1, Ordering::Relaxed);
                    std::thread::sleep(delay);
                }
            }
        }
        Some(self.len())
    }

    /// Copies out the first [`AppendLog::len`] bytes.
    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes[..self.len()]
            .iter()
            .map(|b| b.load(Ordering::Relaxed))
            .collect()
    }
}

impl Default for AppendLog {
    fn default() -> Self {
        Self::new()
    }
}

/// The file-append workload.
#[derive(Default)]
pub struct FileDemo {
    log: AppendLog,
    reads: AtomicU64,
    writes: AtomicU64,
    appended: AtomicU64,
    torn: AtomicU64,
}

/// Summary of a file run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReport {
    /// Writer cycles, including those that found the buffer full.
    pub writes: u64,
    /// Completed reads.
    pub reads: u64,
    /// Sum of the lengths of every successful append.
    pub appended_bytes: u64,
    /// Buffer length after the run.
    pub final_len: usize,
    /// Lines in the final buffer.
    pub final_lines: usize,
    /// Snapshots that were not whole, well-formed entries.
    pub torn_reads: u64,
    /// Whether the final buffer is whole, well-formed entries.
    pub consistent: bool,
    /// The last bytes of the buffer.
    pub tail: String,
}

/// A writer's entry counter.
#[derive(Debug, Clone, Copy)]
pub struct Appender {
    id: usize,
    entries: u64,
}

impl FileDemo {
    /// Creates the workload with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the counts gathered so far.
    pub fn report(&self) -> FileReport {
        let snapshot = self.log.snapshot();
        let tail_start = snapshot.len().saturating_sub(TAIL_LEN);
        FileReport {
            writes: self.writes.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            appended_bytes: self.appended.load(Ordering::Relaxed),
            final_len: snapshot.len(),
            final_lines: count_lines(&snapshot),
            torn_reads: self.torn.load(Ordering::Relaxed),
            consistent: is_consistent(&snapshot),
            tail: String::from_utf8_lossy(&snapshot[tail_start..]).into_owned(),
        }
    }
}

impl Workload for FileDemo {
    type WriterState = Appender;
    type Item = (u64, String);
    type Observation = Vec<u8>;

    fn writer_state(&self, task: Task, _writers: usize) -> Appender {
        Appender {
            id: task.id,
            entries: 0,
        }
    }

    fn next_item(&self, appender: &mut Appender) -> Option<(u64, String)> {
        appender.entries += 1;
        Some((appender.entries, entry(appender.id, appender.entries)))
    }

    fn write(&self, ctx: &Ctx<'_>, (n, line): (u64, String)) {
        let step = (!ctx.mode.is_synchronized()).then_some(BYTE_DELAY);
        match self.log.append(line.as_bytes(), step) {
            Some(len) => {
                self.appended.fetch_add(line.len() as u64, Ordering::Relaxed);
                tlog!(
                    ctx.logger,
                    ctx.task,
                    "appended entry #{n}, buffer now {len} bytes"
                );
            }
            None => tlog!(ctx.logger, ctx.task, "buffer full, cannot append"),
        }
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    fn read(&self, ctx: &Ctx<'_>) -> Vec<u8> {
        let len = self.log.len();
        // Gives a vanilla appender time to move the length under us.
        race_window(ctx.mode, BYTE_DELAY);
        let mut snapshot = self.log.snapshot();
        snapshot.truncate(len);
        snapshot
    }

    fn observed(&self, ctx: &Ctx<'_>, snapshot: Vec<u8>) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        if !is_consistent(&snapshot) {
            self.torn.fetch_add(1, Ordering::Relaxed);
        }
        tlog!(
            ctx.logger,
            ctx.task,
            "read snapshot: {} bytes, {} lines",
            snapshot.len(),
            count_lines(&snapshot)
        );
    }

    fn writer_finished(&self, ctx: &Ctx<'_>, appender: &Appender) {
        tlog!(
            ctx.logger,
            ctx.task,
            "finished, wrote {} entries",
            appender.entries
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_format() {
        assert_eq!(entry(3, 12), "[Writer W3] Log entry #12\n");
        assert!(is_entry("[Writer W3] Log entry #12"));
        assert!(!is_entry("[Writer W3] Log entr"));
        assert!(!is_entry("[Writer W] Log entry #1"));
        assert!(!is_entry("[Writer W1] Log entry #1[Writer W2] Log entry #1"));
    }

    #[test]
    fn append_and_snapshot() {
        let log = AppendLog::new();
        assert!(log.is_empty());
        let a = entry(1, 1);
        let b = entry(2, 1);
        assert_eq!(log.append(a.as_bytes(), None), Some(a.len()));
        assert_eq!(log.append(b.as_bytes(), None), Some(a.len() + b.len()));

        let snap = log.snapshot();
        assert_eq!(count_lines(&snap), 2);
        assert!(is_consistent(&snap));
    }

    #[test]
    fn stepped_append_matches_plain_append() {
        let log = AppendLog::new();
        let line = entry(7, 3);
        log.append(line.as_bytes(), Some(Duration::ZERO));
        assert_eq!(log.snapshot(), line.as_bytes());
    }

    #[test]
    fn full_buffer_rejects_append() {
        let log = AppendLog::new();
        let line = entry(1, 1);
        let mut appended = 0;
        while log.append(line.as_bytes(), None).is_some() {
            appended += line.len();
        }
        assert_eq!(log.len(), appended);
        assert!(appended < CAPACITY);
        assert!(appended + line.len() >= CAPACITY);
    }

    #[test]
    fn partial_line_is_inconsistent() {
        assert!(is_consistent(b""));
        assert!(!is_consistent(b"[Writer W1] Log entry #1\n[Writer W2] Lo"));
        assert!(!is_consistent(b"[Writer W1] Log [Writer W2] Log entry #1\n"));
    }

    #[test]
    fn report_tail_is_bounded() {
        let demo = FileDemo::new();
        for n in 1..=20 {
            demo.log.append(entry(1, n).as_bytes(), None);
        }
        let report = demo.report();
        assert_eq!(report.tail.len(), TAIL_LEN);
        assert!(report.tail.ends_with("#20\n"));
        assert_eq!(report.final_lines, 20);
        assert!(report.consistent);
    }
}
