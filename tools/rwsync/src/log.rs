//! Timestamped, line-serialized trace output.
//!
//! Provides [`tlog!`](crate::tlog) / [`vtlog!`](crate::vtlog) for per-task
//! trace lines of the form
//!
//! ```text
//! [HH:MM:SS.mmm] [R3] read: "Hello World!"
//! ```
//!
//! and [`Logger::banner`] for unprefixed headers and reports. Every line is
//! formatted up front and written under one lock, so lines from concurrent
//! tasks never interleave.

use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};
use chrono::{DateTime, Local, TimeZone};

use crate::task::Task;

// ---------------------------------------------------------------------------
// Verbosity
// ---------------------------------------------------------------------------

/// Output verbosity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    /// Banners and the final report only.
    Quiet = 0,
    /// Per-cycle trace lines.
    Default = 1,
    /// Adds enter/exit lines around every critical section.
    Verbose = 2,
}

impl Verbosity {
    /// Picks the level from the `-q` / `-v` flags.
    pub fn from_flags(quiet: bool, verbose: bool) -> Self {
        if quiet {
            Self::Quiet
        } else if verbose {
            Self::Verbose
        } else {
            Self::Default
        }
    }
}

// ---------------------------------------------------------------------------
// Logger
// ---------------------------------------------------------------------------

/// A line-serializing trace sink shared by all tasks.
pub struct Logger {
    sink: Mutex<Box<dyn Write + Send>>,
    verbosity: Verbosity,
}

impl Logger {
    /// Creates a logger writing to standard output.
    pub fn stdout(verbosity: Verbosity) -> Self {
        Self::to_writer(io::stdout(), verbosity)
    }

    /// Creates a logger writing to `writer`.
    pub fn to_writer(writer: impl Write + Send + 'static, verbosity: Verbosity) -> Self {
        Self {
            sink: Mutex::new(Box::new(writer)),
            verbosity,
        }
    }

    /// Creates a logger writing to an in-memory buffer, returning both.
    pub fn memory(verbosity: Verbosity) -> (Self, MemorySink) {
        let sink = MemorySink::default();
        (Self::to_writer(sink.clone(), verbosity), sink)
    }

    /// Returns the configured verbosity.
    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    /// Returns `true` if lines at `level` are emitted.
    pub fn enabled(&self, level: Verbosity) -> bool {
        level <= self.verbosity
    }

    /// Writes one trace line for `task` if `level` is enabled.
    pub fn log(&self, level: Verbosity, task: Task, args: fmt::Arguments<'_>) {
        if !self.enabled(level) {
            return;
        }
        let line = format!("[{}] [{task}] {args}\n", clock(&Local::now()));
        self.write_line(&line);
    }

    /// Writes an unprefixed line regardless of verbosity.
    pub fn banner(&self, args: fmt::Arguments<'_>) {
        self.write_line(&format!("{args}\n"));
    }

    fn write_line(&self, line: &str) {
        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        // A broken pipe on stdout must not take the run down with it.
        let _ = sink.write_all(line.as_bytes());
        let _ = sink.flush();
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("verbosity", &self.verbosity)
            .finish_non_exhaustive()
    }
}

/// Formats the time of day of `now`, in its own zone, as `HH:MM:SS.mmm`.
pub fn clock<Tz: TimeZone>(now: &DateTime<Tz>) -> String
where
    Tz::Offset: fmt::Display,
{
    now.format("%H:%M:%S%.3f").to_string()
}

/// Logs a trace line for a task at default verbosity.
///
/// ```ignore
/// tlog!(logger, task, "read: \"{}\"", value);
/// ```
#[macro_export]
macro_rules! tlog {
    ($logger:expr, $task:expr, $($arg:tt)*) => {
        $logger.log($crate::log::Verbosity::Default, $task, format_args!($($arg)*))
    };
}

/// Logs a trace line for a task only in verbose mode.
#[macro_export]
macro_rules! vtlog {
    ($logger:expr, $task:expr, $($arg:tt)*) => {
        $logger.log($crate::log::Verbosity::Verbose, $task, format_args!($($arg)*))
    };
}

// ---------------------------------------------------------------------------
// In-memory sink
// ---------------------------------------------------------------------------

/// A cloneable in-memory writer, used to capture traces in tests.
#[derive(Clone, Default)]
pub struct MemorySink(Arc<Mutex<Vec<u8>>>);

impl MemorySink {
    /// Returns everything written so far.
    pub fn contents(&self) -> String {
        let buf = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&buf).into_owned()
    }
}

impl Write for MemorySink {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, NaiveDate, Utc};
    use std::thread;

    fn afternoon() -> DateTime<Utc> {
        let naive = NaiveDate::from_ymd_opt(2024, 5, 1)
            .and_then(|d| d.and_hms_milli_opt(13, 7, 5, 42))
            .unwrap();
        Utc.from_utc_datetime(&naive)
    }

    #[test]
    fn clock_format() {
        assert_eq!(clock(&afternoon()), "13:07:05.042");
    }

    #[test]
    fn clock_follows_the_zone() {
        let tokyo = FixedOffset::east_opt(9 * 3600).unwrap();
        assert_eq!(clock(&afternoon().with_timezone(&tokyo)), "22:07:05.042");
        let past_midnight = FixedOffset::east_opt(11 * 3600).unwrap();
        assert_eq!(clock(&afternoon().with_timezone(&past_midnight)), "00:07:05.042");
    }

    #[test]
    fn lines_are_stamped_with_local_time() {
        let (logger, sink) = Logger::memory(Verbosity::Default);
        let before = Local::now();
        crate::tlog!(logger, Task::reader(1), "tick");
        let after = Local::now();

        let out = sink.contents();
        let stamp = &out[1..13];
        if before.date_naive() == after.date_naive() {
            assert!(clock(&before).as_str() <= stamp, "{stamp} before {before}");
            assert!(stamp <= clock(&after).as_str(), "{stamp} after {after}");
        }
    }

    #[test]
    fn line_shape() {
        let (logger, sink) = Logger::memory(Verbosity::Default);
        crate::tlog!(logger, Task::writer(2), "wrote: \"{}\"", "A");
        let out = sink.contents();
        assert!(out.starts_with('['));
        assert!(out.ends_with("] [W2] wrote: \"A\"\n"), "{out}");
        // "[HH:MM:SS.mmm]" is 14 characters.
        assert_eq!(&out[13..14], "]");
    }

    #[test]
    fn verbosity_filters() {
        let (logger, sink) = Logger::memory(Verbosity::Quiet);
        crate::tlog!(logger, Task::reader(1), "dropped");
        crate::vtlog!(logger, Task::reader(1), "dropped");
        logger.banner(format_args!("kept"));
        assert_eq!(sink.contents(), "kept\n");

        let (logger, sink) = Logger::memory(Verbosity::Verbose);
        crate::vtlog!(logger, Task::reader(1), "entering");
        assert!(sink.contents().contains("[R1] entering"));
    }

    #[test]
    fn concurrent_lines_never_merge() {
        let (logger, sink) = Logger::memory(Verbosity::Default);
        let logger = Arc::new(logger);
        let handles: Vec<_> = (1..=4)
            .map(|id| {
                let logger = Arc::clone(&logger);
                thread::spawn(move || {
                    for n in 0..50 {
                        crate::tlog!(logger, Task::reader(id), "line {n} of R{id}");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let out = sink.contents();
        assert_eq!(out.lines().count(), 200);
        for line in out.lines() {
            let (tag, rest) = line[15..].split_once("] ").unwrap();
            assert!(rest.ends_with(&format!("of {}", &tag[1..])), "{line}");
        }
    }
}
