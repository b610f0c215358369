//! Post-run trace analysis.
//!
//! Reads the output of a `text` or `prime` run (trace lines plus the final
//! report) and lists the evidence of races it contains: torn reads for the
//! shared text, lost increments for the prime counter.
//!
//! [`survey`] does the same for a directory of saved runs and tallies how
//! many runs of each demo and mode came out clean.

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use rwsync_core::Mode;

use crate::demo::text;
use crate::task::{Role, Task};

/// Which demo produced a log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogKind {
    /// Output of `rwsync text`.
    Text,
    /// Output of `rwsync prime`.
    Prime,
}

/// Error returned when parsing an unknown [`LogKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownKind(pub String);

impl fmt::Display for UnknownKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown log kind `{}` (expected text or prime)", self.0)
    }
}

impl std::error::Error for UnknownKind {}

impl FromStr for LogKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "prime" => Ok(Self::Prime),
            other => Err(UnknownKind(other.to_owned())),
        }
    }
}

// ---------------------------------------------------------------------------
// Trace lines
// ---------------------------------------------------------------------------

/// One parsed `[HH:MM:SS.mmm] [R3] message` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceLine<'a> {
    /// The `HH:MM:SS.mmm` stamp.
    pub clock: &'a str,
    /// The task that logged the line.
    pub task: Task,
    /// Everything after the task tag.
    pub message: &'a str,
}

impl<'a> TraceLine<'a> {
    /// Parses a trace line, returning `None` for anything else (banners,
    /// report lines, blank lines).
    pub fn parse(line: &'a str) -> Option<Self> {
        let rest = line.strip_prefix('[')?;
        let (clock, rest) = rest.split_once("] [")?;
        if clock.len() != 12 || !clock.bytes().all(|b| b.is_ascii_digit() || b == b':' || b == b'.') {
            return None;
        }
        let (tag, message) = rest.split_once("] ")?;
        let mut chars = tag.chars();
        let role = Role::from_tag(chars.next()?)?;
        let id = chars.as_str().parse().ok()?;
        Some(Self {
            clock,
            task: Task { role, id },
            message,
        })
    }
}

// ---------------------------------------------------------------------------
// Findings
// ---------------------------------------------------------------------------

/// Evidence of a race in a log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finding {
    /// A reader saw a value no writer ever left behind.
    TornRead {
        /// 1-based line number.
        line: usize,
        /// Task that read the value.
        task: Task,
        /// The value read.
        value: String,
    },
    /// The prime counter ended below the expected count.
    LostUpdates {
        /// 1-based line number of the `Final prime count` line.
        line: usize,
        /// Counter value reported.
        final_count: u64,
        /// Count the writers should have reached.
        expected: u64,
    },
}

impl Finding {
    /// Short label for the finding's kind.
    pub fn label(&self) -> &'static str {
        match self {
            Self::TornRead { .. } => "TORN READ",
            Self::LostUpdates { .. } => "LOST UPDATES",
        }
    }

    /// 1-based line the finding refers to.
    pub fn line(&self) -> usize {
        match self {
            Self::TornRead { line, .. } | Self::LostUpdates { line, .. } => *line,
        }
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TornRead { task, value, .. } => write!(f, "{task} read \"{value}\""),
            Self::LostUpdates {
                final_count,
                expected,
                ..
            } => {
                let lost = expected.saturating_sub(*final_count);
                #[allow(clippy::cast_precision_loss)]
                let pct = if *expected == 0 {
                    0.0
                } else {
                    lost as f64 * 100.0 / *expected as f64
                };
                write!(f, "lost {lost} updates ({pct:.1}% loss)")
            }
        }
    }
}

/// Result of analyzing one log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Analysis {
    /// Trace lines recognized.
    pub trace_lines: usize,
    /// Everything suspicious, in line order.
    pub findings: Vec<Finding>,
}

impl Analysis {
    /// Returns `true` if nothing suspicious was found.
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    /// Torn reads plus lost increments.
    pub fn errors(&self) -> u64 {
        self.findings
            .iter()
            .map(|finding| match finding {
                Finding::TornRead { .. } => 1,
                Finding::LostUpdates {
                    final_count,
                    expected,
                    ..
                } => expected.abs_diff(*final_count),
            })
            .sum()
    }
}

/// Analyzes a log of the given kind.
///
/// # Errors
///
/// Fails if reading from `input` fails.
pub fn analyze(kind: LogKind, input: impl BufRead) -> Result<Analysis> {
    let mut analysis = Analysis::default();
    let mut final_count: Option<(usize, u64)> = None;

    for (idx, line) in input.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read line {}", idx + 1))?;
        let number = idx + 1;

        if let Some(trace) = TraceLine::parse(&line) {
            analysis.trace_lines += 1;
            if kind == LogKind::Text {
                if let Some(finding) = torn_read(number, &trace) {
                    analysis.findings.push(finding);
                }
            }
            continue;
        }

        if kind == LogKind::Prime {
            if let Some(n) = report_value(&line, "Final prime count:") {
                final_count = Some((number, n));
            } else if let Some(expected) = report_value(&line, "Expected prime count:") {
                if let Some((line, final_count)) = final_count.take() {
                    if final_count != expected {
                        analysis.findings.push(Finding::LostUpdates {
                            line,
                            final_count,
                            expected,
                        });
                    }
                }
            }
        }
    }

    Ok(analysis)
}

// ---------------------------------------------------------------------------
// Multi-run survey
// ---------------------------------------------------------------------------

/// A saved run's file name: `v1_<mode>_run<N>_<session>.txt` for prime
/// counter output, `v2_...` for shared text output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogName {
    /// Demo that produced the log.
    pub kind: LogKind,
    /// Mode the run used.
    pub mode: Mode,
    /// Run number within the session.
    pub run: u32,
    /// Session identifier.
    pub session: String,
}

impl LogName {
    /// Parses a file name, returning `None` if it does not follow the
    /// naming scheme.
    pub fn parse(file_name: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(".txt")?;
        let parts: Vec<&str> = stem.split('_').collect();
        let kind = match *parts.first()? {
            "v1" => LogKind::Prime,
            "v2" => LogKind::Text,
            _ => return None,
        };
        // Mode names contain underscores, so the mode is everything
        // between the version and the first `runN` part.
        let run_at = parts.iter().position(|part| {
            part.strip_prefix("run")
                .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
        })?;
        let mode = parts.get(1..run_at)?.join("_").parse().ok()?;
        let run = parts[run_at]["run".len()..].parse().ok()?;
        let session = parts[run_at + 1..].join("_");
        if session.is_empty() {
            return None;
        }
        Some(Self {
            kind,
            mode,
            run,
            session,
        })
    }
}

/// Clean and dirty run counts for one demo under one mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    /// Runs recorded.
    pub runs: usize,
    /// Runs with no findings.
    pub clean: usize,
    /// Torn reads or lost updates, summed over the dirty runs.
    pub errors: u64,
}

impl Tally {
    /// Runs with at least one finding.
    pub fn dirty(&self) -> usize {
        self.runs - self.clean
    }

    /// Mean error count per dirty run, or 0 if every run was clean.
    #[allow(clippy::cast_precision_loss)]
    pub fn average_errors(&self) -> f64 {
        if self.dirty() == 0 {
            0.0
        } else {
            self.errors as f64 / self.dirty() as f64
        }
    }

    /// Unsynchronized runs must race at least once; synchronized runs
    /// must never race.
    pub fn as_expected(&self, mode: Mode) -> bool {
        if mode.is_synchronized() {
            self.clean == self.runs
        } else {
            self.clean < self.runs
        }
    }
}

/// Per-demo, per-mode results over many saved runs.
#[derive(Debug, Clone, Default)]
pub struct Survey {
    /// Session the runs were filtered to, if any.
    pub session: Option<String>,
    /// Runs recorded across all demos and modes.
    pub total_runs: usize,
    tallies: HashMap<(LogKind, Mode), Tally>,
}

impl Survey {
    /// Creates an empty survey.
    pub fn new(session: Option<&str>) -> Self {
        Self {
            session: session.map(str::to_owned),
            ..Self::default()
        }
    }

    /// Adds the analysis of one run.
    pub fn record(&mut self, name: &LogName, analysis: &Analysis) {
        let tally = self.tallies.entry((name.kind, name.mode)).or_default();
        tally.runs += 1;
        if analysis.is_clean() {
            tally.clean += 1;
        } else {
            tally.errors += analysis.errors();
        }
        self.total_runs += 1;
    }

    /// Returns the tally for `kind` under `mode`, if any run was recorded.
    pub fn tally(&self, kind: LogKind, mode: Mode) -> Option<Tally> {
        self.tallies.get(&(kind, mode)).copied()
    }

    /// Returns `true` if every recorded mode behaved as it should.
    pub fn as_expected(&self) -> bool {
        self.tallies
            .iter()
            .all(|(&(_, mode), tally)| tally.as_expected(mode))
    }
}

impl fmt::Display for Survey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(70);
        let thin = "-".repeat(70);

        writeln!(f, "{rule}")?;
        writeln!(f, "READER-WRITER PROBLEM - COMPREHENSIVE TEST RESULTS")?;
        writeln!(f, "{rule}\n")?;
        writeln!(
            f,
            "Session ID: {}",
            self.session.as_deref().unwrap_or("(all)")
        )?;
        writeln!(f, "Total Runs: {}\n", self.total_runs)?;

        let sections = [
            (
                LogKind::Prime,
                "VERSION 1: Prime Counter (Lost Updates Detection)",
                "lost updates",
                1_usize,
            ),
            (
                LogKind::Text,
                "VERSION 2: Shared String (Torn Reads Detection)",
                "torn reads",
                0,
            ),
        ];
        for (kind, title, unit, precision) in sections {
            writeln!(f, "{thin}\n{title}\n{thin}\n")?;
            for mode in Mode::ALL {
                let Some(tally) = self.tally(kind, mode) else {
                    continue;
                };
                let status = if tally.dirty() == 0 { '✓' } else { '✗' };
                write!(
                    f,
                    "{status} {:<15} : {}/{} runs clean",
                    mode.name(),
                    tally.clean,
                    tally.runs
                )?;
                if tally.dirty() > 0 {
                    write!(f, "  (avg {:.*} {unit})", precision, tally.average_errors())?;
                }
                writeln!(f)?;
            }
            writeln!(f)?;
        }

        writeln!(f, "{rule}\nSUMMARY\n{rule}\n")?;
        writeln!(f, "Expected Results:")?;
        for mode in Mode::ALL {
            let expected = if mode.is_synchronized() {
                "✓ (should be clean)"
            } else {
                "✗ (should have race conditions)"
            };
            writeln!(f, "  {:<14}: {expected}", mode.name())?;
        }
        writeln!(f)?;
        if self.as_expected() {
            writeln!(f, "✓ All tests behaved as expected!")?;
        } else {
            writeln!(f, "⚠ Some unexpected results detected.")?;
        }
        write!(f, "\n{rule}\n")
    }
}

/// Analyzes every saved run in `dir` whose name parses as a [`LogName`],
/// keeping only `session`'s runs if one is given.
///
/// # Errors
///
/// Fails if `dir` or one of its logs cannot be read, or if no log matches.
pub fn survey(dir: &Path, session: Option<&str>) -> Result<Survey> {
    let mut logs = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))? {
        let entry = entry?;
        let Some(name) = entry.file_name().to_str().and_then(LogName::parse) else {
            continue;
        };
        if session.is_some_and(|id| id != name.session) {
            continue;
        }
        logs.push((entry.path(), name));
    }
    if logs.is_empty() {
        match session {
            Some(id) => bail!("no log files found for session {id} in {}", dir.display()),
            None => bail!("no log files found in {}", dir.display()),
        }
    }
    logs.sort_by(|a, b| a.0.cmp(&b.0));

    let mut survey = Survey::new(session);
    for (path, name) in logs {
        let file =
            File::open(&path).with_context(|| format!("failed to open {}", path.display()))?;
        let analysis = analyze(name.kind, BufReader::new(file))
            .with_context(|| format!("failed to analyze {}", path.display()))?;
        survey.record(&name, &analysis);
    }
    Ok(survey)
}

fn torn_read(number: usize, trace: &TraceLine<'_>) -> Option<Finding> {
    if trace.task.role != Role::Reader {
        return None;
    }
    let quoted = trace.message.strip_prefix("read: \"")?.strip_suffix('"')?;
    (!text::is_complete(quoted)).then(|| Finding::TornRead {
        line: number,
        task: trace.task,
        value: quoted.to_owned(),
    })
}

fn report_value(line: &str, key: &str) -> Option<u64> {
    line.trim().strip_prefix(key)?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_trace_line() {
        let t = TraceLine::parse("[13:07:05.042] [W12] wrote: \"A\"").unwrap();
        assert_eq!(t.clock, "13:07:05.042");
        assert_eq!(t.task, Task::writer(12));
        assert_eq!(t.message, "wrote: \"A\"");
    }

    #[test]
    fn non_trace_lines_are_skipped() {
        assert!(TraceLine::parse("=== Final Results ===").is_none());
        assert!(TraceLine::parse("").is_none());
        assert!(TraceLine::parse("[13:07:05.042] [X1] nope").is_none());
        assert!(TraceLine::parse("[Writer W1] Log entry #1").is_none());
    }

    #[test]
    fn torn_reads_are_reported() {
        let log = "\
=== Shared String - Reader-Writer Problem ===
[10:00:00.000] [R1] started
[10:00:00.001] [R1] read: \"Initial string content.\"
[10:00:00.002] [W1] wrote: \"Hello World!\"
[10:00:00.003] [R2] read: \"Hello World!ontent.\"
[10:00:00.004] [R1] read: \"Hello World!\"
";
        let a = analyze(LogKind::Text, log.as_bytes()).unwrap();
        assert_eq!(a.trace_lines, 5);
        assert_eq!(
            a.findings,
            [Finding::TornRead {
                line: 5,
                task: Task::reader(2),
                value: "Hello World!ontent.".into(),
            }]
        );
    }

    #[test]
    fn lost_updates_are_reported() {
        let log = "\
[10:00:00.000] [W1] found prime 2, count = 1
=== Final Results ===
Final prime count: 150
Expected prime count: 168
";
        let a = analyze(LogKind::Prime, log.as_bytes()).unwrap();
        assert_eq!(a.findings.len(), 1);
        assert_eq!(a.findings[0].line(), 3);
        assert_eq!(a.findings[0].label(), "LOST UPDATES");
        assert_eq!(a.findings[0].to_string(), "lost 18 updates (10.7% loss)");
    }

    #[test]
    fn correct_count_is_clean() {
        let log = "Final prime count: 168\nExpected prime count: 168\n";
        assert!(analyze(LogKind::Prime, log.as_bytes()).unwrap().is_clean());
    }

    #[test]
    fn kind_from_str() {
        assert_eq!("text".parse(), Ok(LogKind::Text));
        assert_eq!("prime".parse(), Ok(LogKind::Prime));
        assert!("file".parse::<LogKind>().is_err());
    }

    #[test]
    fn errors_count_torn_reads_and_lost_increments() {
        let log = "Final prime count: 150\nExpected prime count: 168\n";
        assert_eq!(analyze(LogKind::Prime, log.as_bytes()).unwrap().errors(), 18);
        let log = "[10:00:00.000] [R1] read: \"Xello World!\"\n\
                   [10:00:00.001] [R2] read: \"Hello World!ontent.\"\n";
        assert_eq!(analyze(LogKind::Text, log.as_bytes()).unwrap().errors(), 2);
    }

    #[test]
    fn log_names() {
        assert_eq!(
            LogName::parse("v1_reader_pref_run3_20240501.txt"),
            Some(LogName {
                kind: LogKind::Prime,
                mode: Mode::ReaderPreference,
                run: 3,
                session: "20240501".into(),
            })
        );
        let name = LogName::parse("v2_vanilla_run12_a_b.txt").unwrap();
        assert_eq!((name.kind, name.mode, name.run), (LogKind::Text, Mode::Unsynchronized, 12));
        assert_eq!(name.session, "a_b");
    }

    #[test]
    fn foreign_names_are_ignored() {
        for name in [
            "results_S.txt",
            "v3_fair_run1_S.txt",
            "v1_sloppy_run1_S.txt",
            "v1_fair_run1_S.log",
            "v1_fair_run1.txt",
            "v1_run1_S.txt",
            "v2_fair_runs_S.txt",
        ] {
            assert_eq!(LogName::parse(name), None, "{name}");
        }
    }

    const CLEAN_TEXT: &str = "\
[10:00:00.000] [W1] wrote: \"Hello World!\"
[10:00:00.001] [R1] read: \"Hello World!\"
";
    const TORN_TEXT: &str = "\
[10:00:00.000] [W1] wrote: \"A\"
[10:00:00.001] [R1] read: \"Aello World!\"
[10:00:00.002] [R2] read: \"A\"
";

    fn record(survey: &mut Survey, file_name: &str, kind: LogKind, log: &str) {
        let name = LogName::parse(file_name).unwrap();
        survey.record(&name, &analyze(kind, log.as_bytes()).unwrap());
    }

    #[test]
    fn survey_expects_vanilla_to_race() {
        let mut survey = Survey::new(Some("S"));
        record(&mut survey, "v2_fair_run1_S.txt", LogKind::Text, CLEAN_TEXT);
        record(&mut survey, "v2_vanilla_run1_S.txt", LogKind::Text, TORN_TEXT);
        record(&mut survey, "v2_vanilla_run2_S.txt", LogKind::Text, CLEAN_TEXT);
        record(
            &mut survey,
            "v1_vanilla_run1_S.txt",
            LogKind::Prime,
            "Final prime count: 150\nExpected prime count: 168\n",
        );

        assert_eq!(
            survey.tally(LogKind::Text, Mode::Unsynchronized),
            Some(Tally {
                runs: 2,
                clean: 1,
                errors: 1,
            })
        );
        assert!(survey.as_expected());

        let report = survey.to_string();
        assert!(report.contains("Session ID: S\nTotal Runs: 4\n"), "{report}");
        assert!(report.contains("✗ vanilla         : 0/1 runs clean  (avg 18.0 lost updates)\n"));
        assert!(report.contains("✓ fair            : 1/1 runs clean\n"));
        assert!(report.contains("✗ vanilla         : 1/2 runs clean  (avg 1 torn reads)\n"));
        assert!(!report.contains("reader_pref     :"));
        assert!(report.contains("✓ All tests behaved as expected!"));
    }

    #[test]
    fn survey_flags_unexpected_results() {
        let mut survey = Survey::new(None);
        record(&mut survey, "v2_writer_pref_run1_S.txt", LogKind::Text, TORN_TEXT);
        assert!(!survey.as_expected());
        assert!(survey.to_string().contains("⚠ Some unexpected results detected."));

        // A vanilla run that never raced is just as surprising.
        let mut survey = Survey::new(None);
        record(&mut survey, "v2_vanilla_run1_S.txt", LogKind::Text, CLEAN_TEXT);
        assert!(!survey.as_expected());
    }

    #[test]
    fn survey_reads_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let write = |name: &str, contents: &str| fs::write(dir.path().join(name), contents).unwrap();
        write("v2_fair_run1_S.txt", CLEAN_TEXT);
        write("v2_vanilla_run1_S.txt", TORN_TEXT);
        write("v2_fair_run1_OTHER.txt", TORN_TEXT);
        write("results_S.txt", "not a run");

        let session = survey(dir.path(), Some("S")).unwrap();
        assert_eq!(session.total_runs, 2);
        assert!(session.as_expected());

        let everything = survey(dir.path(), None).unwrap();
        assert_eq!(everything.total_runs, 3);
        assert!(!everything.as_expected());

        let err = survey(dir.path(), Some("NONE")).unwrap_err();
        assert!(err.to_string().contains("no log files found for session NONE"));
    }
}
