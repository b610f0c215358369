//! rwsync command-line driver.
//!
//! Pipeline: parse flags -> print header -> [`harness::run`] -> print the
//! workload's report and the observer's counts.

use std::fs::{self, File};
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use clap::Parser;
use rwsync::analyze::{self, LogKind};
use rwsync::cli::{AnalyzeArgs, Cli, Command, PrimeArgs, RunArgs};
use rwsync::demo::file::{self, FileDemo};
use rwsync::demo::prime::PrimeDemo;
use rwsync::demo::text::TextDemo;
use rwsync::harness::{self, Pacing, RunConfig, RunLimit, RunReport};
use rwsync::log::{Logger, Verbosity};
use rwsync_core::Mode;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbosity = Verbosity::from_flags(cli.quiet, cli.verbose);

    match cli.command {
        Command::Text(ref args) => cmd_text(args, verbosity),
        Command::Prime(ref args) => cmd_prime(args, verbosity),
        Command::File(ref args) => cmd_file(args, verbosity),
        Command::Analyze(ref args) => cmd_analyze(args),
    }
}

// ===========================================================================
// Demos
// ===========================================================================

fn cmd_text(args: &RunArgs, verbosity: Verbosity) -> Result<()> {
    let logger = Arc::new(Logger::stdout(verbosity));
    let config = run_config(args, (3, 3), Pacing::millis(20..=60, 30..=100));

    logger.banner(format_args!("=== Shared String - Reader-Writer Problem ==="));
    header(&logger, &config, args.duration);
    if !config.mode.is_synchronized() {
        logger.banner(format_args!(
            "WARNING: vanilla mode - expect to see TORN READS (corrupted strings)!"
        ));
    }
    logger.banner(format_args!(""));

    let demo = Arc::new(TextDemo::new());
    let report = harness::run(Arc::clone(&demo), &config, Arc::clone(&logger))?;
    let text = demo.report();

    logger.banner(format_args!("\n=== Program Finished ==="));
    logger.banner(format_args!("Final shared string: \"{}\"", text.final_text));
    logger.banner(format_args!(
        "Reads: {}, Writes: {}, Torn reads: {}",
        text.reads, text.writes, text.torn_reads
    ));
    if text.torn_reads > 0 {
        logger.banner(format_args!(
            "RACE CONDITION DETECTED: {} reads saw a half-written string!",
            text.torn_reads
        ));
    }
    summary(&logger, &report);
    Ok(())
}

fn cmd_prime(args: &PrimeArgs, verbosity: Verbosity) -> Result<()> {
    let logger = Arc::new(Logger::stdout(verbosity));
    let mut config = run_config(&args.run, (5, 3), Pacing::millis(10..=50, 20..=80));
    if !config.mode.is_synchronized() {
        // Near back-to-back increments maximize contention.
        config.pacing.writer_us = 100..=100;
    }

    logger.banner(format_args!("=== Prime Counter - Reader-Writer Problem ==="));
    header(&logger, &config, args.run.duration);
    logger.banner(format_args!("Checking primes in range: [2, {})\n", args.range));

    let demo = Arc::new(PrimeDemo::new(args.range));
    let report = harness::run(Arc::clone(&demo), &config, Arc::clone(&logger))?;
    let prime = demo.report(config.writers);

    logger.banner(format_args!("\n=== Final Results ==="));
    logger.banner(format_args!("Final prime count: {}", prime.final_count));
    logger.banner(format_args!("Expected prime count: {}", prime.expected));
    if config.mode == Mode::Unsynchronized && !prime.is_correct() {
        logger.banner(format_args!(
            "RACE CONDITION DETECTED: lost updates due to no synchronization!"
        ));
    } else if prime.is_correct() {
        logger.banner(format_args!("✓ Count is correct!"));
    }
    summary(&logger, &report);
    Ok(())
}

fn cmd_file(args: &RunArgs, verbosity: Verbosity) -> Result<()> {
    let logger = Arc::new(Logger::stdout(verbosity));
    let config = run_config(args, (4, 4), Pacing::millis(40..=100, 30..=80));

    logger.banner(format_args!("=== File Simulation - Reader-Writer Problem ==="));
    header(&logger, &config, args.duration);
    logger.banner(format_args!("Buffer capacity: {} bytes", file::CAPACITY));
    if !config.mode.is_synchronized() {
        logger.banner(format_args!(
            "WARNING: vanilla mode - expect to see CORRUPTED DATA and INCONSISTENT LENGTH!"
        ));
    }
    logger.banner(format_args!(""));

    let demo = Arc::new(FileDemo::new());
    let report = harness::run(Arc::clone(&demo), &config, Arc::clone(&logger))?;
    let log = demo.report();

    logger.banner(format_args!("\n=== Final Results ==="));
    logger.banner(format_args!("Total write operations: {}", log.writes));
    logger.banner(format_args!("Total read operations: {}", log.reads));
    logger.banner(format_args!("Final buffer size: {} bytes", log.final_len));
    logger.banner(format_args!("Final line count: {}", log.final_lines));
    logger.banner(format_args!("Torn snapshots: {}", log.torn_reads));
    if !log.consistent || log.final_len as u64 != log.appended_bytes {
        logger.banner(format_args!(
            "RACE CONDITION DETECTED: buffer holds {} bytes, writers appended {}",
            log.final_len, log.appended_bytes
        ));
    }
    logger.banner(format_args!("\nLast 200 bytes of buffer:\n---"));
    logger.banner(format_args!("{}\n---", log.tail));
    summary(&logger, &report);
    Ok(())
}

/// Builds the run configuration, filling in the demo's default task counts.
fn run_config(args: &RunArgs, (readers, writers): (usize, usize), pacing: Pacing) -> RunConfig {
    RunConfig {
        mode: args.mode,
        readers: args.readers.unwrap_or(readers),
        writers: args.writers.unwrap_or(writers),
        limit: RunLimit::Duration(Duration::from_secs(args.duration)),
        pacing,
        seed: args.seed.unwrap_or_else(clock_seed),
    }
}

fn clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(1, |d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
}

fn header(logger: &Logger, config: &RunConfig, duration: u64) {
    logger.banner(format_args!("Mode: {}", config.mode));
    logger.banner(format_args!(
        "Readers: {}, Writers: {}, Duration: {duration} seconds",
        config.readers, config.writers
    ));
}

fn summary(logger: &Logger, report: &RunReport) {
    let m = &report.monitor;
    logger.banner(format_args!(
        "Critical sections: {} reader / {} writer, peak {} concurrent readers",
        m.reader_enters, m.writer_enters, m.max_readers
    ));
    if m.violations > 0 {
        logger.banner(format_args!(
            "Mutual exclusion violated {} times (mode {})",
            m.violations, report.mode
        ));
    }
    logger.banner(format_args!("Elapsed: {:.2?}", report.elapsed));
}

// ===========================================================================
// Analysis
// ===========================================================================

fn cmd_analyze(args: &AnalyzeArgs) -> Result<()> {
    let log = match (&args.log, &args.dir) {
        (_, Some(dir)) => return cmd_survey(dir, args),
        (Some(log), None) => log,
        (None, None) => bail!("expected a log file or --dir"),
    };
    let file = File::open(log).with_context(|| format!("failed to open {}", log.display()))?;
    let analysis = analyze::analyze(args.kind, BufReader::new(file))?;

    let kind = match args.kind {
        LogKind::Text => "shared string",
        LogKind::Prime => "prime counter",
    };
    println!("Type: {kind}");
    println!("File: {}", log.display());
    println!("Trace lines: {}", analysis.trace_lines);
    println!("Total errors found: {}", analysis.findings.len());

    if analysis.is_clean() {
        println!("\n✓ No race conditions detected!");
        return Ok(());
    }

    println!("\n{:<8} {:<14} Details", "Line", "Type");
    println!("{}", "-".repeat(72));
    for finding in analysis.findings.iter().take(50) {
        let mut details = finding.to_string();
        if details.chars().count() > 50 {
            details = details.chars().take(47).collect::<String>() + "...";
        }
        println!("{:<8} {:<14} {details}", finding.line(), finding.label());
    }
    if analysis.findings.len() > 50 {
        println!("\n... and {} more", analysis.findings.len() - 50);
    }
    Ok(())
}

fn cmd_survey(dir: &Path, args: &AnalyzeArgs) -> Result<()> {
    let survey = analyze::survey(dir, args.session.as_deref())?;
    println!("Found {} log files", survey.total_runs);
    println!("\n{survey}");
    if let Some(output) = &args.output {
        fs::write(output, survey.to_string())
            .with_context(|| format!("failed to write {}", output.display()))?;
        println!("Full report saved to: {}", output.display());
    }
    Ok(())
}
