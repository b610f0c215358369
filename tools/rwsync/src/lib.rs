//! Reader-writer demonstration harness.
//!
//! Drives an [`RwSync`](rwsync_core::RwSync) with N reader and M writer
//! threads over one of three workloads:
//!
//! - [`demo::text`]: a shared sentence buffer (torn reads in vanilla mode),
//! - [`demo::prime`]: a shared prime counter (lost updates in vanilla mode),
//! - [`demo::file`]: a simulated append-only file (corrupted appends).
//!
//! Pipeline: parse CLI -> build [`RunConfig`](harness::RunConfig) ->
//!           [`harness::run`] -> workload report.

pub mod analyze;
pub mod cli;
pub mod demo;
pub mod harness;
pub mod log;
pub mod monitor;
pub mod task;
