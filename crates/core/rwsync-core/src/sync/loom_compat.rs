//! Concurrency-model compatibility shim.
//!
//! When compiled with `cfg(loom)`, re-exports loom's concurrency primitives.
//! When compiled with `cfg(shuttle)`, re-exports shuttle's. Otherwise,
//! re-exports the standard `std::sync` types.
//!
//! This allows the gate and the synchronizer to be tested under loom's
//! exhaustive scheduler or shuttle's randomized scheduler without code
//! changes.

// ---------------------------------------------------------------------------
// Loom mode
// ---------------------------------------------------------------------------

#[cfg(loom)]
pub(crate) use loom::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
#[cfg(loom)]
pub(crate) use loom::sync::{Condvar, Mutex};

// ---------------------------------------------------------------------------
// Shuttle mode
// ---------------------------------------------------------------------------

#[cfg(all(shuttle, not(loom)))]
pub(crate) use shuttle::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
#[cfg(all(shuttle, not(loom)))]
pub(crate) use shuttle::sync::{Condvar, Mutex};

// ---------------------------------------------------------------------------
// Normal mode
// ---------------------------------------------------------------------------

#[cfg(not(any(loom, shuttle)))]
pub(crate) use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
#[cfg(not(any(loom, shuttle)))]
pub(crate) use std::sync::{Condvar, Mutex};

/// Number of test-and-test-and-set rounds before a gate parks its caller.
///
/// Model checkers explore every spin iteration as a separate schedule, so
/// spinning is disabled under them.
#[cfg(not(any(loom, shuttle)))]
pub(crate) const SPIN_LIMIT: u32 = 64;
#[cfg(any(loom, shuttle))]
pub(crate) const SPIN_LIMIT: u32 = 0;
