//! Randomized delays for widening race windows.
//!
//! Provides a per-thread PRNG used by the demonstration harness for jittered
//! sleeps, and [`stress_delay`], which the [`Gate`](super::Gate) calls around
//! acquire and release when compiled with `--cfg rwsync_stress`.
//!
//! ## Design
//!
//! - **PRNG**: xorshift64, per-thread state in a `thread_local!` cell, no
//!   locking. Threads are seeded from a process-wide base seed plus a salt.
//! - **Delay**: spins for a random duration in `[0, max_us)` microseconds,
//!   measured with [`Instant`].

use std::cell::Cell;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Fallback seed; xorshift has a fixed point at zero.
const FALLBACK_SEED: u64 = 0xDEAD_BEEF_CAFE_BABE;

/// Maximum stress delay in microseconds. Set by [`init`].
static MAX_US: AtomicU32 = AtomicU32::new(10);

/// Base seed that per-thread seeds are derived from.
static BASE_SEED: AtomicU64 = AtomicU64::new(FALLBACK_SEED);

thread_local! {
    /// Per-thread xorshift64 state. Zero means "not seeded yet".
    static PRNG_STATE: Cell<u64> = const { Cell::new(0) };
}

// ---------------------------------------------------------------------------
// Initialization
// ---------------------------------------------------------------------------

/// Initializes the stress subsystem.
///
/// - `max_us`: maximum random delay of [`stress_delay`] in microseconds.
/// - `seed`: base PRNG seed. If 0, a fallback constant is used.
pub fn init(max_us: u32, seed: u64) {
    MAX_US.store(max_us, Ordering::Relaxed);
    let base = if seed == 0 { FALLBACK_SEED } else { seed };
    BASE_SEED.store(base, Ordering::Relaxed);
}

/// Seeds the calling thread's PRNG with a value derived from the base seed
/// and `salt` (e.g. a task id), so sibling threads diverge.
pub fn seed_thread(salt: u64) {
    let base = BASE_SEED.load(Ordering::Relaxed);
    let seed = base
        .wrapping_add(salt)
        .wrapping_mul(0x9E37_79B9_7F4A_7C15);
    // Avoid zero (xorshift fixed point).
    let seed = if seed == 0 { base ^ 0x1234_5678 } else { seed };
    PRNG_STATE.with(|state| state.set(seed));
}

// ---------------------------------------------------------------------------
// PRNG
// ---------------------------------------------------------------------------

/// Returns the next pseudo-random u64 for the calling thread.
pub fn next_random() -> u64 {
    PRNG_STATE.with(|state| {
        let mut x = state.get();
        if x == 0 {
            x = BASE_SEED.load(Ordering::Relaxed);
        }
        // xorshift64
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        state.set(x);
        x
    })
}

/// Returns a pseudo-random value in `range` (inclusive on both ends).
pub fn random_in(range: RangeInclusive<u64>) -> u64 {
    let (lo, hi) = range.into_inner();
    if hi <= lo {
        return lo;
    }
    match (hi - lo).checked_add(1) {
        Some(span) => lo + next_random() % span,
        None => next_random(),
    }
}

// ---------------------------------------------------------------------------
// Delay
// ---------------------------------------------------------------------------

/// Spins for a random duration in `[0, max_us)` microseconds.
///
/// Must not acquire any lock: it runs inside gate acquire/release paths.
#[inline]
pub fn stress_delay() {
    let max_us = MAX_US.load(Ordering::Relaxed);
    if max_us == 0 {
        return;
    }

    let target_ns = next_random() % (u64::from(max_us) * 1000);
    if target_ns == 0 {
        return;
    }

    let start = Instant::now();
    let target = Duration::from_nanos(target_ns);
    while start.elapsed() < target {
        core::hint::spin_loop();
    }
}
