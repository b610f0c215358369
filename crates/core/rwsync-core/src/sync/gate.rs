//! Unowned blocking exclusion.
//!
//! Uses test-and-test-and-set (TTAS) with a bounded spin, then parks the
//! caller on a condition variable. Unlike a mutex guard, a held [`Gate`] may
//! be released by any thread.

use std::fmt;
use std::sync::PoisonError;

use super::loom_compat::{AtomicBool, Condvar, Mutex, Ordering, SPIN_LIMIT};

/// A blocking binary exclusion with no owner.
///
/// The reader group's resource exclusion is acquired by the first reader and
/// released by whichever reader leaves last, so the exclusion cannot be tied
/// to the acquiring thread the way [`std::sync::MutexGuard`] is.
pub struct Gate {
    locked: AtomicBool,
    /// Number of threads parked in [`Gate::acquire`].
    sleepers: Mutex<u32>,
    wakeup: Condvar,
}

impl Gate {
    /// Creates a new open gate.
    #[must_use]
    pub fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
            sleepers: Mutex::new(0),
            wakeup: Condvar::new(),
        }
    }

    /// Acquires the gate, blocking until it becomes available.
    ///
    /// There is no timeout and no way to abandon the wait.
    pub fn acquire(&self) {
        #[cfg(rwsync_stress)]
        super::stress::stress_delay();

        let mut spins = 0;
        loop {
            // Fast path: try to acquire directly.
            if self.try_acquire() {
                return;
            }
            if spins >= SPIN_LIMIT {
                break;
            }

            // TTAS: spin on a read (shared cache line) until it looks free.
            while self.locked.load(Ordering::Relaxed) && spins < SPIN_LIMIT {
                core::hint::spin_loop();
                spins += 1;
            }
            spins += 1;
        }

        self.acquire_slow();
    }

    /// Parks until a release hands the gate over.
    fn acquire_slow(&self) {
        let mut sleepers = self.sleepers.lock().unwrap_or_else(PoisonError::into_inner);
        *sleepers += 1;
        // The releaser clears `locked` before taking `sleepers`, so a release
        // that races with the check below is followed by a notify we will see.
        while !self.try_acquire() {
            sleepers = self
                .wakeup
                .wait(sleepers)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *sleepers -= 1;
    }

    /// Attempts to acquire the gate without blocking.
    ///
    /// Returns `true` if the gate was acquired.
    pub fn try_acquire(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Releases the gate and wakes one parked waiter.
    ///
    /// May be called from a thread other than the one that acquired it.
    pub fn release(&self) {
        let was_locked = self.locked.swap(false, Ordering::Release);
        debug_assert!(was_locked, "Gate::release on an open gate");

        #[cfg(rwsync_stress)]
        super::stress::stress_delay();

        let sleepers = self.sleepers.lock().unwrap_or_else(PoisonError::into_inner);
        if *sleepers > 0 {
            self.wakeup.notify_one();
        }
    }

    /// Returns `true` if the gate is currently held.
    ///
    /// The answer may be stale by the time the caller looks at it.
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gate")
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}

#[cfg(all(test, not(any(loom, shuttle))))]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn acquire_release() {
        let gate = Gate::new();
        gate.acquire();
        assert!(gate.is_locked());
        gate.release();
        assert!(!gate.is_locked());
    }

    #[test]
    fn try_acquire_fails_when_held() {
        let gate = Gate::new();
        assert!(gate.try_acquire());
        assert!(!gate.try_acquire());
        gate.release();
        assert!(gate.try_acquire());
    }

    #[test]
    fn released_by_another_thread() {
        let gate = Arc::new(Gate::new());
        gate.acquire();

        let releaser = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || gate.release())
        };
        releaser.join().unwrap();

        assert!(gate.try_acquire());
    }

    #[test]
    fn blocked_waiter_is_woken() {
        let gate = Arc::new(Gate::new());
        gate.acquire();

        let entered = Arc::new(AtomicUsize::new(0));
        let waiter = {
            let gate = Arc::clone(&gate);
            let entered = Arc::clone(&entered);
            thread::spawn(move || {
                gate.acquire();
                entered.fetch_add(1, Ordering::SeqCst);
                gate.release();
            })
        };

        // Give the waiter time to exhaust its spin and park.
        thread::sleep(Duration::from_millis(20));
        assert_eq!(entered.load(Ordering::SeqCst), 0);

        gate.release();
        waiter.join().unwrap();
        assert_eq!(entered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn contended_counter_is_exact() {
        const THREADS: usize = 8;
        const ROUNDS: usize = 2_000;

        let gate = Arc::new(Gate::new());
        let counter = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let gate = Arc::clone(&gate);
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..ROUNDS {
                        gate.acquire();
                        // Non-atomic read-modify-write made safe by the gate.
                        let v = counter.load(Ordering::Relaxed);
                        counter.store(v + 1, Ordering::Relaxed);
                        gate.release();
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), THREADS * ROUNDS);
        assert!(!gate.is_locked());
    }
}
