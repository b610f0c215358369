//! Reader-writer synchronizer with four admission policies.
//!
//! [`RwSync`] gates access to a resource it does not own. Callers bracket
//! their critical sections with [`RwSync::reader_enter`] /
//! [`RwSync::reader_exit`] or [`RwSync::writer_enter`] /
//! [`RwSync::writer_exit`] (or use the RAII [`ReadSection`] /
//! [`WriteSection`] helpers).
//!
//! ## Caller states
//!
//! - Writer: `Idle -> Admitting -> Exclusive -> Idle`.
//! - Reader: `Idle -> JoiningGroup -> ActiveInGroup -> LeavingGroup -> Idle`.
//!   The resource exclusion is held by the reader group as a whole: acquired
//!   on the 0 -> 1 transition of the group size and released on 1 -> 0.
//!
//! ## Exclusions per mode
//!
//! | Mode               | counters | resource | admission | turnstile |
//! |--------------------|----------|----------|-----------|-----------|
//! | `Unsynchronized`   |          |          |           |           |
//! | `ReaderPreference` | x        | x        |           |           |
//! | `WriterPreference` | x        | x        | x         |           |
//! | `Fair`             | x        | x        |           | x         |
//!
//! The fair turnstile is released as soon as a reader has joined the group,
//! so a writer that won the turnstile can still be overtaken by readers
//! already past it. Admission order is approximately, not strictly, FIFO.

use super::gate::Gate;
use super::loom_compat::{AtomicI64, AtomicU64, Ordering};
use super::mode::Mode;

/// Shift of the writer count inside the packed occupancy word.
const WRITER_SHIFT: u32 = 32;

/// The exclusions a mode needs. Unused exclusions are never constructed.
enum Gates {
    Unsynchronized,
    ReaderPreference {
        counters: Gate,
        resource: Gate,
    },
    WriterPreference {
        counters: Gate,
        resource: Gate,
        admission: Gate,
    },
    Fair {
        counters: Gate,
        resource: Gate,
        turnstile: Gate,
    },
}

/// Which half of the occupancy word an update touches.
#[derive(Clone, Copy)]
enum Side {
    Readers,
    Writers,
}

/// A point-in-time view of a synchronizer's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Occupancy {
    /// Readers inside their critical section.
    pub readers: i64,
    /// Writers inside their critical section.
    pub writers: i64,
    /// Writers that announced intent but have not entered yet
    /// (writer-preference mode only).
    pub waiting_writers: i64,
}

impl Occupancy {
    /// Returns `true` if no caller is inside or waiting.
    pub fn is_idle(&self) -> bool {
        self.readers == 0 && self.writers == 0 && self.waiting_writers == 0
    }

    /// Returns `true` if the reader/writer exclusion invariants hold.
    pub fn is_consistent(&self) -> bool {
        self.readers >= 0
            && self.waiting_writers >= 0
            && (0..=1).contains(&self.writers)
            && (self.writers == 0 || self.readers == 0)
    }
}

/// A reader-writer synchronizer enforcing one [`Mode`].
///
/// Every `*_enter` must be matched by exactly one `*_exit` of the same kind
/// from the same logical caller before that caller enters again. The
/// synchronizer cannot detect violations; a skipped exit leaves every other
/// caller blocked forever. No operation times out or can be cancelled.
pub struct RwSync {
    gates: Gates,
    /// Reader count in the low half, writer count in the high half, so both
    /// are observed in one load.
    occupancy: AtomicU64,
    waiting_writers: AtomicI64,
}

impl RwSync {
    /// Creates a synchronizer enforcing `mode`.
    #[must_use]
    pub fn new(mode: Mode) -> Self {
        let gates = match mode {
            Mode::Unsynchronized => Gates::Unsynchronized,
            Mode::ReaderPreference => Gates::ReaderPreference {
                counters: Gate::new(),
                resource: Gate::new(),
            },
            Mode::WriterPreference => Gates::WriterPreference {
                counters: Gate::new(),
                resource: Gate::new(),
                admission: Gate::new(),
            },
            Mode::Fair => Gates::Fair {
                counters: Gate::new(),
                resource: Gate::new(),
                turnstile: Gate::new(),
            },
        };
        Self {
            gates,
            occupancy: AtomicU64::new(0),
            waiting_writers: AtomicI64::new(0),
        }
    }

    /// Returns the mode this synchronizer was created with.
    pub fn mode(&self) -> Mode {
        match self.gates {
            Gates::Unsynchronized => Mode::Unsynchronized,
            Gates::ReaderPreference { .. } => Mode::ReaderPreference,
            Gates::WriterPreference { .. } => Mode::WriterPreference,
            Gates::Fair { .. } => Mode::Fair,
        }
    }

    /// Returns the display name of this synchronizer's mode.
    pub fn mode_name(&self) -> &'static str {
        self.mode().name()
    }

    // -----------------------------------------------------------------------
    // Readers
    // -----------------------------------------------------------------------

    /// Blocks until the caller may read the protected resource.
    pub fn reader_enter(&self) {
        match &self.gates {
            Gates::Unsynchronized => {
                self.adjust(Side::Readers, 1);
            }
            Gates::ReaderPreference { counters, resource } => {
                self.join_group(counters, resource);
            }
            Gates::WriterPreference {
                counters,
                resource,
                admission,
            } => {
                // A waiting or active writer holds `admission`.
                admission.acquire();
                self.join_group(counters, resource);
                admission.release();
            }
            Gates::Fair {
                counters,
                resource,
                turnstile,
            } => {
                turnstile.acquire();
                self.join_group(counters, resource);
                turnstile.release();
            }
        }
    }

    /// Leaves the reader group; the last reader out releases the resource.
    pub fn reader_exit(&self) {
        match &self.gates {
            Gates::Unsynchronized => {
                self.adjust(Side::Readers, -1);
            }
            Gates::ReaderPreference { counters, resource }
            | Gates::WriterPreference {
                counters, resource, ..
            }
            | Gates::Fair {
                counters, resource, ..
            } => {
                counters.acquire();
                if self.adjust(Side::Readers, -1) == 0 {
                    resource.release();
                }
                counters.release();
            }
        }
    }

    /// Increments the group size, taking the resource on the group's behalf
    /// if the group was empty.
    ///
    /// `counters` stays held while the first reader waits for the resource,
    /// which keeps later readers queued behind it.
    fn join_group(&self, counters: &Gate, resource: &Gate) {
        counters.acquire();
        if self.readers() == 0 {
            resource.acquire();
        }
        self.adjust(Side::Readers, 1);
        counters.release();
    }

    // -----------------------------------------------------------------------
    // Writers
    // -----------------------------------------------------------------------

    /// Blocks until the caller has sole access to the protected resource.
    pub fn writer_enter(&self) {
        match &self.gates {
            Gates::Unsynchronized => {
                self.adjust(Side::Writers, 1);
            }
            Gates::ReaderPreference { resource, .. } => {
                resource.acquire();
                self.adjust(Side::Writers, 1);
            }
            Gates::WriterPreference {
                counters,
                resource,
                admission,
            } => {
                counters.acquire();
                self.waiting_writers.fetch_add(1, Ordering::Relaxed);
                counters.release();

                // Close the door on new readers, then wait for the current
                // group to drain.
                admission.acquire();
                resource.acquire();

                counters.acquire();
                self.waiting_writers.fetch_sub(1, Ordering::Relaxed);
                self.adjust(Side::Writers, 1);
                counters.release();
            }
            Gates::Fair {
                resource, turnstile, ..
            } => {
                turnstile.acquire();
                resource.acquire();
                self.adjust(Side::Writers, 1);
                turnstile.release();
            }
        }
    }

    /// Gives up sole access to the protected resource.
    pub fn writer_exit(&self) {
        match &self.gates {
            Gates::Unsynchronized => {
                self.adjust(Side::Writers, -1);
            }
            Gates::ReaderPreference { resource, .. } | Gates::Fair { resource, .. } => {
                self.adjust(Side::Writers, -1);
                resource.release();
            }
            Gates::WriterPreference {
                counters,
                resource,
                admission,
            } => {
                counters.acquire();
                self.adjust(Side::Writers, -1);
                counters.release();

                resource.release();
                admission.release();
            }
        }
    }

    // -----------------------------------------------------------------------
    // Sections
    // -----------------------------------------------------------------------

    /// Enters as a reader and returns a guard that exits on drop.
    pub fn read(&self) -> ReadSection<'_> {
        self.reader_enter();
        ReadSection { sync: self }
    }

    /// Enters as a writer and returns a guard that exits on drop.
    pub fn write(&self) -> WriteSection<'_> {
        self.writer_enter();
        WriteSection { sync: self }
    }

    // -----------------------------------------------------------------------
    // Counters
    // -----------------------------------------------------------------------

    /// Returns the current counters.
    ///
    /// Readers and writers come from a single load. Under
    /// [`Mode::Unsynchronized`] the values reflect whatever the racing
    /// updates left behind.
    pub fn snapshot(&self) -> Occupancy {
        let word = self.occupancy.load(Ordering::SeqCst);
        Occupancy {
            readers: i64::from(field(word, Side::Readers)),
            writers: i64::from(field(word, Side::Writers)),
            waiting_writers: self.waiting_writers.load(Ordering::SeqCst),
        }
    }

    fn readers(&self) -> i32 {
        field(self.occupancy.load(Ordering::Relaxed), Side::Readers)
    }

    /// Adds `delta` to one side of the occupancy word and returns the new
    /// value of that side.
    fn adjust(&self, side: Side, delta: i32) -> i32 {
        if let Gates::Unsynchronized = self.gates {
            // Deliberately split load and store: concurrent callers lose
            // each other's updates.
            let word = self.occupancy.load(Ordering::Relaxed);
            let next = with_field(word, side, field(word, side).wrapping_add(delta));
            self.occupancy.store(next, Ordering::Relaxed);
            return field(next, side);
        }

        let mut word = self.occupancy.load(Ordering::Relaxed);
        loop {
            let next = with_field(word, side, field(word, side).wrapping_add(delta));
            match self.occupancy.compare_exchange_weak(
                word,
                next,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => return field(next, side),
                Err(current) => word = current,
            }
        }
    }
}

impl core::fmt::Debug for RwSync {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RwSync")
            .field("mode", &self.mode())
            .field("occupancy", &self.snapshot())
            .finish_non_exhaustive()
    }
}

impl Drop for RwSync {
    fn drop(&mut self) {
        // Tearing down while a caller holds or awaits a gate is undefined at
        // the protocol level; catch it in debug builds.
        if self.mode().is_synchronized() && !std::thread::panicking() {
            debug_assert!(
                self.snapshot().is_idle(),
                "RwSync dropped while in use: {:?}",
                self.snapshot()
            );
        }
    }
}

#[allow(clippy::cast_possible_wrap)]
fn field(word: u64, side: Side) -> i32 {
    match side {
        Side::Readers => word as u32 as i32,
        Side::Writers => (word >> WRITER_SHIFT) as u32 as i32,
    }
}

#[allow(clippy::cast_sign_loss)]
fn with_field(word: u64, side: Side, value: i32) -> u64 {
    let value = u64::from(value as u32);
    match side {
        Side::Readers => (word & !u64::from(u32::MAX)) | value,
        Side::Writers => (word & u64::from(u32::MAX)) | (value << WRITER_SHIFT),
    }
}

/// RAII bracket for a reader critical section. Calls
/// [`RwSync::reader_exit`] on drop.
#[must_use = "dropping the section immediately exits the critical section"]
pub struct ReadSection<'a> {
    sync: &'a RwSync,
}

impl Drop for ReadSection<'_> {
    fn drop(&mut self) {
        self.sync.reader_exit();
    }
}

/// RAII bracket for a writer critical section. Calls
/// [`RwSync::writer_exit`] on drop.
#[must_use = "dropping the section immediately exits the critical section"]
pub struct WriteSection<'a> {
    sync: &'a RwSync,
}

impl Drop for WriteSection<'_> {
    fn drop(&mut self) {
        self.sync.writer_exit();
    }
}

#[cfg(all(test, not(any(loom, shuttle))))]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::{Arc, Barrier, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    const SYNCHRONIZED: [Mode; 3] = [Mode::ReaderPreference, Mode::WriterPreference, Mode::Fair];

    /// Polls `cond` until it holds, failing the test after five seconds.
    fn wait_until(what: &str, cond: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn gate_of(sync: &RwSync, which: &str) -> bool {
        match (&sync.gates, which) {
            (Gates::WriterPreference { admission, .. }, "admission") => admission.is_locked(),
            (Gates::Fair { turnstile, .. }, "turnstile") => turnstile.is_locked(),
            (
                Gates::ReaderPreference { resource, .. }
                | Gates::WriterPreference { resource, .. }
                | Gates::Fair { resource, .. },
                "resource",
            ) => resource.is_locked(),
            _ => panic!("{which} gate not used by {}", sync.mode()),
        }
    }

    #[test]
    fn packed_fields_round_trip_negative_values() {
        let word = with_field(with_field(0, Side::Readers, -3), Side::Writers, 2);
        assert_eq!(field(word, Side::Readers), -3);
        assert_eq!(field(word, Side::Writers), 2);
    }

    #[test]
    fn mode_is_fixed_at_construction() {
        for mode in Mode::ALL {
            let sync = RwSync::new(mode);
            assert_eq!(sync.mode(), mode);
            assert_eq!(sync.mode_name(), mode.name());
        }
    }

    #[test]
    fn counters_track_sections() {
        for mode in SYNCHRONIZED {
            let sync = RwSync::new(mode);
            {
                let _w = sync.write();
                let occ = sync.snapshot();
                assert_eq!((occ.readers, occ.writers), (0, 1), "{mode}");
            }
            {
                let _r = sync.read();
                let occ = sync.snapshot();
                assert_eq!((occ.readers, occ.writers), (1, 0), "{mode}");
            }
            assert!(sync.snapshot().is_idle(), "{mode}");
        }
    }

    #[test]
    fn readers_share_the_resource() {
        for mode in SYNCHRONIZED {
            let sync = Arc::new(RwSync::new(mode));
            let inside = Arc::new(Barrier::new(3));
            let leave = Arc::new(Barrier::new(3));

            let readers: Vec<_> = (0..2)
                .map(|_| {
                    let sync = Arc::clone(&sync);
                    let inside = Arc::clone(&inside);
                    let leave = Arc::clone(&leave);
                    thread::spawn(move || {
                        let _r = sync.read();
                        inside.wait();
                        leave.wait();
                    })
                })
                .collect();

            inside.wait();
            assert_eq!(sync.snapshot().readers, 2, "{mode}");
            leave.wait();
            for r in readers {
                r.join().unwrap();
            }
            assert!(sync.snapshot().is_idle(), "{mode}");
        }
    }

    #[test]
    fn writer_excludes_readers_and_writers() {
        for mode in SYNCHRONIZED {
            let sync = Arc::new(RwSync::new(mode));
            sync.writer_enter();

            let reader_in = Arc::new(AtomicBool::new(false));
            let writer_in = Arc::new(AtomicBool::new(false));
            let reader = {
                let (sync, flag) = (Arc::clone(&sync), Arc::clone(&reader_in));
                thread::spawn(move || {
                    let _r = sync.read();
                    flag.store(true, Ordering::SeqCst);
                })
            };
            let writer = {
                let (sync, flag) = (Arc::clone(&sync), Arc::clone(&writer_in));
                thread::spawn(move || {
                    let _w = sync.write();
                    flag.store(true, Ordering::SeqCst);
                })
            };

            thread::sleep(Duration::from_millis(30));
            assert!(!reader_in.load(Ordering::SeqCst), "{mode}");
            assert!(!writer_in.load(Ordering::SeqCst), "{mode}");

            sync.writer_exit();
            reader.join().unwrap();
            writer.join().unwrap();
            assert!(reader_in.load(Ordering::SeqCst) && writer_in.load(Ordering::SeqCst));
            assert!(sync.snapshot().is_idle(), "{mode}");
        }
    }

    #[test]
    fn reader_group_keeps_resource_until_last_exit() {
        for mode in SYNCHRONIZED {
            let sync = RwSync::new(mode);
            sync.reader_enter();
            sync.reader_enter();
            assert!(gate_of(&sync, "resource"));
            sync.reader_exit();
            assert!(gate_of(&sync, "resource"), "{mode}: released early");
            sync.reader_exit();
            assert!(!gate_of(&sync, "resource"), "{mode}: not released");
        }
    }

    #[test]
    fn reader_preference_lets_readers_pass_waiting_writer() {
        let sync = Arc::new(RwSync::new(Mode::ReaderPreference));
        sync.reader_enter();

        let writer_in = Arc::new(AtomicBool::new(false));
        let writer = {
            let (sync, flag) = (Arc::clone(&sync), Arc::clone(&writer_in));
            thread::spawn(move || {
                let _w = sync.write();
                flag.store(true, Ordering::SeqCst);
            })
        };
        thread::sleep(Duration::from_millis(20));

        // A second reader joins even though a writer is waiting.
        let late_reader = {
            let sync = Arc::clone(&sync);
            thread::spawn(move || sync.reader_enter())
        };
        late_reader.join().unwrap();
        assert_eq!(sync.snapshot().readers, 2);
        assert!(!writer_in.load(Ordering::SeqCst));

        sync.reader_exit();
        sync.reader_exit();
        writer.join().unwrap();
        assert!(writer_in.load(Ordering::SeqCst));
        assert!(sync.snapshot().is_idle());
    }

    #[test]
    fn writer_preference_blocks_new_readers() {
        let sync = Arc::new(RwSync::new(Mode::WriterPreference));
        let order = Arc::new(Mutex::new(Vec::new()));
        sync.reader_enter();

        let writer = {
            let (sync, order) = (Arc::clone(&sync), Arc::clone(&order));
            thread::spawn(move || {
                let _w = sync.write();
                order.lock().unwrap().push("writer");
            })
        };
        wait_until("writer to announce itself", || {
            sync.snapshot().waiting_writers == 1 && gate_of(&sync, "admission")
        });

        let late_reader = {
            let (sync, order) = (Arc::clone(&sync), Arc::clone(&order));
            thread::spawn(move || {
                let _r = sync.read();
                order.lock().unwrap().push("reader");
            })
        };
        thread::sleep(Duration::from_millis(20));
        assert_eq!(sync.snapshot().readers, 1, "late reader joined the group");

        sync.reader_exit();
        writer.join().unwrap();
        late_reader.join().unwrap();
        assert_eq!(*order.lock().unwrap(), ["writer", "reader"]);
        assert!(sync.snapshot().is_idle());
    }

    #[test]
    fn waiting_writers_counts_every_blocked_writer() {
        let sync = Arc::new(RwSync::new(Mode::WriterPreference));
        sync.reader_enter();

        let writers: Vec<_> = (0..3)
            .map(|_| {
                let sync = Arc::clone(&sync);
                thread::spawn(move || drop(sync.write()))
            })
            .collect();
        wait_until("three writers to queue", || {
            sync.snapshot().waiting_writers == 3
        });
        let snap = sync.snapshot();
        assert_eq!((snap.readers, snap.writers), (1, 0));
        assert!(snap.is_consistent());

        sync.reader_exit();
        for w in writers {
            w.join().unwrap();
        }
        assert_eq!(sync.snapshot().waiting_writers, 0);
        assert!(sync.snapshot().is_idle());
    }

    #[test]
    fn fair_turnstile_queues_readers_behind_writer() {
        let sync = Arc::new(RwSync::new(Mode::Fair));
        let order = Arc::new(Mutex::new(Vec::new()));
        sync.reader_enter();

        let writer = {
            let (sync, order) = (Arc::clone(&sync), Arc::clone(&order));
            thread::spawn(move || {
                let _w = sync.write();
                order.lock().unwrap().push("writer");
            })
        };
        // The writer holds the turnstile while it waits for the group.
        wait_until("writer to hold the turnstile", || gate_of(&sync, "turnstile"));

        let late_reader = {
            let (sync, order) = (Arc::clone(&sync), Arc::clone(&order));
            thread::spawn(move || {
                let _r = sync.read();
                order.lock().unwrap().push("reader");
            })
        };
        thread::sleep(Duration::from_millis(20));
        assert_eq!(sync.snapshot().readers, 1, "late reader overtook the writer");

        sync.reader_exit();
        writer.join().unwrap();
        late_reader.join().unwrap();
        assert_eq!(*order.lock().unwrap(), ["writer", "reader"]);
        assert!(sync.snapshot().is_idle());
    }

    #[test]
    fn snapshot_is_consistent_under_contention() {
        for mode in SYNCHRONIZED {
            let sync = Arc::new(RwSync::new(mode));
            let mut handles = Vec::new();

            for i in 0..6 {
                let sync = Arc::clone(&sync);
                handles.push(thread::spawn(move || {
                    for _ in 0..300 {
                        if i < 2 {
                            let _w = sync.write();
                            let occ = sync.snapshot();
                            assert!(occ.is_consistent() && occ.writers == 1, "{occ:?}");
                        } else {
                            let _r = sync.read();
                            let occ = sync.snapshot();
                            assert!(occ.is_consistent() && occ.readers >= 1, "{occ:?}");
                        }
                    }
                }));
            }
            for h in handles {
                h.join().unwrap();
            }
            assert!(sync.snapshot().is_idle(), "{mode}");
        }
    }

    #[test]
    fn unsynchronized_never_blocks() {
        let sync = RwSync::new(Mode::Unsynchronized);
        sync.writer_enter();
        sync.writer_enter();
        sync.reader_enter();
        let occ = sync.snapshot();
        assert_eq!((occ.readers, occ.writers), (1, 2));
        assert!(!occ.is_consistent());
        sync.reader_exit();
        sync.writer_exit();
        sync.writer_exit();
        assert!(sync.snapshot().is_idle());
    }
}
