//! Demonstration workloads.
//!
//! Each resource is built from atomics, so vanilla mode can tear or lose data
//! without undefined behavior. In synchronized modes the
//! [`RwSync`](rwsync_core::RwSync) bracket is what makes multi-step updates
//! appear whole.

pub mod file;
pub mod prime;
pub mod text;

use std::thread;
use std::time::Duration;

use rwsync_core::Mode;

/// Sleeps for `delay` between the steps of a multi-step update, but only in
/// vanilla mode, where it widens the race window.
pub(crate) fn race_window(mode: Mode, delay: Duration) {
    if !mode.is_synchronized() {
        thread::sleep(delay);
    }
}
