//! Synchronization primitives for the reader-writer core.
//!
//! Provides [`RwSync`], which enforces one of four [`Mode`] policies, and
//! [`Gate`], the blocking binary exclusion it is assembled from. Also
//! provides [`stress`] delays for widening race windows.

mod gate;
mod mode;
mod rwsync;
pub mod stress;

pub(crate) mod loom_compat;

pub use gate::Gate;
pub use mode::{Mode, UnknownMode};
pub use rwsync::{Occupancy, ReadSection, RwSync, WriteSection};
