//! Reader-writer synchronizer with selectable admission policies.
//!
//! This crate contains the synchronization core used by the `rwsync`
//! demonstration tool: the [`Mode`](sync::Mode) policy enum, the
//! [`RwSync`](sync::RwSync) primitive that enforces it, and the unowned
//! [`Gate`](sync::Gate) exclusion the primitive is built from.
//!
//! The primitives are written against a small compatibility layer so they can
//! be tested with `cargo test`, loom (`--cfg loom`) and shuttle
//! (`--cfg shuttle`) without code changes.

#![warn(missing_docs)]

pub mod sync;

pub use sync::{Gate, Mode, Occupancy, ReadSection, RwSync, UnknownMode, WriteSection};
