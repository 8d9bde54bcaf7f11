//! Helpers for tests of the coordinator, the nodes and the end-to-end simulation.
//!
//! Besides record fixtures this provides in-memory implementations of the external
//! collaborators: a [`MemoryTracker`], a [`MemoryRegistry`] and a deterministic
//! [`ShiftModel`].
//!
//! [`MemoryTracker`]: tracking::MemoryTracker
//! [`MemoryRegistry`]: registry::MemoryRegistry
//! [`ShiftModel`]: registry::ShiftModel

pub mod records;
pub mod registry;
pub mod tracking;
