//! # Fedorch simulation
//!
//! Runs the coordinator and its nodes in a single process. The nodes are connected through an
//! in-memory [`Fabric`] which encodes every message the way a real transport would, and share
//! an in-memory model registry and tracker with the coordinator. The nodes train the
//! [`IrisModel`] on the iris dataset found in `data/`.
//!
//! [`Fabric`]: crate::fabric::Fabric
//! [`IrisModel`]: crate::iris::IrisModel

pub mod fabric;
pub mod iris;
pub mod settings;
pub mod simulation;
