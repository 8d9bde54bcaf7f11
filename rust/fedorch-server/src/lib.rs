#![cfg_attr(docsrs, feature(doc_cfg))]
//! # Fedorch coordinator
//!
//! The coordinator runs federated learning rounds over a request/reply messaging fabric. It
//! picks up [`Task`]s from a task queue and runs one round per task: the connected nodes are
//! asked whether they serve the use case of the task, the participating nodes load their data
//! and model, and then the global model is trained in a fixed number of training barriers
//! before the final model is uploaded to the model registry.
//!
//! The crate is organized as follows:
//!
//! - [`driver`]: the transport seam. A [`Driver`] pushes requests to nodes and pulls their
//!   replies, [`driver::wait`] polls until every reply of a barrier has arrived.
//! - [`flow`]: the barriers of a round. Every operation of the node protocol is one
//!   broadcast-then-wait-for-all [`RoundFlow`] call with an optional success check.
//! - [`state_machine`]: the phases of a round and the events published while it runs.
//! - [`queue`]: the consumption of the task queue and the publishing of status updates.
//! - [`settings`]: the configuration of the coordinator.
//!
//! [`Task`]: fedorch_core::task::Task
//! [`Driver`]: crate::driver::Driver
//! [`RoundFlow`]: crate::flow::RoundFlow

pub mod driver;
pub mod flow;
pub mod queue;
pub mod settings;
pub mod state_machine;

#[cfg(test)]
pub(crate) mod testutils;
