#![cfg_attr(docsrs, feature(doc_cfg))]
//! # Fedorch core
//!
//! Building blocks shared by the fedorch coordinator and the federated learning nodes it
//! drives.
//!
//! A training round is a sequence of request/reply barriers: the coordinator sends one typed
//! [`Instruction`] to every participating node, waits until each of them replied and then acts
//! on the replies. This crate contains everything both sides of that exchange have to agree
//! on:
//!
//! - [`records`]: the keyed bags of typed values carried by messages (configuration values,
//!   parameter arrays and scalar metrics) and the byte-level encoding of parameter arrays.
//! - [`message`]: the envelope around a record set (addressing, time-to-live, group tag,
//!   correlation ids) and the transport-level error a node reports instead of content.
//! - [`instruction`] and [`reply`]: the closed set of operations a node understands and the
//!   structured replies it produces.
//! - [`aggregation`]: the mean aggregation of parameters and metrics and the [`Aggregator`]
//!   strategy interface.
//! - [`learner`], [`registry`] and [`tracking`]: the capability interfaces of the external
//!   collaborators (trainable models, the model registry and the experiment tracker).
//! - [`task`]: the round description submitted by users and its status updates.
//!
//! [`Instruction`]: crate::instruction::Instruction
//! [`Aggregator`]: crate::aggregation::Aggregator

pub mod aggregation;
pub mod codec;
pub mod instruction;
pub mod learner;
pub mod message;
pub mod records;
pub mod registry;
pub mod reply;
pub mod task;
pub mod tracking;

#[cfg(any(test, feature = "testutils"))]
#[cfg_attr(docsrs, doc(cfg(feature = "testutils")))]
pub mod testutils;

/// The identifier of a node taking part in a round.
pub type NodeId = u64;
