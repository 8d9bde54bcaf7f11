#![cfg_attr(docsrs, feature(doc_cfg))]
//! # Fedorch node
//!
//! A node holds local data and trains a local model on behalf of the coordinator. It doesn't
//! decide anything on its own: every request of the coordinator carries one
//! [`Instruction`], which the node performs on its [`ClientSession`] before it replies.
//!
//! - [`settings`]: the name of the node, the use case it serves and the location of its data.
//! - [`session`]: the data, learner and tracking identifiers kept between stages.
//! - [`handlers`]: one handler per stage and the mapping of failures to error replies.
//! - [`data`]: loading the local CSV data.
//! - [`node`]: the loop answering the requests of the coordinator.
//!
//! [`Instruction`]: fedorch_core::instruction::Instruction
//! [`ClientSession`]: crate::session::ClientSession

pub mod data;
pub mod handlers;
pub mod node;
pub mod session;
pub mod settings;

#[cfg(test)]
pub(crate) mod testutils;
