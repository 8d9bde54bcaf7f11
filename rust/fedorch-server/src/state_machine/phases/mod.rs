//! The phases of a round, one module per phase of the [`StateMachine`].
//!
//! [`StateMachine`]: crate::state_machine::StateMachine

mod complete;
mod configure;
mod discover;
mod failure;
mod filter;
mod finalize;
mod idle;
mod load;
mod phase;
mod seed;
mod train;

pub use self::{
    complete::{Complete, RoundSummary},
    configure::Configure,
    discover::Discover,
    failure::{Failure, PhaseError},
    filter::Filter,
    finalize::Finalize,
    idle::Idle,
    load::Load,
    phase::{Phase, PhaseName, PhaseState, Shared},
    seed::Seed,
    train::Train,
};
