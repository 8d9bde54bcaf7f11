//! The state machine that runs a round.
//!
//! # Overview
//!
//! A round runs one [`Task`] to completion. Its phases are strictly sequential and every phase
//! which talks to the nodes does so through barriers, see [`RoundFlow`].
//!
//! ```text
//! Idle -> Discover -> Filter -> Configure -> Load -> Seed -> Train (x N) -> Finalize -> Complete
//! ```
//!
//! Any phase may fail, which moves the [`StateMachine`] to the **Failure** state and aborts the
//! round. There are no retries.
//!
//! # Phase states
//!
//! **Idle**
//!
//! Publishes [`PhaseName::Idle`] and invalidates the global model of the previous round.
//!
//! **Discover**
//!
//! Gets the ids of the connected nodes from the transport.
//!
//! **Filter**
//!
//! Asks the connected nodes whether they serve the use case of the task and keeps the ones that
//! do, in reply order. Fails if fewer than [`RoundSettings::min_nodes`] are left.
//!
//! **Configure**
//!
//! Creates the parent tracking run of the round and its `global` child run, then hands the run
//! identifiers to the nodes, which open their own child runs.
//!
//! **Load**
//!
//! Loads the model of the task from the registry to get its aggregator, then makes the nodes
//! load their data, instantiate their learner and prepare the data.
//!
//! **Seed**
//!
//! Gets the parameters of one randomly picked node and sets them on every node. Publishes the
//! initial global model.
//!
//! **Train**
//!
//! Runs one training barrier from the current global parameters, aggregates the returned
//! parameters and metrics, logs the metrics at the step of the iteration, sets the aggregated
//! parameters on every node and publishes them. Repeats exactly `num_global_iterations` times.
//!
//! **Finalize**
//!
//! Uploads the final global parameters through one randomly picked node, finishes the tracking
//! runs and makes the nodes finish theirs.
//!
//! **Complete** / **Failure**
//!
//! Terminal states. A completed round yields a [`RoundSummary`], a failed round finishes the
//! tracking runs which are still open and yields the [`PhaseError`] that aborted it.
//!
//! # Events
//!
//! During a round the [`StateMachine`] publishes the current phase, the global model and the
//! aggregated metrics. Everyone who is interested in the events can subscribe to them via the
//! [`EventSubscriber`] returned by [`RoundInitializer::new()`].
//!
//! [`Task`]: fedorch_core::task::Task
//! [`RoundFlow`]: crate::flow::RoundFlow
//! [`RoundSettings::min_nodes`]: crate::settings::RoundSettings::min_nodes
//! [`PhaseName::Idle`]: crate::state_machine::phases::PhaseName::Idle
//! [`RoundSummary`]: crate::state_machine::phases::RoundSummary
//! [`PhaseError`]: crate::state_machine::phases::PhaseError
//! [`EventSubscriber`]: crate::state_machine::events::EventSubscriber

pub mod coordinator;
pub mod events;
pub mod initializer;
pub mod phases;


use derive_more::From;

pub use self::initializer::RoundInitializer;
use self::phases::{
    Complete,
    Configure,
    Discover,
    Failure,
    Filter,
    Finalize,
    Idle,
    Load,
    PhaseError,
    PhaseState,
    RoundSummary,
    Seed,
    Train,
};

/// The state machine with all its states.
#[derive(From)]
pub enum StateMachine {
    Idle(PhaseState<Idle>),
    Discover(PhaseState<Discover>),
    Filter(PhaseState<Filter>),
    Configure(PhaseState<Configure>),
    Load(PhaseState<Load>),
    Seed(PhaseState<Seed>),
    Train(PhaseState<Train>),
    Finalize(PhaseState<Finalize>),
    Complete(PhaseState<Complete>),
    Failure(PhaseState<Failure>),
}

impl StateMachine {
    /// Moves the [`StateMachine`] to the next state and consumes the current one.
    ///
    /// The terminal states [`Complete`] and [`Failure`] are returned unchanged.
    pub async fn next(self) -> Self {
        match self {
            StateMachine::Idle(state) => state.run_phase().await,
            StateMachine::Discover(state) => state.run_phase().await,
            StateMachine::Filter(state) => state.run_phase().await,
            StateMachine::Configure(state) => state.run_phase().await,
            StateMachine::Load(state) => state.run_phase().await,
            StateMachine::Seed(state) => state.run_phase().await,
            StateMachine::Train(state) => state.run_phase().await,
            StateMachine::Finalize(state) => state.run_phase().await,
            terminal => terminal,
        }
    }

    /// Runs the state machine until the round completed or failed.
    pub async fn run(mut self) -> Result<RoundSummary, PhaseError> {
        loop {
            self = match self {
                StateMachine::Complete(state) => return Ok(state.conclude().await),
                StateMachine::Failure(state) => return Err(state.conclude().await),
                state => state.next().await,
            };
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, StateMachine::Complete(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, StateMachine::Failure(_))
    }
}
