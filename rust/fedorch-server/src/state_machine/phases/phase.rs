use std::{fmt, sync::Arc};

use async_trait::async_trait;
use derive_more::Display;
use tracing::{error_span, info, warn};
use tracing_futures::Instrument;

use fedorch_core::{registry::ModelRegistry, tracking::Tracker};

use crate::{
    flow::RoundFlow,
    state_machine::{
        coordinator::CoordinatorState,
        events::EventPublisher,
        phases::{Failure, PhaseError},
        StateMachine,
    },
};

/// The name of the current phase.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum PhaseName {
    #[display(fmt = "Idle")]
    Idle,
    #[display(fmt = "Discover")]
    Discover,
    #[display(fmt = "Filter")]
    Filter,
    #[display(fmt = "Configure")]
    Configure,
    #[display(fmt = "Load")]
    Load,
    #[display(fmt = "Seed")]
    Seed,
    #[display(fmt = "Train")]
    Train,
    #[display(fmt = "Finalize")]
    Finalize,
    #[display(fmt = "Complete")]
    Complete,
    #[display(fmt = "Failure")]
    Failure,
}

/// A trait that must be implemented by a state in order to move to a next state.
///
/// The terminal states [`Complete`] and [`Failure`] don't move on and are concluded instead.
///
/// [`Complete`]: crate::state_machine::phases::Complete
#[async_trait]
pub trait Phase {
    /// The name of the current phase.
    const NAME: PhaseName;

    /// Performs the tasks of this phase.
    async fn process(&mut self) -> Result<(), PhaseError>;

    /// Broadcasts data of this phase (nothing by default).
    fn broadcast(&mut self) {}

    /// Moves from this phase to the next phase.
    fn next(self) -> StateMachine;
}

/// A struct that contains the coordinator state and the I/O interfaces that are shared and
/// accessible by all `PhaseState`s.
pub struct Shared {
    /// The coordinator state.
    pub(in crate::state_machine) state: CoordinatorState,
    /// The barriers to the nodes.
    pub(in crate::state_machine) flow: RoundFlow,
    /// The experiment tracker.
    pub(in crate::state_machine) tracker: Arc<dyn Tracker>,
    /// The model registry.
    pub(in crate::state_machine) registry: Arc<dyn ModelRegistry>,
    /// The event publisher.
    pub(in crate::state_machine) events: EventPublisher,
}

impl fmt::Debug for Shared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("state", &self.state)
            .field("events", &self.events)
            .finish()
    }
}

impl Shared {
    /// Creates the shared state of a round. Events are published with the id of the round.
    pub fn new(
        state: CoordinatorState,
        flow: RoundFlow,
        tracker: Arc<dyn Tracker>,
        registry: Arc<dyn ModelRegistry>,
        mut events: EventPublisher,
    ) -> Self {
        events.set_round_id(state.round_id());
        Self {
            state,
            flow,
            tracker,
            registry,
            events,
        }
    }

    /// Returns the current round ID.
    pub fn round_id(&self) -> u64 {
        self.state.round_id()
    }
}

/// The state corresponding to a phase of a round.
///
/// This contains the state-dependent `private` state and the state-independent `shared` state
/// which is shared across state transitions.
pub struct PhaseState<S> {
    /// The private state.
    pub(in crate::state_machine) private: S,
    /// The shared coordinator state and I/O interfaces.
    pub(in crate::state_machine) shared: Shared,
}

impl<S> PhaseState<S>
where
    S: Send,
    Self: Phase,
{
    /// Runs the current phase to completion.
    ///
    /// 1. Performs the phase tasks.
    /// 2. Broadcasts the phase data.
    /// 3. Transitions to the next phase.
    pub async fn run_phase(mut self) -> StateMachine {
        let phase = Self::NAME;
        let span = error_span!("run_phase", phase = %phase);

        async move {
            info!("starting phase");
            self.shared.events.broadcast_phase(phase);

            if let Err(err) = self.process().await {
                warn!("failed to perform the phase tasks");
                return self.into_failure_state(err);
            }
            info!("phase ran successfully");

            self.broadcast();

            info!("transitioning to the next phase");
            self.next()
        }
        .instrument(span)
        .await
    }
}

impl<S> PhaseState<S> {
    pub(in crate::state_machine) fn into_failure_state(self, err: PhaseError) -> StateMachine {
        PhaseState::<Failure>::new(self.shared, err).into()
    }
}
