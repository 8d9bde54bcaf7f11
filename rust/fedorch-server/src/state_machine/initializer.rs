use std::sync::Arc;

use fedorch_core::{registry::ModelRegistry, task::Task, tracking::Tracker};

use crate::{
    flow::RoundFlow,
    settings::RoundSettings,
    state_machine::{
        coordinator::CoordinatorState,
        events::{EventPublisher, EventSubscriber, ModelUpdate},
        phases::{Idle, PhaseName, PhaseState, Shared},
        StateMachine,
    },
};

/// The state machine initializer that initializes a new state machine for every round.
///
/// All state machines created by the same initializer publish their events to the same
/// [`EventSubscriber`].
pub struct RoundInitializer {
    flow: RoundFlow,
    settings: RoundSettings,
    tracker: Arc<dyn Tracker>,
    registry: Arc<dyn ModelRegistry>,
    events: EventPublisher,
}

impl RoundInitializer {
    /// Creates a new [`RoundInitializer`] and the subscriber to the events of its rounds.
    pub fn new(
        flow: RoundFlow,
        settings: RoundSettings,
        tracker: Arc<dyn Tracker>,
        registry: Arc<dyn ModelRegistry>,
    ) -> (Self, EventSubscriber) {
        let (events, subscriber) =
            EventPublisher::init(0, PhaseName::Idle, ModelUpdate::Invalidate);
        let initializer = Self {
            flow,
            settings,
            tracker,
            registry,
            events,
        };
        (initializer, subscriber)
    }

    /// Initializes a new [`StateMachine`] for the round of `task`.
    pub fn init(&self, task: Task) -> StateMachine {
        let shared = Shared::new(
            CoordinatorState::new(task, self.settings),
            self.flow.clone(),
            self.tracker.clone(),
            self.registry.clone(),
            self.events.clone(),
        );
        PhaseState::<Idle>::new(shared).into()
    }
}
